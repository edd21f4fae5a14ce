//! End-to-end runs of the navigation engine against scripted collaborators.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use image::{GrayImage, Luma};
use voxnav::device::{DeviceLink, Modality};
use voxnav::executor::ActionExecutor;
use voxnav::history::{Action, ActionOutcome};
use voxnav::log::ExecutionLog;
use voxnav::navigation::{
    Collaborators, ConsentMode, NavigationConfig, NavigationEngine, Outcome, RuleBook, Strategy,
};
use voxnav::oracle::{ActionOracle, OracleRequest};
use voxnav::screen::{ScreenChangeDetector, ScreenDescription};
use voxnav::syslog::ForegroundProbe;

/// A scripted screen: captions plus where the dark band of its image ends.
struct Screen {
    captions: Vec<&'static str>,
    band: u32,
}

fn screen(captions: &[&'static str], band: u32) -> Screen {
    Screen {
        captions: captions.to_vec(),
        band,
    }
}

/// Device whose current screen is shared with the executor. Descriptions
/// are answered for the screen that was up when the screenshot was taken.
struct ScriptedDevice {
    screens: Vec<Screen>,
    current: Rc<Cell<usize>>,
    shots: HashMap<PathBuf, usize>,
}

impl ScriptedDevice {
    fn new(screens: Vec<Screen>, current: Rc<Cell<usize>>) -> Self {
        Self {
            screens,
            current,
            shots: HashMap::new(),
        }
    }
}

impl DeviceLink for ScriptedDevice {
    fn take_screenshot(&mut self, path: &Path) -> io::Result<()> {
        let idx = self.current.get().min(self.screens.len() - 1);
        let band = self.screens[idx].band;
        let img = GrayImage::from_fn(64, 64, |x, _| if x < band { Luma([0]) } else { Luma([255]) });
        img.save(path).map_err(io::Error::other)?;
        self.shots.insert(path.to_path_buf(), idx);
        Ok(())
    }

    fn describe_screen(&mut self, _modality: Modality, screenshot: &Path) -> anyhow::Result<ScreenDescription> {
        let idx = self
            .shots
            .get(screenshot)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown screenshot {}", screenshot.display()))?;
        Ok(ScreenDescription::from_captions(self.screens[idx].captions.iter().copied()))
    }
}

/// Every accepted action moves the device to the next scripted screen
/// when `advances` is set.
struct Tapper {
    current: Rc<Cell<usize>>,
    advances: bool,
    spoken: Vec<String>,
}

impl Tapper {
    fn new(current: Rc<Cell<usize>>, advances: bool) -> Self {
        Self {
            current,
            advances,
            spoken: Vec::new(),
        }
    }
}

impl ActionExecutor for Tapper {
    fn execute(&mut self, action: &Action, _screenshot: Option<&Path>) -> anyhow::Result<bool> {
        self.spoken.push(action.voice_command());
        if self.advances {
            self.current.set(self.current.get() + 1);
        }
        Ok(true)
    }
}

#[derive(Default)]
struct ScriptedOracle {
    answer: Option<Action>,
    consent: Option<bool>,
    /// Modalities the oracle has no answer for.
    silent_for: Vec<Modality>,
    asked: RefCell<Vec<Modality>>,
}

impl ActionOracle for ScriptedOracle {
    fn propose(&self, request: &OracleRequest<'_>) -> anyhow::Result<Option<Action>> {
        self.asked.borrow_mut().push(request.modality);
        if self.silent_for.contains(&request.modality) {
            return Ok(None);
        }
        Ok(self.answer.clone())
    }

    fn classify_consent(&self, _screen: &ScreenDescription) -> anyhow::Result<Option<bool>> {
        Ok(self.consent)
    }
}

struct Foreground {
    leaves: bool,
}

impl ForegroundProbe for Foreground {
    fn has_left_foreground(&self, _app_id: &str) -> bool {
        self.leaves
    }
}

fn nav_config(dir: &Path, timeout: Duration) -> NavigationConfig {
    NavigationConfig {
        timeout,
        consent_mode: ConsentMode::Accept,
        media_dir: dir.to_path_buf(),
        save_screen_data: false,
    }
}

const TRACKING: &[&str] = &[
    "Allow “Example” to track your activity across other companies’ apps and websites?",
    "Ask App Not to Track, Button",
    "Allow, Button",
    "Accept all",
];

const HOME: &[&str] = &["Home feed", "Latest stories from your followers", "Settings"];

#[test]
fn native_dialog_wins_and_change_means_success() {
    let tmp = tempfile::tempdir().unwrap();
    let current = Rc::new(Cell::new(0));
    let mut device = ScriptedDevice::new(vec![screen(TRACKING, 10), screen(HOME, 50)], current.clone());
    let mut tapper = Tapper::new(current.clone(), true);
    let fg = Foreground { leaves: false };

    let mut engine = NavigationEngine::new(
        Collaborators {
            device: &mut device,
            executor: &mut tapper,
            oracle: None,
            foreground: &fg,
        },
        RuleBook::default(),
        ScreenChangeDetector::default(),
        nav_config(tmp.path(), Duration::from_millis(300)),
    );
    let report = engine.navigate("com.example.app").unwrap();
    drop(engine);

    assert_eq!(report.outcome, Outcome::Success);
    // The cookie keyword on the same screen never got a turn.
    assert_eq!(tapper.spoken, vec!["tap, Allow"]);
    assert_eq!(report.actions_executed, 1);
    assert_eq!(report.screen_changes(), 1);

    let native = &report.histories[&Strategy::NativeDialog];
    assert_eq!(native.len(), 1);
    assert_eq!(native.records()[0].outcome, ActionOutcome::Success);
    assert!(report.histories[&Strategy::ConsentDialog].is_empty());
}

#[test]
fn zero_timeout_is_timed_out() {
    let tmp = tempfile::tempdir().unwrap();
    let current = Rc::new(Cell::new(0));
    let mut device = ScriptedDevice::new(vec![screen(TRACKING, 10)], current.clone());
    let mut tapper = Tapper::new(current, true);
    let fg = Foreground { leaves: false };

    let mut engine = NavigationEngine::new(
        Collaborators {
            device: &mut device,
            executor: &mut tapper,
            oracle: None,
            foreground: &fg,
        },
        RuleBook::default(),
        ScreenChangeDetector::default(),
        nav_config(tmp.path(), Duration::ZERO),
    );
    let report = engine.navigate("com.example.app").unwrap();
    drop(engine);

    assert_eq!(report.outcome, Outcome::TimedOut);
    assert!(tapper.spoken.is_empty());
}

#[test]
fn oracle_action_that_backgrounds_app_ends_run() {
    let tmp = tempfile::tempdir().unwrap();
    let current = Rc::new(Cell::new(0));
    let mut device = ScriptedDevice::new(vec![screen(HOME, 10)], current.clone());
    let mut tapper = Tapper::new(current, false);
    let oracle = ScriptedOracle {
        answer: Some(Action::tap("Settings")),
        ..ScriptedOracle::default()
    };
    let fg = Foreground { leaves: true };

    let mut engine = NavigationEngine::new(
        Collaborators {
            device: &mut device,
            executor: &mut tapper,
            oracle: Some(&oracle),
            foreground: &fg,
        },
        RuleBook::default(),
        ScreenChangeDetector::default(),
        nav_config(tmp.path(), Duration::from_secs(5)),
    );
    let report = engine.navigate("com.example.app").unwrap();
    drop(engine);

    assert_eq!(report.outcome, Outcome::Backgrounded);
    assert_eq!(tapper.spoken, vec!["tap, Settings"]);
    assert_eq!(*oracle.asked.borrow(), vec![Modality::Image]);
    assert_eq!(report.histories[&Strategy::VisionOracle].len(), 1);
}

#[test]
fn loop_guard_stops_repeating_oracle_suggestion() {
    let tmp = tempfile::tempdir().unwrap();
    let current = Rc::new(Cell::new(0));
    let mut device = ScriptedDevice::new(vec![screen(HOME, 10)], current.clone());
    let mut tapper = Tapper::new(current, false);
    let oracle = ScriptedOracle {
        answer: Some(Action::tap("Settings")),
        ..ScriptedOracle::default()
    };
    let fg = Foreground { leaves: false };

    let mut engine = NavigationEngine::new(
        Collaborators {
            device: &mut device,
            executor: &mut tapper,
            oracle: Some(&oracle),
            foreground: &fg,
        },
        RuleBook::default(),
        ScreenChangeDetector::default(),
        nav_config(tmp.path(), Duration::from_millis(200)),
    );
    let report = engine.navigate("com.example.app").unwrap();
    drop(engine);

    assert_eq!(report.outcome, Outcome::TimedOut);
    // Vision tries once; every later proposal of the same target is a repeat.
    assert_eq!(tapper.spoken, vec!["tap, Settings".to_string()]);
    assert!(report.loops_skipped >= 2);
    let vision = &report.histories[&Strategy::VisionOracle];
    assert_eq!(vision.len(), 1);
    assert_eq!(vision.records()[0].outcome, ActionOutcome::Failure);
    assert!(report.histories[&Strategy::AccessibilityOracle].is_empty());
    assert!(report.histories[&Strategy::OcrOracle].is_empty());
}

#[test]
fn loop_guard_spans_strategies() {
    let tmp = tempfile::tempdir().unwrap();
    let current = Rc::new(Cell::new(0));
    let mut device = ScriptedDevice::new(vec![screen(HOME, 10)], current.clone());
    let mut tapper = Tapper::new(current, false);
    let oracle = ScriptedOracle {
        answer: Some(Action::tap("Settings")),
        silent_for: vec![Modality::Image],
        ..ScriptedOracle::default()
    };
    let fg = Foreground { leaves: false };

    let mut engine = NavigationEngine::new(
        Collaborators {
            device: &mut device,
            executor: &mut tapper,
            oracle: Some(&oracle),
            foreground: &fg,
        },
        RuleBook::default(),
        ScreenChangeDetector::default(),
        nav_config(tmp.path(), Duration::from_millis(200)),
    );
    let report = engine.navigate("com.example.app").unwrap();
    drop(engine);

    // The accessibility oracle taps first; the OCR oracle's identical
    // proposal right after is rejected although its own history is empty.
    assert_eq!(tapper.spoken.len(), 1);
    assert_eq!(report.histories[&Strategy::AccessibilityOracle].len(), 1);
    assert!(report.histories[&Strategy::OcrOracle].is_empty());
    assert!(oracle.asked.borrow().contains(&Modality::Ocr));
    assert!(report.loops_skipped >= 1);
}

#[test]
fn sentinel_answer_is_never_executed() {
    let tmp = tempfile::tempdir().unwrap();
    let current = Rc::new(Cell::new(0));
    let mut device = ScriptedDevice::new(vec![screen(HOME, 10)], current.clone());
    let mut tapper = Tapper::new(current, false);
    let oracle = ScriptedOracle {
        answer: Some(Action::custom("no option available")),
        ..ScriptedOracle::default()
    };
    let fg = Foreground { leaves: true };

    let mut engine = NavigationEngine::new(
        Collaborators {
            device: &mut device,
            executor: &mut tapper,
            oracle: Some(&oracle),
            foreground: &fg,
        },
        RuleBook::default(),
        ScreenChangeDetector::default(),
        nav_config(tmp.path(), Duration::from_millis(100)),
    );
    let report = engine.navigate("com.example.app").unwrap();
    drop(engine);

    // The foreground probe is only asked after an execution.
    assert_eq!(report.outcome, Outcome::TimedOut);
    assert!(tapper.spoken.is_empty());
    assert!(report.histories.values().all(|h| h.is_empty()));
}

#[test]
fn consent_screen_skips_vision_oracle() {
    let tmp = tempfile::tempdir().unwrap();
    let current = Rc::new(Cell::new(0));
    let mut device = ScriptedDevice::new(vec![screen(HOME, 10)], current.clone());
    let mut tapper = Tapper::new(current, false);
    let oracle = ScriptedOracle {
        answer: Some(Action::tap("Settings")),
        consent: Some(true),
        ..ScriptedOracle::default()
    };
    let fg = Foreground { leaves: true };

    let mut engine = NavigationEngine::new(
        Collaborators {
            device: &mut device,
            executor: &mut tapper,
            oracle: Some(&oracle),
            foreground: &fg,
        },
        RuleBook::default(),
        ScreenChangeDetector::default(),
        nav_config(tmp.path(), Duration::from_secs(5)),
    );
    let report = engine.navigate("com.example.app").unwrap();
    drop(engine);

    assert_eq!(report.outcome, Outcome::Backgrounded);
    assert_eq!(*oracle.asked.borrow(), vec![Modality::Accessibility]);
    assert!(report.histories[&Strategy::VisionOracle].is_empty());
}

#[test]
fn run_is_journaled() {
    let tmp = tempfile::tempdir().unwrap();
    let log = ExecutionLog::new(&tmp.path().join("nav.jsonl")).unwrap();
    let current = Rc::new(Cell::new(0));
    let mut device = ScriptedDevice::new(vec![screen(TRACKING, 10), screen(HOME, 50)], current.clone());
    let mut tapper = Tapper::new(current, true);
    let fg = Foreground { leaves: false };

    let mut engine = NavigationEngine::new(
        Collaborators {
            device: &mut device,
            executor: &mut tapper,
            oracle: None,
            foreground: &fg,
        },
        RuleBook::default(),
        ScreenChangeDetector::default(),
        nav_config(tmp.path(), Duration::from_millis(100)),
    )
    .with_journal(&log);
    let report = engine.navigate("com.example.app").unwrap();
    drop(engine);

    let content = std::fs::read_to_string(log.path()).unwrap();
    let events: Vec<serde_json::Value> = content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(events.first().unwrap()["event"], "navigation_started");
    let last = events.last().unwrap();
    assert_eq!(last["event"], "navigation_finished");
    assert_eq!(last["data"]["outcome"], "success");
    assert!(events.iter().all(|e| e["run_id"] == report.run_id.to_string()));
    assert!(
        events
            .iter()
            .any(|e| e["event"] == "screen_changed" && e["data"]["changed"] == true)
    );
}
