//! The navigation decision loop.
//!
//! One call to [`NavigationEngine::navigate`] walks the strategy cascade
//! until the deadline passes or the app leaves the foreground. Every step
//! follows the same protocol:
//!
//! 1. take a "before" screenshot and read the screen the way the strategy
//!    needs it;
//! 2. ask the strategy for a candidate action;
//! 3. skip to the next strategy when there is none, when it is the
//!    "nothing to do" sentinel, or when the loop guard refuses it;
//! 4. otherwise execute it, take an "after" screenshot and judge whether the
//!    screen changed;
//! 5. record the attempt in that strategy's own history;
//! 6. restart from the cheapest strategy when the screen changed;
//! 7. after an oracle-backed execution, stop if the app was backgrounded.
//!
//! The deadline is checked once per pass, so a slow collaborator call can
//! overshoot it. Only a failed screenshot aborts the run.

pub mod rules;
pub mod strategy;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::device::{DeviceLink, Modality};
use crate::error::NavigationError;
use crate::executor::ActionExecutor;
use crate::history::{Action, ActionHistory, ActionOutcome};
use crate::log::{ExecutionLog, LogEvent, journal};
use crate::oracle::{ActionOracle, OracleRequest};
use crate::screen::{ScreenChangeDetector, ScreenDescription};
use crate::syslog::ForegroundProbe;

pub use rules::{ConsentMode, RuleBook};
pub use strategy::{CASCADE, Strategy};

#[derive(Debug, Clone)]
pub struct NavigationConfig {
    /// Overall budget for one `navigate` call.
    pub timeout: Duration,
    pub consent_mode: ConsentMode,
    /// Where screenshots (and screen data) are written.
    pub media_dir: PathBuf,
    /// Write each step's screen description next to its screenshot.
    pub save_screen_data: bool,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(200),
            consent_mode: ConsentMode::Accept,
            media_dir: PathBuf::from("media"),
            save_screen_data: true,
        }
    }
}

/// Terminal state of one navigation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// At least one executed action moved the screen before time ran out.
    Success,
    /// The app left the foreground.
    Backgrounded,
    /// Time ran out and nothing moved the screen.
    TimedOut,
}

/// What a run did, returned with every terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct NavigationReport {
    pub run_id: Uuid,
    pub outcome: Outcome,
    #[serde(with = "millis")]
    pub elapsed: Duration,
    pub histories: BTreeMap<Strategy, ActionHistory>,
    pub loops_skipped: usize,
    pub actions_executed: usize,
}

impl NavigationReport {
    /// Attempts across all strategies that changed the screen.
    pub fn screen_changes(&self) -> usize {
        self.histories.values().map(ActionHistory::successes).sum()
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Per-run state; lives for one `navigate` call.
#[derive(Debug)]
pub struct NavigationState {
    pub started: Instant,
    pub histories: BTreeMap<Strategy, ActionHistory>,
    /// Every attempt of the run in order, whatever strategy made it.
    pub recent: ActionHistory,
    pub in_foreground: bool,
    pub loops_skipped: usize,
    pub actions_executed: usize,
}

impl NavigationState {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            histories: CASCADE.iter().map(|s| (*s, ActionHistory::trace())).collect(),
            recent: ActionHistory::trace(),
            in_foreground: true,
            loops_skipped: 0,
            actions_executed: 0,
        }
    }

    fn history(&mut self, strategy: Strategy) -> &mut ActionHistory {
        self.histories.entry(strategy).or_insert_with(ActionHistory::trace)
    }

    fn progressed(&self) -> bool {
        self.histories.values().any(|h| h.successes() > 0)
    }

    fn into_report(self, run_id: Uuid, outcome: Outcome) -> NavigationReport {
        NavigationReport {
            run_id,
            outcome,
            elapsed: self.started.elapsed(),
            histories: self.histories,
            loops_skipped: self.loops_skipped,
            actions_executed: self.actions_executed,
        }
    }
}

/// Everything the engine drives.
pub struct Collaborators<'a> {
    pub device: &'a mut dyn DeviceLink,
    pub executor: &'a mut dyn ActionExecutor,
    /// Without an oracle, oracle-backed strategies never have a candidate.
    pub oracle: Option<&'a dyn ActionOracle>,
    pub foreground: &'a dyn ForegroundProbe,
}

enum Step {
    Skipped,
    Executed { changed: bool },
    Backgrounded,
}

pub struct NavigationEngine<'a> {
    collab: Collaborators<'a>,
    rules: RuleBook,
    detector: ScreenChangeDetector,
    config: NavigationConfig,
    journal: Option<&'a ExecutionLog>,
    screenshots: u64,
}

impl<'a> NavigationEngine<'a> {
    pub fn new(
        collab: Collaborators<'a>,
        rules: RuleBook,
        detector: ScreenChangeDetector,
        config: NavigationConfig,
    ) -> Self {
        Self {
            collab,
            rules,
            detector,
            config,
            journal: None,
            screenshots: 0,
        }
    }

    pub fn with_journal(mut self, journal: &'a ExecutionLog) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn config(&self) -> &NavigationConfig {
        &self.config
    }

    /// Explore `app_id` until the deadline passes or the app is backgrounded.
    pub fn navigate(&mut self, app_id: &str) -> Result<NavigationReport, NavigationError> {
        let run_id = Uuid::new_v4();
        let mut state = NavigationState::new();
        info!(app = app_id, %run_id, timeout_s = self.config.timeout.as_secs(), "navigation started");
        journal(self.journal, run_id, LogEvent::NavigationStarted {
            app_id: app_id.to_string(),
            timeout_secs: self.config.timeout.as_secs(),
        });

        let outcome = 'passes: loop {
            if state.started.elapsed() >= self.config.timeout {
                info!(app = app_id, "navigation deadline reached");
                break if state.progressed() { Outcome::Success } else { Outcome::TimedOut };
            }

            for strategy in CASCADE {
                match self.step(app_id, strategy, &mut state, run_id)? {
                    Step::Skipped | Step::Executed { changed: false } => continue,
                    Step::Executed { changed: true } => {
                        debug!(%strategy, "screen changed; restarting cascade");
                        continue 'passes;
                    }
                    Step::Backgrounded => break 'passes Outcome::Backgrounded,
                }
            }
        };

        let report = state.into_report(run_id, outcome);
        info!(
            app = app_id,
            outcome = ?report.outcome,
            elapsed_ms = report.elapsed.as_millis() as u64,
            actions = report.actions_executed,
            loops = report.loops_skipped,
            "navigation finished"
        );
        journal(self.journal, run_id, LogEvent::NavigationFinished {
            outcome: report.outcome,
            elapsed_ms: report.elapsed.as_millis() as u64,
            actions_executed: report.actions_executed,
            loops_skipped: report.loops_skipped,
        });
        Ok(report)
    }

    /// Tap away native system dialogs, each target at most once. Returns how
    /// many dialogs were dismissed.
    pub fn dismiss_native_dialogs(&mut self, app_id: &str, max_rounds: usize) -> Result<usize, NavigationError> {
        let mut history = ActionHistory::dedup();
        let mut dismissed = 0;
        for _ in 0..max_rounds {
            let before = self.screenshot(app_id)?;
            let Some(screen) = self.read_screen(Modality::Accessibility, &before) else {
                break;
            };
            let Some(action) = self.rules.native_dialog(&screen, self.config.consent_mode) else {
                break;
            };
            if history.was_recently_proposed(&action) {
                debug!(element = %action.target, "dialog already dismissed once");
                break;
            }
            let ok = self.execute(&action, &before);
            history.record(action, ActionOutcome::from_success(ok), Strategy::NativeDialog);
            if !ok {
                break;
            }
            dismissed += 1;
        }
        info!(app = app_id, dismissed, "native dialog cleanup done");
        Ok(dismissed)
    }

    fn step(
        &mut self,
        app_id: &str,
        strategy: Strategy,
        state: &mut NavigationState,
        run_id: Uuid,
    ) -> Result<Step, NavigationError> {
        let modality = strategy.modality();
        let before = self.screenshot(app_id)?;
        let screen = match self.read_screen(modality, &before) {
            Some(s) => s,
            None if modality == Modality::Image => ScreenDescription::default(),
            None => {
                self.skip(run_id, strategy, "screen unreadable");
                return Ok(Step::Skipped);
            }
        };

        let history = state.history(strategy);
        let Some(action) = self.propose(app_id, strategy, &screen, &before, history) else {
            self.skip(run_id, strategy, "no candidate");
            return Ok(Step::Skipped);
        };
        if action.is_sentinel() {
            self.skip(run_id, strategy, "no option available");
            return Ok(Step::Skipped);
        }
        let repeat = history.was_recently_proposed(&action);
        if repeat || state.recent.was_recently_proposed(&action) {
            debug!(%strategy, element = %action.target, "loop guard: repeat of last action");
            state.loops_skipped += 1;
            journal(self.journal, run_id, LogEvent::LoopSkipped {
                strategy,
                target: action.target.clone(),
            });
            return Ok(Step::Skipped);
        }
        journal(self.journal, run_id, LogEvent::ActionProposed {
            strategy,
            action: action.clone(),
        });

        let accepted = self.execute(&action, &before);
        state.actions_executed += 1;
        journal(self.journal, run_id, LogEvent::ActionExecuted {
            strategy,
            command: action.voice_command(),
            accepted,
        });

        let changed = if accepted {
            let after = self.screenshot(app_id)?;
            self.screen_changed(modality, &screen, &before, &after)
        } else {
            false
        };
        journal(self.journal, run_id, LogEvent::ScreenChanged { strategy, changed });
        info!(%strategy, element = %action.target, accepted, changed, "action attempted");

        let outcome = ActionOutcome::from_success(accepted && changed);
        state.recent.record(action.clone(), outcome, strategy);
        state.history(strategy).record(action, outcome, strategy);

        if strategy.is_oracle_backed() && self.collab.foreground.has_left_foreground(app_id) {
            warn!(app = app_id, %strategy, "app entered background; stopping navigation");
            state.in_foreground = false;
            journal(self.journal, run_id, LogEvent::Backgrounded {
                app_id: app_id.to_string(),
            });
            return Ok(Step::Backgrounded);
        }
        Ok(Step::Executed { changed })
    }

    fn propose(
        &self,
        app_id: &str,
        strategy: Strategy,
        screen: &ScreenDescription,
        before: &Path,
        history: &ActionHistory,
    ) -> Option<Action> {
        let mode = self.config.consent_mode;
        match strategy {
            Strategy::NativeDialog => self.rules.native_dialog(screen, mode),
            Strategy::ConsentDialog => self.rules.consent_dialog(screen, mode),
            Strategy::VisionOracle | Strategy::AccessibilityOracle | Strategy::OcrOracle => {
                let oracle = self.collab.oracle?;
                let modality = strategy.modality();
                if modality == Modality::Image {
                    if let Ok(Some(true)) = oracle.classify_consent(screen) {
                        debug!("consent screen; vision oracle not used");
                        return None;
                    }
                } else if screen.is_empty() || screen.is_direct_interaction() {
                    return None;
                }

                let request = OracleRequest {
                    app_id,
                    modality,
                    screen,
                    image: (modality == Modality::Image).then_some(before),
                    history: history.records(),
                    consent_mode: mode,
                };
                let action = match oracle.propose(&request) {
                    Ok(a) => a?,
                    Err(e) => {
                        warn!(%strategy, error = %e, "oracle call failed");
                        return None;
                    }
                };
                if action.bounds.is_none() && modality == Modality::Ocr {
                    if let Some(bounds) = screen.locate(&action.target) {
                        return Some(action.with_bounds(bounds));
                    }
                }
                Some(action)
            }
        }
    }

    fn execute(&mut self, action: &Action, before: &Path) -> bool {
        match self.collab.executor.execute(action, Some(before)) {
            Ok(ok) => ok,
            Err(e) => {
                warn!(element = %action.target, error = %e, "action execution failed");
                false
            }
        }
    }

    /// OCR text of both screenshots plus their hashes. Any read failure
    /// counts as unchanged.
    fn screen_changed(&mut self, modality: Modality, screen: &ScreenDescription, before: &Path, after: &Path) -> bool {
        let before_text = if modality == Modality::Ocr {
            Cow::Borrowed(screen)
        } else {
            match self.collab.device.describe_screen(Modality::Ocr, before) {
                Ok(d) => Cow::Owned(d),
                Err(e) => {
                    warn!(error = %e, "could not read screen before action");
                    return false;
                }
            }
        };
        let after_text = match self.collab.device.describe_screen(Modality::Ocr, after) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "could not read screen after action");
                return false;
            }
        };
        self.detector.has_changed(&before_text, before, &after_text, after)
    }

    fn read_screen(&mut self, modality: Modality, screenshot: &Path) -> Option<ScreenDescription> {
        match self.collab.device.describe_screen(modality, screenshot) {
            Ok(screen) => {
                if self.config.save_screen_data {
                    save_screen_data(&screenshot.with_extension(format!("{modality}.json")), &screen);
                }
                Some(screen)
            }
            Err(e) => {
                warn!(%modality, error = %e, "failed to read screen");
                None
            }
        }
    }

    fn screenshot(&mut self, app_id: &str) -> Result<PathBuf, NavigationError> {
        self.screenshots += 1;
        let name = format!(
            "{app_id}_{}_{:04}.png",
            Local::now().format("%Y%m%d_%H%M%S%f"),
            self.screenshots
        );
        let path = self.config.media_dir.join(name);
        self.collab
            .device
            .take_screenshot(&path)
            .map_err(|source| NavigationError::Screenshot {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    fn skip(&self, run_id: Uuid, strategy: Strategy, reason: &str) {
        debug!(%strategy, reason, "strategy skipped");
        journal(self.journal, run_id, LogEvent::StrategySkipped {
            strategy,
            reason: reason.to_string(),
        });
    }
}

fn save_screen_data(path: &Path, screen: &ScreenDescription) {
    let written = serde_json::to_string_pretty(screen)
        .map_err(std::io::Error::other)
        .and_then(|json| std::fs::write(path, json));
    if let Err(e) = written {
        warn!(path = %path.display(), error = %e, "failed to save screen data");
    }
}
