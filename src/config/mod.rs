use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::a11y::TraversalConfig;
use crate::capture::CaptureConfig;
use crate::monitor::MonitorConfig;
use crate::navigation::{ConsentMode, NavigationConfig, RuleBook, rules::DEFAULT_COOKIE_KEYWORDS};
use crate::oracle::CommandOracleConfig;
use crate::screen::ScreenConfig;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".voxnav";

fn default_max_attempts() -> u32 {
    3
}

fn default_monitor_stop_timeout_millis() -> u64 {
    3000
}

fn default_monitor_poll_interval_millis() -> u64 {
    50
}

fn default_monitor_read_timeout_secs() -> u64 {
    3
}

fn default_capture_stop_timeout_millis() -> u64 {
    5000
}

fn default_capture_poll_interval_millis() -> u64 {
    20
}

fn default_link_type() -> u32 {
    crate::capture::pcap::LINKTYPE_ETHERNET
}

fn default_similarity_threshold() -> f64 {
    0.85
}

fn default_max_edit_distance() -> usize {
    2
}

fn default_hash_size() -> u32 {
    32
}

fn default_navigation_timeout_secs() -> u64 {
    200
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("media")
}

fn default_save_screen_data() -> bool {
    true
}

fn default_foreground_read_timeout_secs() -> u64 {
    3
}

fn default_cookie_keywords() -> Vec<String> {
    DEFAULT_COOKIE_KEYWORDS.iter().map(|k| k.to_string()).collect()
}

fn default_max_items() -> Option<usize> {
    Some(15)
}

fn default_traversal_timeout_secs() -> u64 {
    10
}

fn default_traversal_read_timeout_secs() -> u64 {
    2
}

fn default_oracle_program() -> String {
    "voxnav-oracle".to_string()
}

/// `[monitor]`: log, packet and accessibility stream monitors.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_monitor_stop_timeout_millis")]
    pub stop_timeout_millis: u64,
    #[serde(default = "default_monitor_poll_interval_millis")]
    pub poll_interval_millis: u64,
    #[serde(default = "default_monitor_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            stop_timeout_millis: default_monitor_stop_timeout_millis(),
            poll_interval_millis: default_monitor_poll_interval_millis(),
            read_timeout_secs: default_monitor_read_timeout_secs(),
            queue_capacity: None,
        }
    }
}

impl MonitorSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl From<&MonitorSettings> for MonitorConfig {
    fn from(s: &MonitorSettings) -> Self {
        Self {
            max_attempts: s.max_attempts,
            stop_timeout: Duration::from_millis(s.stop_timeout_millis),
            poll_interval: Duration::from_millis(s.poll_interval_millis),
            queue_capacity: s.queue_capacity,
        }
    }
}

/// `[capture]`: packet capture sessions.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureSettings {
    #[serde(default = "default_capture_stop_timeout_millis")]
    pub stop_timeout_millis: u64,
    #[serde(default = "default_capture_poll_interval_millis")]
    pub poll_interval_millis: u64,
    #[serde(default = "default_link_type")]
    pub link_type: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            stop_timeout_millis: default_capture_stop_timeout_millis(),
            poll_interval_millis: default_capture_poll_interval_millis(),
            link_type: default_link_type(),
        }
    }
}

impl From<&CaptureSettings> for CaptureConfig {
    fn from(s: &CaptureSettings) -> Self {
        Self {
            stop_timeout: Duration::from_millis(s.stop_timeout_millis),
            poll_interval: Duration::from_millis(s.poll_interval_millis),
            link_type: s.link_type,
        }
    }
}

/// `[screen]`: change detection thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScreenSettings {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_max_edit_distance")]
    pub max_edit_distance: usize,
    #[serde(default = "default_hash_size")]
    pub hash_size: u32,
}

impl Default for ScreenSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_edit_distance: default_max_edit_distance(),
            hash_size: default_hash_size(),
        }
    }
}

impl From<&ScreenSettings> for ScreenConfig {
    fn from(s: &ScreenSettings) -> Self {
        Self {
            similarity_threshold: s.similarity_threshold,
            max_edit_distance: s.max_edit_distance,
            hash_size: s.hash_size,
        }
    }
}

/// `[navigation]`: the decision loop and its rule book.
///
/// ```toml
/// [navigation]
/// timeout_secs = 120
/// consent_mode = "reject"
/// cookie_keywords_file = "keywords.txt"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NavigationSettings {
    #[serde(default = "default_navigation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub consent_mode: ConsentMode,
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
    #[serde(default = "default_save_screen_data")]
    pub save_screen_data: bool,
    #[serde(default = "default_foreground_read_timeout_secs")]
    pub foreground_read_timeout_secs: u64,
    #[serde(default = "default_cookie_keywords")]
    pub cookie_keywords: Vec<String>,
    /// Replaces `cookie_keywords` when set. Relative to the config file.
    #[serde(default)]
    pub cookie_keywords_file: Option<PathBuf>,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_navigation_timeout_secs(),
            consent_mode: ConsentMode::default(),
            media_dir: default_media_dir(),
            save_screen_data: default_save_screen_data(),
            foreground_read_timeout_secs: default_foreground_read_timeout_secs(),
            cookie_keywords: default_cookie_keywords(),
            cookie_keywords_file: None,
        }
    }
}

impl NavigationSettings {
    pub fn foreground_read_timeout(&self) -> Duration {
        Duration::from_secs(self.foreground_read_timeout_secs)
    }

    /// Build the rule book; `base` resolves a relative keywords file.
    pub fn rule_book(&self, base: &Path) -> Result<RuleBook> {
        match &self.cookie_keywords_file {
            Some(file) => RuleBook::with_keywords_file(&base.join(file)),
            None => Ok(RuleBook::new(self.cookie_keywords.clone())),
        }
    }
}

impl From<&NavigationSettings> for NavigationConfig {
    fn from(s: &NavigationSettings) -> Self {
        Self {
            timeout: Duration::from_secs(s.timeout_secs),
            consent_mode: s.consent_mode,
            media_dir: s.media_dir.clone(),
            save_screen_data: s.save_screen_data,
        }
    }
}

/// `[accessibility]`: focus traversal.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessibilitySettings {
    #[serde(default = "default_max_items")]
    pub max_items: Option<usize>,
    #[serde(default = "default_traversal_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_traversal_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

impl Default for AccessibilitySettings {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            timeout_secs: default_traversal_timeout_secs(),
            read_timeout_secs: default_traversal_read_timeout_secs(),
        }
    }
}

impl From<&AccessibilitySettings> for TraversalConfig {
    fn from(s: &AccessibilitySettings) -> Self {
        Self {
            max_items: s.max_items,
            timeout: Duration::from_secs(s.timeout_secs),
            read_timeout: Duration::from_secs(s.read_timeout_secs),
        }
    }
}

/// `[oracle]`: the external action oracle command.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OracleSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_oracle_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            program: default_oracle_program(),
            args: Vec::new(),
        }
    }
}

impl OracleSettings {
    /// The command config, or `None` when the oracle is disabled.
    pub fn command(&self) -> Option<CommandOracleConfig> {
        self.enabled.then(|| CommandOracleConfig {
            program: self.program.clone(),
            args: self.args.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub screen: ScreenSettings,
    #[serde(default)]
    pub navigation: NavigationSettings,
    #[serde(default)]
    pub accessibility: AccessibilitySettings,
    #[serde(default)]
    pub oracle: OracleSettings,
}

impl ProjectConfig {
    /// Search upward from `start` for a `.voxnav/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: ProjectConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn default_config_values() {
        let config = ProjectConfig::default();
        assert_eq!(config.monitor.max_attempts, 3);
        assert_eq!(config.monitor.stop_timeout_millis, 3000);
        assert!(config.monitor.queue_capacity.is_none());
        assert_eq!(config.capture.link_type, 1);
        assert_eq!(config.screen.similarity_threshold, 0.85);
        assert_eq!(config.navigation.timeout_secs, 200);
        assert_eq!(config.navigation.consent_mode, ConsentMode::Accept);
        assert_eq!(config.navigation.media_dir, PathBuf::from("media"));
        assert!(config.navigation.save_screen_data);
        assert_eq!(config.accessibility.max_items, Some(15));
        assert!(!config.oracle.enabled);
        assert!(config.oracle.command().is_none());
    }

    #[test]
    fn defaults_match_runtime_defaults() {
        let config = ProjectConfig::default();

        let monitor = MonitorConfig::from(&config.monitor);
        let expected = MonitorConfig::default();
        assert_eq!(monitor.max_attempts, expected.max_attempts);
        assert_eq!(monitor.stop_timeout, expected.stop_timeout);
        assert_eq!(monitor.poll_interval, expected.poll_interval);

        let capture = CaptureConfig::from(&config.capture);
        assert_eq!(capture.stop_timeout, CaptureConfig::default().stop_timeout);
        assert_eq!(capture.link_type, CaptureConfig::default().link_type);

        let screen = ScreenConfig::from(&config.screen);
        assert_eq!(screen.hash_size, ScreenConfig::default().hash_size);
        assert_eq!(screen.max_edit_distance, ScreenConfig::default().max_edit_distance);

        let nav = NavigationConfig::from(&config.navigation);
        assert_eq!(nav.timeout, NavigationConfig::default().timeout);

        let traversal = TraversalConfig::from(&config.accessibility);
        assert_eq!(traversal.timeout, TraversalConfig::default().timeout);
        assert_eq!(traversal.read_timeout, TraversalConfig::default().read_timeout);

        let rules = config.navigation.rule_book(Path::new(".")).unwrap();
        assert_eq!(rules.cookie_keywords(), RuleBook::default().cookie_keywords());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[monitor]
max_attempts = 5
stop_timeout_millis = 1000
poll_interval_millis = 10
read_timeout_secs = 1
queue_capacity = 256

[capture]
stop_timeout_millis = 2000
link_type = 101

[screen]
similarity_threshold = 0.9
hash_size = 16

[navigation]
timeout_secs = 60
consent_mode = "reject"
media_dir = "/tmp/shots"
save_screen_data = false
cookie_keywords = ["Accept", "OK"]

[accessibility]
max_items = 30
timeout_secs = 20

[oracle]
enabled = true
program = "python3"
args = ["oracle.py", "--model", "local"]
"#;
        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.monitor.max_attempts, 5);
        assert_eq!(config.monitor.queue_capacity, Some(256));
        assert_eq!(MonitorConfig::from(&config.monitor).stop_timeout, Duration::from_secs(1));
        assert_eq!(config.monitor.read_timeout(), Duration::from_secs(1));
        assert_eq!(config.capture.link_type, 101);
        assert_eq!(config.capture.poll_interval_millis, 20);
        assert_eq!(config.screen.similarity_threshold, 0.9);
        assert_eq!(config.screen.max_edit_distance, 2);
        assert_eq!(config.navigation.consent_mode, ConsentMode::Reject);
        assert!(!config.navigation.save_screen_data);
        assert_eq!(config.navigation.cookie_keywords, vec!["Accept", "OK"]);
        assert_eq!(config.accessibility.max_items, Some(30));
        assert_eq!(config.accessibility.read_timeout_secs, 2);

        let oracle = config.oracle.command().unwrap();
        assert_eq!(oracle.program, "python3");
        assert_eq!(oracle.args, vec!["oracle.py", "--model", "local"]);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[navigation]
timeout_secs = 30
"#;
        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.navigation.timeout_secs, 30);
        assert_eq!(config.navigation.consent_mode, ConsentMode::Accept);
        assert_eq!(config.navigation.foreground_read_timeout_secs, 3);
        assert_eq!(config.monitor.poll_interval_millis, 50);
        assert!(!config.navigation.cookie_keywords.is_empty());
    }

    #[test]
    fn bad_consent_mode_is_rejected() {
        let toml = r#"
[navigation]
consent_mode = "maybe"
"#;
        assert!(toml::from_str::<ProjectConfig>(toml).is_err());
    }

    #[test]
    fn load_from_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".voxnav");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("config.toml"),
            r#"
[navigation]
consent_mode = "reject"
"#,
        )
        .unwrap();

        let (config, path) = ProjectConfig::load(tmp.path()).unwrap();
        assert_eq!(path, Some(dir.join("config.toml")));
        assert_eq!(config.navigation.consent_mode, ConsentMode::Reject);
    }

    #[test]
    fn load_returns_default_when_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, path) = ProjectConfig::load(tmp.path()).unwrap();
        assert!(path.is_none());
        assert_eq!(config.navigation.timeout_secs, 200);
    }

    #[test]
    fn load_walks_up_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".voxnav");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.toml"), "[screen]\nhash_size = 8\n").unwrap();

        let nested = tmp.path().join("runs").join("deep").join("nested");
        fs::create_dir_all(&nested).unwrap();

        let (config, path) = ProjectConfig::load(&nested).unwrap();
        assert!(path.is_some());
        assert_eq!(config.screen.hash_size, 8);
    }

    #[test]
    fn keywords_file_resolves_relative_to_base() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("keywords.txt"), "Einverstanden\n").unwrap();
        let settings = NavigationSettings {
            cookie_keywords_file: Some(PathBuf::from("keywords.txt")),
            ..NavigationSettings::default()
        };
        let rules = settings.rule_book(tmp.path()).unwrap();
        assert_eq!(rules.cookie_keywords(), ["Einverstanden"]);

        let missing = NavigationSettings {
            cookie_keywords_file: Some(PathBuf::from("nope.txt")),
            ..NavigationSettings::default()
        };
        assert!(missing.rule_book(tmp.path()).is_err());
    }
}
