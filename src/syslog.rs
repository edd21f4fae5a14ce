//! Device signals derived from system-log lines.
//!
//! The system-log monitor only keeps lines containing one of
//! [`DEFAULT_KEYWORDS`]. Foreground status and voice-command confirmation
//! are read back out of that queue by pattern.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::events::EventQueue;
use crate::monitor::KeywordFilter;

/// Logged when the device accepted a spoken phrase as a command.
pub const VOICE_COMMAND_RECOGNIZED: &str = "Recognized text is a command";

/// Lines worth keeping from the system log.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    VOICE_COMMAND_RECOGNIZED,
    "Scene lifecycle state did change: Foreground",
    "Received install progress: 1.00",
    "Starting purchase for client",
    "Payment sheet has presented",
    "Starting download progress for size",
    "Coordinator completed successfully",
    "Application was installed at",
    "com.apple.WebKit.GPU entered background",
    "com.apple.WebKit.GPU: Foreground: true",
    "entered background",
    APP_STORE_FOREGROUND,
    "Handling application installation",
    ": Foreground: false",
];

/// The App Store sheet taking over the screen means the app lost focus.
const APP_STORE_FOREGROUND: &str = "com.apple.AppStore.ProductPageExtension entered foreground";

pub fn default_filter() -> KeywordFilter {
    KeywordFilter::new(DEFAULT_KEYWORDS.iter().copied())
}

/// Lines that mean `app_id` is no longer the foreground app.
pub fn background_patterns(app_id: &str) -> [String; 3] {
    [
        format!("{app_id} entered background"),
        APP_STORE_FOREGROUND.to_string(),
        format!("{app_id}: Foreground: false"),
    ]
}

/// Answers whether the app under test left the foreground.
pub trait ForegroundProbe {
    fn has_left_foreground(&self, app_id: &str) -> bool;
}

/// Reads foreground status from a system-log queue.
#[derive(Debug, Clone)]
pub struct LogForegroundProbe {
    queue: EventQueue,
    read_timeout: Duration,
}

impl LogForegroundProbe {
    pub fn new(queue: EventQueue, read_timeout: Duration) -> Self {
        Self {
            queue,
            read_timeout,
        }
    }
}

impl ForegroundProbe for LogForegroundProbe {
    /// Drains queued lines until one matches or `read_timeout` has passed
    /// since the call started. Lines consumed here are gone for other
    /// readers of the same queue.
    fn has_left_foreground(&self, app_id: &str) -> bool {
        let patterns = background_patterns(app_id);
        let deadline = Instant::now() + self.read_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(event) = self.queue.pop_timeout(remaining) else {
                break;
            };
            if event.contains_any(&patterns) {
                info!(app = app_id, line = %event.raw, "app left foreground");
                return true;
            }
            if remaining.is_zero() {
                break;
            }
        }
        debug!(app = app_id, "no background signal");
        false
    }
}

/// Wait up to `window` for the device to acknowledge a voice command.
pub fn confirm_voice_command(queue: &EventQueue, window: Duration) -> bool {
    let deadline = Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("voice command not confirmed");
            return false;
        }
        match queue.pop_timeout(remaining) {
            Some(event) if event.raw.contains(VOICE_COMMAND_RECOGNIZED) => {
                debug!(line = %event.raw, "voice command confirmed");
                return true;
            }
            Some(_) => continue,
            None => {
                debug!("voice command not confirmed");
                return false;
            }
        }
    }
}
