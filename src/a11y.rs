//! Accessibility traversal: walk focus across the screen and collect captions.
//!
//! Focus-changed notifications arrive as JSON lines on an accessibility
//! monitor's queue. Each step moves focus forward and waits for the next
//! notification. The walk ends when an element identifier comes round again,
//! when enough items were read, or when the traversal runs out of time.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::events::EventQueue;
use crate::screen::ScreenDescription;

/// Notification name emitted when focus lands on a new element.
pub const FOCUS_CHANGED: &str = "hostInspectorCurrentElementChanged:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusEvent {
    pub name: String,
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub spoken_description: Option<String>,
}

impl FocusEvent {
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Moves accessibility focus on the device.
pub trait FocusDriver {
    fn move_focus_next(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct TraversalConfig {
    /// Stop after this many distinct elements; `None` reads until a cycle.
    pub max_items: Option<usize>,
    pub timeout: Duration,
    /// Per-read wait on the event queue.
    pub read_timeout: Duration,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_items: Some(15),
            timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Traversal {
    pub captions: Vec<String>,
    /// Focus wrapped around to an element already visited.
    pub cycled: bool,
}

impl Traversal {
    pub fn into_description(self) -> ScreenDescription {
        ScreenDescription::from_captions(self.captions)
    }
}

/// Walk focus until an identifier repeats, `max_items` is reached, or the
/// timeout passes. Captions may repeat; identifiers may not.
pub fn collect_captions(
    driver: &mut dyn FocusDriver,
    events: &EventQueue,
    config: &TraversalConfig,
) -> Result<Traversal> {
    events.clear();
    driver.move_focus_next().context("failed to move accessibility focus")?;

    let started = Instant::now();
    let mut seen = HashSet::new();
    let mut traversal = Traversal::default();

    while config.max_items.is_none_or(|max| seen.len() < max) {
        if started.elapsed() > config.timeout {
            info!(items = seen.len(), "accessibility traversal timed out");
            break;
        }
        let Some(event) = events.pop_timeout(config.read_timeout) else {
            debug!("no accessibility event yet");
            continue;
        };
        let focus = match FocusEvent::parse(&event.raw) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "unparsable accessibility event");
                continue;
            }
        };
        if focus.name != FOCUS_CHANGED {
            continue;
        }
        if !seen.insert(focus.identifier.clone()) {
            debug!(identifier = %focus.identifier, "focus cycle detected");
            traversal.cycled = true;
            break;
        }
        if focus
            .spoken_description
            .as_deref()
            .is_some_and(|s| s != focus.caption)
        {
            debug!(caption = %focus.caption, "caption differs from spoken description");
        }
        debug!(n = seen.len(), caption = %focus.caption, "focused element");
        traversal.captions.push(focus.caption);
        driver.move_focus_next().context("failed to move accessibility focus")?;
    }

    events.clear();
    Ok(traversal)
}
