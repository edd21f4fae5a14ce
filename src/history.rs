//! Proposed and executed actions, and the loop guard built on them.
//!
//! Histories come in two flavours. A trace history records every attempt and
//! only refuses an action identical to the one just attempted. A dedup
//! history keeps each target once and refuses anything it has seen before;
//! cleanup passes use it so a dialog that keeps reappearing is tapped once.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::navigation::Strategy;
use crate::screen::strip_element_type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Tap,
    Type,
    Swipe,
    Scroll,
    /// A free-form voice command spoken verbatim.
    Custom,
}

/// Screen-space rectangle in screenshot pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from two corners as oracles report them (`[x1, y1, x2, y2]`).
    pub fn from_corners([x1, y1, x2, y2]: [u32; 4]) -> Self {
        Self::new(x1.min(x2), y1.min(y2), x1.abs_diff(x2), y1.abs_diff(y2))
    }

    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// One UI action. Never mutated after a strategy proposes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    /// Element description, e.g. `"Allow, Button"`.
    pub target: String,
    /// Text to enter for [`ActionKind::Type`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
}

const SENTINELS: &[&str] = &["no option available", "none"];

impl Action {
    pub fn new(kind: ActionKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            value: None,
            bounds: None,
        }
    }

    pub fn tap(target: impl Into<String>) -> Self {
        Self::new(ActionKind::Tap, target)
    }

    pub fn custom(command: impl Into<String>) -> Self {
        Self::new(ActionKind::Custom, command)
    }

    pub fn type_text(target: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::new(ActionKind::Type, target)
        }
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// The oracle's way of saying it has nothing to suggest.
    pub fn is_sentinel(&self) -> bool {
        let target = self.target.trim().to_lowercase();
        target.is_empty() || SENTINELS.contains(&target.as_str())
    }

    /// Target with any trailing element-type suffix removed.
    pub fn label(&self) -> &str {
        strip_element_type(&self.target)
    }

    /// Spoken form of this action.
    pub fn voice_command(&self) -> String {
        match self.kind {
            ActionKind::Tap => format!("tap, {}", self.label()),
            ActionKind::Type => {
                format!("type, {}", self.value.as_deref().unwrap_or(self.label()))
            }
            ActionKind::Swipe => format!("swipe, {}", self.label()),
            ActionKind::Scroll => format!("scroll, {}", self.label()),
            ActionKind::Custom => self.target.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Success,
    Failure,
}

impl ActionOutcome {
    pub fn from_success(ok: bool) -> Self {
        if ok { Self::Success } else { Self::Failure }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: Action,
    pub outcome: ActionOutcome,
    pub origin: Strategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMode {
    /// Each target is kept once; any earlier record blocks a repeat.
    Dedup,
    /// Every attempt is kept; only the last record blocks a repeat.
    Trace,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionHistory {
    mode: HistoryMode,
    records: Vec<ActionRecord>,
}

impl ActionHistory {
    pub fn new(mode: HistoryMode) -> Self {
        Self {
            mode,
            records: Vec::new(),
        }
    }

    pub fn trace() -> Self {
        Self::new(HistoryMode::Trace)
    }

    pub fn dedup() -> Self {
        Self::new(HistoryMode::Dedup)
    }

    pub fn mode(&self) -> HistoryMode {
        self.mode
    }

    /// Append an attempt. In dedup mode a target already present is not
    /// appended again; returns whether the record was added.
    pub fn record(&mut self, action: Action, outcome: ActionOutcome, origin: Strategy) -> bool {
        if self.mode == HistoryMode::Dedup && self.contains_target(&action.target) {
            debug!(element = %action.target, "already recorded; skipping");
            return false;
        }
        self.records.push(ActionRecord {
            action,
            outcome,
            origin,
        });
        true
    }

    /// Loop guard: would executing `action` repeat what was just tried?
    pub fn was_recently_proposed(&self, action: &Action) -> bool {
        match self.mode {
            HistoryMode::Trace => self
                .records
                .last()
                .is_some_and(|r| r.action.target == action.target),
            HistoryMode::Dedup => self.contains_target(&action.target),
        }
    }

    fn contains_target(&self, target: &str) -> bool {
        self.records.iter().any(|r| r.action.target == target)
    }

    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&ActionRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of attempts that changed the screen.
    pub fn successes(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome == ActionOutcome::Success)
            .count()
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }
}
