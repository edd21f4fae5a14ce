//! External action oracles.
//!
//! An oracle looks at the current screen and suggests the next action. It is
//! best-effort: an error or a missing answer only means "no candidate" to
//! the engine. [`CommandOracle`] shells out to a program that receives the
//! request as JSON in its last argument and prints a JSON answer.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::device::Modality;
use crate::history::{Action, ActionKind, ActionRecord, Bounds};
use crate::navigation::ConsentMode;
use crate::screen::ScreenDescription;

/// Everything an oracle gets to decide on.
#[derive(Debug, Clone, Serialize)]
pub struct OracleRequest<'a> {
    pub app_id: &'a str,
    #[serde(rename = "data_type")]
    pub modality: Modality,
    #[serde(rename = "screen_data")]
    pub screen: &'a ScreenDescription,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<&'a Path>,
    #[serde(rename = "action_history")]
    pub history: &'a [ActionRecord],
    pub consent_mode: ConsentMode,
}

pub trait ActionOracle {
    fn propose(&self, request: &OracleRequest<'_>) -> Result<Option<Action>>;

    /// Whether the screen is a consent dialog; `None` when the oracle cannot
    /// tell.
    fn classify_consent(&self, _screen: &ScreenDescription) -> Result<Option<bool>> {
        Ok(None)
    }
}

/// Answer shape oracles print.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OracleAnswer {
    pub action: String,
    #[serde(default)]
    pub screen_element: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub bbox_2d: Option<[u32; 4]>,
}

impl OracleAnswer {
    /// Turn the answer into an action; `None` for the "nothing to do" answers.
    pub fn into_action(self) -> Option<Action> {
        let verb = self.action.trim().to_lowercase();
        let clean = |s: String| s.replace(['[', ']'], "").trim().to_string();
        let element = self.screen_element.map(clean);
        let kind = match verb.as_str() {
            "tap" | "click" => ActionKind::Tap,
            "type" => ActionKind::Type,
            "swipe" => ActionKind::Swipe,
            "scroll" => ActionKind::Scroll,
            _ => ActionKind::Custom,
        };

        let mut action = match (kind, element, self.value) {
            (ActionKind::Type, element, Some(value)) => {
                Action::type_text(element.unwrap_or_default(), value)
            }
            (ActionKind::Custom, None, None) => Action::custom(self.action.trim()),
            (ActionKind::Custom, element, value) => {
                let tail = element.or(value).unwrap_or_default();
                Action::custom(format!("{}, {tail}", self.action.trim()))
            }
            (kind, element, value) => Action::new(kind, element.or(value).unwrap_or_default()),
        };
        if let Some(bbox) = self.bbox_2d {
            action = action.with_bounds(Bounds::from_corners(bbox));
        }
        (!action.is_sentinel()).then_some(action)
    }
}

/// Parse raw oracle output.
pub fn parse_answer(raw: &str) -> Result<Option<Action>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || Action::custom(trimmed).is_sentinel() {
        return Ok(None);
    }
    let answer: OracleAnswer =
        serde_json::from_str(trimmed).context("oracle answer is not valid JSON")?;
    Ok(answer.into_action())
}

#[derive(Debug, Clone)]
pub struct CommandOracleConfig {
    pub program: String,
    /// Fixed arguments; the JSON request is appended last.
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CommandOracle {
    config: CommandOracleConfig,
}

#[derive(Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
enum Task<'a> {
    Propose(&'a OracleRequest<'a>),
    ClassifyConsent { screen_data: &'a ScreenDescription },
}

impl CommandOracle {
    pub fn new(config: CommandOracleConfig) -> Self {
        Self { config }
    }

    fn call(&self, task: &Task<'_>) -> Result<String> {
        let payload = serde_json::to_string(task).context("failed to encode oracle request")?;
        debug!(program = %self.config.program, len = payload.len(), "calling oracle");

        let output = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(&payload)
            .output()
            .with_context(|| format!("failed to run oracle command: {}", self.config.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(stderr = %stderr.trim(), "oracle command failed");
            anyhow::bail!("oracle exited with {}", output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl ActionOracle for CommandOracle {
    fn propose(&self, request: &OracleRequest<'_>) -> Result<Option<Action>> {
        let raw = self.call(&Task::Propose(request))?;
        let action = parse_answer(&raw)?;
        match &action {
            Some(a) => info!(element = %a.target, kind = ?a.kind, "oracle proposed action"),
            None => info!("oracle has no option"),
        }
        Ok(action)
    }

    fn classify_consent(&self, screen: &ScreenDescription) -> Result<Option<bool>> {
        let raw = self.call(&Task::ClassifyConsent {
            screen_data: screen,
        })?;
        Ok(match raw.to_lowercase().trim_matches('"') {
            "yes" | "true" => Some(true),
            "no" | "false" => Some(false),
            _ => None,
        })
    }
}
