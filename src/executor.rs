//! Turning actions into spoken voice-control commands.
//!
//! [`ActionExecutor`] is the seam the engine drives. [`VoiceExecutor`] is the
//! stock implementation: it walks the tap grid when the action carries a
//! box, and otherwise speaks the action's command through a [`Speaker`].

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::events::EventQueue;
use crate::grid;
use crate::history::{Action, ActionKind, Bounds};
use crate::syslog::confirm_voice_command;

pub trait ActionExecutor {
    /// Perform `action`. `screenshot` is the current screen, used to place
    /// box-only actions. Returns whether the device accepted it.
    fn execute(&mut self, action: &Action, screenshot: Option<&Path>) -> Result<bool>;

    /// Check that a spoken phrase was understood by the device.
    fn verify(&mut self, _phrase: &str) -> bool {
        true
    }
}

/// Plays one phrase to the device.
pub trait Speaker {
    fn say(&mut self, phrase: &str) -> Result<bool>;
}

/// Speaks by running a program with the phrase as its last argument.
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpeaker {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl Speaker for CommandSpeaker {
    fn say(&mut self, phrase: &str) -> Result<bool> {
        debug!(program = %self.program, phrase, "speaking");
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(phrase)
            .status()
            .with_context(|| format!("failed to run speech command: {}", self.program))?;
        if !status.success() {
            warn!(status = %status, "speech command failed");
        }
        Ok(status.success())
    }
}

pub struct VoiceExecutor<S> {
    speaker: S,
    /// System-log queue used to confirm each phrase, when set.
    confirm: Option<(EventQueue, Duration)>,
}

impl<S: Speaker> VoiceExecutor<S> {
    pub fn new(speaker: S) -> Self {
        Self {
            speaker,
            confirm: None,
        }
    }

    /// Require a "recognized command" log line within `window` after each
    /// phrase.
    pub fn confirm_with(mut self, syslog: EventQueue, window: Duration) -> Self {
        self.confirm = Some((syslog, window));
        self
    }

    fn speak(&mut self, phrase: &str) -> Result<bool> {
        if !self.speaker.say(phrase)? {
            return Ok(false);
        }
        Ok(self.verify(phrase))
    }

    /// `None` when the box does not fit any grid cell.
    fn tap_by_grid(&mut self, action: &Action, bounds: &Bounds, screenshot: &Path) -> Result<Option<bool>> {
        let (width, height) = image::image_dimensions(screenshot)
            .with_context(|| format!("failed to read {}", screenshot.display()))?;
        let Some(selection) = grid::select(width, height, bounds) else {
            warn!(element = %action.target, "no grid cell for target");
            return Ok(None);
        };
        for phrase in selection.commands() {
            if !self.speak(&phrase)? {
                warn!(phrase = %phrase, "grid step failed");
                return Ok(Some(false));
            }
        }
        info!(cell = selection.cell, finer = selection.finer_cell, "tapped via grid");
        Ok(Some(true))
    }
}

impl<S: Speaker> ActionExecutor for VoiceExecutor<S> {
    fn execute(&mut self, action: &Action, screenshot: Option<&Path>) -> Result<bool> {
        // Text entry and free-form commands are always spoken. Anything
        // with a box is placed on the grid, since its target may not be a
        // visible label.
        let spoken_only = matches!(action.kind, ActionKind::Type | ActionKind::Custom);
        if let (false, Some(bounds), Some(path)) = (spoken_only, action.bounds.as_ref(), screenshot) {
            match self.tap_by_grid(action, bounds, path)? {
                Some(done) => return Ok(done),
                None => debug!(element = %action.target, "speaking label instead"),
            }
        }
        self.speak(&action.voice_command())
    }

    fn verify(&mut self, phrase: &str) -> bool {
        match &self.confirm {
            Some((queue, window)) => {
                let ok = confirm_voice_command(queue, *window);
                if !ok {
                    debug!(phrase, "phrase not confirmed by device");
                }
                ok
            }
            None => true,
        }
    }
}
