//! What the navigation engine needs from a connected device.

use std::io;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::screen::ScreenDescription;

/// How a screen is read before a strategy looks at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Focus traversal captions.
    Accessibility,
    /// OCR text and icon labels with boxes.
    Ocr,
    /// The raw screenshot, no text extraction.
    Image,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accessibility => "accessibility",
            Self::Ocr => "ocr",
            Self::Image => "image",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Screenshot and screen-reading side of a device session.
///
/// Log lines, packets and accessibility notifications reach the engine
/// through monitors and a [`crate::syslog::ForegroundProbe`] instead.
pub trait DeviceLink {
    /// Save a screenshot to `path`. An error here is fatal to navigation.
    fn take_screenshot(&mut self, path: &Path) -> io::Result<()>;

    /// Read the current screen. `screenshot` is the image just taken, for
    /// modalities that work from it.
    fn describe_screen(&mut self, modality: Modality, screenshot: &Path) -> Result<ScreenDescription>;
}
