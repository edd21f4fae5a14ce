//! The fixed strategy cascade.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::Modality;

/// One position in the cascade. Declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// System dialogs matched from accessibility captions.
    NativeDialog,
    /// Consent, cookie and sign-in prompts matched from OCR text.
    ConsentDialog,
    /// Oracle given only the screenshot.
    VisionOracle,
    /// Oracle given accessibility captions.
    AccessibilityOracle,
    /// Oracle given OCR text with boxes.
    OcrOracle,
}

pub const CASCADE: [Strategy; 5] = [
    Strategy::NativeDialog,
    Strategy::ConsentDialog,
    Strategy::VisionOracle,
    Strategy::AccessibilityOracle,
    Strategy::OcrOracle,
];

impl Strategy {
    /// How the screen must be read for this strategy.
    pub fn modality(&self) -> Modality {
        match self {
            Self::NativeDialog | Self::AccessibilityOracle => Modality::Accessibility,
            Self::ConsentDialog | Self::OcrOracle => Modality::Ocr,
            Self::VisionOracle => Modality::Image,
        }
    }

    pub fn is_oracle_backed(&self) -> bool {
        matches!(
            self,
            Self::VisionOracle | Self::AccessibilityOracle | Self::OcrOracle
        )
    }

    /// Next strategy in the cascade, `None` after the last.
    pub fn next(&self) -> Option<Strategy> {
        let idx = CASCADE.iter().position(|s| s == self)?;
        CASCADE.get(idx + 1).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NativeDialog => "native_dialog",
            Self::ConsentDialog => "consent_dialog",
            Self::VisionOracle => "vision_oracle",
            Self::AccessibilityOracle => "accessibility_oracle",
            Self::OcrOracle => "ocr_oracle",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
