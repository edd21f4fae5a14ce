//! Error types that cross the library boundary.
//!
//! Most per-step failures never reach the caller: they are logged and turned
//! into "try the next strategy". What remains here are the cases a caller has
//! to react to.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Hard failure out of `NavigationEngine::navigate`.
#[derive(Debug, Error)]
pub enum NavigationError {
    /// The device link could not produce a screenshot. Nothing else in the
    /// cascade can proceed without one.
    #[error("failed to capture screenshot {}: {source}", path.display())]
    Screenshot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Packet capture lifecycle failures.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The previous capture worker did not halt within its join bound, so a
    /// new one was not started.
    #[error("previous capture did not stop within {0:?}")]
    StillRunning(Duration),
    /// The packet source refused to open.
    #[error("failed to open packet source: {0}")]
    Open(#[source] io::Error),
    /// The capture artifact could not be written.
    #[error("failed to write capture to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
