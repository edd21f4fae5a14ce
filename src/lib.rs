//! Voice-driven exploratory navigation of mobile apps.
//!
//! The crate has two halves. The ingestion half turns live device streams
//! (system log lines, accessibility focus events, network packets) into
//! queues and capture files through background workers with cooperative
//! cancellation. The decision half ([`navigation::NavigationEngine`]) walks a
//! fixed cascade of strategies, executes one UI action at a time, and judges
//! whether the screen actually advanced.
//!
//! Device transport, speech synthesis, OCR and the generative oracle are
//! collaborators behind traits ([`device::DeviceLink`],
//! [`executor::ActionExecutor`], [`oracle::ActionOracle`]).

pub mod a11y;
pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod executor;
pub mod grid;
pub mod history;
pub mod log;
pub mod monitor;
pub mod navigation;
pub mod oracle;
pub mod screen;
pub mod syslog;
