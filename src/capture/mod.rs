//! Packet capture session: start, restart, stop, persist.
//!
//! One worker thread appends incoming records to a buffer owned by the
//! active capture. Each `start` gets a fresh buffer and a fresh stop flag, so
//! a worker left behind by an earlier capture can never write into the new
//! one. `stop` persists the buffer as a pcap file whose header is present
//! even when nothing was captured.

pub mod pcap;

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use tracing::{debug, error, info, warn};

use crate::error::CaptureError;
use crate::log::{ExecutionLog, LogEvent};
use crate::monitor::Poll;
use crate::monitor::wait_finished;

/// One raw packet as delivered by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRecord {
    pub timestamp: SystemTime,
    pub data: Vec<u8>,
    /// Length on the wire; may exceed `data.len()` when the device truncated.
    pub original_len: u32,
}

impl PacketRecord {
    pub fn new(data: Vec<u8>) -> Self {
        let original_len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        Self {
            timestamp: SystemTime::now(),
            data,
            original_len,
        }
    }
}

/// A live packet subscription.
pub trait PacketStream: Send {
    fn poll_packet(&mut self) -> io::Result<Poll<PacketRecord>>;
}

/// Opens packet subscriptions on the device.
pub trait PacketSource: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn PacketStream>>;
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// How long `stop` waits for the worker to exit.
    pub stop_timeout: Duration,
    pub poll_interval: Duration,
    pub link_type: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(20),
            link_type: pcap::LINKTYPE_ETHERNET,
        }
    }
}

type Buffer = Arc<Mutex<Vec<PacketRecord>>>;

fn lock(buffer: &Buffer) -> MutexGuard<'_, Vec<PacketRecord>> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ActiveCapture {
    path: PathBuf,
    buffer: Buffer,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// At most one capture per session; starting while active restarts it.
pub struct PacketCaptureSession {
    source: Arc<dyn PacketSource>,
    config: CaptureConfig,
    active: Option<ActiveCapture>,
    journal: Option<Arc<ExecutionLog>>,
}

impl PacketCaptureSession {
    pub fn new(source: Arc<dyn PacketSource>, config: CaptureConfig) -> Self {
        Self {
            source,
            config,
            active: None,
            journal: None,
        }
    }

    /// Record capture start and stop in `journal`.
    pub fn with_journal(mut self, journal: Arc<ExecutionLog>) -> Self {
        self.journal = Some(journal);
        self
    }

    fn note(&self, event: LogEvent) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.log(event) {
                warn!(error = %e, "execution log write failed");
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Destination of the active capture, if any.
    pub fn path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    /// Records buffered so far by the active capture.
    pub fn buffered(&self) -> usize {
        self.active.as_ref().map_or(0, |a| lock(&a.buffer).len())
    }

    /// Begin capturing into a fresh buffer that `stop` will persist to `path`.
    ///
    /// An active capture is stopped (and persisted to its own path) first. If
    /// that fails it stays active and the failure is returned:
    /// [`CaptureError::StillRunning`] when the worker did not halt in time,
    /// [`CaptureError::Persist`] when its file could not be written.
    pub fn start(&mut self, path: &Path) -> Result<(), CaptureError> {
        if self.active.is_some() {
            info!("capture already active; restarting");
            self.finish()?;
        }

        let stream = self.source.open().map_err(CaptureError::Open)?;
        let buffer: Buffer = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            stream,
            buffer: Arc::clone(&buffer),
            stop: Arc::clone(&stop),
            poll_interval: self.config.poll_interval,
        };
        let handle = thread::Builder::new()
            .name("packet-capture".to_string())
            .spawn(move || worker.run())
            .map_err(CaptureError::Open)?;

        info!(path = %path.display(), "capture started");
        self.note(LogEvent::CaptureStarted {
            path: path.display().to_string(),
        });
        self.active = Some(ActiveCapture {
            path: path.to_path_buf(),
            buffer,
            stop,
            handle,
        });
        Ok(())
    }

    /// Stop the active capture and persist it.
    ///
    /// Returns `false` when nothing is active, when the worker does not halt
    /// in time, or when the file cannot be written. In the latter two cases
    /// the capture stays in place so `stop` can be retried.
    pub fn stop(&mut self) -> bool {
        match self.finish() {
            Ok(stopped) => stopped,
            Err(_) => false,
        }
    }

    /// `Ok(false)` when nothing is active. On error the capture is put back.
    fn finish(&mut self) -> Result<bool, CaptureError> {
        let Some(active) = self.active.take() else {
            warn!("no active capture to stop");
            return Ok(false);
        };

        active.stop.store(true, Ordering::Relaxed);
        if !wait_finished(&active.handle, self.config.stop_timeout) {
            warn!(
                timeout_ms = self.config.stop_timeout.as_millis() as u64,
                "capture worker did not stop in time"
            );
            self.active = Some(active);
            return Err(CaptureError::StillRunning(self.config.stop_timeout));
        }

        let path = active.path.display().to_string();
        if let Err(e) = self.persist(&active) {
            error!(error = %e, "failed to persist capture");
            self.active = Some(active);
            self.note(LogEvent::CaptureStopped { path, persisted: false });
            return Err(e);
        }
        self.note(LogEvent::CaptureStopped { path, persisted: true });

        let ActiveCapture { handle, buffer, .. } = active;
        if handle.join().is_err() {
            error!("capture worker panicked");
        }
        lock(&buffer).clear();
        Ok(true)
    }

    fn persist(&self, active: &ActiveCapture) -> Result<(), CaptureError> {
        let records = lock(&active.buffer);
        info!(packets = records.len(), path = %active.path.display(), "writing capture");

        let persist_err = |source| CaptureError::Persist {
            path: active.path.clone(),
            source,
        };
        if let Some(parent) = active.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(persist_err)?;
        }
        let file = File::create(&active.path).map_err(persist_err)?;
        let mut out = BufWriter::new(file);
        pcap::write_pcap(&mut out, &records, self.config.link_type).map_err(persist_err)
    }
}

impl Drop for PacketCaptureSession {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.stop.store(true, Ordering::Relaxed);
        }
    }
}

struct Worker {
    stream: Box<dyn PacketStream>,
    buffer: Buffer,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl Worker {
    fn run(mut self) {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                debug!("capture stop requested");
                return;
            }
            match self.stream.poll_packet() {
                Ok(Poll::Ready(record)) => lock(&self.buffer).push(record),
                Ok(Poll::Idle) => thread::sleep(self.poll_interval),
                Ok(Poll::Closed) => {
                    debug!("packet source closed");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "packet source failed; capture worker exiting");
                    return;
                }
            }
        }
    }
}
