//! Background listener draining a line source into an [`EventQueue`].
//!
//! One producer thread per monitor. The producer polls its stop flag before
//! every unit of work, filters lines by keyword, and resubscribes a bounded
//! number of times when the source fails. Stopping is cooperative: if the
//! producer does not exit within the join bound, [`EventStreamMonitor::stop`]
//! reports [`StopStatus::StillRunning`] instead of blocking or panicking.

pub mod source;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::events::{Event, EventQueue};

pub use source::{ChannelSource, FileLineSource, LineSource, LineStream, Poll, ReplaySource};

/// Runtime settings for a monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Subscription attempts before the producer gives up.
    pub max_attempts: u32,
    /// How long `stop` waits for the producer to exit.
    pub stop_timeout: Duration,
    /// Sleep between polls of an idle source.
    pub poll_interval: Duration,
    /// Queue capacity; `None` leaves the queue unbounded.
    pub queue_capacity: Option<usize>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            stop_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(50),
            queue_capacity: None,
        }
    }
}

/// Outcome of asking a background worker to halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
    /// The worker exited within the bound.
    Stopped,
    /// The worker is still running after the bound; it has been signalled
    /// and will exit at its next poll. Callers should log this as a leak.
    StillRunning,
    /// There was nothing to stop.
    NotRunning,
}

/// Substring filter applied to every line before it is queued.
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    /// An empty filter accepts everything; otherwise at least one keyword must
    /// occur in the line (case-sensitive).
    pub fn accepts(&self, line: &str) -> bool {
        self.keywords.is_empty() || self.keywords.iter().any(|k| line.contains(k.as_str()))
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

/// Handle to a running (or finished) monitor.
pub struct EventStreamMonitor {
    tag: String,
    queue: EventQueue,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    stop_timeout: Duration,
}

impl EventStreamMonitor {
    /// Spawn the producer for `source`. An empty `keywords` list queues every line.
    pub fn start(source: Arc<dyn LineSource>, keywords: KeywordFilter, config: &MonitorConfig) -> Self {
        let tag = source.tag().to_string();
        let queue = EventQueue::with_capacity(config.queue_capacity);
        let stop = Arc::new(AtomicBool::new(false));

        let producer = Producer {
            source,
            filter: keywords,
            queue: queue.clone(),
            stop: Arc::clone(&stop),
            max_attempts: config.max_attempts,
            poll_interval: config.poll_interval,
        };
        let handle = thread::Builder::new()
            .name(format!("monitor-{tag}"))
            .spawn(move || producer.run());

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                error!(source = %tag, error = %e, "failed to spawn monitor thread");
                None
            }
        };
        info!(source = %tag, "monitor started");

        Self {
            tag,
            queue,
            stop,
            handle,
            stop_timeout: config.stop_timeout,
        }
    }

    /// Next queued event, waiting up to `timeout`. `None` on timeout.
    pub fn read(&self, timeout: Duration) -> Option<Event> {
        self.queue.pop_timeout(timeout)
    }

    /// Shared handle to this monitor's queue, for consumers on other threads.
    pub fn queue(&self) -> EventQueue {
        self.queue.clone()
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the producer and wait up to the configured bound for it to exit.
    pub fn stop(&mut self) -> StopStatus {
        self.stop.store(true, Ordering::Relaxed);
        let Some(handle) = self.handle.take() else {
            return StopStatus::NotRunning;
        };

        if !wait_finished(&handle, self.stop_timeout) {
            warn!(
                source = %self.tag,
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "monitor still running after stop"
            );
            self.handle = Some(handle);
            return StopStatus::StillRunning;
        }

        if handle.join().is_err() {
            error!(source = %self.tag, "monitor thread panicked");
        }
        info!(source = %self.tag, "monitor stopped");
        StopStatus::Stopped
    }
}

impl Drop for EventStreamMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Poll `handle` until it finishes or `timeout` elapses.
pub(crate) fn wait_finished(handle: &JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if handle.is_finished() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

struct Producer {
    source: Arc<dyn LineSource>,
    filter: KeywordFilter,
    queue: EventQueue,
    stop: Arc<AtomicBool>,
    max_attempts: u32,
    poll_interval: Duration,
}

impl Producer {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn run(self) {
        let tag = self.source.tag().to_string();
        let mut failures = 0;

        while failures < self.max_attempts {
            if self.stopped() {
                return;
            }
            let mut stream = match self.source.subscribe() {
                Ok(s) => s,
                Err(e) => {
                    failures += 1;
                    warn!(source = %tag, attempt = failures, max = self.max_attempts, error = %e, "subscribe failed");
                    continue;
                }
            };

            loop {
                if self.stopped() {
                    debug!(source = %tag, "stop requested");
                    return;
                }
                match stream.poll_line() {
                    Ok(Poll::Ready(line)) => {
                        if self.filter.accepts(&line) {
                            self.queue.push(Event::new(&tag, line));
                        }
                    }
                    Ok(Poll::Idle) => thread::sleep(self.poll_interval),
                    Ok(Poll::Closed) => {
                        debug!(source = %tag, "source exhausted");
                        return;
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(source = %tag, attempt = failures, max = self.max_attempts, error = %e, "source failed; resubscribing");
                        break;
                    }
                }
            }
        }

        error!(source = %tag, attempts = failures, "retries exhausted; monitor terminating");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::sync::mpsc;

    const READ: Duration = Duration::from_secs(2);

    fn fast() -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(5),
            ..MonitorConfig::default()
        }
    }

    /// Fails every subscription with a connection error.
    struct DeadSource {
        subscribes: Arc<AtomicU32>,
    }

    impl LineSource for DeadSource {
        fn tag(&self) -> &str {
            "dead"
        }

        fn subscribe(&self) -> io::Result<Box<dyn LineStream>> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::ConnectionAborted, "lockdown dropped"))
        }
    }

    /// Yields one line, then errors, for the first `flaky` subscriptions.
    struct FlakySource {
        subscribes: Arc<AtomicU32>,
        flaky: u32,
    }

    struct FlakyStream {
        served: bool,
        fail: bool,
    }

    impl LineStream for FlakyStream {
        fn poll_line(&mut self) -> io::Result<Poll<String>> {
            if !self.served {
                self.served = true;
                return Ok(Poll::Ready("line".to_string()));
            }
            if self.fail {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            } else {
                Ok(Poll::Closed)
            }
        }
    }

    impl LineSource for FlakySource {
        fn tag(&self) -> &str {
            "flaky"
        }

        fn subscribe(&self) -> io::Result<Box<dyn LineStream>> {
            let n = self.subscribes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Box::new(FlakyStream {
                served: false,
                fail: n <= self.flaky,
            }))
        }
    }

    /// A stream whose poll blocks until released, to simulate a stuck transport.
    struct StuckSource {
        release: Arc<Mutex<mpsc::Receiver<()>>>,
    }

    struct StuckStream {
        release: Arc<Mutex<mpsc::Receiver<()>>>,
    }

    impl LineStream for StuckStream {
        fn poll_line(&mut self) -> io::Result<Poll<String>> {
            let _ = self.release.lock().unwrap().recv();
            Ok(Poll::Closed)
        }
    }

    impl LineSource for StuckSource {
        fn tag(&self) -> &str {
            "stuck"
        }

        fn subscribe(&self) -> io::Result<Box<dyn LineStream>> {
            Ok(Box::new(StuckStream {
                release: Arc::clone(&self.release),
            }))
        }
    }

    #[test]
    fn end_to_end_keyword_filter_keeps_order() {
        let source = ReplaySource::new(
            "syslog",
            [
                "SpringBoard: Scene lifecycle state did change",
                "assistantd: Recognized text is a command: tap Allow",
                "kernel: noise",
                "assistantd: Recognized text is a command: go home",
            ],
        );
        let monitor = EventStreamMonitor::start(
            Arc::new(source),
            KeywordFilter::new(["Recognized text is a command"]),
            &fast(),
        );

        let first = monitor.read(READ).unwrap();
        let second = monitor.read(READ).unwrap();
        assert!(first.raw.ends_with("tap Allow"));
        assert!(second.raw.ends_with("go home"));
        assert_eq!(first.source, "syslog");
        assert!(monitor.read(Duration::from_millis(100)).is_none());
    }

    #[test]
    fn empty_keywords_accept_every_line() {
        let source = ReplaySource::new("syslog", ["a", "b", "c"]);
        let monitor = EventStreamMonitor::start(Arc::new(source), KeywordFilter::default(), &fast());
        let got: Vec<String> = (0..3).filter_map(|_| monitor.read(READ)).map(|e| e.raw).collect();
        assert_eq!(got, vec!["a", "b", "c"]);
    }

    #[test]
    fn read_times_out_without_error() {
        let (_tx, rx) = mpsc::channel::<String>();
        let mut monitor = EventStreamMonitor::start(
            Arc::new(ChannelSource::new("a11y", rx)),
            KeywordFilter::default(),
            &fast(),
        );
        assert!(monitor.read(Duration::from_millis(50)).is_none());
        assert_eq!(monitor.stop(), StopStatus::Stopped);
    }

    #[test]
    fn stop_halts_idle_producer() {
        let (_tx, rx) = mpsc::channel::<String>();
        let mut monitor = EventStreamMonitor::start(
            Arc::new(ChannelSource::new("syslog", rx)),
            KeywordFilter::default(),
            &fast(),
        );
        assert!(monitor.is_running());
        assert_eq!(monitor.stop(), StopStatus::Stopped);
        assert!(!monitor.is_running());
        assert_eq!(monitor.stop(), StopStatus::NotRunning);
    }

    #[test]
    fn stop_reports_still_running_for_stuck_producer() {
        let (release_tx, release_rx) = mpsc::channel();
        let source = StuckSource {
            release: Arc::new(Mutex::new(release_rx)),
        };
        let config = MonitorConfig {
            stop_timeout: Duration::from_millis(50),
            ..fast()
        };
        let mut monitor = EventStreamMonitor::start(Arc::new(source), KeywordFilter::default(), &config);
        thread::sleep(Duration::from_millis(20));

        assert_eq!(monitor.stop(), StopStatus::StillRunning);
        release_tx.send(()).unwrap();
        let waited = Instant::now();
        while monitor.is_running() && waited.elapsed() < READ {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(monitor.stop(), StopStatus::Stopped);
    }

    #[test]
    fn dead_source_is_retried_up_to_bound() {
        let subscribes = Arc::new(AtomicU32::new(0));
        let source = DeadSource {
            subscribes: Arc::clone(&subscribes),
        };
        let mut monitor = EventStreamMonitor::start(Arc::new(source), KeywordFilter::default(), &fast());

        let started = Instant::now();
        while monitor.is_running() && started.elapsed() < READ {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(subscribes.load(Ordering::SeqCst), 3);
        assert!(monitor.read(Duration::from_millis(20)).is_none());
        assert_eq!(monitor.stop(), StopStatus::Stopped);
    }

    #[test]
    fn transient_failure_resubscribes_and_keeps_delivering() {
        let subscribes = Arc::new(AtomicU32::new(0));
        let source = FlakySource {
            subscribes: Arc::clone(&subscribes),
            flaky: 2,
        };
        let monitor = EventStreamMonitor::start(Arc::new(source), KeywordFilter::default(), &fast());

        let lines: Vec<Event> = (0..3).filter_map(|_| monitor.read(READ)).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(subscribes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn bounded_queue_from_config() {
        let source = ReplaySource::new("syslog", ["1", "2", "3", "4"]);
        let config = MonitorConfig {
            queue_capacity: Some(2),
            ..fast()
        };
        let mut monitor = EventStreamMonitor::start(Arc::new(source), KeywordFilter::default(), &config);
        let started = Instant::now();
        while monitor.is_running() && started.elapsed() < READ {
            thread::sleep(Duration::from_millis(5));
        }
        monitor.stop();
        let q = monitor.queue();
        assert_eq!(q.dropped(), 2);
        assert_eq!(q.try_pop().unwrap().raw, "3");
    }

    proptest! {
        #[test]
        fn filter_accepts_iff_some_keyword_occurs(
            line in "[a-cA-C ]{0,12}",
            keywords in proptest::collection::vec("[a-cA-C]{1,3}", 1..4),
        ) {
            let filter = KeywordFilter::new(keywords.clone());
            let expected = keywords.iter().any(|k| line.contains(k.as_str()));
            prop_assert_eq!(filter.accepts(&line), expected);
        }
    }
}
