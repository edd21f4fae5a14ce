//! Line sources feeding an [`EventStreamMonitor`](super::EventStreamMonitor).
//!
//! A source is subscribed once per connection attempt. The returned stream is
//! polled by the monitor's producer thread, which checks its stop flag between
//! polls, so `poll_line` must never block for long.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};

/// Result of one non-blocking poll.
#[derive(Debug, Clone, PartialEq)]
pub enum Poll<T> {
    /// An item is available.
    Ready(T),
    /// Nothing yet; poll again later.
    Idle,
    /// The source is exhausted for good.
    Closed,
}

/// A live subscription to a line-oriented source.
pub trait LineStream: Send {
    /// Fetch the next line if one is ready. An `Err` is treated as a transient
    /// failure and the monitor resubscribes.
    fn poll_line(&mut self) -> io::Result<Poll<String>>;
}

/// Something that can be (re)subscribed to for lines.
pub trait LineSource: Send + Sync {
    /// Tag stamped on every event from this source (e.g. "syslog").
    fn tag(&self) -> &str;

    fn subscribe(&self) -> io::Result<Box<dyn LineStream>>;
}

/// Fixed set of lines, delivered once per subscription and then closed.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    tag: String,
    lines: Vec<String>,
}

impl ReplaySource {
    pub fn new<I, S>(tag: &str, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tag: tag.to_string(),
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

struct ReplayStream {
    lines: VecDeque<String>,
}

impl LineStream for ReplayStream {
    fn poll_line(&mut self) -> io::Result<Poll<String>> {
        Ok(match self.lines.pop_front() {
            Some(line) => Poll::Ready(line),
            None => Poll::Closed,
        })
    }
}

impl LineSource for ReplaySource {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn subscribe(&self) -> io::Result<Box<dyn LineStream>> {
        Ok(Box::new(ReplayStream {
            lines: self.lines.iter().cloned().collect(),
        }))
    }
}

/// Lines pushed by a transport thread through an mpsc channel.
///
/// Resubscribing shares the same receiver, so nothing is replayed. A
/// disconnected sender closes the stream.
pub struct ChannelSource {
    tag: String,
    rx: Arc<Mutex<Receiver<String>>>,
}

impl ChannelSource {
    pub fn new(tag: &str, rx: Receiver<String>) -> Self {
        Self {
            tag: tag.to_string(),
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

struct ChannelStream {
    rx: Arc<Mutex<Receiver<String>>>,
}

impl LineStream for ChannelStream {
    fn poll_line(&mut self) -> io::Result<Poll<String>> {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(match rx.try_recv() {
            Ok(line) => Poll::Ready(line),
            Err(TryRecvError::Empty) => Poll::Idle,
            Err(TryRecvError::Disconnected) => Poll::Closed,
        })
    }
}

impl LineSource for ChannelSource {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn subscribe(&self) -> io::Result<Box<dyn LineStream>> {
        Ok(Box::new(ChannelStream {
            rx: Arc::clone(&self.rx),
        }))
    }
}

/// Polling tail of a log file.
///
/// Seeks to the last read position, reads whatever was appended, and hands
/// out complete lines. A missing file is simply idle. Offsets past EOF (after
/// truncation or rotation) are clamped.
#[derive(Debug, Clone)]
pub struct FileLineSource {
    tag: String,
    path: PathBuf,
    from_start: bool,
}

impl FileLineSource {
    /// Tail `path`, starting at its end at subscription time.
    pub fn new(tag: &str, path: &Path) -> Self {
        Self {
            tag: tag.to_string(),
            path: path.to_path_buf(),
            from_start: false,
        }
    }

    /// Read the file from the beginning instead of its current end.
    pub fn from_start(mut self) -> Self {
        self.from_start = true;
        self
    }
}

impl LineSource for FileLineSource {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn subscribe(&self) -> io::Result<Box<dyn LineStream>> {
        let position = if self.from_start {
            0
        } else {
            match std::fs::metadata(&self.path) {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
                Err(e) => return Err(e),
            }
        };
        Ok(Box::new(FileLineStream {
            path: self.path.clone(),
            position,
            partial: String::new(),
            pending: VecDeque::new(),
        }))
    }
}

struct FileLineStream {
    path: PathBuf,
    position: u64,
    partial: String,
    pending: VecDeque<String>,
}

impl FileLineStream {
    fn read_new(&mut self) -> io::Result<()> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let len = file.metadata()?.len();
        if self.position > len {
            self.position = len;
            self.partial.clear();
        }
        file.seek(SeekFrom::Start(self.position))?;

        let mut bytes = Vec::new();
        let n = file.read_to_end(&mut bytes)?;
        if n == 0 {
            return Ok(());
        }
        self.position += n as u64;
        self.partial.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(newline) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']).to_string();
            self.pending.push_back(line);
        }
        Ok(())
    }
}

impl LineStream for FileLineStream {
    fn poll_line(&mut self) -> io::Result<Poll<String>> {
        if self.pending.is_empty() {
            self.read_new()?;
        }
        Ok(match self.pending.pop_front() {
            Some(line) => Poll::Ready(line),
            None => Poll::Idle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::sync::mpsc;

    fn drain(stream: &mut dyn LineStream) -> Vec<String> {
        let mut out = Vec::new();
        while let Poll::Ready(line) = stream.poll_line().unwrap() {
            out.push(line);
        }
        out
    }

    #[test]
    fn replay_yields_lines_then_closes() {
        let src = ReplaySource::new("syslog", ["a", "b"]);
        let mut stream = src.subscribe().unwrap();
        assert_eq!(stream.poll_line().unwrap(), Poll::Ready("a".to_string()));
        assert_eq!(stream.poll_line().unwrap(), Poll::Ready("b".to_string()));
        assert_eq!(stream.poll_line().unwrap(), Poll::Closed);
    }

    #[test]
    fn replay_resubscribe_starts_over() {
        let src = ReplaySource::new("syslog", ["a"]);
        let mut first = src.subscribe().unwrap();
        drain(first.as_mut());
        let mut second = src.subscribe().unwrap();
        assert_eq!(second.poll_line().unwrap(), Poll::Ready("a".to_string()));
    }

    #[test]
    fn channel_source_idle_then_closed() {
        let (tx, rx) = mpsc::channel();
        let src = ChannelSource::new("a11y", rx);
        let mut stream = src.subscribe().unwrap();

        assert_eq!(stream.poll_line().unwrap(), Poll::Idle);
        tx.send("event".to_string()).unwrap();
        assert_eq!(stream.poll_line().unwrap(), Poll::Ready("event".to_string()));
        drop(tx);
        assert_eq!(stream.poll_line().unwrap(), Poll::Closed);
    }

    #[test]
    fn file_source_from_start_reads_existing_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sys.log");
        fs::write(&path, "one\ntwo\r\n").unwrap();

        let src = FileLineSource::new("syslog", &path).from_start();
        let mut stream = src.subscribe().unwrap();
        assert_eq!(drain(stream.as_mut()), vec!["one", "two"]);
        assert_eq!(stream.poll_line().unwrap(), Poll::Idle);
    }

    #[test]
    fn file_source_default_skips_existing_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sys.log");
        fs::write(&path, "old\n").unwrap();

        let src = FileLineSource::new("syslog", &path);
        let mut stream = src.subscribe().unwrap();
        assert_eq!(stream.poll_line().unwrap(), Poll::Idle);

        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "new").unwrap();
        assert_eq!(drain(stream.as_mut()), vec!["new"]);
    }

    #[test]
    fn file_source_buffers_partial_line() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sys.log");
        fs::write(&path, "half").unwrap();

        let src = FileLineSource::new("syslog", &path).from_start();
        let mut stream = src.subscribe().unwrap();
        assert_eq!(stream.poll_line().unwrap(), Poll::Idle);

        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, " line").unwrap();
        assert_eq!(drain(stream.as_mut()), vec!["half line"]);
    }

    #[test]
    fn file_source_missing_file_is_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let src = FileLineSource::new("syslog", &tmp.path().join("absent.log"));
        let mut stream = src.subscribe().unwrap();
        assert_eq!(stream.poll_line().unwrap(), Poll::Idle);
    }

    #[test]
    fn file_source_clamps_after_truncation() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sys.log");
        fs::write(&path, "aaaa\nbbbb\n").unwrap();

        let src = FileLineSource::new("syslog", &path).from_start();
        let mut stream = src.subscribe().unwrap();
        drain(stream.as_mut());

        fs::write(&path, "c\n").unwrap();
        assert_eq!(stream.poll_line().unwrap(), Poll::Idle);
        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "d").unwrap();
        assert_eq!(drain(stream.as_mut()), vec!["d"]);
    }
}
