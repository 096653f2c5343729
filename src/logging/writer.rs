//! Rolling File Log Writer
//!
//! ## File naming
//!
//! ```text
//!   <dir>/2026_10_18.log        first file of the day
//!   <dir>/2026_10_18-1.log      after max_lines lines
//!   <dir>/2026_10_18-2.log      after 2 * max_lines lines
//!   <dir>/2026_10_19.log        the local date changed
//! ```
//!
//! ## Sync vs async
//!
//! With a queue capacity of zero every line is written inline under the
//! file lock. Otherwise lines go through a [`BoundedQueue`] drained by one
//! consumer thread; when the queue is full the caller writes the line
//! itself rather than waiting.
//!
//! [`LogWriter`] also implements [`MakeWriter`], so a `tracing-subscriber`
//! fmt layer can format events straight into the rolling files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime};

use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

use super::{LogConfig, LogError};
use crate::pool::{BoundedQueue, TryPushError};

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// `YYYY_MM_DD`, the file name stem.
pub fn file_stem(day: NaiveDate) -> String {
    day.format("%Y_%m_%d").to_string()
}

fn level_title(level: Level) -> &'static str {
    match level {
        Level::TRACE => "[trace]: ",
        Level::DEBUG => "[debug]: ",
        Level::INFO => "[info]: ",
        Level::WARN => "[warn]: ",
        Level::ERROR => "[error]: ",
    }
}

/// Formats one log line in local time, newline included.
pub fn format_line(ts: &NaiveDateTime, level: Level, message: &str) -> String {
    format!(
        "{} {}{}\n",
        ts.format("%Y-%m-%d %H:%M:%S%.6f"),
        level_title(level),
        message
    )
}

/// The open file and its rollover bookkeeping.
#[derive(Debug)]
struct LogFile {
    dir: PathBuf,
    suffix: String,
    max_lines: u64,
    out: BufWriter<File>,
    path: PathBuf,
    opened: NaiveDate,
    lines: u64,
}

impl LogFile {
    fn open(dir: &Path, suffix: &str, max_lines: u64, today: NaiveDate) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}{}", file_stem(today), suffix));
        let out = BufWriter::new(open_append(&path)?);
        Ok(Self {
            dir: dir.to_path_buf(),
            suffix: suffix.to_owned(),
            max_lines,
            out,
            path,
            opened: today,
            lines: 0,
        })
    }

    fn write_line(&mut self, line: &str, today: NaiveDate) -> io::Result<()> {
        if today != self.opened {
            self.lines = 0;
            self.roll(format!("{}{}", file_stem(today), self.suffix), today)?;
        } else if self.lines > 0 && self.lines % self.max_lines == 0 {
            let n = self.lines / self.max_lines;
            self.roll(format!("{}-{}{}", file_stem(today), n, self.suffix), today)?;
        }

        self.out.write_all(line.as_bytes())?;
        self.lines += 1;
        Ok(())
    }

    fn roll(&mut self, name: String, today: NaiveDate) -> io::Result<()> {
        self.out.flush()?;
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        self.out = BufWriter::new(open_append(&path)?);
        self.path = path;
        self.opened = today;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[derive(Debug)]
struct Inner {
    file: Arc<Mutex<LogFile>>,
    queue: Option<Arc<BoundedQueue<String>>>,
    /// Lines queued but not yet written.
    pending: Arc<AtomicUsize>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn write_direct(&self, line: &str) {
        let mut file = self.file.lock().unwrap();
        if let Err(e) = file.write_line(line, now().date()) {
            eprintln!("tinyweb: log write to {} failed: {}", file.path.display(), e);
        }
    }

    fn drain(&self) {
        if let Some(queue) = &self.queue {
            while self.pending.load(Ordering::Acquire) > 0 && !queue.is_closed() {
                queue.flush();
                thread::sleep(Duration::from_millis(1));
            }
        }
        let _ = self.file.lock().unwrap().out.flush();
    }

    fn shutdown(&self) {
        let Some(handle) = self.consumer.lock().unwrap().take() else {
            let _ = self.file.lock().unwrap().out.flush();
            return;
        };
        self.drain();
        if let Some(queue) = &self.queue {
            queue.close();
        }
        let _ = handle.join();
        let _ = self.file.lock().unwrap().out.flush();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Shared handle to the rolling log files. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LogWriter {
    inner: Arc<Inner>,
}

impl LogWriter {
    /// Opens today's file under `config.dir` and, when
    /// `config.queue_capacity > 0`, starts the consumer thread.
    pub fn new(config: &LogConfig) -> Result<Self, LogError> {
        let dir = config.dir.as_deref().ok_or(LogError::NoDirectory)?;
        if config.max_lines == 0 {
            return Err(LogError::InvalidMaxLines);
        }

        let file = LogFile::open(dir, &config.suffix, config.max_lines, now().date())
            .map_err(|source| LogError::Open {
                path: dir.to_path_buf(),
                source,
            })?;
        let file = Arc::new(Mutex::new(file));
        let pending = Arc::new(AtomicUsize::new(0));

        let (queue, consumer) = if config.queue_capacity > 0 {
            let queue = Arc::new(BoundedQueue::new(config.queue_capacity));
            let handle = {
                let queue = Arc::clone(&queue);
                let file = Arc::clone(&file);
                let pending = Arc::clone(&pending);
                thread::Builder::new()
                    .name("tinyweb-log".into())
                    .spawn(move || consume(&queue, &file, &pending))
                    .map_err(LogError::Spawn)?
            };
            (Some(queue), Some(handle))
        } else {
            (None, None)
        };

        Ok(Self {
            inner: Arc::new(Inner {
                file,
                queue,
                pending,
                consumer: Mutex::new(consumer),
            }),
        })
    }

    pub fn is_async(&self) -> bool {
        self.inner.queue.is_some()
    }

    /// Path of the file currently being written.
    pub fn current_path(&self) -> PathBuf {
        self.inner.file.lock().unwrap().path.clone()
    }

    /// Writes `message` with a timestamp and level title.
    pub fn write(&self, level: Level, message: &str) {
        self.submit(format_line(&now(), level, message));
    }

    /// Writes an already formatted line.
    pub fn submit(&self, line: String) {
        let Some(queue) = &self.inner.queue else {
            self.inner.write_direct(&line);
            return;
        };

        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        match queue.try_push_back(line) {
            Ok(()) => {}
            Err(TryPushError::Full(line)) | Err(TryPushError::Closed(line)) => {
                self.inner.pending.fetch_sub(1, Ordering::AcqRel);
                self.inner.write_direct(&line);
            }
        }
    }

    /// Blocks until every queued line is on disk.
    pub fn flush(&self) {
        self.inner.drain();
    }

    /// Drains the queue, stops the consumer and flushes the file. Later
    /// writes go straight to the file.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

fn consume(queue: &BoundedQueue<String>, file: &Mutex<LogFile>, pending: &AtomicUsize) {
    while let Some(line) = queue.pop() {
        {
            let mut file = file.lock().unwrap();
            if let Err(e) = file.write_line(&line, now().date()) {
                eprintln!("tinyweb: log write to {} failed: {}", file.path.display(), e);
            }
            if queue.is_empty() {
                let _ = file.out.flush();
            }
        }
        pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One formatted `tracing` event; submitted when dropped.
pub struct LogLine<'a> {
    writer: &'a LogWriter,
    buf: Vec<u8>,
}

impl Write for LogLine<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LogLine<'_> {
    fn drop(&mut self) {
        if !self.buf.is_empty() {
            let line = String::from_utf8_lossy(&self.buf).into_owned();
            self.writer.submit(line);
        }
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogLine<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        LogLine {
            writer: self,
            buf: Vec::with_capacity(256),
        }
    }
}
