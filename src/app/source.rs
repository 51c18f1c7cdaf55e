// MrcSleuth - app/source.rs
//
// Line sources: a finished log file or a live serial console, both exposed
// as an iterator of raw lines.
//
// Encoding: bytes are decoded as lossy UTF-8 one line at a time, so a burst
// of garbage on a noisy serial line costs one mangled line, not the run.
//
// A live source never reaches end-of-stream on its own. When no data is
// available it sleeps with a doubling backoff (capped), waking in small
// slices so the cancel flag is honoured promptly. A partial line is held
// back until its newline arrives.

use crate::platform::fs::{self, SourceKind};
use crate::util::constants::{
    LIVE_CANCEL_CHECK_INTERVAL_MS, LIVE_POLL_INTERVAL_MS, LIVE_POLL_MAX_INTERVAL_MS,
};
use crate::util::error::SourceError;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Iterator over the raw lines of a console transcript.
pub struct LineSource<R> {
    reader: R,
    origin: PathBuf,
    live: bool,
    cancel: Arc<AtomicBool>,
    partial: Vec<u8>,
    idle_ms: u64,
    lines_read: u64,
    done: bool,
}

impl LineSource<BufReader<File>> {
    /// Open a log file or serial console by path.
    pub fn open(path: &Path, cancel: Arc<AtomicBool>) -> Result<(SourceKind, Self), SourceError> {
        let kind = fs::classify_source(path)?;
        let file = File::open(path).map_err(|e| SourceError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let reader = BufReader::new(file);
        tracing::info!(path = %path.display(), ?kind, "Console source opened");
        let source = match kind {
            SourceKind::LogFile => Self::finite(reader, path),
            SourceKind::SerialConsole => Self::live(reader, path, cancel),
        };
        Ok((kind, source))
    }
}

impl<R: BufRead> LineSource<R> {
    /// A source that ends at the reader's end-of-file.
    pub fn finite(reader: R, origin: impl Into<PathBuf>) -> Self {
        Self::build(reader, origin.into(), false, Arc::new(AtomicBool::new(false)))
    }

    /// A source that waits for more data at end-of-file until `cancel` is set.
    pub fn live(reader: R, origin: impl Into<PathBuf>, cancel: Arc<AtomicBool>) -> Self {
        Self::build(reader, origin.into(), true, cancel)
    }

    fn build(reader: R, origin: PathBuf, live: bool, cancel: Arc<AtomicBool>) -> Self {
        Self {
            reader,
            origin,
            live,
            cancel,
            partial: Vec::new(),
            idle_ms: LIVE_POLL_INTERVAL_MS,
            lines_read: 0,
            done: false,
        }
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Shared flag that stops the source at the next line boundary.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn take_line(&mut self) -> String {
        let mut end = self.partial.len();
        while end > 0 && matches!(self.partial[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        let line = String::from_utf8_lossy(&self.partial[..end]).into_owned();
        self.partial.clear();
        self.lines_read += 1;
        self.idle_ms = LIVE_POLL_INTERVAL_MS;
        line
    }

    /// Sleep for the current backoff interval. Returns false if cancelled.
    fn wait_for_data(&mut self) -> bool {
        let slices = (self.idle_ms / LIVE_CANCEL_CHECK_INTERVAL_MS).max(1);
        for _ in 0..slices {
            if self.cancel.load(Ordering::SeqCst) {
                return false;
            }
            std::thread::sleep(Duration::from_millis(LIVE_CANCEL_CHECK_INTERVAL_MS));
        }
        self.idle_ms = (self.idle_ms * 2).min(LIVE_POLL_MAX_INTERVAL_MS);
        !self.cancel.load(Ordering::SeqCst)
    }

    fn stop(&mut self, reason: &'static str) {
        self.done = true;
        tracing::info!(
            source = %self.origin.display(),
            lines = self.lines_read,
            reason,
            "Console source ended"
        );
    }
}

impl<R: BufRead> Iterator for LineSource<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.cancel.load(Ordering::SeqCst) {
                self.stop("cancelled");
                return None;
            }

            match self.reader.read_until(b'\n', &mut self.partial) {
                Ok(0) if self.live => {
                    if !self.wait_for_data() {
                        self.stop("cancelled");
                        return None;
                    }
                }
                Ok(0) => {
                    self.stop("end of file");
                    if self.partial.is_empty() {
                        return None;
                    }
                    return Some(Ok(self.take_line()));
                }
                Ok(_) => {
                    if self.partial.last() == Some(&b'\n') {
                        return Some(Ok(self.take_line()));
                    }
                    // Partial line: a finite reader hits end-of-file on the
                    // next read, a live one waits for the rest.
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e)
                    if self.live
                        && matches!(
                            e.kind(),
                            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                        ) =>
                {
                    if !self.wait_for_data() {
                        self.stop("cancelled");
                        return None;
                    }
                }
                Err(e) => {
                    tracing::warn!(source = %self.origin.display(), error = %e, "Console read failed");
                    self.stop("read error");
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_finite_source_yields_lines_without_terminators() {
        let src = LineSource::finite(Cursor::new(b"a\r\nb\n\nlast".to_vec()), "mem");
        let lines: Vec<String> = src.map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["a", "b", "", "last"]);
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let src = LineSource::finite(Cursor::new(b"ok\n\xff\xfeSTART\n".to_vec()), "mem");
        let lines: Vec<String> = src.map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("START"));
    }

    #[test]
    fn test_live_source_stops_on_cancel() {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut src = LineSource::live(Cursor::new(b"one\ntw".to_vec()), "tty", Arc::clone(&cancel));
        assert_eq!(src.next().unwrap().unwrap(), "one");
        cancel.store(true, Ordering::SeqCst);
        // The dangling partial line is never emitted by a live source.
        assert!(src.next().is_none());
        assert_eq!(src.lines_read(), 1);
    }

    #[test]
    fn test_open_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boot.log");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "START_SOCKET_0_TABLE").unwrap();
        writeln!(f, "STOP_SOCKET_0_TABLE").unwrap();
        drop(f);

        let (kind, src) = LineSource::open(&path, Arc::new(AtomicBool::new(false))).unwrap();
        assert_eq!(kind, SourceKind::LogFile);
        assert_eq!(src.count(), 2);
    }
}
