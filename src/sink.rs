//! Output and status sinks fed by the background tasks of a run.
//!
//! Both sinks are invoked from tokio tasks, possibly concurrently. They must
//! return quickly; UI-facing callers hand the value off to their own thread.

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// One line of run output with its line terminator removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stream", content = "text", rename_all = "lowercase")]
pub enum OutputLine {
    /// Worker standard output, escape sequences untouched.
    Stdout(String),
    /// Worker standard error.
    Stderr(String),
    /// Diagnostic emitted by the controller itself.
    Notice(String),
}

impl OutputLine {
    /// Returns the line text.
    pub fn text(&self) -> &str {
        match self {
            OutputLine::Stdout(text) | OutputLine::Stderr(text) | OutputLine::Notice(text) => text,
        }
    }
}

/// Terminal status of a run, reported once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum RunStatus {
    /// The worker exited on its own.
    Completed,
    /// The run was ended by a stop request.
    Stopped,
    /// Waiting on the worker failed.
    Error(String),
}

/// Receives output lines.
pub trait OutputSink: Send + Sync {
    fn on_output(&self, line: OutputLine);
}

impl<F> OutputSink for F
where
    F: Fn(OutputLine) + Send + Sync,
{
    fn on_output(&self, line: OutputLine) {
        self(line)
    }
}

/// Receives the terminal status of a run.
pub trait StatusSink: Send + Sync {
    fn on_status(&self, status: RunStatus);
}

impl<F> StatusSink for F
where
    F: Fn(RunStatus) + Send + Sync,
{
    fn on_status(&self, status: RunStatus) {
        self(status)
    }
}

/// Splits a byte stream into lines ending at `\n`, `\r\n`, or a bare `\r`.
///
/// Console progress output rewrites a line with `\r`, so each rewrite is
/// delivered as its own line.
pub(crate) struct LineReader<R> {
    inner: BufReader<R>,
    after_cr: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self::from_buf_reader(BufReader::new(inner))
    }

    fn from_buf_reader(inner: BufReader<R>) -> Self {
        Self {
            inner,
            after_cr: false,
        }
    }

    /// Appends the next line to `buf` without its terminator. Returns `false`
    /// at end-of-stream when nothing was read.
    pub(crate) async fn next_line(&mut self, buf: &mut Vec<u8>) -> io::Result<bool> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(!buf.is_empty());
            }

            // The `\n` of a `\r\n` pair can arrive in a later read.
            if std::mem::take(&mut self.after_cr) && available[0] == b'\n' {
                self.inner.consume(1);
                continue;
            }

            match available.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(end) => {
                    self.after_cr = available[end] == b'\r';
                    buf.extend_from_slice(&available[..end]);
                    self.inner.consume(end + 1);
                    return Ok(true);
                }
                None => {
                    let len = available.len();
                    buf.extend_from_slice(available);
                    self.inner.consume(len);
                }
            }
        }
    }
}

/// Decodes a line read without its terminator.
pub(crate) fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}
