//! Bounded output capture shared by all backends.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

/// Appended to captured output that hit the byte cap.
pub(crate) const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// Byte buffer that stops growing at `limit` but remembers that it overflowed.
#[derive(Debug, Clone)]
pub(crate) struct BoundedOutput {
    buf: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl BoundedOutput {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Appends as much of `bytes` as fits.
    pub fn push(&mut self, bytes: &[u8]) {
        let room = self.limit.saturating_sub(self.buf.len());
        if bytes.len() > room {
            self.buf.extend_from_slice(&bytes[..room]);
            self.truncated = true;
        } else {
            self.buf.extend_from_slice(bytes);
        }
    }

    pub fn push_str(&mut self, s: &str) {
        self.push(s.as_bytes());
    }

    #[cfg(test)]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the buffer, returning UTF-8 text and the truncation flag.
    ///
    /// The text is never longer than the limit. Truncated text ends with
    /// [`TRUNCATION_MARKER`] when the limit leaves room for it.
    pub fn finish(self) -> (String, bool) {
        let mut text = String::from_utf8_lossy(&self.buf).into_owned();
        // Lossy decoding can grow invalid bytes past the limit.
        let truncated = self.truncated || text.len() > self.limit;
        if !truncated {
            return (text, false);
        }

        let marker = if self.limit >= TRUNCATION_MARKER.len() {
            TRUNCATION_MARKER
        } else {
            ""
        };
        truncate_at_char_boundary(&mut text, self.limit - marker.len());
        text.push_str(marker);
        (text, true)
    }
}

fn truncate_at_char_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

/// One child stream drained into a bounded buffer by a background task.
///
/// The reader keeps draining past the cap so the child never blocks on a
/// full pipe. Whatever arrived is kept even when reading is cut short.
pub(crate) struct StreamCapture {
    buf: Arc<Mutex<BoundedOutput>>,
    task: JoinHandle<()>,
}

impl StreamCapture {
    pub fn spawn<R>(mut reader: R, limit: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(BoundedOutput::new(limit)));
        let sink = Arc::clone(&buf);
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut out) = sink.lock() {
                            out.push(&chunk[..n]);
                        }
                    }
                }
            }
        });
        Self { buf, task }
    }

    /// Waits up to `grace` for end of stream, then stops reading.
    ///
    /// A descendant that escaped the process group can hold the pipe open
    /// forever; the grace bounds how long that costs the caller.
    pub async fn finish_within(mut self, grace: Duration) -> (String, bool) {
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            self.task.abort();
        }
        self.snapshot()
    }

    fn snapshot(&self) -> (String, bool) {
        match self.buf.lock() {
            Ok(out) => out.clone().finish(),
            Err(poisoned) => poisoned.into_inner().clone().finish(),
        }
    }
}
