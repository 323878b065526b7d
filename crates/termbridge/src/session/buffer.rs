//! Per-session output buffering.
//!
//! The drain task appends PTY output here as it is produced; poll-based
//! `read` calls consume it. The buffer decouples the two: the shell can keep
//! producing output while no view is polling, and a polling view gets an
//! empty (non-error) result when nothing new has arrived.
//!
//! The buffer is capped. On overflow the oldest bytes are discarded and a
//! loss marker is recorded, which the next successful read reports via
//! [`ReadOutput::truncated`]. Within the retained bytes, order is always
//! preserved and nothing is delivered twice.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

/// Output drained by a single `read` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOutput {
    /// Raw bytes in production order. May be empty.
    pub data: Vec<u8>,
    /// True if the buffer overflowed since the previous read, i.e. a
    /// contiguous prefix of `data` was discarded.
    pub truncated: bool,
}

impl ReadOutput {
    /// Returns true if this read produced no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

struct BufferInner {
    data: VecDeque<u8>,
    /// Bytes were discarded since the last drain.
    truncated: bool,
    /// Producer side has finished (EOF or session destroyed). Readers must
    /// not wait once set; remaining bytes stay drainable.
    closed: bool,
}

/// A capped single-producer byte queue between the drain task and `read`.
///
/// The interior mutex is scoped to this one session and is never held
/// across an await point; waiting readers are woken through a [`Notify`].
pub struct OutputBuffer {
    inner: Mutex<BufferInner>,
    notify: Notify,
    max_bytes: usize,
}

impl OutputBuffer {
    /// Creates an empty buffer holding at most `max_bytes` bytes.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                data: VecDeque::new(),
                truncated: false,
                closed: false,
            }),
            notify: Notify::new(),
            max_bytes,
        }
    }

    /// Appends bytes from the drain task, discarding the oldest bytes if
    /// the cap is exceeded, and wakes any waiting reader.
    pub fn push(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            inner.data.extend(bytes);
            if inner.data.len() > self.max_bytes {
                let excess = inner.data.len() - self.max_bytes;
                inner.data.drain(..excess);
                inner.truncated = true;
                tracing::warn!(
                    discarded = excess,
                    cap = self.max_bytes,
                    "Output buffer overflow, oldest bytes discarded"
                );
            }
        }
        self.notify.notify_waiters();
    }

    /// Takes everything currently buffered, consuming the loss marker.
    pub fn drain(&self) -> ReadOutput {
        let mut inner = self.inner.lock().unwrap();
        let data: Vec<u8> = inner.data.drain(..).collect();
        let truncated = inner.truncated;
        inner.truncated = false;
        ReadOutput { data, truncated }
    }

    /// Drains buffered output, waiting up to `wait` for the first bytes if
    /// the buffer is currently empty and still open.
    ///
    /// Always returns; an empty result is the normal "nothing yet" answer
    /// for a poll loop.
    pub async fn drain_or_wait(&self, wait: Duration) -> ReadOutput {
        // Arm the wakeup before re-checking, so a push between the check
        // and the await cannot be missed.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        {
            let inner = self.inner.lock().unwrap();
            if !inner.data.is_empty() || inner.closed {
                drop(inner);
                return self.drain();
            }
        }

        let _ = tokio::time::timeout(wait, notified).await;
        self.drain()
    }

    /// Marks the producer side finished and wakes waiting readers.
    ///
    /// Already-buffered bytes remain available to subsequent drains.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
        }
        self.notify.notify_waiters();
    }

    /// Number of bytes currently buffered.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().data.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
