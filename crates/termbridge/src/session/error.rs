//! Session error taxonomy.
//!
//! Every failure here is local to one session; none of these poison the
//! manager or other sessions. A child process exiting is not an error at
//! all - it surfaces as [`SessionClosed`](SessionError::SessionClosed) on
//! the next write or resize against that session.

use thiserror::Error;

use super::registry::SessionIndex;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session index is unknown - a caller bug or a stale reference
    /// to a session that has already been destroyed and reaped.
    #[error("session not found: {0}")]
    SessionNotFound(SessionIndex),

    /// `start_shell` was called twice for the same session.
    #[error("session {0} already has a running shell")]
    AlreadyStarted(SessionIndex),

    /// The OS could not exec the requested program. Fatal to this session,
    /// not to the manager.
    #[error("failed to spawn shell: {0}")]
    SpawnFailed(String),

    /// PTY or process allocation failed (OS resource limits, or the
    /// configured session cap). The caller may retry later.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// I/O was attempted on a session whose process has exited or been
    /// killed.
    #[error("session {0} is closed")]
    SessionClosed(SessionIndex),

    /// A caller-supplied argument was rejected (e.g. a zero-sized resize).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error on the PTY master.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
