//! Session manager: the public face of the crate.
//!
//! Composes the registry, PTY handles, and per-session output buffers into
//! the five index-addressed operations a terminal view needs: create, write,
//! read, resize, destroy (plus `start_shell` to attach the process). All
//! operations are safe to call concurrently; sessions never serialize
//! against one another.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;

use super::buffer::ReadOutput;
use super::error::SessionError;
use super::pty::{spawn_drain_task, spawn_exit_watcher, CommandSpec, Liveness, PtyHandle};
use super::registry::{SessionIndex, SessionRegistry};

/// Snapshot of one session's state.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// The session's index.
    pub index: SessionIndex,
    /// Process ID of the shell, if one has been started.
    pub pid: Option<u32>,
    /// Recorded terminal rows.
    pub rows: u16,
    /// Recorded terminal columns.
    pub cols: u16,
    /// Current liveness state.
    pub liveness: Liveness,
    /// Output bytes buffered and not yet read.
    pub buffered_bytes: usize,
}

/// Manages the full lifecycle of PTY sessions for one or more terminal
/// views.
///
/// Each instance is self-contained: it owns its registry and index counter,
/// so tests can build isolated managers. Callers address sessions by the
/// integer index returned from [`create_session`](Self::create_session);
/// payloads are raw bytes, keeping the manager transport-agnostic.
pub struct SessionManager {
    registry: SessionRegistry,
    config: Config,
    /// Sessions counted against the configured cap. Reserved atomically
    /// before a pty is opened, so concurrent creates cannot overshoot.
    active: AtomicUsize,
}

impl SessionManager {
    /// Creates a manager with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            registry: SessionRegistry::new(),
            config,
            active: AtomicUsize::new(0),
        }
    }

    /// Allocates a new session: opens a pty pair at the configured default
    /// size, starts its drain task, and registers it under a fresh index.
    ///
    /// No shell is attached yet; call [`start_shell`](Self::start_shell)
    /// next. Fails with `ResourceExhausted` when the OS refuses a pty or
    /// the configured session cap is reached; creation is not retried.
    pub fn create_session(&self) -> Result<SessionIndex, SessionError> {
        let max_sessions = self.config.session.max_sessions;
        if self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_sessions).then_some(n + 1)
            })
            .is_err()
        {
            return Err(SessionError::ResourceExhausted(format!(
                "session cap reached ({max_sessions})"
            )));
        }

        let index = self.registry.allocate();
        let (handle, reader) = match PtyHandle::open(
            index,
            self.config.session.default_rows,
            self.config.session.default_cols,
            self.config.buffer.max_bytes,
        ) {
            Ok(opened) => opened,
            Err(e) => {
                // Release the reserved slot; the index stays burned.
                self.active.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        };
        let handle = Arc::new(handle);

        spawn_drain_task(
            Arc::clone(&handle),
            reader,
            self.config.buffer.read_chunk_bytes,
        );
        self.registry.insert(index, handle);

        tracing::info!(
            session = index,
            rows = self.config.session.default_rows,
            cols = self.config.session.default_cols,
            "Created session"
        );

        Ok(index)
    }

    /// Launches the shell (or the program named in `spec`) attached to the
    /// session's pty, and starts watching for its exit.
    pub async fn start_shell(
        &self,
        index: SessionIndex,
        spec: CommandSpec,
    ) -> Result<(), SessionError> {
        let handle = self.lookup(index)?;

        let program = spec
            .program
            .clone()
            .unwrap_or_else(|| self.config.session.default_shell.clone());

        let pid = handle.start_shell(&program, &spec).await?;
        spawn_exit_watcher(Arc::clone(&handle));

        tracing::info!(session = index, pid, program = %program, "Shell started");
        Ok(())
    }

    /// Forwards bytes to the session's input stream, as if typed at the
    /// terminal. Bytes are flushed immediately, never batched.
    pub async fn write(&self, index: SessionIndex, data: &[u8]) -> Result<(), SessionError> {
        let handle = self.lookup(index)?;
        handle.write(data).await
    }

    /// Drains currently buffered output for the session.
    ///
    /// Waits at most the configured poll interval when nothing is buffered,
    /// then returns whatever is available. An empty result means "nothing
    /// yet", not failure, so tight poll loops stay correct.
    pub async fn read(&self, index: SessionIndex) -> Result<ReadOutput, SessionError> {
        let handle = self.lookup(index)?;
        let wait = Duration::from_millis(self.config.buffer.poll_wait_ms);
        Ok(handle.read(wait).await)
    }

    /// Propagates a window size change to the session's pty.
    ///
    /// Zero rows or columns are rejected before touching the session.
    pub async fn resize(
        &self,
        index: SessionIndex,
        rows: u16,
        cols: u16,
    ) -> Result<(), SessionError> {
        if rows == 0 || cols == 0 {
            return Err(SessionError::InvalidArgument(format!(
                "terminal size must be non-zero, got {rows}x{cols}"
            )));
        }

        let handle = self.lookup(index)?;
        handle.resize(rows, cols).await
    }

    /// Tears down a session: removes it from the registry, cancels its
    /// drain task, terminates the child (graceful, then forced after the
    /// configured grace period), and releases the pty.
    ///
    /// Idempotent: destroying an unknown or already-destroyed index is a
    /// no-op.
    pub async fn destroy_session(&self, index: SessionIndex) -> Result<(), SessionError> {
        let Some(handle) = self.registry.remove(index) else {
            tracing::debug!(session = index, "Destroy of unknown session ignored");
            return Ok(());
        };

        let grace = Duration::from_millis(self.config.session.kill_grace_ms);
        let state = handle.destroy(grace).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        tracing::info!(session = index, state = ?state, "Destroyed session");
        Ok(())
    }

    /// Destroys every remaining session. Called before dropping the manager
    /// when a graceful shutdown is wanted.
    pub async fn shutdown(&self) {
        for index in self.registry.indices() {
            let _ = self.destroy_session(index).await;
        }
        tracing::info!("Session manager shut down");
    }

    /// Snapshots of all registered sessions, in no particular order.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.registry
            .indices()
            .into_iter()
            .filter_map(|index| self.session_info(index))
            .collect()
    }

    /// Snapshot of one session, if it exists.
    pub fn session_info(&self, index: SessionIndex) -> Option<SessionInfo> {
        let handle = self.registry.get(index)?;
        let (rows, cols) = handle.size();
        Some(SessionInfo {
            index,
            pid: handle.pid(),
            rows,
            cols,
            liveness: handle.liveness(),
            buffered_bytes: handle.buffered_bytes(),
        })
    }

    /// Returns true if the index refers to a registered session.
    pub fn exists(&self, index: SessionIndex) -> bool {
        self.registry.contains(index)
    }

    /// Number of registered sessions.
    pub fn count(&self) -> usize {
        self.registry.len()
    }

    fn lookup(&self, index: SessionIndex) -> Result<Arc<PtyHandle>, SessionError> {
        self.registry
            .get(index)
            .ok_or(SessionError::SessionNotFound(index))
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        // Best-effort teardown for sessions not destroyed explicitly.
        for index in self.registry.indices() {
            if let Some(handle) = self.registry.remove(index) {
                handle.abort();
            }
        }
    }
}
