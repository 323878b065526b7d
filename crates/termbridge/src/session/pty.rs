//! PTY handle: one pseudo-terminal pair and its attached shell process.
//!
//! A handle owns the OS resources for a single session: the master side of
//! the pty, the spawned child, the recorded window size, and the session's
//! output buffer. It is the sole writer of its own liveness state, which is
//! updated promptly by a background exit watcher rather than lazily on the
//! next I/O call.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize, SlavePty};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::buffer::{OutputBuffer, ReadOutput};
use super::error::SessionError;
use super::registry::SessionIndex;

/// Liveness of a session's shell process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The process is running (or not yet started).
    Active,
    /// The process terminated on its own with the given exit code.
    Exited(i32),
    /// The process was forcibly terminated by `destroy_session`.
    Killed,
    /// The pty master failed with a read error other than EOF; the session
    /// is dead for a reason other than a normal exit or an explicit kill.
    Errored,
}

impl Liveness {
    /// Returns true while the session can still accept input.
    pub fn is_active(&self) -> bool {
        matches!(self, Liveness::Active)
    }
}

/// What to launch on the slave side of the pty.
///
/// All fields are optional; an empty spec launches the configured default
/// shell in the caller's working directory.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    /// Program to exec. Falls back to the configured default shell.
    pub program: Option<String>,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Extra environment variables. `TERM` is defaulted if absent.
    pub env: Vec<(String, String)>,
    /// Working directory for the child.
    pub cwd: Option<std::path::PathBuf>,
}

/// How often the exit watcher polls the child for termination.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often the destroy path re-checks for a graceful exit.
const KILL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A PTY pair plus its attached process and output buffer.
///
/// Interior mutability throughout so the manager can hand out `Arc` clones
/// to the drain task, the exit watcher, and concurrent callers. The
/// synchronous mutexes guard plain data and are never held across an await.
pub struct PtyHandle {
    index: SessionIndex,

    /// Master side of the pty; locked for resize.
    master: Mutex<Box<dyn MasterPty + Send>>,

    /// Input stream to the shell; locking serializes concurrent writers.
    writer: Mutex<Box<dyn Write + Send>>,

    /// Slave side, consumed by `start_shell` and dropped after the spawn so
    /// the child holds the only remaining slave descriptor.
    slave: Mutex<Option<Box<dyn SlavePty + Send>>>,

    /// Child process, present once `start_shell` has succeeded.
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,

    pid: std::sync::Mutex<Option<u32>>,
    size: std::sync::Mutex<(u16, u16)>,
    liveness: std::sync::Mutex<Liveness>,

    buffer: OutputBuffer,

    /// Cancels the drain task and exit watcher on destroy.
    cancel: CancellationToken,
}

impl PtyHandle {
    /// Opens a new pty pair at the given size.
    ///
    /// Returns the handle and a cloned reader of the master side for the
    /// drain task. No process is attached yet; that happens in
    /// [`start_shell`](Self::start_shell).
    pub fn open(
        index: SessionIndex,
        rows: u16,
        cols: u16,
        buffer_cap: usize,
    ) -> Result<(Self, Box<dyn Read + Send>), SessionError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResourceExhausted(e.to_string()))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::ResourceExhausted(e.to_string()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::ResourceExhausted(e.to_string()))?;

        let handle = PtyHandle {
            index,
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            slave: Mutex::new(Some(pair.slave)),
            child: Mutex::new(None),
            pid: std::sync::Mutex::new(None),
            size: std::sync::Mutex::new((rows, cols)),
            liveness: std::sync::Mutex::new(Liveness::Active),
            buffer: OutputBuffer::new(buffer_cap),
            cancel: CancellationToken::new(),
        };

        Ok((handle, reader))
    }

    /// Returns the session index.
    pub fn index(&self) -> SessionIndex {
        self.index
    }

    /// Returns the process ID of the shell, if one has been started.
    pub fn pid(&self) -> Option<u32> {
        *self.pid.lock().unwrap()
    }

    /// Returns the recorded terminal size as (rows, cols).
    pub fn size(&self) -> (u16, u16) {
        *self.size.lock().unwrap()
    }

    /// Returns the current liveness state.
    pub fn liveness(&self) -> Liveness {
        *self.liveness.lock().unwrap()
    }

    /// Number of output bytes currently buffered.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Transitions out of `Active` exactly once; later updates are ignored
    /// so the first observed terminal state wins.
    fn settle_liveness(&self, state: Liveness) {
        let mut liveness = self.liveness.lock().unwrap();
        if liveness.is_active() {
            *liveness = state;
        }
    }

    /// Spawns `program` on the slave side of the pty.
    ///
    /// The spec's environment is applied on top of a `TERM` default, and
    /// the handle's copy of the slave descriptor is dropped once the child
    /// owns it.
    pub async fn start_shell(
        &self,
        program: &str,
        spec: &CommandSpec,
    ) -> Result<u32, SessionError> {
        let mut child_slot = self.child.lock().await;
        if child_slot.is_some() {
            return Err(SessionError::AlreadyStarted(self.index));
        }

        let slave = self
            .slave
            .lock()
            .await
            .take()
            .ok_or(SessionError::AlreadyStarted(self.index))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(&spec.args);

        if !spec.env.iter().any(|(k, _)| k == "TERM") {
            cmd.env("TERM", default_term());
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &spec.cwd {
            cmd.cwd(dir);
        }

        let child = slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        drop(slave);

        let pid = child.process_id().unwrap_or(0);
        *self.pid.lock().unwrap() = Some(pid);
        *child_slot = Some(child);

        Ok(pid)
    }

    /// Writes bytes to the shell's input and flushes immediately.
    ///
    /// No batching: a single keystroke must reach the shell without waiting
    /// for more input. Backpressure from the kernel pty buffer may briefly
    /// block the calling task, bounded by OS buffer sizes.
    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        if !self.liveness().is_active() {
            return Err(SessionError::SessionClosed(self.index));
        }

        let mut writer = self.writer.lock().await;
        let result = writer.write_all(data).and_then(|()| writer.flush());
        drop(writer);

        if let Err(e) = result {
            // A dead slave side surfaces as EIO before the exit watcher has
            // necessarily settled the state; report closure, not raw I/O.
            let _ = self.reap_if_exited().await;
            if !self.liveness().is_active() {
                return Err(SessionError::SessionClosed(self.index));
            }
            return Err(SessionError::Io(e));
        }
        Ok(())
    }

    /// Drains buffered output, waiting up to `wait` when nothing is
    /// immediately available. Empty output is a normal result.
    pub async fn read(&self, wait: Duration) -> ReadOutput {
        self.buffer.drain_or_wait(wait).await
    }

    /// Propagates a window size change to the pty and records it.
    ///
    /// The kernel delivers SIGWINCH to the foreground process group as a
    /// side effect of the resize ioctl.
    pub async fn resize(&self, rows: u16, cols: u16) -> Result<(), SessionError> {
        if !self.liveness().is_active() {
            return Err(SessionError::SessionClosed(self.index));
        }

        let master = self.master.lock().await;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Io(std::io::Error::other(e.to_string())))?;
        drop(master);

        *self.size.lock().unwrap() = (rows, cols);

        tracing::debug!(session = self.index, rows, cols, "Resized PTY");
        Ok(())
    }

    /// Checks whether the child has exited without blocking, settling the
    /// liveness state if it has.
    pub async fn reap_if_exited(&self) -> Result<Option<Liveness>, SessionError> {
        let mut child_slot = self.child.lock().await;
        let Some(child) = child_slot.as_mut() else {
            return Ok(None);
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                let state = Liveness::Exited(status.exit_code() as i32);
                self.settle_liveness(state);
                Ok(Some(state))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(SessionError::Io(e)),
        }
    }

    /// Terminates the session: cancels the background tasks, asks the
    /// child to exit, escalates to a forced kill after `grace`, and closes
    /// the output buffer so blocked readers return.
    ///
    /// Returns the terminal liveness state.
    pub async fn destroy(&self, grace: Duration) -> Liveness {
        self.cancel.cancel();

        let mut child_slot = self.child.lock().await;
        if let Some(mut child) = child_slot.take() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    self.settle_liveness(Liveness::Exited(status.exit_code() as i32));
                }
                _ => {
                    self.terminate_child(&mut child, grace).await;
                }
            }
        } else {
            // Never started, or the child was already reaped.
            self.settle_liveness(Liveness::Killed);
        }
        drop(child_slot);

        self.buffer.close();
        self.liveness()
    }

    /// Graceful-then-forced termination of a still-running child.
    async fn terminate_child(&self, child: &mut Box<dyn Child + Send + Sync>, grace: Duration) {
        #[cfg(unix)]
        if let Some(pid) = child.process_id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::debug!(session = self.index, pid, error = %e, "SIGTERM failed");
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if let Ok(Some(status)) = child.try_wait() {
                self.settle_liveness(Liveness::Exited(status.exit_code() as i32));
                return;
            }
            tokio::time::sleep(KILL_POLL_INTERVAL).await;
        }

        if let Err(e) = child.kill() {
            tracing::warn!(session = self.index, error = %e, "Forced kill failed");
        }
        let _ = child.wait();
        self.settle_liveness(Liveness::Killed);
    }

    /// Best-effort synchronous teardown, for drop paths where awaiting a
    /// graceful shutdown is not possible.
    pub(crate) fn abort(&self) {
        self.cancel.cancel();
        if let Ok(mut child_slot) = self.child.try_lock() {
            if let Some(child) = child_slot.as_mut() {
                let _ = child.kill();
            }
        }
        self.settle_liveness(Liveness::Killed);
        self.buffer.close();
    }

    /// Called by the drain task on EOF from the master: the process closed
    /// its output. Settles liveness and seals the buffer, leaving trailing
    /// bytes available to one final read.
    ///
    /// EOF usually precedes the exit status by a moment, so this waits
    /// briefly for the real exit code before giving up and settling.
    async fn note_output_eof(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if let Ok(Some(_)) = self.reap_if_exited().await {
                break;
            }
            if !self.liveness().is_active() || tokio::time::Instant::now() >= deadline {
                self.settle_liveness(Liveness::Exited(0));
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.buffer.close();
    }

    /// Called by the drain task on a non-EOF read error: treated like a
    /// process exit, reported on next access rather than asynchronously.
    /// The state stays distinguishable from a normal exit or a kill so
    /// introspection reports why the session died.
    fn note_output_error(&self) {
        self.settle_liveness(Liveness::Errored);
        self.buffer.close();
    }
}

/// Returns the default `TERM` value for spawned shells.
fn default_term() -> &'static str {
    if cfg!(windows) {
        "cygwin"
    } else {
        "xterm-256color"
    }
}

/// Spawns the drain task for a session.
///
/// The task continuously pulls bytes from the pty master into the session's
/// output buffer via `spawn_blocking`, independent of any polling caller,
/// until EOF, a read error, or cancellation.
pub(crate) fn spawn_drain_task(
    handle: Arc<PtyHandle>,
    reader: Box<dyn Read + Send>,
    chunk_size: usize,
) {
    let cancel = handle.cancel.clone();

    tokio::spawn(async move {
        let reader = Arc::new(std::sync::Mutex::new(reader));

        loop {
            let reader_clone = Arc::clone(&reader);
            let read_one = tokio::task::spawn_blocking(move || {
                let mut buf = vec![0u8; chunk_size];
                let mut reader = reader_clone.lock().unwrap();
                match reader.read(&mut buf) {
                    Ok(0) => Ok(None),
                    Ok(n) => {
                        buf.truncate(n);
                        Ok(Some(buf))
                    }
                    Err(e) => Err(e),
                }
            });

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(session = handle.index(), "Drain task cancelled");
                    break;
                }
                joined = read_one => joined,
            };

            match result {
                Ok(Ok(Some(data))) => handle.buffer.push(&data),
                Ok(Ok(None)) => {
                    tracing::info!(session = handle.index(), "PTY EOF, process closed its output");
                    handle.note_output_eof().await;
                    break;
                }
                Ok(Err(e)) => {
                    if !cancel.is_cancelled() {
                        tracing::error!(session = handle.index(), error = %e, "PTY read error");
                    }
                    handle.note_output_error();
                    break;
                }
                Err(e) => {
                    tracing::error!(session = handle.index(), error = %e, "Drain read task panicked");
                    handle.note_output_error();
                    break;
                }
            }
        }
    });
}

/// Spawns the exit watcher for a started session.
///
/// Polls the child so `Exited(code)` is recorded the moment the OS reports
/// termination, not deferred to the next read or write call.
pub(crate) fn spawn_exit_watcher(handle: Arc<PtyHandle>) {
    let cancel = handle.cancel.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(EXIT_POLL_INTERVAL) => {}
            }

            match handle.reap_if_exited().await {
                Ok(Some(state)) => {
                    tracing::info!(session = handle.index(), state = ?state, "Process exited");
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(session = handle.index(), error = %e, "Exit watcher failed");
                    break;
                }
            }
        }
    });
}
