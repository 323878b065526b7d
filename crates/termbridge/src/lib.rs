//! # Termbridge
//!
//! A PTY session manager that bridges terminal views to shell processes
//! over a poll-based, index-addressed call interface.
//!
//! ## Overview
//!
//! A terminal view (a renderer running elsewhere) talks to the manager
//! through five operations: create a session, start its shell, write input
//! bytes, poll for output bytes, and resize. The hard part lives here:
//!
//! - **PTY plumbing**: each session owns one pseudo-terminal pair and the
//!   shell process attached to its slave side
//! - **Drain decoupling**: a background task continuously moves process
//!   output into a capped per-session buffer, so the shell keeps running
//!   whether or not anyone is polling
//! - **Poll-friendly reads**: `read` never blocks past a small bounded
//!   wait; an empty result means "nothing yet", never failure
//! - **Prompt liveness**: an exit watcher records process termination the
//!   moment the OS reports it, so closed sessions are reported on the next
//!   call instead of hanging
//!
//! Indices are plain integers and payloads raw bytes, so the manager has no
//! dependency on any particular transport, serialization, or UI toolkit.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use termbridge::{CommandSpec, Config, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     config.validate()?;
//!
//!     let manager = SessionManager::new(config);
//!
//!     let index = manager.create_session()?;
//!     manager.start_shell(index, CommandSpec::default()).await?;
//!
//!     manager.write(index, b"ls\n").await?;
//!     loop {
//!         let out = manager.read(index).await?;
//!         if !out.is_empty() {
//!             print!("{}", String::from_utf8_lossy(&out.data));
//!             break;
//!         }
//!     }
//!
//!     manager.destroy_session(index).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading, validation, and defaults
//! - [`session`]: PTY handles, output buffering, registry, and the manager

pub mod config;
pub mod session;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export session types for convenience
pub use session::{
    CommandSpec, Liveness, ReadOutput, SessionError, SessionIndex, SessionInfo, SessionManager,
};
