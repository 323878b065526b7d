//! Session management module.
//!
//! This module provides PTY allocation, shell spawning, output buffering,
//! and session lifecycle management. Sessions are created, written to, read
//! from (poll style), resized, and destroyed through the [`SessionManager`].

pub mod buffer;
pub mod error;
pub mod manager;
pub mod pty;
pub mod registry;

pub use buffer::{OutputBuffer, ReadOutput};
pub use error::SessionError;
pub use manager::{SessionInfo, SessionManager};
pub use pty::{CommandSpec, Liveness, PtyHandle};
pub use registry::{SessionIndex, SessionRegistry};
