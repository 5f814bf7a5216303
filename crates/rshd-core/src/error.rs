//! Error types for the connection engine.
//!
//! Failures fall into three tiers:
//!
//! - transient (`WouldBlock`, `Interrupted`): retried in place, never surfaced
//! - per-connection ([`CloseReason`], [`LaunchError`]): one client is dropped,
//!   the daemon keeps serving everyone else
//! - process-fatal ([`Error`]): the daemon cannot do its job and `run` returns

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::endpoint::Role;

/// Result alias for process-fatal operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures that stop the daemon.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to bind listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to initialize readiness notifier")]
    Notifier(#[source] io::Error),

    #[error("failed to install signal handlers")]
    Signals(#[source] io::Error),

    #[error("failed to register {what} with the readiness notifier")]
    Register {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("waiting for readiness events failed")]
    Wait(#[source] io::Error),
}

/// Why a session could not be launched for an accepted client.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to allocate pseudo-terminal: {0:#}")]
    OpenPty(anyhow::Error),

    #[error("failed to put terminal into raw mode")]
    RawMode(#[source] nix::Error),

    #[error("failed to spawn shell {shell:?}: {cause:#}")]
    Spawn { shell: String, cause: anyhow::Error },

    #[error("pseudo-terminal master has no file descriptor")]
    NoDescriptor,

    #[error("failed to prepare terminal descriptor")]
    Descriptor(#[source] io::Error),
}

/// Why a connection was torn down.
#[derive(Debug, Error)]
pub enum CloseReason {
    #[error("{0} closed")]
    PeerClosed(Role),

    #[error("read from {0} failed")]
    ReadFailed(Role, #[source] io::Error),

    #[error("write to {0} failed")]
    WriteFailed(Role, #[source] io::Error),

    #[error("failed to update readiness interest")]
    Interest(#[source] io::Error),

    #[error("shell exited ({0})")]
    SessionExited(String),

    #[error("daemon shutting down")]
    Shutdown,
}

impl CloseReason {
    /// Whether this is an orderly close rather than an I/O failure.
    pub fn is_orderly(&self) -> bool {
        matches!(
            self,
            CloseReason::PeerClosed(_) | CloseReason::SessionExited(_) | CloseReason::Shutdown
        )
    }
}

/// Errors that mean "try again later" under non-blocking I/O.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
