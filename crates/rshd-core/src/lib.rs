//! Connection engine for rshd, a remote shell daemon.
//!
//! Every accepted TCP client gets an interactive shell on its own
//! pseudo-terminal. Bytes flow both ways between the socket and the pty
//! master on a single thread driven by edge-triggered readiness
//! notifications.
//!
//! # Modules
//!
//! - [`notifier`]: readiness polling (register, modify, deregister, wait)
//! - [`endpoint`]: one non-blocking descriptor with its outbound queue
//! - [`connection`]: socket/terminal pair and the backpressure protocol
//! - [`session`]: launching shells on pseudo-terminals
//! - [`reaper`]: SIGCHLD self-pipe and non-blocking reaping
//! - [`listener`]: the passive TCP socket
//! - [`registry`]: the active set of connections and sessions
//! - [`server`]: the event loop tying it all together
//!
//! # Backpressure
//!
//! | Flag | Set when | Cleared when |
//! |------|----------|--------------|
//! | `read_suspended` | bytes read could not all be written to the peer | the peer's queue drains |
//! | `write_interested` | the outbound queue is non-empty | the queue drains |
//!
//! An endpoint is polled for writes iff it is write-interested. It is always
//! polled for reads, but a suspended endpoint only reacts to hangups and
//! errors; resuming re-registers it so data that arrived meanwhile is
//! reported again.

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod notifier;
pub mod reaper;
pub mod registry;
pub mod server;
pub mod session;

pub use config::{DaemonConfig, ShellCommand, TermSize};
pub use error::{CloseReason, Error, LaunchError, Result};
pub use server::{Daemon, ShutdownHandle};
pub use session::{Launched, PtyLauncher, SessionLauncher};
