//! Daemon configuration.

use std::net::{Ipv4Addr, SocketAddr};

/// Shell spawned for every client unless overridden.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Maximum number of live connections before new clients are turned away.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Bytes read from a descriptor per `read` call.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Readiness events collected per `wait`.
pub const DEFAULT_EVENTS_CAPACITY: usize = 64;

/// Terminal size in columns and rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl From<TermSize> for portable_pty::PtySize {
    fn from(size: TermSize) -> Self {
        portable_pty::PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Program and arguments run on each session's terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for ShellCommand {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL)
    }
}

/// Everything the event loop needs to know up front.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Address the listening socket binds to.
    pub listen: SocketAddr,
    pub shell: ShellCommand,
    pub term_size: TermSize,
    pub max_connections: usize,
    pub read_buffer_size: usize,
    pub events_capacity: usize,
    /// Stop the loop on SIGTERM/SIGINT. Embedders that manage process
    /// signals themselves turn this off.
    pub handle_termination_signals: bool,
}

impl DaemonConfig {
    /// Listen on all IPv4 interfaces at `port`.
    pub fn new(port: u16) -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            ..Self::default()
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            shell: ShellCommand::default(),
            term_size: TermSize::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            handle_termination_signals: true,
        }
    }
}
