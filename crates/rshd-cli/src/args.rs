//! CLI argument parsing with clap derive macros.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::{Args, Parser, Subcommand};
use rshd_core::config::{DEFAULT_MAX_CONNECTIONS, DEFAULT_SHELL};
use rshd_core::{DaemonConfig, ShellCommand, TermSize};

/// Remote shell daemon.
///
/// Every TCP client that connects gets an interactive shell on its own
/// pseudo-terminal. There is no authentication or encryption: bind to a
/// trusted interface.
#[derive(Debug, Parser)]
#[command(name = "rshd", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start serving shells on a TCP port
    #[command(after_help = "\
Examples:
  rshd start 2222                       # Daemonize, listen on 0.0.0.0:2222
  rshd start 2222 --bind 127.0.0.1      # Local clients only
  rshd start 2222 --foreground          # Stay attached, log to stderr
  rshd start 2222 --shell /bin/bash     # Use a different shell
  RUST_LOG=debug rshd start 2222 -f     # Verbose logging")]
    Start(StartArgs),

    /// Stop the running daemon
    Stop,

    /// Report whether the daemon is running
    Status,
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// TCP port to listen on
    pub port: u16,

    /// Address to bind
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Shell to launch for each client [default: $RSHD_SHELL or /bin/sh]
    #[arg(long)]
    pub shell: Option<String>,

    /// Maximum number of simultaneous clients
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Terminal width in columns
    #[arg(long, default_value_t = 80)]
    pub cols: u16,

    /// Terminal height in rows
    #[arg(long, default_value_t = 24)]
    pub rows: u16,

    /// Do not detach from the controlling terminal
    #[arg(short, long)]
    pub foreground: bool,
}

impl StartArgs {
    /// Build the daemon configuration. `env_shell` is the value of
    /// `RSHD_SHELL`, used when `--shell` is absent.
    pub fn config(&self, env_shell: Option<String>) -> DaemonConfig {
        let program = self
            .shell
            .clone()
            .filter(|s| !s.is_empty())
            .or(env_shell.filter(|s| !s.is_empty()))
            .unwrap_or_else(|| DEFAULT_SHELL.to_string());

        DaemonConfig {
            listen: SocketAddr::new(self.bind, self.port),
            shell: ShellCommand::new(program),
            term_size: TermSize {
                cols: self.cols,
                rows: self.rows,
            },
            max_connections: self.max_connections,
            ..DaemonConfig::default()
        }
    }
}
