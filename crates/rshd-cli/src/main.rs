//! rshd entry point.

mod args;
mod daemon;

use anyhow::Context;
use clap::Parser;
use rshd_core::Daemon;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::args::{Cli, Commands, StartArgs};
use crate::daemon::paths;
use crate::daemon::pid_file::{self, PidFile};

fn main() {
    // Logs go to stderr, which a detached daemon points at its error log.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start(args) => run_daemon(args),
        Commands::Stop => daemon::stop(&paths::pid_path()),
        Commands::Status => {
            if !daemon::status(&paths::pid_path()) {
                std::process::exit(3);
            }
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// `RUST_LOG` directives if they parse, `info` otherwise.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Start serving, detached unless `--foreground`.
///
/// SIGINT and SIGTERM stop the loop; the pid file is removed on the way out.
fn run_daemon(args: StartArgs) -> anyhow::Result<()> {
    let dir = paths::ensure_runtime_dir().context("Failed to create runtime directory")?;
    let dir = dir.canonicalize().unwrap_or(dir);
    let pid_path = dir.join(paths::PID_FILE);
    let error_log = dir.join(paths::ERROR_LOG);

    if let Some(pid) = pid_file::running_daemon(&pid_path) {
        anyhow::bail!("Daemon already running (PID {})", pid);
    }

    let config = args.config(paths::env_shell());
    if !args.foreground {
        println!(
            "Starting rshd on {}, logging to {}",
            config.listen,
            error_log.display()
        );
        daemon::daemonize(&error_log)?;
    }

    let _pid_file = PidFile::create(&pid_path)?;
    let mut server = Daemon::bind(config).context("Failed to start daemon")?;
    server.run().context("Daemon error")?;
    info!("Daemon stopped");
    Ok(())
}
