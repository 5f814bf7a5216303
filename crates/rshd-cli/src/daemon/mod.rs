//! Process management: detaching from the terminal, stop and status.

pub mod paths;
pub mod pid_file;

use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{dup2, fork, setsid, ForkResult};

/// How long `stop` waits for the daemon to exit after SIGTERM.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Detach from the controlling terminal.
///
/// Forks, starts a new session and forks again so the daemon can never
/// reacquire a terminal. The original process exits. In the daemon, stdin
/// and stdout go to `/dev/null` and stderr to `error_log` (truncated).
///
/// Must be called before any threads are started.
pub fn daemonize(error_log: &Path) -> Result<()> {
    let log = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(error_log)
        .with_context(|| format!("Failed to open error log: {:?}", error_log))?;
    let null = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")
        .context("Failed to open /dev/null")?;

    // SAFETY: the process is still single-threaded, so the child is a
    // complete copy and may run arbitrary code.
    if let ForkResult::Parent { .. } = unsafe { fork() }.context("First fork failed")? {
        std::process::exit(0);
    }
    setsid().context("setsid failed")?;
    // SAFETY: as above, the intermediate child has a single thread.
    if let ForkResult::Parent { .. } = unsafe { fork() }.context("Second fork failed")? {
        std::process::exit(0);
    }

    for (fd, target) in [
        (null.as_raw_fd(), libc::STDIN_FILENO),
        (null.as_raw_fd(), libc::STDOUT_FILENO),
        (log.as_raw_fd(), libc::STDERR_FILENO),
    ] {
        dup2(fd, target).with_context(|| format!("Failed to redirect fd {}", target))?;
    }
    std::env::set_current_dir("/").context("Failed to change directory to /")?;
    Ok(())
}

/// Send SIGTERM to the daemon in `pid_path` and wait for it to exit.
pub fn stop(pid_path: &Path) -> Result<()> {
    let Some(pid) = pid_file::running_daemon(pid_path) else {
        println!("rshd is not running");
        return Ok(());
    };

    kill(pid, Signal::SIGTERM).with_context(|| format!("Failed to signal PID {}", pid))?;

    let deadline = Instant::now() + STOP_TIMEOUT;
    while pid_file::is_alive(pid) {
        if Instant::now() >= deadline {
            anyhow::bail!("Daemon (PID {}) did not exit within {:?}", pid, STOP_TIMEOUT);
        }
        std::thread::sleep(STOP_POLL_INTERVAL);
    }
    println!("rshd stopped (PID {})", pid);
    Ok(())
}

/// Print whether the daemon in `pid_path` is running. Returns `true` if so.
pub fn status(pid_path: &Path) -> bool {
    match pid_file::running_daemon(pid_path) {
        Some(pid) => {
            println!("rshd is running (PID {})", pid);
            true
        }
        None => {
            println!("rshd is not running");
            false
        }
    }
}
