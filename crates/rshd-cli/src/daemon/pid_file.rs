//! The pid file naming the running daemon.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::warn;

/// Read the pid recorded in `path`, if any.
pub fn read_pid(path: &Path) -> Option<Pid> {
    let contents = std::fs::read_to_string(path).ok()?;
    let pid: i32 = contents.trim().parse().ok()?;
    (pid > 0).then(|| Pid::from_raw(pid))
}

/// Whether `pid` names an existing process.
///
/// Signal 0 only checks existence; EPERM still means the process exists.
pub fn is_alive(pid: Pid) -> bool {
    matches!(kill(pid, None), Ok(()) | Err(Errno::EPERM))
}

/// The live daemon recorded in `path`, ignoring stale pid files.
pub fn running_daemon(path: &Path) -> Option<Pid> {
    read_pid(path).filter(|pid| is_alive(*pid))
}

/// A pid file owned by this process, removed on drop.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Record the current process in `path`, replacing a stale file.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(pid) = running_daemon(path) {
            anyhow::bail!("Daemon already running (PID {}, pid file {:?})", pid, path);
        }
        std::fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("Failed to write PID file: {:?}", path))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Only remove the file if it still names us.
        let ours = read_pid(&self.path).map(|pid| pid.as_raw() as u32) == Some(std::process::id());
        if ours && std::fs::remove_file(&self.path).is_err() {
            warn!("Failed to remove PID file on shutdown");
        }
    }
}
