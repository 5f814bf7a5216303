//! Child reaping driven by SIGCHLD.
//!
//! The signal handler installed by `signal-hook` only writes to a self-pipe.
//! The pipe is polled like any other descriptor, and the actual `waitpid`
//! calls run on the event-loop thread.

use std::fmt;
use std::io;

use mio::Token;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use signal_hook::consts::{SIGCHLD, SIGINT, SIGTERM};
use signal_hook_mio::v1_0::Signals;
use tracing::{debug, warn};

use crate::notifier::{Interest, Notifier};

/// What a batch of delivered signals asks the loop to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalBatch {
    pub child_exited: bool,
    pub terminate: bool,
}

/// How a reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Exited(i32),
    Signaled(Signal),
    /// Already collected elsewhere; the exit status is unknown.
    Vanished,
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Exited(code) => write!(f, "exit status {}", code),
            ExitKind::Signaled(sig) => write!(f, "killed by {}", sig),
            ExitKind::Vanished => write!(f, "status unavailable"),
        }
    }
}

/// Self-pipe subscription to SIGCHLD (and optionally SIGTERM/SIGINT).
pub struct Reaper {
    signals: Signals,
}

impl Reaper {
    /// Install the signal handlers. `termination` adds SIGTERM and SIGINT.
    pub fn new(termination: bool) -> io::Result<Self> {
        let signals = if termination {
            Signals::new([SIGCHLD, SIGTERM, SIGINT])?
        } else {
            Signals::new([SIGCHLD])?
        };
        Ok(Self { signals })
    }

    pub fn register(&mut self, notifier: &Notifier, token: Token) -> io::Result<()> {
        notifier.register(&mut self.signals, token, Interest::READ)
    }

    /// Drain the self-pipe and summarize what arrived.
    pub fn pending(&mut self) -> SignalBatch {
        let mut batch = SignalBatch::default();
        for signal in self.signals.pending() {
            match signal {
                SIGCHLD => batch.child_exited = true,
                SIGTERM | SIGINT => batch.terminate = true,
                other => debug!("Ignoring signal {}", other),
            }
        }
        batch
    }
}

/// Collect the exit status of `pid` without blocking.
///
/// Returns `None` while the child is still running.
pub fn try_reap(pid: Pid) -> Option<ExitKind> {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => return Some(ExitKind::Exited(code)),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Some(ExitKind::Signaled(sig)),
            Ok(_) => return None,
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return Some(ExitKind::Vanished),
            Err(e) => {
                warn!("waitpid({}) failed: {}", pid, e);
                return None;
            }
        }
    }
}

/// Reap every pid in `pids` that has exited.
pub fn reap_exited<I>(pids: I) -> Vec<(Pid, ExitKind)>
where
    I: IntoIterator<Item = Pid>,
{
    pids.into_iter()
        .filter_map(|pid| try_reap(pid).map(|kind| (pid, kind)))
        .collect()
}
