//! Launching interactive shells on pseudo-terminals.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use chrono::{DateTime, Utc};
use mio::event::Source;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{self, Signal};
use nix::sys::termios::{self, LocalFlags, SetArg};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, CommandBuilder};
use tracing::{debug, info};

use crate::config::{ShellCommand, TermSize};
use crate::connection::ConnectionId;
use crate::endpoint::Stream;
use crate::error::LaunchError;

/// A freshly launched shell: the stream to bridge and the child to reap.
pub struct Launched {
    pub terminal: Box<dyn Stream>,
    /// `None` when the launcher has no child process to track.
    pub pid: Option<Pid>,
}

/// Something that can start a shell for a newly accepted client.
pub trait SessionLauncher {
    fn launch(&mut self) -> Result<Launched, LaunchError>;
}

/// Starts the configured shell on a fresh pseudo-terminal.
///
/// The child becomes a session leader with the pty slave as its controlling
/// terminal and standard streams; descriptors the daemon holds are
/// close-on-exec and do not leak into it.
#[derive(Debug, Clone)]
pub struct PtyLauncher {
    shell: ShellCommand,
    size: TermSize,
}

impl PtyLauncher {
    pub fn new(shell: ShellCommand, size: TermSize) -> Self {
        Self { shell, size }
    }
}

impl SessionLauncher for PtyLauncher {
    fn launch(&mut self) -> Result<Launched, LaunchError> {
        let pair = native_pty_system()
            .openpty(self.size.into())
            .map_err(LaunchError::OpenPty)?;

        let raw = pair.master.as_raw_fd().ok_or(LaunchError::NoDescriptor)?;
        // SAFETY: `raw` belongs to `pair.master`, which is alive for the
        // whole borrow; the duplicate we keep is independently owned.
        let master = unsafe { BorrowedFd::borrow_raw(raw) }
            .try_clone_to_owned()
            .map_err(LaunchError::Descriptor)?;

        // The line discipline is shared by both sides, so configuring it
        // through the master applies to the slave the shell will use.
        set_raw_mode(master.as_fd()).map_err(LaunchError::RawMode)?;
        set_nonblocking(master.as_fd()).map_err(|e| LaunchError::Descriptor(e.into()))?;

        let mut cmd = CommandBuilder::new(&self.shell.program);
        cmd.args(&self.shell.args);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|cause| LaunchError::Spawn {
                shell: self.shell.program.clone(),
                cause,
            })?;
        // The child holds its own copy of the slave; ours closes here.
        drop(pair.slave);
        drop(pair.master);

        let pid = child
            .process_id()
            .and_then(|id| i32::try_from(id).ok())
            .map(Pid::from_raw);
        info!(
            "Launched {} (pid {})",
            self.shell.program,
            pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into())
        );

        Ok(Launched {
            terminal: Box::new(PtyMaster::new(master)),
            pid,
        })
    }
}

/// Disable echo and canonical line editing.
fn set_raw_mode(fd: BorrowedFd<'_>) -> nix::Result<()> {
    let mut attrs = termios::tcgetattr(fd)?;
    attrs
        .local_flags
        .remove(LocalFlags::ECHO | LocalFlags::ECHONL | LocalFlags::ICANON);
    termios::tcsetattr(fd, SetArg::TCSANOW, &attrs)
}

pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?);
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Non-blocking pty master descriptor.
#[derive(Debug)]
pub struct PtyMaster {
    file: File,
}

impl PtyMaster {
    pub fn new(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
        }
    }
}

impl Read for PtyMaster {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.read(buf) {
            // Linux reports a hung-up slave as EIO rather than EOF.
            Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(0),
            other => other,
        }
    }
}

impl Write for PtyMaster {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Source for PtyMaster {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        SourceFd(&self.file.as_raw_fd()).register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        SourceFd(&self.file.as_raw_fd()).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        SourceFd(&self.file.as_raw_fd()).deregister(registry)
    }
}

/// A running shell process and the connection it drives.
#[derive(Debug, Clone)]
pub struct Session {
    pid: Pid,
    connection: Option<ConnectionId>,
    started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(pid: Pid, connection: Option<ConnectionId>) -> Self {
        Self {
            pid,
            connection,
            started_at: Utc::now(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The live connection this shell drives, if it has not been torn down.
    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Forget the connection after it was torn down and tell the shell its
    /// terminal is gone.
    pub fn detach(&mut self) {
        self.connection = None;
        hang_up(self.pid);
    }
}

/// Send SIGHUP to a shell whose client went away.
///
/// The pid cannot have been recycled: it is only reaped by us, after which
/// its session no longer exists.
pub fn hang_up(pid: Pid) {
    match signal::kill(pid, Signal::SIGHUP) {
        Ok(()) => debug!("Sent SIGHUP to {}", pid),
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => debug!("Failed to send SIGHUP to {}: {}", pid, e),
    }
}
