//! A client socket bridged to its terminal, and the backpressure protocol
//! between the two.
//!
//! Each endpoint carries two flags:
//!
//! - `read_suspended`: set when bytes read from this endpoint could not be
//!   fully written to the peer. Cleared when the peer's queue drains.
//! - `write_interested`: set while this endpoint's outbound queue is non-empty.
//!
//! A queue is only appended to while its source is not suspended, and the
//! source is suspended the moment a flush stalls, so a queue never grows past
//! one read buffer between stalls.
//!
//! A suspended endpoint stays registered for reads. Readable edges are
//! ignored until it resumes, but a hangup or error still tears the
//! connection down.

use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use mio::Token;
use nix::unistd::Pid;
use tracing::{debug, trace};

use crate::endpoint::{Endpoint, Flush, ReadOutcome, Role, Stream};
use crate::error::CloseReason;
use crate::notifier::{Notifier, Readiness};

/// Tokens below this value are reserved for the daemon's own sources.
pub const FIRST_CONNECTION_TOKEN: usize = 16;

/// Upper bound on terminal output forwarded after the shell has exited.
const FINAL_DRAIN_LIMIT: usize = 64 * 1024;

/// Identifier of a connection in the registry. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

impl ConnectionId {
    /// Token under which `role`'s descriptor is registered.
    pub fn token(self, role: Role) -> Token {
        let side = match role {
            Role::Socket => 0,
            Role::Terminal => 1,
        };
        Token(FIRST_CONNECTION_TOKEN + self.0 * 2 + side)
    }

    /// Inverse of [`ConnectionId::token`].
    pub fn from_token(token: Token) -> Option<(ConnectionId, Role)> {
        let raw = token.0.checked_sub(FIRST_CONNECTION_TOKEN)?;
        let role = if raw % 2 == 0 {
            Role::Socket
        } else {
            Role::Terminal
        };
        Some((ConnectionId(raw / 2), role))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A client socket paired with the terminal master of its shell.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    socket: Endpoint,
    terminal: Endpoint,
    session: Option<Pid>,
    opened_at: DateTime<Utc>,
    bytes_in: u64,
    bytes_out: u64,
}

impl Connection {
    /// Pair `socket` with `terminal` and register both with the notifier.
    ///
    /// Either both endpoints end up registered or neither does; on failure
    /// both descriptors are closed.
    pub fn open(
        id: ConnectionId,
        peer_addr: SocketAddr,
        socket: Box<dyn Stream>,
        terminal: Box<dyn Stream>,
        session: Option<Pid>,
        notifier: &Notifier,
    ) -> std::io::Result<Self> {
        let mut conn = Self {
            id,
            peer_addr,
            socket: Endpoint::new(socket, Role::Socket, id.token(Role::Socket)),
            terminal: Endpoint::new(terminal, Role::Terminal, id.token(Role::Terminal)),
            session,
            opened_at: Utc::now(),
            bytes_in: 0,
            bytes_out: 0,
        };

        conn.socket.register(notifier)?;
        if let Err(e) = conn.terminal.register(notifier) {
            if let Err(undo) = conn.socket.deregister(notifier) {
                debug!(conn = %id, "failed to deregister socket: {}", undo);
            }
            return Err(e);
        }
        Ok(conn)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Pid of the shell driving this connection's terminal, if any.
    pub fn session(&self) -> Option<Pid> {
        self.session
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Bytes forwarded from the client to the terminal.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Bytes forwarded from the terminal to the client.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    pub fn endpoint(&self, role: Role) -> &Endpoint {
        match role {
            Role::Socket => &self.socket,
            Role::Terminal => &self.terminal,
        }
    }

    /// Split into (`role`'s endpoint, its peer).
    fn split(&mut self, role: Role) -> (&mut Endpoint, &mut Endpoint) {
        match role {
            Role::Socket => (&mut self.socket, &mut self.terminal),
            Role::Terminal => (&mut self.terminal, &mut self.socket),
        }
    }

    /// Handle one readiness notification for `role`'s descriptor.
    ///
    /// Pending output is flushed before reading so that space freed by the
    /// same notification is used right away.
    pub fn on_ready(
        &mut self,
        role: Role,
        readiness: &Readiness,
        buf: &mut [u8],
    ) -> Result<(), CloseReason> {
        let (this, _) = self.split(role);
        if readiness.wants_write() && this.is_write_interested() {
            self.flush(role)?;
        }

        let (this, _) = self.split(role);
        if !readiness.wants_read() {
            return Ok(());
        }
        if !this.is_read_suspended() {
            return self.pump(role, buf, usize::MAX);
        }
        if readiness.read_closed {
            return Err(CloseReason::PeerClosed(role));
        }
        if readiness.errored {
            return Err(CloseReason::ReadFailed(
                role,
                std::io::Error::other("error condition while reads were suspended"),
            ));
        }
        Ok(())
    }

    /// Drain `role`'s outbound queue; a full drain resumes the peer's reads.
    fn flush(&mut self, role: Role) -> Result<Flush, CloseReason> {
        let id = self.id;
        let (this, peer) = self.split(role);
        let flushed = this
            .flush()
            .map_err(|e| CloseReason::WriteFailed(role, e))?;
        if flushed == Flush::Drained && peer.is_read_suspended() {
            trace!(conn = %id, from = %role.peer(), "resuming reads");
            peer.resume_reads();
        }
        Ok(flushed)
    }

    /// Move bytes from `from` into its peer until `from` would block, the
    /// peer stalls, or `limit` bytes have been moved.
    fn pump(&mut self, from: Role, buf: &mut [u8], limit: usize) -> Result<(), CloseReason> {
        let id = self.id;
        let mut moved = 0usize;
        while moved < limit {
            let (source, dest) = self.split(from);
            let n = match source
                .read_chunk(buf)
                .map_err(|e| CloseReason::ReadFailed(from, e))?
            {
                ReadOutcome::Data(n) => n,
                ReadOutcome::WouldBlock => return Ok(()),
                ReadOutcome::Eof => return Err(CloseReason::PeerClosed(from)),
            };
            dest.enqueue(&buf[..n]);

            moved += n;
            match from {
                Role::Socket => self.bytes_in += n as u64,
                Role::Terminal => self.bytes_out += n as u64,
            }

            if self.flush(from.peer())? == Flush::Stalled {
                let (source, dest) = self.split(from);
                source.suspend_reads();
                trace!(
                    conn = %id,
                    from = %from,
                    queued = dest.queued(),
                    "peer stalled, suspending reads"
                );
                return Ok(());
            }
        }
        Ok(())
    }

    /// Push changed interest sets for both endpoints to the notifier.
    pub fn sync_interest(&mut self, notifier: &Notifier) -> Result<(), CloseReason> {
        self.socket
            .sync_interest(notifier)
            .map_err(CloseReason::Interest)?;
        self.terminal
            .sync_interest(notifier)
            .map_err(CloseReason::Interest)?;
        Ok(())
    }

    /// Forward whatever the terminal still has buffered before the
    /// connection is closed because its shell exited.
    ///
    /// Best effort: errors and a stalled client end the drain quietly.
    pub fn drain_terminal(&mut self, buf: &mut [u8]) {
        if self.socket.is_write_interested() {
            let _ = self.flush(Role::Socket);
        }
        if self.terminal.is_read_suspended() {
            return;
        }
        if let Err(reason) = self.pump(Role::Terminal, buf, FINAL_DRAIN_LIMIT) {
            debug!(conn = %self.id, "final terminal drain ended: {}", reason);
        }
    }

    /// Deregister both descriptors and close them.
    pub fn close(mut self, notifier: &Notifier) {
        if let Err(e) = self.socket.deregister(notifier) {
            debug!(conn = %self.id, "failed to deregister socket: {}", e);
        }
        if let Err(e) = self.terminal.deregister(notifier) {
            debug!(conn = %self.id, "failed to deregister terminal: {}", e);
        }
        // Both descriptors are closed when `self` drops here.
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("session", &self.session)
            .field("socket", &self.socket)
            .field("terminal", &self.terminal)
            .finish()
    }
}
