//! One side of a connection: a non-blocking descriptor plus its outbound queue.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};

use mio::event::Source;
use mio::Token;
use tracing::trace;

use crate::notifier::{Interest, Notifier};

/// Anything an endpoint can drive: a non-blocking, pollable byte stream.
///
/// Client sockets and pty masters both qualify; tests use Unix socket pairs.
pub trait Stream: Read + Write + Source + Send {}

impl<T> Stream for T where T: Read + Write + Source + Send {}

/// Which descriptor of a connection an endpoint wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Socket,
    Terminal,
}

impl Role {
    /// The role of the other endpoint in the same connection.
    pub fn peer(self) -> Role {
        match self {
            Role::Socket => Role::Terminal,
            Role::Terminal => Role::Socket,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Socket => write!(f, "client socket"),
            Role::Terminal => write!(f, "terminal"),
        }
    }
}

/// Result of a single read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    WouldBlock,
    Eof,
}

/// Result of draining the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Queue is empty.
    Drained,
    /// The descriptor stopped accepting bytes; the rest stays queued.
    Stalled,
}

/// A descriptor with its outbound queue and backpressure flags.
///
/// The endpoint owns its stream, so the descriptor is closed exactly once,
/// when the endpoint is dropped, and the queue cannot outlive it.
pub struct Endpoint {
    stream: Box<dyn Stream>,
    role: Role,
    token: Token,
    queue: VecDeque<u8>,
    write_interested: bool,
    read_suspended: bool,
    /// Reads were resumed since the last registration; the next sync must
    /// re-register even if the interest is unchanged.
    rearm: bool,
    /// Interest currently registered with the notifier.
    registered: Interest,
}

impl Endpoint {
    pub fn new(stream: Box<dyn Stream>, role: Role, token: Token) -> Self {
        Self {
            stream,
            role,
            token,
            queue: VecDeque::new(),
            write_interested: false,
            read_suspended: false,
            rearm: false,
            registered: Interest::NONE,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Bytes waiting to be written.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_write_interested(&self) -> bool {
        self.write_interested
    }

    pub fn is_read_suspended(&self) -> bool {
        self.read_suspended
    }

    pub fn registered_interest(&self) -> Interest {
        self.registered
    }

    /// Interest to register with the notifier.
    ///
    /// Reads stay registered while suspended so that a hangup or error is
    /// still reported; the connection ignores plain readable edges until
    /// reads resume.
    pub fn desired_interest(&self) -> Interest {
        Interest {
            read: true,
            write: self.write_interested,
        }
    }

    pub(crate) fn suspend_reads(&mut self) {
        self.read_suspended = true;
    }

    /// Clear the suspension. Readable edges that arrived meanwhile were
    /// ignored, so the next [`Endpoint::sync_interest`] re-registers to
    /// have pending data reported again.
    pub(crate) fn resume_reads(&mut self) {
        if self.read_suspended {
            self.read_suspended = false;
            self.rearm = true;
        }
    }

    /// Read once into `buf`, retrying interrupted calls.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        loop {
            match self.stream.read(buf) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => return Ok(ReadOutcome::Data(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::WouldBlock)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Append bytes to the back of the outbound queue.
    pub fn enqueue(&mut self, data: &[u8]) {
        self.queue.extend(data);
        self.write_interested = true;
    }

    /// Write queued bytes front-to-back until the queue is empty or the
    /// descriptor would block.
    pub fn flush(&mut self) -> io::Result<Flush> {
        while !self.queue.is_empty() {
            let (front, _) = self.queue.as_slices();
            match self.stream.write(front) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => {
                    self.queue.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.write_interested = true;
                    trace!(role = %self.role, queued = self.queue.len(), "flush stalled");
                    return Ok(Flush::Stalled);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.write_interested = false;
        Ok(Flush::Drained)
    }

    /// Register with the notifier using the current desired interest.
    pub fn register(&mut self, notifier: &Notifier) -> io::Result<()> {
        let desired = self.desired_interest();
        notifier.register(&mut *self.stream, self.token, desired)?;
        self.registered = desired;
        self.rearm = false;
        Ok(())
    }

    /// Push the desired interest to the notifier if it changed, or if
    /// reads were resumed since the last call.
    ///
    /// Returns whether a notifier call was made.
    pub fn sync_interest(&mut self, notifier: &Notifier) -> io::Result<bool> {
        let desired = self.desired_interest();
        if desired == self.registered && !self.rearm {
            return Ok(false);
        }
        notifier.modify_interest(&mut *self.stream, self.token, self.registered, desired)?;
        self.registered = desired;
        self.rearm = false;
        Ok(true)
    }

    /// Remove from the notifier. Safe to call more than once.
    pub fn deregister(&mut self, notifier: &Notifier) -> io::Result<()> {
        let current = std::mem::replace(&mut self.registered, Interest::NONE);
        notifier.deregister(&mut *self.stream, current)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.role)
            .field("token", &self.token)
            .field("queued", &self.queue.len())
            .field("write_interested", &self.write_interested)
            .field("read_suspended", &self.read_suspended)
            .field("rearm", &self.rearm)
            .field("registered", &self.registered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream as StdUnixStream;

    fn endpoint(role: Role) -> (Endpoint, StdUnixStream) {
        let (ours, theirs) = StdUnixStream::pair().expect("socketpair");
        ours.set_nonblocking(true).expect("nonblocking");
        let stream = mio::net::UnixStream::from_std(ours);
        (Endpoint::new(Box::new(stream), role, Token(1)), theirs)
    }

    #[test]
    fn test_role_peer_and_display() {
        assert_eq!(Role::Socket.peer(), Role::Terminal);
        assert_eq!(Role::Terminal.peer(), Role::Socket);
        assert_eq!(Role::Terminal.to_string(), "terminal");
    }

    #[test]
    fn test_read_chunk_outcomes() {
        let (mut ep, mut peer) = endpoint(Role::Socket);
        let mut buf = [0u8; 8];

        assert_eq!(ep.read_chunk(&mut buf).unwrap(), ReadOutcome::WouldBlock);

        peer.write_all(b"abc").unwrap();
        assert_eq!(ep.read_chunk(&mut buf).unwrap(), ReadOutcome::Data(3));
        assert_eq!(&buf[..3], b"abc");

        drop(peer);
        assert_eq!(ep.read_chunk(&mut buf).unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn test_flush_drains_queue_in_order() {
        let (mut ep, mut peer) = endpoint(Role::Terminal);
        ep.enqueue(b"hello ");
        ep.enqueue(b"world");
        assert!(ep.is_write_interested());
        assert_eq!(ep.queued(), 11);

        assert_eq!(ep.flush().unwrap(), Flush::Drained);
        assert!(!ep.is_write_interested());
        assert_eq!(ep.queued(), 0);

        let mut out = [0u8; 11];
        peer.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"hello world");
    }

    #[test]
    fn test_flush_stalls_and_keeps_remainder() {
        let (mut ep, mut peer) = endpoint(Role::Socket);
        let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        ep.enqueue(&payload);

        assert_eq!(ep.flush().unwrap(), Flush::Stalled);
        assert!(ep.is_write_interested());
        let remaining = ep.queued();
        assert!(remaining > 0 && remaining < payload.len());

        // Drain the peer in the background while we keep flushing.
        let reader = std::thread::spawn(move || {
            let mut received = vec![0u8; 4 * 1024 * 1024];
            peer.read_exact(&mut received).unwrap();
            received
        });
        while ep.flush().unwrap() == Flush::Stalled {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(reader.join().unwrap(), payload);
        assert!(!ep.is_write_interested());
    }

    #[test]
    fn test_flush_to_closed_peer_fails() {
        let (mut ep, peer) = endpoint(Role::Socket);
        drop(peer);
        ep.enqueue(b"lost");
        assert!(ep.flush().is_err());
    }

    #[test]
    fn test_desired_interest_follows_flags() {
        let (mut ep, _peer) = endpoint(Role::Socket);
        assert_eq!(ep.desired_interest(), Interest::READ);
        // Suspended endpoints keep read interest for hangup reporting.
        ep.suspend_reads();
        assert_eq!(ep.desired_interest(), Interest::READ);
        ep.enqueue(b"x");
        assert_eq!(ep.desired_interest(), Interest::BOTH);
        ep.resume_reads();
        assert_eq!(ep.desired_interest(), Interest::BOTH);
    }

    #[test]
    fn test_sync_interest_only_on_change() {
        let notifier = Notifier::new(4).unwrap();
        let (mut ep, _peer) = endpoint(Role::Terminal);
        ep.register(&notifier).unwrap();
        assert_eq!(ep.registered_interest(), Interest::READ);

        assert!(!ep.sync_interest(&notifier).unwrap());
        ep.enqueue(b"x");
        assert!(ep.sync_interest(&notifier).unwrap());
        assert_eq!(ep.registered_interest(), Interest::BOTH);
        assert!(!ep.sync_interest(&notifier).unwrap());

        ep.deregister(&notifier).unwrap();
        ep.deregister(&notifier).unwrap();
    }

    #[test]
    fn test_resume_forces_reregistration() {
        let notifier = Notifier::new(4).unwrap();
        let (mut ep, _peer) = endpoint(Role::Socket);
        ep.register(&notifier).unwrap();

        ep.suspend_reads();
        assert!(!ep.sync_interest(&notifier).unwrap());
        ep.resume_reads();
        assert!(ep.sync_interest(&notifier).unwrap());
        assert_eq!(ep.registered_interest(), Interest::READ);
        assert!(!ep.sync_interest(&notifier).unwrap());

        // Resuming an endpoint that was never suspended changes nothing.
        ep.resume_reads();
        assert!(!ep.sync_interest(&notifier).unwrap());
    }
}
