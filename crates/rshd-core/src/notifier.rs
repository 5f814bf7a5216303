//! Readiness notifier over mio's edge-triggered poller.
//!
//! Notifications fire once per readiness transition. A handler that reacts
//! to one must keep reading or writing until the call reports `WouldBlock`,
//! otherwise that transition is gone and the descriptor goes quiet.
//!
//! mio cannot register an empty interest set, so "interested in nothing" is
//! expressed by removing the descriptor from the poller. Adding it back
//! re-evaluates readiness, which is what re-arms a suspended reader.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Poll, Token, Waker};
use tracing::trace;

/// The readiness a caller wants reported for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const NONE: Interest = Interest {
        read: false,
        write: false,
    };
    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };
    pub const WRITE: Interest = Interest {
        read: false,
        write: true,
    };
    pub const BOTH: Interest = Interest {
        read: true,
        write: true,
    };

    pub fn is_empty(self) -> bool {
        !self.read && !self.write
    }

    fn to_mio(self) -> Option<mio::Interest> {
        match (self.read, self.write) {
            (true, true) => Some(mio::Interest::READABLE | mio::Interest::WRITABLE),
            (true, false) => Some(mio::Interest::READABLE),
            (false, true) => Some(mio::Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

/// One readiness notification, detached from mio's event buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    pub errored: bool,
    /// The peer hung up its write side; a read will report EOF or an error.
    pub read_closed: bool,
}

impl Readiness {
    /// Whether a read attempt is warranted.
    pub fn wants_read(&self) -> bool {
        self.readable || self.read_closed || self.errored
    }

    /// Whether a write attempt is warranted.
    pub fn wants_write(&self) -> bool {
        self.writable || self.errored
    }

    fn from_event(event: &mio::event::Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            errored: event.is_error(),
            read_closed: event.is_read_closed(),
        }
    }
}

/// Owns the OS poller and its event buffer.
pub struct Notifier {
    poll: Poll,
    events: Events,
}

impl Notifier {
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity.max(1)),
        })
    }

    /// Start watching `source`. An empty interest leaves it unregistered.
    pub fn register<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        match interest.to_mio() {
            Some(interests) => self.poll.registry().register(source, token, interests),
            None => Ok(()),
        }
    }

    /// Move `source` from interest `from` to interest `to`.
    ///
    /// Callers invoke this when the two differ, or with equal sets to have
    /// readiness re-evaluated.
    pub fn modify_interest<S>(
        &self,
        source: &mut S,
        token: Token,
        from: Interest,
        to: Interest,
    ) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        trace!(?token, ?from, ?to, "modify interest");
        match (from.to_mio(), to.to_mio()) {
            (None, None) => Ok(()),
            (None, Some(interests)) => self.poll.registry().register(source, token, interests),
            (Some(_), None) => self.poll.registry().deregister(source),
            (Some(_), Some(interests)) => self.poll.registry().reregister(source, token, interests),
        }
    }

    /// Stop watching `source`, which is currently registered with `current`.
    pub fn deregister<S>(&self, source: &mut S, current: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        if current.is_empty() {
            return Ok(());
        }
        self.poll.registry().deregister(source)
    }

    /// Create a waker that makes `wait` return with `token` from any thread.
    pub fn waker(&self, token: Token) -> io::Result<Arc<Waker>> {
        Ok(Arc::new(Waker::new(self.poll.registry(), token)?))
    }

    /// Block until at least one event arrives (or `timeout` passes) and
    /// append the batch to `out`.
    ///
    /// Interrupted waits are retried; the returned batch may be empty only
    /// when a timeout was given.
    pub fn wait(&mut self, out: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<()> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        out.extend(self.events.iter().map(Readiness::from_event));
        Ok(())
    }
}
