//! The passive TCP socket clients connect to.

use std::io;
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};
use mio::Token;

use crate::error::{Error, Result};
use crate::notifier::{Interest, Notifier};

pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let inner = TcpListener::bind(addr).map_err(|source| Error::Bind { addr, source })?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn register(&mut self, notifier: &Notifier, token: Token) -> io::Result<()> {
        notifier.register(&mut self.inner, token, Interest::READ)
    }

    /// Accept one pending client.
    ///
    /// `Ok(None)` means the backlog is empty. Callers loop until then, since
    /// the readiness notification for the queued clients will not repeat.
    pub fn accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        loop {
            match self.inner.accept() {
                Ok(accepted) => return Ok(Some(accepted)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e),
            }
        }
    }
}
