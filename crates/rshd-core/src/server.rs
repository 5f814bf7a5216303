//! The single-threaded event loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::net::TcpStream;
use mio::{Token, Waker};
use tracing::{debug, error, info, trace, warn};

use crate::config::DaemonConfig;
use crate::connection::{Connection, ConnectionId};
use crate::error::{CloseReason, Error, Result};
use crate::listener::Listener;
use crate::notifier::{Notifier, Readiness};
use crate::reaper::{self, Reaper};
use crate::registry::Registry;
use crate::session::{hang_up, PtyLauncher, SessionLauncher};

const LISTENER: Token = Token(0);
const SIGNALS: Token = Token(1);
const WAKER: Token = Token(2);

/// Stops a running [`Daemon`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!("Failed to wake event loop for shutdown: {}", e);
        }
    }
}

/// The remote shell daemon: one listener, one notifier, every connection.
pub struct Daemon<L: SessionLauncher = PtyLauncher> {
    config: DaemonConfig,
    notifier: Notifier,
    listener: Listener,
    reaper: Reaper,
    launcher: L,
    registry: Registry,
    buf: Vec<u8>,
    events: Vec<Readiness>,
    /// Connections whose shell exited, closed after the current batch.
    doomed: Vec<(ConnectionId, CloseReason)>,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Daemon<PtyLauncher> {
    /// Bind the listener and spawn shells on real pseudo-terminals.
    pub fn bind(config: DaemonConfig) -> Result<Self> {
        let launcher = PtyLauncher::new(config.shell.clone(), config.term_size);
        Self::with_launcher(config, launcher)
    }
}

impl<L: SessionLauncher> Daemon<L> {
    /// Bind the listener and use `launcher` to start a session per client.
    pub fn with_launcher(config: DaemonConfig, launcher: L) -> Result<Self> {
        let notifier = Notifier::new(config.events_capacity).map_err(Error::Notifier)?;

        let mut listener = Listener::bind(config.listen)?;
        listener
            .register(&notifier, LISTENER)
            .map_err(|source| Error::Register {
                what: "listener",
                source,
            })?;

        let mut reaper = Reaper::new(config.handle_termination_signals).map_err(Error::Signals)?;
        reaper
            .register(&notifier, SIGNALS)
            .map_err(|source| Error::Register {
                what: "signal pipe",
                source,
            })?;

        let waker = notifier.waker(WAKER).map_err(|source| Error::Register {
            what: "waker",
            source,
        })?;

        if let Ok(addr) = listener.local_addr() {
            info!("Daemon listening on {}", addr);
        }

        Ok(Self {
            buf: vec![0u8; config.read_buffer_size.max(1)],
            events: Vec::with_capacity(config.events_capacity),
            config,
            notifier,
            listener,
            reaper,
            launcher,
            registry: Registry::new(),
            doomed: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            requested: self.shutdown.clone(),
            waker: self.waker.clone(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Serve until a termination signal or a [`ShutdownHandle`] stops us.
    ///
    /// On the way out every connection is closed, which hangs up its shell.
    pub fn run(&mut self) -> Result<()> {
        while !self.shutdown.load(Ordering::SeqCst) {
            self.turn(None)?;
        }
        self.close_all();
        Ok(())
    }

    /// Run one `wait` and dispatch the resulting batch.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<()> {
        let mut events = std::mem::take(&mut self.events);
        events.clear();
        self.notifier
            .wait(&mut events, timeout)
            .map_err(Error::Wait)?;

        for readiness in &events {
            self.dispatch(readiness);
        }
        self.events = events;

        for (id, reason) in std::mem::take(&mut self.doomed) {
            if let Some(conn) = self.registry.connection_mut(id) {
                conn.drain_terminal(&mut self.buf);
            }
            self.teardown(id, reason);
        }
        Ok(())
    }

    fn dispatch(&mut self, readiness: &Readiness) {
        match readiness.token {
            LISTENER => self.accept_clients(),
            SIGNALS => self.handle_signals(),
            WAKER => trace!("Woken"),
            token => self.handle_connection_event(token, readiness),
        }
    }

    fn handle_connection_event(&mut self, token: Token, readiness: &Readiness) {
        let Some((id, role)) = ConnectionId::from_token(token) else {
            debug!("Event for unknown token {:?}", token);
            return;
        };
        // Events queued before a teardown in the same batch land here.
        let Some(conn) = self.registry.connection_mut(id) else {
            trace!("Stale event for closed connection {}", id);
            return;
        };

        let result = match conn.on_ready(role, readiness, &mut self.buf) {
            Ok(()) => conn.sync_interest(&self.notifier),
            Err(reason) => Err(reason),
        };
        if let Err(reason) = result {
            self.teardown(id, reason);
        }
    }

    fn accept_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok(Some((stream, addr))) => self.open_connection(stream, addr),
                Ok(None) => break,
                Err(e) => {
                    error!("Accept error: {}", e);
                    break;
                }
            }
        }
    }

    /// Launch a shell for a new client and bridge the two.
    ///
    /// Any failure here only affects this client: dropping `stream` closes
    /// its socket.
    fn open_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.registry.connection_count() >= self.config.max_connections {
            warn!(
                "Connection limit ({}) reached, rejecting {}",
                self.config.max_connections, addr
            );
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let launched = match self.launcher.launch() {
            Ok(launched) => launched,
            Err(e) => {
                warn!("Failed to launch session for {}: {}", addr, e);
                return;
            }
        };

        let id = self.registry.next_id();
        match Connection::open(
            id,
            addr,
            Box::new(stream),
            launched.terminal,
            launched.pid,
            &self.notifier,
        ) {
            Ok(conn) => {
                info!("Client {} connected as {}", addr, id);
                self.registry.insert(conn);
            }
            Err(e) => {
                warn!("Failed to register connection for {}: {}", addr, e);
                if let Some(pid) = launched.pid {
                    // The terminal is already closed; make sure the shell
                    // goes and is still reaped when it does.
                    hang_up(pid);
                    self.registry.insert_orphan(pid);
                }
            }
        }
    }

    fn handle_signals(&mut self) {
        let batch = self.reaper.pending();
        if batch.terminate {
            info!("Received termination signal, shutting down");
            self.shutdown.store(true, Ordering::SeqCst);
        }
        if batch.child_exited {
            self.reap_children();
        }
    }

    fn reap_children(&mut self) {
        for (pid, exit) in reaper::reap_exited(self.registry.session_pids()) {
            let Some(session) = self.registry.remove_session(pid) else {
                continue;
            };
            let lifetime = chrono::Utc::now() - session.started_at();
            info!(
                "Shell {} exited ({}) after {}s",
                pid,
                exit,
                lifetime.num_seconds()
            );
            if let Some(id) = session.connection() {
                self.doomed
                    .push((id, CloseReason::SessionExited(exit.to_string())));
            }
        }
    }

    /// Deregister and close both descriptors of a connection and detach its
    /// session. A connection that is already gone is ignored.
    fn teardown(&mut self, id: ConnectionId, reason: CloseReason) {
        let Some(conn) = self.registry.remove_connection(id) else {
            return;
        };
        let duration = chrono::Utc::now() - conn.opened_at();
        if reason.is_orderly() {
            info!(
                "Connection {} ({}) closed: {} [in={} out={} secs={}]",
                id,
                conn.peer_addr(),
                reason,
                conn.bytes_in(),
                conn.bytes_out(),
                duration.num_seconds()
            );
        } else {
            warn!(
                "Connection {} ({}) closed: {}: {}",
                id,
                conn.peer_addr(),
                reason,
                std::error::Error::source(&reason)
                    .map(|s| s.to_string())
                    .unwrap_or_default()
            );
        }
        conn.close(&self.notifier);
    }

    fn close_all(&mut self) {
        let ids = self.registry.connection_ids();
        if !ids.is_empty() {
            info!("Closing {} connection(s)", ids.len());
        }
        for id in ids {
            self.teardown(id, CloseReason::Shutdown);
        }
        for (pid, exit) in reaper::reap_exited(self.registry.session_pids()) {
            self.registry.remove_session(pid);
            debug!("Shell {} exited ({}) during shutdown", pid, exit);
        }
    }
}
