//! The active set: live connections and the shells behind them.

use std::collections::HashMap;

use nix::unistd::Pid;

use crate::connection::{Connection, ConnectionId};
use crate::session::Session;

/// Owns every live [`Connection`] and [`Session`].
///
/// Connections are looked up by the id decoded from a readiness token;
/// sessions by pid. The two maps are linked by ids, not references, so
/// either side can go away first.
#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    sessions: HashMap<Pid, Session>,
    next_id: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id that has never been handed out before.
    pub fn next_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Add a connection and, if it has one, the session driving it.
    pub fn insert(&mut self, conn: Connection) {
        if let Some(pid) = conn.session() {
            self.sessions
                .insert(pid, Session::new(pid, Some(conn.id())));
        }
        self.connections.insert(conn.id(), conn);
    }

    /// Track a shell that has no connection (its connection failed to open).
    pub fn insert_orphan(&mut self, pid: Pid) {
        self.sessions.insert(pid, Session::new(pid, None));
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Remove a connection and detach its session. `None` if it was
    /// already removed, which makes teardown idempotent.
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let conn = self.connections.remove(&id)?;
        if let Some(session) = conn.session().and_then(|pid| self.sessions.get_mut(&pid)) {
            session.detach();
        }
        Some(conn)
    }

    /// Forget a reaped session, returning it.
    pub fn remove_session(&mut self, pid: Pid) -> Option<Session> {
        self.sessions.remove(&pid)
    }

    pub fn session(&self, pid: Pid) -> Option<&Session> {
        self.sessions.get(&pid)
    }

    /// Pids of all shells not yet reaped.
    pub fn session_pids(&self) -> Vec<Pid> {
        self.sessions.keys().copied().collect()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
