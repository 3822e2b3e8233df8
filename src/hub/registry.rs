//! Concurrent registry of live connections

use dashmap::DashMap;

use super::connection::{Connection, ConnectionId, ConnectionState, Recipient};

/// The set of live connections owned by one hub.
///
/// Entries are always `Open` or `Closing`; a connection is marked `Closed`
/// only after it has been taken out of the map.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn insert(&self, connection: Connection) -> ConnectionId {
        debug_assert!(connection.state().is_open());
        let id = connection.id();
        self.connections.insert(id, connection);
        id
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.connections.get(&id).map(|c| c.state())
    }

    /// Move an `Open` connection to `Closing` so relays stop targeting it
    pub fn mark_closing(&self, id: ConnectionId) -> Option<ConnectionState> {
        let mut entry = self.connections.get_mut(&id)?;
        if entry.state().is_open() {
            // Open -> Closing is always valid
            let _ = entry.transition_to(ConnectionState::Closing);
        }
        Some(entry.state())
    }

    /// Take a connection out of the set and mark it `Closed`
    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        let (_, mut connection) = self.connections.remove(&id)?;
        let _ = connection.transition_to(ConnectionState::Closed);
        Some(connection)
    }

    /// Snapshot of every open connection, optionally leaving one out.
    ///
    /// Shard locks are released before the caller sends anything.
    pub fn open_recipients(&self, exclude: Option<ConnectionId>) -> Vec<Recipient> {
        self.connections
            .iter()
            .filter(|entry| entry.state().is_open() && Some(*entry.key()) != exclude)
            .map(|entry| entry.recipient())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
