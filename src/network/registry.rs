use std::sync::Arc;

use dashmap::DashMap;

use crate::network::RemoteConnection;

/// Tracks every live connection by id.
///
/// Insert, lookup and removal are lock-free per entry, so a send can look a
/// connection up while the accept loop is inserting another. Ids are never
/// reused, so a lookup with a stale id misses instead of hitting a new peer.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<u64, Arc<RemoteConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> ConnectionRegistry {
        ConnectionRegistry {
            connections: DashMap::new(),
        }
    }

    pub fn insert(&self, connection: Arc<RemoteConnection>) {
        self.connections.insert(connection.id(), connection);
    }

    pub fn remove(&self, id: u64) -> Option<Arc<RemoteConnection>> {
        self.connections.remove(&id).map(|(_, connection)| connection)
    }

    pub fn get(&self, id: u64) -> Option<Arc<RemoteConnection>> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    pub fn ids(&self) -> Vec<u64> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Closes every connection and clears the registry. Entries are drained
    /// before any close so a concurrent lookup cannot observe a closed
    /// connection through the registry.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.connections.clear();
        for connection in drained {
            connection.close().await;
        }
    }
}
