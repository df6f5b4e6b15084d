use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::transport::ConnectionId;

pub const UNKNOWN_CLIENT: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub connection: ConnectionId,
    /// Sequential number, starting at 1, never reused.
    pub id: u64,
    pub display_name: String,
}

#[derive(Debug)]
struct RegistryState {
    next_id: u64,
    by_connection: HashMap<ConnectionId, ClientIdentity>,
}

/// Directory of every client seen since startup.
///
/// Identities are kept after disconnect so names stay stable in logs and
/// tickets for the life of the process.
#[derive(Debug)]
pub struct ClientRegistry {
    name_prefix: String,
    state: RwLock<RegistryState>,
}

impl ClientRegistry {
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            state: RwLock::new(RegistryState {
                next_id: 1,
                by_connection: HashMap::new(),
            }),
        }
    }

    pub fn register(&self, connection: ConnectionId) -> ClientIdentity {
        let mut state = self.write();
        if let Some(existing) = state.by_connection.get(&connection) {
            return existing.clone();
        }
        let id = state.next_id;
        state.next_id += 1;
        let identity = ClientIdentity {
            connection,
            id,
            display_name: format!("{} {}", self.name_prefix, id),
        };
        state.by_connection.insert(connection, identity.clone());
        identity
    }

    pub fn name_of(&self, connection: ConnectionId) -> String {
        self.read()
            .by_connection
            .get(&connection)
            .map(|identity| identity.display_name.clone())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }

    pub fn lookup(&self, connection: ConnectionId) -> Option<ClientIdentity> {
        self.read().by_connection.get(&connection).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().by_connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().by_connection.is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
