//! Identity registry: session identifier → live connection, per role.
//!
//! The registry is a monitor. Every operation takes the single lock for the
//! duration of one lookup, insert or delete and never holds it across a send;
//! callers get cloned entries back and deliver outside the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use phosaic_proto::{DisplayGeometry, Role, SessionId};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionHandle, ConnectionId};

/// Attempts before `register` gives up on finding an unused identifier.
const MAX_ID_ATTEMPTS: usize = 8;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("connection {connection} is already registered as {role} {id}")]
    AlreadyRegistered {
        connection: ConnectionId,
        role: Role,
        id: SessionId,
    },
    #[error("failed to gather randomness: {0}")]
    Entropy(String),
    #[error("no unused session id after {0} attempts")]
    Exhausted(usize),
}

/// Produces candidate session identifiers.
pub type IdGenerator = Arc<dyn Fn() -> Result<SessionId, RegistryError> + Send + Sync>;

/// Random lower-case hex identifiers of `bytes` bytes from the OS RNG.
pub fn random_ids(bytes: usize) -> IdGenerator {
    Arc::new(move || {
        let mut buf = vec![0u8; bytes];
        getrandom::getrandom(&mut buf).map_err(|e| RegistryError::Entropy(e.to_string()))?;
        Ok(SessionId::new(hex::encode(buf)))
    })
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub id: SessionId,
    pub role: Role,
    pub handle: ConnectionHandle,
    pub geometry: Option<DisplayGeometry>,
    pub registered_at: Instant,
}

#[derive(Default)]
struct Tables {
    subordinates: HashMap<SessionId, RegistryEntry>,
    coordinators: HashMap<SessionId, RegistryEntry>,
    connections: HashMap<ConnectionId, (Role, SessionId)>,
}

impl Tables {
    fn table(&self, role: Role) -> &HashMap<SessionId, RegistryEntry> {
        match role {
            Role::Subordinate => &self.subordinates,
            Role::Coordinator => &self.coordinators,
        }
    }

    fn table_mut(&mut self, role: Role) -> &mut HashMap<SessionId, RegistryEntry> {
        match role {
            Role::Subordinate => &mut self.subordinates,
            Role::Coordinator => &mut self.coordinators,
        }
    }

    // Candidates resolve against either table, so identifiers share one namespace.
    fn is_taken(&self, id: &str) -> bool {
        self.subordinates.contains_key(id) || self.coordinators.contains_key(id)
    }
}

pub struct IdentityRegistry {
    tables: Mutex<Tables>,
    generate: IdGenerator,
}

impl IdentityRegistry {
    pub fn new(id_bytes: usize) -> Self {
        Self::with_generator(random_ids(id_bytes))
    }

    pub fn with_generator(generate: IdGenerator) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            generate,
        }
    }

    /// Assigns a fresh identifier to `handle` in `role`'s table.
    ///
    /// A connection occupies at most one entry; registering it a second time
    /// fails and leaves the first registration in place.
    pub fn register(
        &self,
        handle: ConnectionHandle,
        role: Role,
        geometry: Option<DisplayGeometry>,
    ) -> Result<SessionId, RegistryError> {
        let mut tables = self.tables.lock();

        if let Some((existing_role, existing_id)) = tables.connections.get(&handle.id()) {
            return Err(RegistryError::AlreadyRegistered {
                connection: handle.id(),
                role: *existing_role,
                id: existing_id.clone(),
            });
        }

        let mut attempts = 0;
        let id = loop {
            if attempts == MAX_ID_ATTEMPTS {
                return Err(RegistryError::Exhausted(attempts));
            }
            attempts += 1;

            let candidate = (self.generate)()?;
            if !tables.is_taken(candidate.as_str()) {
                break candidate;
            }
            warn!(attempt = attempts, "session id collision, regenerating");
        };

        let connection = handle.id();
        tables.connections.insert(connection, (role, id.clone()));
        tables.table_mut(role).insert(
            id.clone(),
            RegistryEntry {
                id: id.clone(),
                role,
                handle,
                geometry,
                registered_at: Instant::now(),
            },
        );

        info!(%connection, %role, session = %id, "registered");
        Ok(id)
    }

    pub fn resolve(&self, role: Role, id: &str) -> Option<RegistryEntry> {
        self.tables.lock().table(role).get(id).cloned()
    }

    /// Looks `id` up in the subordinate table, then the coordinator table.
    pub fn resolve_any(&self, id: &str) -> Option<RegistryEntry> {
        let tables = self.tables.lock();
        tables
            .subordinates
            .get(id)
            .or_else(|| tables.coordinators.get(id))
            .cloned()
    }

    /// The entry a connection registered, if any.
    pub fn entry_of(&self, connection: ConnectionId) -> Option<RegistryEntry> {
        let tables = self.tables.lock();
        let (role, id) = tables.connections.get(&connection)?;
        tables.table(*role).get(id).cloned()
    }

    /// Removes whatever entry `connection` holds. A no-op for unknown connections.
    pub fn unregister(&self, connection: ConnectionId) -> Option<RegistryEntry> {
        let mut tables = self.tables.lock();
        let (role, id) = tables.connections.remove(&connection)?;
        let entry = tables.table_mut(role).remove(&id);
        debug!(%connection, %role, session = %id, "unregistered");
        entry
    }

    pub fn count(&self, role: Role) -> usize {
        self.tables.lock().table(role).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn scripted(ids: &[&str]) -> IdGenerator {
        let queue = Mutex::new(ids.iter().map(|s| SessionId::from(*s)).collect::<VecDeque<_>>());
        Arc::new(move || queue.lock().pop_front().ok_or(RegistryError::Exhausted(0)))
    }

    #[test]
    fn random_ids_have_requested_width() {
        let id = (random_ids(16))().unwrap();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn register_and_resolve_by_role() {
        let registry = IdentityRegistry::with_generator(scripted(&["abc123", "coord1"]));
        let (sub, _rs) = ConnectionHandle::channel(4);
        let (coord, _rc) = ConnectionHandle::channel(4);

        let geometry = DisplayGeometry::new(1280, 720).unwrap();
        let sub_id = registry.register(sub.clone(), Role::Subordinate, Some(geometry)).unwrap();
        let coord_id = registry.register(coord.clone(), Role::Coordinator, None).unwrap();

        assert_eq!(sub_id.as_str(), "abc123");
        assert_eq!(coord_id.as_str(), "coord1");

        let entry = registry.resolve(Role::Subordinate, "abc123").unwrap();
        assert_eq!(entry.handle.id(), sub.id());
        assert_eq!(entry.geometry, Some(geometry));

        assert!(registry.resolve(Role::Coordinator, "abc123").is_none());
        assert!(registry.resolve(Role::Subordinate, "coord1").is_none());
        assert_eq!(registry.resolve_any("coord1").unwrap().role, Role::Coordinator);
    }

    #[test]
    fn collision_regenerates() {
        let registry = IdentityRegistry::with_generator(scripted(&["same", "same", "other"]));
        let (a, _ra) = ConnectionHandle::channel(1);
        let (b, _rb) = ConnectionHandle::channel(1);

        registry.register(a, Role::Subordinate, None).unwrap();
        let second = registry.register(b, Role::Coordinator, None).unwrap();
        assert_eq!(second.as_str(), "other");
    }

    #[test]
    fn persistent_collisions_exhaust() {
        let ids = vec!["dup"; MAX_ID_ATTEMPTS + 1];
        let registry = IdentityRegistry::with_generator(scripted(&ids));
        let (a, _ra) = ConnectionHandle::channel(1);
        let (b, _rb) = ConnectionHandle::channel(1);

        registry.register(a, Role::Subordinate, None).unwrap();
        let err = registry.register(b, Role::Subordinate, None).unwrap_err();
        assert!(matches!(err, RegistryError::Exhausted(n) if n == MAX_ID_ATTEMPTS));
    }

    #[test]
    fn second_registration_is_rejected() {
        let registry = IdentityRegistry::with_generator(scripted(&["first", "second"]));
        let (handle, _rx) = ConnectionHandle::channel(1);

        registry.register(handle.clone(), Role::Subordinate, None).unwrap();
        let err = registry.register(handle.clone(), Role::Coordinator, None).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered { role: Role::Subordinate, .. }));

        assert_eq!(registry.entry_of(handle.id()).unwrap().id.as_str(), "first");
        assert_eq!(registry.count(Role::Coordinator), 0);
    }

    #[test]
    fn unregister_removes_once() {
        let registry = IdentityRegistry::new(16);
        let (handle, _rx) = ConnectionHandle::channel(1);
        let id = registry.register(handle.clone(), Role::Subordinate, None).unwrap();

        assert!(registry.unregister(handle.id()).is_some());
        assert!(registry.unregister(handle.id()).is_none());
        assert!(registry.resolve_any(id.as_str()).is_none());
        assert_eq!(registry.count(Role::Subordinate), 0);
    }

    #[test]
    fn unregister_unknown_connection_is_noop() {
        let registry = IdentityRegistry::new(16);
        assert!(registry.unregister(ConnectionId::next()).is_none());
    }

    #[test]
    fn released_id_is_assignable_again() {
        let registry = IdentityRegistry::with_generator(scripted(&["abc123", "abc123"]));
        let (a, _ra) = ConnectionHandle::channel(1);
        let (b, _rb) = ConnectionHandle::channel(1);

        registry.register(a.clone(), Role::Subordinate, None).unwrap();
        registry.unregister(a.id());
        let id = registry.register(b.clone(), Role::Subordinate, None).unwrap();

        assert_eq!(id.as_str(), "abc123");
        assert_eq!(registry.resolve(Role::Subordinate, "abc123").unwrap().handle.id(), b.id());
    }
}
