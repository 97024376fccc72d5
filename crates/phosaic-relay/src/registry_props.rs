use proptest::prelude::*;
use std::collections::HashSet;

use crate::connection::ConnectionHandle;
use crate::registry::IdentityRegistry;
use phosaic_proto::Role;

fn role(subordinate: bool) -> Role {
    if subordinate {
        Role::Subordinate
    } else {
        Role::Coordinator
    }
}

proptest! {
    // Live identifiers never repeat, across both tables.
    #[test]
    fn live_ids_are_unique(roles in prop::collection::vec(any::<bool>(), 1..64)) {
        let registry = IdentityRegistry::new(16);
        let mut seen = HashSet::new();
        let mut receivers = Vec::new();

        for subordinate in roles {
            let (handle, rx) = ConnectionHandle::channel(1);
            receivers.push(rx);
            let id = registry.register(handle, role(subordinate), None).unwrap();
            prop_assert!(seen.insert(id));
        }
    }

    // Every registered connection is removed exactly once, whatever the order.
    #[test]
    fn unregister_removes_exactly_once(
        roles in prop::collection::vec(any::<bool>(), 1..32),
        order in any::<prop::sample::Index>(),
    ) {
        let registry = IdentityRegistry::new(16);
        let mut handles = Vec::new();

        for subordinate in &roles {
            let (handle, _rx) = ConnectionHandle::channel(1);
            let id = registry.register(handle.clone(), role(*subordinate), None).unwrap();
            handles.push((handle, id));
        }

        let pivot = order.index(handles.len());
        handles.rotate_left(pivot);

        for (handle, id) in &handles {
            let removed = registry.unregister(handle.id());
            prop_assert_eq!(removed.map(|e| e.id), Some(id.clone()));
            prop_assert!(registry.unregister(handle.id()).is_none());
            prop_assert!(registry.resolve_any(id.as_str()).is_none());
        }

        prop_assert_eq!(registry.count(Role::Subordinate), 0);
        prop_assert_eq!(registry.count(Role::Coordinator), 0);
    }
}
