// Library for uniform asynchronous IP connection handling over TCP and UDP sockets.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2021-2025 by
//     Dr. Maxim Orlovsky <orlovsky@ubideco.org>
//     Alexis Sellier <alexis@cloudhead.io>
//
// Copyright 2022-2025 UBIDECO Labs, InDCS, Lugano, Switzerland. All Rights reserved.
// Copyright 2021-2023 Alexis Sellier <alexis@cloudhead.io>. All Rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Stable opaque identifier of a registered connection.
///
/// Identifiers are assigned monotonically on insertion and are never reused for the lifetime of
/// a [`Registry`]; because of this, things like raw descriptors or socket addresses can't
/// operate like connection identifiers.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[display(inner)]
pub struct ConnectionId(u64);

/// Integer-keyed thread-safe table assigning a stable [`ConnectionId`] to every inserted entry.
///
/// [`Registry::acquire`] hands out a shared reference to the entry cell; locking the cell gives
/// the per-entry exclusive hold. An acquired entry outlives [`Registry::remove`]: the removal
/// only unlinks it from the table, and the cell is reclaimed when the last holder lets go.
pub struct Registry<T> {
    entries: Mutex<RegistryInner<T>>,
}

struct RegistryInner<T> {
    items: HashMap<ConnectionId, Arc<Mutex<T>>>,
    next_id: u64,
}

impl<T> Registry<T> {
    /// Constructs an empty registry.
    pub fn new() -> Self {
        Registry {
            entries: Mutex::new(RegistryInner {
                items: empty!(),
                next_id: 0,
            }),
        }
    }

    /// Inserts a new entry and returns its assigned identifier.
    pub fn insert(&self, value: T) -> ConnectionId {
        let mut inner = self.entries.lock().expect("registry lock poisoned");
        let id = ConnectionId(inner.next_id);
        inner.next_id += 1;
        inner.items.insert(id, Arc::new(Mutex::new(value)));
        id
    }

    /// Returns the entry cell for the given identifier, or `None` if absent.
    ///
    /// Locking the returned cell is the per-entry exclusive hold; it must not be kept across
    /// calls which may re-enter the registry under the same identifier.
    pub fn acquire(&self, id: ConnectionId) -> Option<Arc<Mutex<T>>> {
        self.entries.lock().expect("registry lock poisoned").items.get(&id).cloned()
    }

    /// Unlinks the entry from the table. The identifier is never reassigned.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Mutex<T>>> {
        self.entries.lock().expect("registry lock poisoned").items.remove(&id)
    }

    /// Whether an entry with the given identifier is currently registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.lock().expect("registry lock poisoned").items.contains_key(&id)
    }

    /// Copies the entry value out, without taking the per-entry hold.
    pub fn get(&self, id: ConnectionId) -> Option<T>
    where T: Clone {
        let cell = self.acquire(id)?;
        let value = cell.lock().expect("registry entry lock poisoned").clone();
        Some(value)
    }

    /// Snapshot of all registered identifiers, in insertion order.
    ///
    /// Iterating the snapshot does not hold the table lock: entries may be removed, or new ones
    /// inserted, while the caller walks the keys.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let inner = self.entries.lock().expect("registry lock poisoned");
        let mut ids = inner.items.keys().copied().collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize { self.entries.lock().expect("registry lock poisoned").items.len() }

    /// Whether the registry holds no entries.
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl<T> Default for Registry<T> {
    fn default() -> Self { Registry::new() }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let registry = Registry::new();
        let first = registry.insert("a");
        let second = registry.insert("b");
        assert!(second > first);

        registry.remove(first);
        let third = registry.insert("c");
        assert!(third > second);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn acquired_entry_survives_removal() {
        let registry = Registry::new();
        let id = registry.insert(42);

        let cell = registry.acquire(id).unwrap();
        let guard = cell.lock().unwrap();
        registry.remove(id);
        assert_eq!(registry.len(), 0);
        assert_eq!(*guard, 42);

        assert!(registry.acquire(id).is_none());
    }

    #[test]
    fn copy_get_does_not_hold() {
        let registry = Registry::new();
        let id = registry.insert(7u8);
        assert!(registry.contains(id));
        assert_eq!(registry.get(id), Some(7));
        registry.remove(id);
        assert!(!registry.contains(id));
        assert_eq!(registry.get(id), None);
    }

    #[test]
    fn snapshot_iteration() {
        let registry = Registry::new();
        let a = registry.insert(());
        let b = registry.insert(());
        let c = registry.insert(());
        registry.remove(b);
        assert_eq!(registry.ids(), vec![a, c]);
    }
}
