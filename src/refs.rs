//! Table of exported local objects.
//!
//! Uses `DashMap` so connections and worker threads can export and resolve
//! concurrently. Entries are never evicted: an exported object lives as
//! long as the table.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::{ObjwireError, Result};
use crate::value::{LocalObject, RefId};

/// Maps reference ids to live local objects.
pub struct ReferenceTable {
    objects: DashMap<RefId, LocalObject>,
    /// Allocation address → id, so exporting twice yields the same id.
    by_addr: DashMap<usize, RefId>,
    next_id: AtomicU64,
}

impl ReferenceTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            by_addr: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Export `object`, returning its id. Idempotent per object.
    pub fn export(&self, object: &LocalObject) -> RefId {
        *self.by_addr.entry(object.addr()).or_insert_with(|| {
            let id = RefId(self.next_id.fetch_add(1, Ordering::Relaxed));
            self.objects.insert(id, object.clone());
            tracing::debug!("exported {:?} as {}", object, id);
            id
        })
    }

    /// Look up an exported object.
    pub fn get(&self, id: RefId) -> Option<LocalObject> {
        self.objects.get(&id).map(|entry| entry.value().clone())
    }

    /// Resolve a request reference; `None` addresses `front`.
    pub fn resolve(&self, reference: Option<RefId>, front: &LocalObject) -> Result<LocalObject> {
        match reference {
            None => Ok(front.clone()),
            Some(id) => self.get(id).ok_or(ObjwireError::UnknownReference(id)),
        }
    }

    /// Number of exported objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing has been exported.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for ReferenceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ServiceBuilder;

    fn object(name: &str) -> LocalObject {
        LocalObject(ServiceBuilder::new(name).build())
    }

    #[test]
    fn test_export_is_idempotent() {
        let table = ReferenceTable::new();
        let a = object("A");
        let b = object("B");

        let id_a = table.export(&a);
        assert_eq!(table.export(&a.clone()), id_a);
        let id_b = table.export(&b);

        assert_ne!(id_a, id_b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(id_a), Some(a));
    }

    #[test]
    fn test_resolve_front_and_unknown() {
        let table = ReferenceTable::new();
        let front = object("Front");

        assert_eq!(table.resolve(None, &front).unwrap(), front);
        assert!(matches!(
            table.resolve(Some(RefId(42)), &front),
            Err(ObjwireError::UnknownReference(RefId(42)))
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_export() {
        let table = std::sync::Arc::new(ReferenceTable::new());
        let shared = object("Shared");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                let shared = shared.clone();
                std::thread::spawn(move || table.export(&shared))
            })
            .collect();
        let ids: Vec<RefId> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(table.len(), 1);
    }
}
