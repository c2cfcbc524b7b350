//! Identity-keyed side table from stream/entity instances to capture contexts.
//!
//! Entries are keyed by the address and concrete type of the instance behind
//! an `Arc`, not by anything the instance implements, so streams from foreign
//! code can be tracked without wrapping them. Every operation takes the same
//! `&Arc<T>` so a lookup can never key on the `Arc` handle itself. Each entry holds only a weak reference to
//! its instance: once the instance is dropped the entry is dead, ignored by
//! lookups, and swept on a later insert.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::context::CaptureContext;

/// Inserts between sweeps of dead entries.
const SWEEP_INTERVAL: usize = 256;

/// Identity of an instance: address plus concrete type.
///
/// The type disambiguates a struct from its first field, which share an
/// address. The address is that of the value inside the `Arc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    addr: usize,
    type_id: TypeId,
}

impl InstanceKey {
    /// Key for the value `instance` points to.
    pub fn of<T: Any>(instance: &Arc<T>) -> Self {
        Self::at(Arc::as_ptr(instance))
    }

    fn at<T: Any>(ptr: *const T) -> Self {
        Self {
            addr: ptr as *const () as usize,
            type_id: TypeId::of::<T>(),
        }
    }
}

struct Association {
    instance: Weak<dyn Any + Send + Sync>,
    context: Arc<CaptureContext>,
}

impl Association {
    fn is_live(&self) -> bool {
        self.instance.strong_count() > 0 && !self.context.is_finalized()
    }
}

/// Concurrent, non-retaining instance → context map.
pub struct AssociationRegistry {
    map: DashMap<InstanceKey, Association>,
    inserts: AtomicUsize,
}

impl AssociationRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
            inserts: AtomicUsize::new(0),
        }
    }

    /// Returns the live context for `instance`, or inserts the one built by
    /// `make`.
    ///
    /// The second tuple element is `true` when a new context was inserted.
    /// `make` returning `None` leaves the registry untouched.
    pub fn get_or_insert_with<T, F>(
        &self,
        instance: &Arc<T>,
        make: F,
    ) -> Option<(Arc<CaptureContext>, bool)>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Option<Arc<CaptureContext>>,
    {
        let key = InstanceKey::of(instance);
        let result = match self.map.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live() {
                    return Some((occupied.get().context.clone(), false));
                }
                let context = make()?;
                occupied.insert(Association {
                    instance: weak_of(instance),
                    context: context.clone(),
                });
                (context, true)
            }
            Entry::Vacant(vacant) => {
                let context = make()?;
                vacant.insert(Association {
                    instance: weak_of(instance),
                    context: context.clone(),
                });
                (context, true)
            }
        };
        self.after_insert();
        Some(result)
    }

    /// Registers `instance` under an existing context, replacing any dead or
    /// finalized entry.
    pub fn insert<T>(&self, instance: &Arc<T>, context: Arc<CaptureContext>)
    where
        T: Any + Send + Sync,
    {
        self.map.insert(
            InstanceKey::of(instance),
            Association {
                instance: weak_of(instance),
                context,
            },
        );
        self.after_insert();
    }

    /// Live context for `instance`.
    ///
    /// Dead or finalized entries are removed on the way.
    pub fn lookup<T: Any>(&self, instance: &Arc<T>) -> Option<Arc<CaptureContext>> {
        let key = InstanceKey::of(instance);
        let live = {
            let entry = self.map.get(&key)?;
            entry.is_live().then(|| entry.context.clone())
        };
        if live.is_none() {
            self.map.remove_if(&key, |_, association| !association.is_live());
        }
        live
    }

    /// Removes the entry for `instance`, returning its context.
    pub fn detach<T: Any>(&self, instance: &Arc<T>) -> Option<Arc<CaptureContext>> {
        self.map
            .remove(&InstanceKey::of(instance))
            .map(|(_, association)| association.context)
    }

    /// Drops entries whose instance is gone or whose context is finalized.
    pub fn sweep(&self) -> usize {
        let before = self.map.len();
        self.map.retain(|_, association| association.is_live());
        let removed = before.saturating_sub(self.map.len());
        if removed > 0 {
            debug!(removed, remaining = self.map.len(), "Swept capture registry");
        }
        removed
    }

    /// Number of entries, live or not.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn after_insert(&self) {
        if self.inserts.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.sweep();
        }
    }
}

impl Default for AssociationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AssociationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssociationRegistry")
            .field("entries", &self.map.len())
            .finish()
    }
}

fn weak_of<T: Any + Send + Sync>(instance: &Arc<T>) -> Weak<dyn Any + Send + Sync> {
    let weak: Weak<T> = Arc::downgrade(instance);
    weak
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FinalizeReason;
    use crate::policy::{BodyKind, Charset};
    use crate::span::{keys, RecordingSpan};

    struct Stream {
        _id: u32,
    }

    fn context() -> Arc<CaptureContext> {
        CaptureContext::shared(
            RecordingSpan::shared(),
            keys::HTTP_REQUEST_BODY,
            Charset::utf8(),
            BodyKind::Bytes,
            16,
        )
    }

    #[test]
    fn test_insert_and_lookup_by_identity() {
        let registry = AssociationRegistry::new();
        let a = Arc::new(Stream { _id: 1 });
        let b = Arc::new(Stream { _id: 1 });

        let (ctx, created) = registry.get_or_insert_with(&a, || Some(context())).unwrap();
        assert!(created);
        assert!(Arc::ptr_eq(&registry.lookup(&a).unwrap(), &ctx));
        assert!(registry.lookup(&b).is_none());
    }

    #[test]
    fn test_get_or_insert_is_idempotent() {
        let registry = AssociationRegistry::new();
        let a = Arc::new(Stream { _id: 1 });
        let (first, _) = registry.get_or_insert_with(&a, || Some(context())).unwrap();
        let (second, created) = registry
            .get_or_insert_with(&a, || panic!("must reuse the live context"))
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_declined_insert_leaves_no_entry() {
        let registry = AssociationRegistry::new();
        let a = Arc::new(Stream { _id: 1 });
        assert!(registry.get_or_insert_with(&a, || None).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_finalized_entry_is_replaced_and_hidden() {
        let registry = AssociationRegistry::new();
        let a = Arc::new(Stream { _id: 1 });
        let (first, _) = registry.get_or_insert_with(&a, || Some(context())).unwrap();
        first.finalize(FinalizeReason::Closed);
        assert!(registry.lookup(&a).is_none());

        let (second, created) = registry.get_or_insert_with(&a, || Some(context())).unwrap();
        assert!(created);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_dropped_instances_are_swept() {
        let registry = AssociationRegistry::new();
        let a = Arc::new(Stream { _id: 1 });
        registry.get_or_insert_with(&a, || Some(context()));
        assert_eq!(registry.len(), 1);
        drop(a);
        assert_eq!(registry.sweep(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_type_disambiguates_shared_address() {
        #[repr(C)]
        struct Outer {
            inner: Stream,
        }
        let registry = AssociationRegistry::new();
        let outer = Arc::new(Outer {
            inner: Stream { _id: 7 },
        });
        registry.get_or_insert_with(&outer, || Some(context()));
        assert!(registry.lookup(&outer).is_some());
        let field = InstanceKey::at(&outer.inner as *const Stream);
        assert_ne!(InstanceKey::of(&outer), field);
        assert!(!registry.map.contains_key(&field));
    }

    #[test]
    fn test_key_is_the_pointee_not_the_handle() {
        let registry = AssociationRegistry::new();
        let a = Arc::new(Stream { _id: 1 });
        let clone = a.clone();
        registry.get_or_insert_with(&a, || Some(context()));
        assert_eq!(InstanceKey::of(&a), InstanceKey::of(&clone));
        assert!(registry.lookup(&clone).is_some());
    }

    #[test]
    fn test_detach() {
        let registry = AssociationRegistry::new();
        let a = Arc::new(Stream { _id: 1 });
        registry.get_or_insert_with(&a, || Some(context()));
        assert!(registry.detach(&a).is_some());
        assert!(registry.detach(&a).is_none());
        assert!(registry.lookup(&a).is_none());
    }

    #[test]
    fn test_concurrent_inserts() {
        let registry = Arc::new(AssociationRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let streams: Vec<_> = (0..100).map(|i| Arc::new(Stream { _id: i })).collect();
                    for s in &streams {
                        registry.get_or_insert_with(s, || Some(context()));
                    }
                    streams.iter().all(|s| registry.lookup(s).is_some())
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
