//! # Handle Registry
//!
//! Hands out fixed-width integer keys for runtime objects, so a reference can
//! ride through native callback contexts that only carry opaque `u64` data.
//!
//! ## Invariants
//!
//! - The registry never keeps an object alive. Entries are `Weak`; a key to a
//!   dropped object resolves to `None` and its slot is reclaimed.
//! - A key is `generation << 32 | slot`. Freeing a slot bumps its generation,
//!   so a stale key can never resolve to a newer object in the reused slot.
//! - Registering the same allocation twice yields the same key.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::Weak;

/// Integer key for a registered object.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct RegistryKey(u64);

impl RegistryKey {
    fn new(slot: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | slot as u64)
    }

    fn slot(self) -> usize {
        (self.0 & 0xffff_ffff) as usize
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The key as it should be stored in a native context.
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Rebuilds a key read back out of a native context.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "key-{}.{}", self.slot(), self.generation())
    }
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

struct Entry {
    object: Weak<dyn Any + Send + Sync>,
    address: usize,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_address: HashMap<usize, RegistryKey>,
}

impl Arena {
    fn entry(&self, key: RegistryKey) -> Option<&Entry> {
        let slot = self.slots.get(key.slot())?;
        if slot.generation != key.generation() {
            return None;
        }
        slot.entry.as_ref()
    }

    fn release(&mut self, key: RegistryKey) -> bool {
        let Some(slot) = self.slots.get_mut(key.slot()) else {
            return false;
        };
        if slot.generation != key.generation() {
            return false;
        }
        let Some(entry) = slot.entry.take() else {
            return false;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.by_address.remove(&entry.address);
        self.free.push(key.slot() as u32);
        true
    }

    fn sweep(&mut self) -> usize {
        let dead: Vec<RegistryKey> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match &slot.entry {
                Some(entry) if entry.object.strong_count() == 0 => {
                    Some(RegistryKey::new(index as u32, slot.generation))
                }
                _ => None,
            })
            .collect();
        for key in &dead {
            self.release(*key);
        }
        dead.len()
    }
}

/// Weak, generation-checked map from [`RegistryKey`] to object.
#[derive(Default)]
pub struct HandleRegistry {
    arena: Mutex<Arena>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn arena(&self) -> MutexGuard<'_, Arena> {
        // The arena holds no invariants a panicking caller could break halfway.
        self.arena.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the key for `object`, allocating one on first registration.
    pub fn register<T: Any + Send + Sync>(&self, object: &Arc<T>) -> RegistryKey {
        let address = Arc::as_ptr(object) as *const () as usize;
        let mut arena = self.arena();

        if let Some(key) = arena.by_address.get(&address).copied() {
            // The address may belong to a dead allocation that was reused.
            if arena.entry(key).is_some_and(|e| e.object.strong_count() > 0) {
                return key;
            }
            arena.release(key);
        }

        let weak: Weak<dyn Any + Send + Sync> = Arc::downgrade(object) as Weak<dyn Any + Send + Sync>;
        let entry = Entry { object: weak, address };

        let key = match arena.free.pop() {
            Some(index) => {
                let slot = &mut arena.slots[index as usize];
                slot.entry = Some(entry);
                RegistryKey::new(index, slot.generation)
            }
            None => {
                let index = arena.slots.len() as u32;
                arena.slots.push(Slot { generation: 0, entry: Some(entry) });
                RegistryKey::new(index, 0)
            }
        };
        arena.by_address.insert(address, key);
        tracing::trace!(%key, "registered");
        key
    }

    /// Returns the object for `key` if it is still alive and of type `T`.
    pub fn resolve<T: Any + Send + Sync>(&self, key: RegistryKey) -> Option<Arc<T>> {
        let mut arena = self.arena();
        let upgraded = arena.entry(key)?.object.upgrade();
        match upgraded {
            Some(object) => object.downcast::<T>().ok(),
            None => {
                tracing::warn!(%key, "resolved a key whose object was dropped");
                arena.release(key);
                None
            }
        }
    }

    /// Evicts `key`. Returns whether it was registered.
    pub fn remove(&self, key: RegistryKey) -> bool {
        let mut arena = self.arena();
        let removed = arena.release(key);
        arena.sweep();
        removed
    }

    /// Evicts whatever key `object` was registered under.
    pub fn remove_object<T: Any + Send + Sync>(&self, object: &Arc<T>) -> bool {
        let address = Arc::as_ptr(object) as *const () as usize;
        let mut arena = self.arena();
        let removed = match arena.by_address.get(&address).copied() {
            Some(key) => arena.release(key),
            None => false,
        };
        arena.sweep();
        removed
    }

    /// Reclaims the slots of every dropped object. Returns how many.
    pub fn sweep(&self) -> usize {
        self.arena().sweep()
    }

    /// Number of occupied slots, dead entries included until swept.
    pub fn len(&self) -> usize {
        self.arena().slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
