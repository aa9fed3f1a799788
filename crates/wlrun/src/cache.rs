//! # Identity Cache
//!
//! Maps opaque native handles to the runtime's object for that handle, so
//! repeated lookups of the same handle always yield the same logical object.
//!
//! Uses DashMap since one cache is shared by every connection (and thread)
//! hosted by a [`Runtime`](crate::runtime::Runtime).

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use wlwire::NativeHandle;

use crate::error::Error;
use crate::error::Result;

pub struct IdentityCache<T> {
    mapped: DashMap<NativeHandle, T>,
}

impl<T: Clone> IdentityCache<T> {
    pub fn new() -> Self {
        Self { mapped: DashMap::new() }
    }

    /// Maps `handle` to `object`.
    ///
    /// Fails with `DuplicateHandle` if the handle is already mapped; the
    /// existing mapping is left untouched.
    pub fn store(&self, handle: NativeHandle, object: T) -> Result<()> {
        if handle.is_null() {
            tracing::warn!(%handle, "storing the null handle in the identity cache");
        }
        match self.mapped.entry(handle) {
            Entry::Occupied(_) => Err(Error::DuplicateHandle(handle)),
            Entry::Vacant(slot) => {
                slot.insert(object);
                Ok(())
            }
        }
    }

    /// Returns what was stored for `handle`. Never constructs.
    pub fn from(&self, handle: NativeHandle) -> Option<T> {
        self.mapped.get(&handle).map(|entry| entry.value().clone())
    }

    /// Evicts the mapping, returning it if there was one.
    pub fn remove(&self, handle: NativeHandle) -> Option<T> {
        self.mapped.remove(&handle).map(|(_, object)| object)
    }

    pub fn contains(&self, handle: NativeHandle) -> bool {
        self.mapped.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.mapped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapped.is_empty()
    }

    /// Snapshot of every mapped object matching `keep`.
    pub fn collect(&self, mut keep: impl FnMut(&T) -> bool) -> Vec<T> {
        self.mapped
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl<T: Clone> Default for IdentityCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
