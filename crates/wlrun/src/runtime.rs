//! # Runtime Registry
//!
//! Process-wide state shared by every connection: the identity cache of live
//! wire objects, the per-connection id index, the handle registry, the live
//! globals and the dispatch-table cache.
//!
//! Uses DashMap for concurrent access without global locking, since several
//! loops on several threads may host connections of the same runtime.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use wlwire::ArgumentBuffer;
use wlwire::Direction;
use wlwire::InterfaceRef;
use wlwire::NativeHandle;
use wlwire::ObjectRef;

use crate::cache::IdentityCache;
use crate::dispatch;
use crate::dispatch::Bound;
use crate::dispatch::Dispatched;
use crate::dispatch::HandlerTables;
use crate::error::Error;
use crate::error::Result;
use crate::global::GlobalState;
use crate::object::ConnectionId;
use crate::object::ObjectState;
use crate::object::WireObject;
use crate::registry::HandleRegistry;
use crate::registry::RegistryKey;

pub struct Runtime {
    pub(crate) objects: IdentityCache<WireObject>,
    pub(crate) ids: DashMap<(ConnectionId, u32), NativeHandle>,
    pub(crate) registry: HandleRegistry,
    pub(crate) tables: HandlerTables,
    pub(crate) globals: DashMap<RegistryKey, Arc<GlobalState>>,
    next_handle: AtomicU64,
    next_connection_id: AtomicU64,
    serial: AtomicU32,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            objects: IdentityCache::new(),
            ids: DashMap::new(),
            registry: HandleRegistry::new(),
            tables: HandlerTables::default(),
            globals: DashMap::new(),
            next_handle: AtomicU64::new(1),
            next_connection_id: AtomicU64::new(1),
            serial: AtomicU32::new(0),
        }
    }

    /// Allocates a handle no live object uses. Never returns the null handle.
    pub fn allocate_handle(&self) -> NativeHandle {
        NativeHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn allocate_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Constructs a local object and maps it in the identity cache.
    pub(crate) fn create_object(
        &self,
        owner: ConnectionId,
        interface: InterfaceRef,
        id: u32,
        version: u32,
        handle: NativeHandle,
        implementation: Option<Arc<dyn Bound>>,
    ) -> Result<WireObject> {
        let slot = match self.ids.entry((owner, id)) {
            Entry::Occupied(_) => return Err(Error::DuplicateId(id)),
            Entry::Vacant(slot) => slot,
        };
        let state = Arc::new(ObjectState::new(id, handle, interface, version, owner, implementation));
        let key = self.registry.register(&state);
        let object = WireObject::new(state, key);
        if let Err(e) = self.objects.store(handle, object.clone()) {
            self.registry.remove(key);
            return Err(e);
        }
        slot.insert(handle);
        tracing::debug!(object = ?object, %handle, %owner, version, "created");
        Ok(object)
    }

    /// Creates the object for a handle the peer introduced as an argument.
    ///
    /// The object gets no implementation and the receiver's version, capped
    /// at what its interface supports.
    pub(crate) fn reconstruct(
        &self,
        reference: ObjectRef,
        interface: InterfaceRef,
        receiver: &WireObject,
    ) -> Result<WireObject> {
        let version = receiver.version().min(interface.version);
        match self.create_object(receiver.owner(), interface, reference.id, version, reference.handle, None) {
            Ok(object) => {
                tracing::debug!(object = ?object, via = ?receiver, "reconstructed unseen object");
                Ok(object)
            }
            // Lost a race with another thread creating the same handle.
            Err(Error::DuplicateHandle(handle)) => self.object(handle).ok_or(Error::UnknownObject(handle)),
            Err(e) => Err(e),
        }
    }

    /// The live object for `handle`, if any.
    pub fn object(&self, handle: NativeHandle) -> Option<WireObject> {
        self.objects.from(handle)
    }

    pub(crate) fn handle_for(&self, owner: ConnectionId, id: u32) -> Option<NativeHandle> {
        self.ids.get(&(owner, id)).map(|entry| *entry.value())
    }

    /// Looks an object up by the key carried in a native context.
    pub fn object_by_key(&self, key: RegistryKey) -> Option<WireObject> {
        self.registry.resolve::<ObjectState>(key).map(|state| WireObject::new(state, key))
    }

    /// Reifies a global's bind context.
    pub(crate) fn global(&self, key: RegistryKey) -> Option<Arc<GlobalState>> {
        self.registry.resolve::<GlobalState>(key)
    }

    /// Number of globals not yet destroyed.
    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    /// Delivers an incoming message to the object mapped to `handle`.
    ///
    /// Never fails outward; see [`Dispatched`].
    pub fn dispatch(
        &self,
        direction: Direction,
        handle: NativeHandle,
        opcode: u16,
        args: &ArgumentBuffer,
    ) -> Dispatched {
        dispatch::dispatch(self, None, direction, handle, opcode, args)
    }

    /// Fires the object's destroy listeners, then unmaps it everywhere.
    pub fn destroy_object(&self, object: &WireObject) -> Result<()> {
        object.signal().emit(&object.label())?;

        let handle = object.handle();
        if self.objects.from(handle).is_some_and(|mapped| mapped.ptr_eq(object)) {
            self.objects.remove(handle);
        }
        self.ids.remove_if(&(object.owner(), object.id()), |_, mapped| *mapped == handle);
        self.registry.remove(object.registry_key());
        tracing::debug!(object = ?object, %handle, "destroyed");
        Ok(())
    }

    /// Snapshot of the live objects owned by `owner`.
    pub fn objects_of(&self, owner: ConnectionId) -> Vec<WireObject> {
        self.objects.collect(|object| object.owner() == owner)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Number of implementation types whose dispatch table has been built.
    pub fn dispatch_table_count(&self) -> usize {
        self.tables.len()
    }

    /// Advances and returns the event serial.
    pub fn next_serial(&self) -> u32 {
        self.serial.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// The most recently issued serial.
    pub fn serial(&self) -> u32 {
        self.serial.load(Ordering::Relaxed)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
