//! # Wire Objects
//!
//! The runtime half of a protocol object. The other half is the opaque
//! [`NativeHandle`] the native peer knows it by.
//!
//! A `WireObject` is a cheap, clonable reference; clones are the same logical
//! object (see [`WireObject::ptr_eq`]). It lives in its connection's identity
//! cache until it is destroyed, after which it can still be inspected but no
//! longer receives or sends messages.

use std::sync::Arc;
use std::sync::OnceLock;

use wlwire::AsObjectRef;
use wlwire::InterfaceRef;
use wlwire::NativeHandle;
use wlwire::ObjectRef;

use crate::dispatch::Bound;
use crate::dispatch::Implementation;
use crate::error::Error;
use crate::error::Result;
use crate::registry::RegistryKey;
use crate::signal::ListenerHandle;
use crate::signal::Signal;

/// Strong type for connection identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connection-{}", self.0)
    }
}

pub(crate) struct ObjectState {
    pub(crate) id: u32,
    pub(crate) handle: NativeHandle,
    pub(crate) interface: InterfaceRef,
    pub(crate) version: u32,
    pub(crate) owner: ConnectionId,
    pub(crate) implementation: OnceLock<Arc<dyn Bound>>,
    pub(crate) destroyed: Signal,
}

impl ObjectState {
    pub(crate) fn new(
        id: u32,
        handle: NativeHandle,
        interface: InterfaceRef,
        version: u32,
        owner: ConnectionId,
        implementation: Option<Arc<dyn Bound>>,
    ) -> Self {
        Self {
            id,
            handle,
            interface,
            version,
            owner,
            implementation: implementation.map(OnceLock::from).unwrap_or_default(),
            destroyed: Signal::new(),
        }
    }
}

#[derive(Clone)]
pub struct WireObject {
    pub(crate) state: Arc<ObjectState>,
    key: RegistryKey,
}

impl WireObject {
    pub(crate) fn new(state: Arc<ObjectState>, key: RegistryKey) -> Self {
        Self { state, key }
    }

    /// Protocol id, unique among the live objects of one connection.
    pub fn id(&self) -> u32 {
        self.state.id
    }

    pub fn handle(&self) -> NativeHandle {
        self.state.handle
    }

    pub fn interface(&self) -> &InterfaceRef {
        &self.state.interface
    }

    pub fn version(&self) -> u32 {
        self.state.version
    }

    pub fn owner(&self) -> ConnectionId {
        self.state.owner
    }

    /// Key of this object in the runtime's handle registry.
    pub fn registry_key(&self) -> RegistryKey {
        self.key
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.destroyed.is_fired()
    }

    /// Whether the two references are the same logical object.
    pub fn ptr_eq(&self, other: &WireObject) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Borrows the implementation if it is an `I`.
    pub fn implementation<I: Implementation>(&self) -> Option<&I> {
        self.state.implementation.get()?.any().downcast_ref::<I>()
    }

    pub fn has_implementation(&self) -> bool {
        self.state.implementation.get().is_some()
    }

    /// Attaches an implementation to an object that was created without one,
    /// such as one reconstructed from an incoming argument.
    pub fn set_implementation<I: Implementation>(&self, implementation: I) -> Result<()> {
        self.state
            .implementation
            .set(Arc::new(implementation))
            .map_err(|_| Error::ImplementationAlreadySet(self.handle()))
    }

    pub(crate) fn bound(&self) -> Option<&Arc<dyn Bound>> {
        self.state.implementation.get()
    }

    /// Runs `callback` once when this object is destroyed.
    pub fn add_destroy_listener(&self, callback: impl FnOnce() + Send + 'static) -> ListenerHandle {
        self.state.destroyed.subscribe(callback)
    }

    pub(crate) fn signal(&self) -> &Signal {
        &self.state.destroyed
    }

    pub(crate) fn label(&self) -> String {
        format!("{}@{}", self.state.interface.name, self.state.id)
    }
}

impl AsObjectRef for WireObject {
    fn object_ref(&self) -> ObjectRef {
        ObjectRef { handle: self.state.handle, id: self.state.id }
    }
}

impl PartialEq for WireObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for WireObject {}

impl std::fmt::Debug for WireObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.state.interface.name, self.state.id)
    }
}

impl std::fmt::Display for WireObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{} ({})", self.state.interface.name, self.state.id, self.state.handle)
    }
}

