//! # Connections
//!
//! A connection binds one transport to one protocol on one side of the wire.
//! Objects created on it are owned by it and are destroyed when it closes.
//!
//! ## Architecture
//!
//! - **Outgoing**: [`Connection::post`] encodes against the message table of
//!   the outgoing direction and hands the slots to the transport.
//! - **Incoming**: [`Connection::poll`] waits on the transport, maps the
//!   target id and every object id in the slots to local handles, then
//!   dispatches through the runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use wlwire::Argument;
use wlwire::ArgumentBuffer;
use wlwire::AsObjectRef;
use wlwire::Direction;
use wlwire::InterfaceRef;
use wlwire::NativeHandle;
use wlwire::ObjectRef;
use wlwire::Protocol;
use wlwire::WireArg;
use wlwire::codec;

use crate::dispatch;
use crate::dispatch::Dispatched;
use crate::dispatch::Implementation;
use crate::error::Error;
use crate::error::Result;
use crate::object::ConnectionId;
use crate::object::WireObject;
use crate::registry::RegistryKey;
use crate::runtime::Runtime;
use crate::signal::ListenerHandle;
use crate::signal::Signal;
use crate::transport::Transport;

/// Protocol id of the display singleton every connection starts with.
pub const DISPLAY_ID: u32 = 1;

/// Opcode of the display's `error` event.
pub const DISPLAY_ERROR_OPCODE: u16 = 0;

/// Which end of the wire a connection is.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// Sends requests and receives events.
    Client,
    /// Receives requests and sends events.
    Server,
}

impl Side {
    pub fn incoming(self) -> Direction {
        match self {
            Self::Client => Direction::Event,
            Self::Server => Direction::Request,
        }
    }

    pub fn outgoing(self) -> Direction {
        self.incoming().reverse()
    }
}

pub struct Connection {
    id: ConnectionId,
    side: Side,
    runtime: Arc<Runtime>,
    protocol: Arc<Protocol>,
    transport: Arc<dyn Transport>,
    closed: Signal,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    /// Resolves an interface of this connection's protocol by name.
    pub fn interface(&self, name: &str) -> Result<InterfaceRef> {
        Ok(self.protocol.interface(name)?)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.is_fired() {
            return Err(Error::AlreadyDestroyed(self.id.to_string()));
        }
        Ok(())
    }

    fn create(
        &self,
        interface: &InterfaceRef,
        id: u32,
        version: u32,
        implementation: Option<Arc<dyn crate::dispatch::Bound>>,
    ) -> Result<WireObject> {
        self.ensure_open()?;
        let version = if version > interface.version {
            tracing::warn!(
                interface = %interface,
                requested = version,
                supported = interface.version,
                "clamping object version"
            );
            interface.version
        } else {
            version
        };
        let handle = self.runtime.allocate_handle();
        self.runtime.create_object(self.id, interface.clone(), id, version, handle, implementation)
    }

    /// Creates a local object that receives messages through `implementation`.
    pub fn create_object<I: Implementation>(
        &self,
        interface: &InterfaceRef,
        id: u32,
        version: u32,
        implementation: I,
    ) -> Result<WireObject> {
        self.create(interface, id, version, Some(Arc::new(implementation)))
    }

    /// Creates a local object with no implementation yet. Incoming messages
    /// for it are not dispatched until one is attached.
    pub fn create_proxy(&self, interface: &InterfaceRef, id: u32, version: u32) -> Result<WireObject> {
        self.create(interface, id, version, None)
    }

    /// The live object mapped to `handle`.
    pub fn object(&self, handle: NativeHandle) -> Option<WireObject> {
        self.runtime.object(handle).filter(|object| object.owner() == self.id)
    }

    /// The live object carrying protocol id `id` on this connection.
    pub fn object_by_id(&self, id: u32) -> Option<WireObject> {
        let handle = self.runtime.handle_for(self.id, id)?;
        self.runtime.object(handle)
    }

    /// Delivers an incoming message addressed by handle. Handles of objects
    /// owned by other connections are unknown here.
    pub fn dispatch(&self, handle: NativeHandle, opcode: u16, args: &ArgumentBuffer) -> Dispatched {
        dispatch::dispatch(&self.runtime, Some(self.id), self.side.incoming(), handle, opcode, args)
    }

    /// Sends message `opcode` of the outgoing direction from `object`.
    pub fn post(&self, object: &WireObject, opcode: u16, args: &[Argument<WireObject>]) -> Result<()> {
        self.ensure_open()?;
        if object.is_destroyed() {
            return Err(Error::AlreadyDestroyed(object.label()));
        }
        let direction = self.side.outgoing();
        let interface = object.interface();
        let message = interface.message(direction, opcode).ok_or_else(|| Error::UnknownOpcode {
            interface: interface.name.clone(),
            direction,
            opcode,
        })?;
        let slots = codec::encode(message, args)?;
        tracing::trace!(object = ?object, method = %message, "post");
        self.transport.send(object.id(), opcode, slots)?;
        Ok(())
    }

    /// Reports a protocol error against `object` through the display's
    /// `error(object, code, message)` event.
    pub fn post_error(&self, object: &WireObject, code: u32, message: &str) -> Result<()> {
        self.ensure_open()?;
        let mut slots = ArgumentBuffer::with_len(3);
        slots
            .encode(0, Some(object.object_ref()))?
            .encode(1, code)?
            .encode_str(2, Some(message))?;
        tracing::debug!(object = ?object, code, reason = message, "posting protocol error");
        self.transport.send(DISPLAY_ID, DISPLAY_ERROR_OPCODE, slots)?;
        Ok(())
    }

    /// Binds the global registered under `key` for this connection's peer,
    /// creating its resource at protocol id `id` with `version`.
    pub fn bind(&self, key: RegistryKey, version: u32, id: u32) -> Result<WireObject> {
        self.ensure_open()?;
        let global = self.runtime.global(key).ok_or(Error::UnknownGlobal(key))?;
        global.bind(self, version, id)
    }

    /// Destroys an object this side owns.
    pub fn destroy_object(&self, object: &WireObject) -> Result<()> {
        self.runtime.destroy_object(object)
    }

    /// Destroys the object after the peer announced its destruction.
    pub fn handle_peer_destroy(&self, handle: NativeHandle) -> Result<()> {
        let object = self.object(handle).ok_or(Error::UnknownObject(handle))?;
        tracing::debug!(object = ?object, "peer destroyed object");
        self.runtime.destroy_object(&object)
    }

    /// Receives at most one message and dispatches it.
    ///
    /// `Ok(None)` means the timeout elapsed. Transport failures propagate;
    /// dispatch failures are reported in the returned [`Dispatched`].
    pub fn poll(&self, timeout: Option<Duration>) -> Result<Option<Dispatched>> {
        self.ensure_open()?;
        let Some(message) = self.transport.receive_or_timeout(timeout)? else {
            return Ok(None);
        };
        let Some(handle) = self.runtime.handle_for(self.id, message.target) else {
            let error = Error::UnknownId(message.target);
            tracing::error!(connection = %self.id, opcode = message.opcode, %error, "dropping message");
            return Ok(Some(Dispatched::No(error)));
        };
        let args = self.localize(message.args);
        Ok(Some(self.dispatch(handle, message.opcode, &args)))
    }

    /// Polls until the transport has nothing left within `timeout`.
    /// Returns how many messages were dispatched successfully.
    pub fn poll_all(&self, timeout: Duration) -> Result<usize> {
        let mut handled = 0;
        while let Some(outcome) = self.poll(Some(timeout))? {
            if outcome.is_yes() {
                handled += 1;
            }
        }
        Ok(handled)
    }

    /// Rewrites peer object references to local handles. Ids this side has
    /// never seen get a fresh handle, and dispatch reconstructs them.
    /// An unseen id that appears in several slots gets one handle.
    fn localize(&self, args: ArgumentBuffer) -> ArgumentBuffer {
        let mut fresh: HashMap<u32, NativeHandle> = HashMap::new();
        let slots = args
            .into_slots()
            .into_iter()
            .map(|slot| match slot {
                WireArg::Object(Some(reference)) => {
                    let handle = match self.runtime.handle_for(self.id, reference.id) {
                        Some(handle) => handle,
                        None => *fresh.entry(reference.id).or_insert_with(|| self.runtime.allocate_handle()),
                    };
                    WireArg::Object(Some(ObjectRef { handle, id: reference.id }))
                }
                other => other,
            })
            .collect();
        ArgumentBuffer::from_slots(slots)
    }

    /// Advances and returns the runtime's event serial.
    pub fn next_serial(&self) -> u32 {
        self.runtime.next_serial()
    }

    pub fn serial(&self) -> u32 {
        self.runtime.serial()
    }

    /// Runs `callback` once when this connection closes.
    pub fn add_destroy_listener(&self, callback: impl FnOnce() + Send + 'static) -> ListenerHandle {
        self.closed.subscribe(callback)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_fired()
    }

    /// Destroys every object this connection owns, then fires its own
    /// destroy listeners.
    pub fn close(&self) -> Result<()> {
        self.ensure_open()?;
        let owned = self.runtime.objects_of(self.id);
        tracing::debug!(connection = %self.id, objects = owned.len(), "closing");
        for object in owned {
            match self.runtime.destroy_object(&object) {
                Ok(()) | Err(Error::AlreadyDestroyed(_)) => {}
                Err(e) => tracing::warn!(object = ?object, error = %e, "failed to destroy on close"),
            }
        }
        self.closed.emit(&self.id.to_string())?;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.closed.is_fired() {
            if let Err(e) = self.close() {
                tracing::warn!(connection = %self.id, error = %e, "close on drop failed");
            }
        }
    }
}

/// Fluent builder for a [`Connection`].
pub struct ConnectionBuilder {
    runtime: Arc<Runtime>,
    protocol: Arc<Protocol>,
    side: Side,
    transport: Option<Arc<dyn Transport>>,
}

impl ConnectionBuilder {
    pub fn new(runtime: Arc<Runtime>, protocol: Arc<Protocol>, side: Side) -> Self {
        Self { runtime, protocol, side, transport: None }
    }

    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn build(self) -> Result<Connection> {
        let transport = self
            .transport
            .ok_or_else(|| Error::Transport(crate::transport::TransportError::Io("no transport configured".into())))?;
        let id = self.runtime.allocate_connection_id();
        tracing::debug!(connection = %id, side = ?self.side, protocol = self.protocol.name(), "connection built");
        Ok(Connection {
            id,
            side: self.side,
            runtime: self.runtime,
            protocol: self.protocol,
            transport,
            closed: Signal::new(),
        })
    }
}
