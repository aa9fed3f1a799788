//! # Dispatcher
//!
//! Routes an incoming `(handle, opcode, slots)` triple to the handler the
//! target object's implementation bound for that opcode.
//!
//! ## Architecture
//!
//! An implementation type declares its handlers once, as a table indexed by
//! opcode ([`Implementation::handlers`]). The runtime builds each type's table
//! on first use and keeps it for its own lifetime, so resolving a handler is a
//! `TypeId` lookup plus an index.
//!
//! ## Fault Policy
//!
//! Nothing escapes [`dispatch`]. Unknown objects, bad opcodes, missing
//! handlers, undecodable arguments, handler errors and handler panics are all
//! logged with whatever context was gathered and reported as
//! [`Dispatched::No`].

use std::any::Any;
use std::any::TypeId;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;

use dashmap::DashMap;
use wlwire::Argument;
use wlwire::ArgumentBuffer;
use wlwire::Direction;
use wlwire::InterfaceId;
use wlwire::NativeHandle;
use wlwire::ObjectRef;
use wlwire::ObjectResolver;
use wlwire::codec;

use crate::error::Error;
use crate::error::Result;
use crate::object::ConnectionId;
use crate::object::WireObject;
use crate::runtime::Runtime;
use crate::signal::panic_message;

/// Signature every handler has. The receiver comes first.
pub type HandlerFn<I> = dyn Fn(&I, &WireObject, &[Argument<WireObject>]) -> anyhow::Result<()> + Send + Sync;

/// Opcode-indexed handler table of one implementation type.
pub struct Handlers<I> {
    table: Vec<Option<Box<HandlerFn<I>>>>,
}

impl<I> Handlers<I> {
    pub fn new() -> Self {
        Self { table: Vec::new() }
    }

    /// Binds `handler` to `opcode`, replacing any earlier binding.
    pub fn on<F>(mut self, opcode: u16, handler: F) -> Self
    where
        F: Fn(&I, &WireObject, &[Argument<WireObject>]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let index = opcode as usize;
        if self.table.len() <= index {
            self.table.resize_with(index + 1, || None);
        }
        self.table[index] = Some(Box::new(handler));
        self
    }

    pub fn get(&self, opcode: u16) -> Option<&HandlerFn<I>> {
        self.table.get(opcode as usize)?.as_deref()
    }

    /// Number of opcodes with a handler.
    pub fn bound(&self) -> usize {
        self.table.iter().filter(|h| h.is_some()).count()
    }
}

impl<I> Default for Handlers<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// User code behind a wire object.
///
/// ```ignore
/// struct Surface { commits: AtomicUsize }
///
/// impl Implementation for Surface {
///     fn handlers() -> Handlers<Self> {
///         Handlers::<Self>::new().on(0, |surface, _object, _args| {
///             surface.commits.fetch_add(1, Ordering::Relaxed);
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Implementation: Send + Sync + Sized + 'static {
    fn handlers() -> Handlers<Self>;
}

/// Type-erased view of an [`Implementation`], stored on each object.
pub(crate) trait Bound: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn any(&self) -> &dyn Any;
    fn has_handler(&self, tables: &HandlerTables, opcode: u16) -> bool;
    fn invoke(
        &self,
        tables: &HandlerTables,
        object: &WireObject,
        opcode: u16,
        args: &[Argument<WireObject>],
    ) -> anyhow::Result<()>;
}

impl<I: Implementation> Bound for I {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<I>()
    }

    fn any(&self) -> &dyn Any {
        self
    }

    fn has_handler(&self, tables: &HandlerTables, opcode: u16) -> bool {
        tables.get::<I>().get(opcode).is_some()
    }

    fn invoke(
        &self,
        tables: &HandlerTables,
        object: &WireObject,
        opcode: u16,
        args: &[Argument<WireObject>],
    ) -> anyhow::Result<()> {
        let table = tables.get::<I>();
        match table.get(opcode) {
            Some(handler) => handler(self, object, args),
            None => Err(anyhow::anyhow!("no handler bound for opcode {}", opcode)),
        }
    }
}

/// Per-type handler tables, built lazily and kept for the runtime's lifetime.
#[derive(Default)]
pub(crate) struct HandlerTables {
    tables: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl HandlerTables {
    pub(crate) fn get<I: Implementation>(&self) -> Arc<Handlers<I>> {
        let id = TypeId::of::<I>();
        let cached = self.tables.get(&id).map(|entry| Arc::clone(entry.value()));
        let table = match cached {
            Some(table) => table,
            None => {
                // Built outside the map lock; the first insert wins.
                let built: Arc<dyn Any + Send + Sync> = Arc::new(I::handlers());
                tracing::debug!(implementation = std::any::type_name::<I>(), "built dispatch table");
                Arc::clone(self.tables.entry(id).or_insert(built).value())
            }
        };
        match table.downcast::<Handlers<I>>() {
            Ok(table) => table,
            Err(_) => Arc::new(I::handlers()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.tables.len()
    }
}

/// Outcome of one [`dispatch`].
#[must_use]
#[derive(Debug)]
pub enum Dispatched {
    Yes,
    No(Error),
}

impl Dispatched {
    pub fn is_yes(&self) -> bool {
        matches!(self, Self::Yes)
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Yes => None,
            Self::No(e) => Some(e),
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Yes => Ok(()),
            Self::No(e) => Err(e),
        }
    }
}

/// What was known about a message when it failed, for the log line.
#[derive(Default)]
struct Attempt {
    object: Option<WireObject>,
    message: Option<String>,
    handler: Option<&'static str>,
    args: Vec<Argument<WireObject>>,
}

/// Resolves object slots against the identity cache, creating objects the
/// peer introduced in this very message.
struct Reconstruct<'a> {
    runtime: &'a Runtime,
    receiver: &'a WireObject,
}

impl ObjectResolver for Reconstruct<'_> {
    type Object = WireObject;
    type Error = Error;

    fn resolve(&self, reference: ObjectRef, interface: Option<InterfaceId>, _index: usize) -> Result<WireObject> {
        if let Some(object) = self.runtime.object(reference.handle) {
            // Handles of another connection are not visible through this one.
            if object.owner() != self.receiver.owner() {
                return Err(Error::UnknownObject(reference.handle));
            }
            return Ok(object);
        }
        let interface = interface
            .and_then(|id| self.receiver.interface().protocol().interface_by_id(id))
            .ok_or(Error::UnknownObject(reference.handle))?;
        self.runtime.reconstruct(reference, interface, self.receiver)
    }
}

/// Delivers one incoming message. See the module docs for the fault policy.
///
/// With `owner` set, only objects owned by that connection are addressable.
pub(crate) fn dispatch(
    runtime: &Runtime,
    owner: Option<ConnectionId>,
    direction: Direction,
    handle: NativeHandle,
    opcode: u16,
    args: &ArgumentBuffer,
) -> Dispatched {
    let mut attempt = Attempt::default();
    match try_dispatch(runtime, owner, direction, handle, opcode, args, &mut attempt) {
        Ok(()) => Dispatched::Yes,
        Err(error) => {
            tracing::error!(
                object = %handle,
                receiver = ?attempt.object,
                opcode,
                %direction,
                method = attempt.message.as_deref().unwrap_or("<unresolved>"),
                handler = attempt.handler.unwrap_or("<unresolved>"),
                args = ?attempt.args,
                slots = %codec::describe_slots(args),
                %error,
                "dispatch failed"
            );
            Dispatched::No(error)
        }
    }
}

fn try_dispatch(
    runtime: &Runtime,
    owner: Option<ConnectionId>,
    direction: Direction,
    handle: NativeHandle,
    opcode: u16,
    args: &ArgumentBuffer,
    attempt: &mut Attempt,
) -> Result<()> {
    let object = runtime
        .object(handle)
        .filter(|object| owner.is_none_or(|owner| object.owner() == owner))
        .ok_or(Error::UnknownObject(handle))?;
    attempt.object = Some(object.clone());
    if object.is_destroyed() {
        return Err(Error::AlreadyDestroyed(object.label()));
    }

    let interface = object.interface();
    let message = interface.message(direction, opcode).ok_or_else(|| Error::UnknownOpcode {
        interface: interface.name.clone(),
        direction,
        opcode,
    })?;
    attempt.message = Some(message.name.clone());

    let bound = object.bound().cloned().ok_or_else(|| Error::HandlerResolution {
        handler: "<no implementation>",
        interface: interface.name.clone(),
        message: message.name.clone(),
    })?;
    let handler = bound.type_name();
    attempt.handler = Some(handler);
    if !bound.has_handler(&runtime.tables, opcode) {
        return Err(Error::HandlerResolution {
            handler,
            interface: interface.name.clone(),
            message: message.name.clone(),
        });
    }

    let resolver = Reconstruct { runtime, receiver: &object };
    codec::decode_into(args, message, &resolver, &mut attempt.args)?;

    tracing::trace!(receiver = ?object, method = %message, "dispatching");
    let decoded = &attempt.args;
    let outcome = catch_unwind(AssertUnwindSafe(|| bound.invoke(&runtime.tables, &object, opcode, decoded)));
    let cause = match outcome {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(cause)) => cause,
        Err(payload) => anyhow::anyhow!("handler panicked: {}", panic_message(payload.as_ref())),
    };
    Err(Error::HandlerInvocation { handler, message: message.name.clone(), cause })
}
