//! # Error Definitions
//!
//! Every failure the runtime can report. Errors raised while dispatching an
//! incoming message never escape [`Runtime::dispatch`](crate::runtime::Runtime::dispatch);
//! they are logged and handed back inside [`Dispatched::No`](crate::dispatch::Dispatched::No).

use wlwire::Direction;
use wlwire::NativeHandle;

use crate::registry::RegistryKey;
use crate::transport::TransportError;

#[derive(Debug)]
pub enum Error {
    /// A handle was stored twice in the identity cache.
    DuplicateHandle(NativeHandle),
    /// A protocol id is already bound to a live object on this connection.
    DuplicateId(u32),
    /// No live object is mapped to this handle.
    UnknownObject(NativeHandle),
    /// No live object carries this protocol id on this connection.
    UnknownId(u32),
    /// The opcode is past the end of the interface's message list.
    UnknownOpcode { interface: String, direction: Direction, opcode: u16 },
    /// Arguments could not be decoded or encoded.
    Codec(wlwire::Error),
    /// The object's implementation has no handler bound for the message.
    HandlerResolution { handler: &'static str, interface: String, message: String },
    /// The handler returned an error or panicked.
    HandlerInvocation { handler: &'static str, message: String, cause: anyhow::Error },
    /// The object (or loop, or connection) was already destroyed.
    AlreadyDestroyed(String),
    /// No live global is registered under this key.
    UnknownGlobal(RegistryKey),
    /// A global was created or bound at a version it cannot serve.
    InvalidVersion { interface: String, version: u32, supported: u32 },
    /// The implementation slot of an object was already filled.
    ImplementationAlreadySet(NativeHandle),
    /// The connection's transport failed.
    Transport(TransportError),
    /// A reactor source could not be created or updated.
    Io(std::io::Error),
    /// The reactor's readiness wait itself failed.
    Wait(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateHandle(h) => write!(f, "Can not re-map existing handle {}", h),
            Self::DuplicateId(id) => write!(f, "Object id {} is already in use", id),
            Self::UnknownObject(h) => write!(f, "No object for handle {}", h),
            Self::UnknownId(id) => write!(f, "No object with id {}", id),
            Self::UnknownOpcode { interface, direction, opcode } => {
                write!(f, "{} has no {} with opcode {}", interface, direction, opcode)
            }
            Self::Codec(e) => write!(f, "Codec error: {}", e),
            Self::HandlerResolution { handler, interface, message } => {
                write!(f, "{} binds no handler for {}.{}", handler, interface, message)
            }
            Self::HandlerInvocation { handler, message, cause } => {
                write!(f, "{} failed handling {}: {:#}", handler, message, cause)
            }
            Self::AlreadyDestroyed(what) => write!(f, "{} was already destroyed", what),
            Self::UnknownGlobal(key) => write!(f, "No global registered under {}", key),
            Self::InvalidVersion { interface, version, supported } => {
                write!(f, "{} version {} is outside 1..={}", interface, version, supported)
            }
            Self::ImplementationAlreadySet(h) => write!(f, "Object {} already has an implementation", h),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Wait(e) => write!(f, "Event loop wait failed: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::Io(e) | Self::Wait(e) => Some(e),
            Self::HandlerInvocation { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<wlwire::Error> for Error {
    fn from(e: wlwire::Error) -> Self {
        Self::Codec(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
