//! # Transport Abstraction
//!
//! A minimal interface for moving encoded messages between a connection and
//! its native peer.
//!
//! ## Philosophy
//!
//! - **Slot-Oriented**: The transport moves already-encoded [`ArgumentBuffer`]s.
//!   It never interprets signatures or resolves objects.
//! - **Id-Addressed**: Messages name their target by protocol id. Mapping ids
//!   to local handles is the connection's job.
//! - **Blocking Receive**: The single wait point is `receive_or_timeout`; the
//!   reactor or caller decides how long to block.

use std::fmt;
use std::time::Duration;

use wlwire::ArgumentBuffer;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer is gone or the channel was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

/// One message as the transport carries it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    /// Protocol id of the receiving object.
    pub target: u32,
    pub opcode: u16,
    pub args: ArgumentBuffer,
}

/// Moves messages to and from a native peer.
///
/// Object-safe, so connections hold an `Arc<dyn Transport>`.
pub trait Transport: Send + Sync + 'static {
    /// Queues a message for the object with protocol id `target`.
    fn send(&self, target: u32, opcode: u16, args: ArgumentBuffer) -> Result<()>;

    /// Waits for the next message. `None` as timeout waits forever; `Ok(None)`
    /// means the timeout elapsed with nothing to read.
    fn receive_or_timeout(&self, timeout: Option<Duration>) -> Result<Option<RawMessage>>;
}
