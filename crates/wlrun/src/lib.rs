//! # wlrun
//!
//! Object runtime for wayland-style wire protocols: the identity of objects
//! across the native boundary, dispatch of incoming messages to typed
//! handlers, destroy notification, and a single-threaded reactor.
//!
//! ## Architecture
//!
//! - **Identity** ([`cache`], [`registry`]): handles map to exactly one
//!   [`WireObject`]; registry keys carry objects through integer-only
//!   contexts without keeping them alive.
//! - **Dispatch** ([`dispatch`]): opcode to handler, decoded through
//!   [`wlwire::codec`], with every fault contained and logged.
//! - **Connections** ([`connection`], [`transport`]): one transport, one
//!   protocol, one side; owns the objects created on it.
//! - **Globals** ([`global`]): interfaces clients bind by registry key.
//! - **Reactor** ([`event_loop`]): epoll-backed fd, timer, signal and idle
//!   sources.

pub mod cache;
pub mod channel;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod event_loop;
pub mod global;
pub mod object;
pub mod registry;
pub mod runtime;
pub mod signal;
pub mod transport;


pub use cache::IdentityCache;
pub use channel::ChannelTransport;
pub use connection::Connection;
pub use connection::ConnectionBuilder;
pub use connection::Side;
pub use dispatch::Dispatched;
pub use dispatch::Handlers;
pub use dispatch::Implementation;
pub use error::Error;
pub use error::Result;
pub use event_loop::EventLoop;
pub use event_loop::EventLoopConfig;
pub use event_loop::EventSource;
pub use event_loop::Interest;
pub use event_loop::PostAction;
pub use global::Global;
pub use object::ConnectionId;
pub use object::WireObject;
pub use registry::HandleRegistry;
pub use registry::RegistryKey;
pub use runtime::Runtime;
pub use signal::ListenerHandle;
pub use signal::Signal;
pub use transport::RawMessage;
pub use transport::Transport;
pub use transport::TransportError;
