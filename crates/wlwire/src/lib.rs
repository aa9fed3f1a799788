//! # wlwire
//!
//! Descriptor tables and the signature-driven argument codec for
//! wayland-style wire objects.
//!
//! ## Architecture
//!
//! - **Tables** ([`protocol`]): immutable interface and message descriptors,
//!   built in two phases so interfaces can refer to themselves.
//! - **Signatures** ([`signature`]): the per-message type string that is the
//!   only description of a message's argument shapes.
//! - **Slots** ([`wire`]): the fixed-slot argument array the transport moves.
//! - **Codec** ([`codec`]): slots to [`Argument`]s and back, checked against a
//!   signature. Object slots are resolved through an [`ObjectResolver`] so this
//!   crate knows nothing about object lifetimes.

pub mod argument;
pub mod codec;
pub mod enums;
pub mod error;
pub mod fixed;
pub mod protocol;
pub mod signature;
pub mod wire;

#[cfg(test)]
mod tests;

pub use argument::Argument;
pub use codec::AsObjectRef;
pub use codec::ObjectResolver;
pub use codec::decode;
pub use codec::decode_into;
pub use codec::encode;
pub use enums::ProtocolEnum;
pub use enums::decode_bitfield;
pub use error::Error;
pub use error::Result;
pub use fixed::Fixed;
pub use protocol::Direction;
pub use protocol::InterfaceDescriptor;
pub use protocol::InterfaceId;
pub use protocol::InterfaceRef;
pub use protocol::MessageDescriptor;
pub use protocol::MessageSpec;
pub use protocol::Protocol;
pub use protocol::ProtocolBuilder;
pub use signature::ArgKind;
pub use signature::ArgSpec;
pub use signature::Signature;
pub use wire::ArgumentBuffer;
pub use wire::NativeHandle;
pub use wire::ObjectRef;
pub use wire::WireArg;
