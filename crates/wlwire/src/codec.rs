//! # Codec
//!
//! The translation layer between [`ArgumentBuffer`] slots and decoded
//! [`Argument`]s, driven entirely by a message's runtime [`Signature`].
//!
//! ## Invariants
//! - **Positional**: slot `i` is checked against signature argument `i`.
//!   Decoding walks the signature: a missing slot is
//!   `ArgumentCountMismatch`, surplus slots are ignored.
//! - **Nullability**: a null in a slot whose signature character lacks `?` is
//!   `MissingRequiredArgument`, naming the message and the 0-based index.
//! - **Version digit**: skipped by the parser, never checked here.
//!
//! [`Signature`]: crate::signature::Signature

use std::ffi::CString;

use crate::argument::Argument;
use crate::error::Error;
use crate::error::Result;
use crate::fixed::Fixed;
use crate::protocol::InterfaceId;
use crate::protocol::MessageDescriptor;
use crate::wire::ArgumentBuffer;
use crate::wire::ObjectRef;
use crate::wire::WireArg;

/// Turns object slots into live objects.
pub trait ObjectResolver {
    type Object;
    type Error: std::fmt::Display;

    /// Resolves a non-null reference found at argument `index`. `interface` is
    /// the one declared for that argument, if any.
    fn resolve(
        &self,
        reference: ObjectRef,
        interface: Option<InterfaceId>,
        index: usize,
    ) -> std::result::Result<Self::Object, Self::Error>;
}

/// Implemented by anything that can be put in an `o` slot.
pub trait AsObjectRef {
    fn object_ref(&self) -> ObjectRef;
}

impl AsObjectRef for ObjectRef {
    fn object_ref(&self) -> ObjectRef {
        *self
    }
}

/// Decodes the slots of `args` that `message`'s signature describes.
pub fn decode<R: ObjectResolver>(
    args: &ArgumentBuffer,
    message: &MessageDescriptor,
    resolver: &R,
) -> Result<Vec<Argument<R::Object>>> {
    let mut out = Vec::with_capacity(args.len());
    decode_into(args, message, resolver, &mut out)?;
    Ok(out)
}

/// Decodes into `out`, leaving whatever was decoded before a failure in place
/// so the caller can report it.
pub fn decode_into<R: ObjectResolver>(
    args: &ArgumentBuffer,
    message: &MessageDescriptor,
    resolver: &R,
    out: &mut Vec<Argument<R::Object>>,
) -> Result<()> {
    let specs = message.signature.args();

    // Only the signature is walked; slots past its end are never read.
    for (index, spec) in specs.iter().enumerate() {
        let Some(slot) = args.get(index) else {
            return Err(Error::ArgumentCountMismatch {
                message: message.name.clone(),
                expected: specs.len(),
                found: args.len(),
            });
        };
        if spec.kind != slot.kind() {
            return Err(Error::TypeMismatch {
                message: message.name.clone(),
                index,
                expected: spec.kind,
                found: slot.kind(),
            });
        }
        if slot.is_null() && !spec.nullable {
            return Err(Error::MissingRequiredArgument { message: message.name.clone(), index });
        }

        let arg = match slot {
            WireArg::Int(v) => Argument::Int(*v),
            WireArg::Uint(v) => Argument::Uint(*v),
            WireArg::Fixed(raw) => Argument::Fixed(Fixed::from_raw(*raw)),
            WireArg::NewId(id) => Argument::NewId(*id),
            WireArg::Fd(fd) => Argument::Fd(*fd),
            WireArg::Array(bytes) => Argument::Array(bytes.clone()),
            WireArg::Str(None) => Argument::Str(None),
            WireArg::Str(Some(s)) => {
                let s = s
                    .to_str()
                    .map_err(|_| Error::InvalidUtf8 { message: message.name.clone(), index })?;
                Argument::Str(Some(s.to_string()))
            }
            WireArg::Object(None) => Argument::Object(None),
            WireArg::Object(Some(reference)) => {
                let interface = message.arg_interfaces.get(index).copied().flatten();
                let object = resolver.resolve(*reference, interface, index).map_err(|e| {
                    Error::UnresolvedObject {
                        message: message.name.clone(),
                        index,
                        reason: e.to_string(),
                    }
                })?;
                Argument::Object(Some(object))
            }
        };
        out.push(arg);
    }

    if args.len() > specs.len() {
        tracing::trace!(method = %message.name, surplus = args.len() - specs.len(), "ignoring surplus slots");
    }
    Ok(())
}

/// Encodes `args` for `message`, checking each value against the signature.
pub fn encode<O: AsObjectRef>(message: &MessageDescriptor, args: &[Argument<O>]) -> Result<ArgumentBuffer> {
    let specs = message.signature.args();
    if specs.len() != args.len() {
        return Err(Error::ArgumentCountMismatch {
            message: message.name.clone(),
            expected: specs.len(),
            found: args.len(),
        });
    }

    let mut buf = ArgumentBuffer::with_len(args.len());
    for (index, (spec, arg)) in specs.iter().zip(args).enumerate() {
        if spec.kind != arg.kind() {
            return Err(Error::TypeMismatch {
                message: message.name.clone(),
                index,
                expected: spec.kind,
                found: arg.kind(),
            });
        }
        if arg.is_null() && !spec.nullable {
            return Err(Error::MissingRequiredArgument { message: message.name.clone(), index });
        }

        let slot = match arg {
            Argument::Int(v) => WireArg::Int(*v),
            Argument::Uint(v) => WireArg::Uint(*v),
            Argument::Fixed(v) => WireArg::Fixed(v.raw()),
            Argument::Object(o) => WireArg::Object(o.as_ref().map(AsObjectRef::object_ref)),
            Argument::NewId(id) => WireArg::NewId(*id),
            Argument::Str(s) => WireArg::Str(
                s.as_deref()
                    .map(|s| CString::new(s).map_err(|_| Error::InvalidString(s.to_string())))
                    .transpose()?,
            ),
            Argument::Array(a) => WireArg::Array(a.clone()),
            Argument::Fd(fd) => WireArg::Fd(*fd),
        };
        buf.encode(index, slot)?;
    }
    Ok(buf)
}

/// Kinds of each slot, for log lines.
pub fn describe_slots(args: &ArgumentBuffer) -> String {
    args.slots().iter().map(|slot| slot.kind().as_char()).collect()
}

/// Leaves object references as they came off the wire.
pub struct Unresolved;

impl ObjectResolver for Unresolved {
    type Object = ObjectRef;
    type Error = std::convert::Infallible;

    fn resolve(
        &self,
        reference: ObjectRef,
        _interface: Option<InterfaceId>,
        _index: usize,
    ) -> std::result::Result<ObjectRef, Self::Error> {
        Ok(reference)
    }
}
