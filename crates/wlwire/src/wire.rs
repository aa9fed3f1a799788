//! # Wire Slots
//!
//! The fixed-slot argument array exchanged with the transport: one tagged slot
//! per declared argument, pre-allocated to the message's argument count.
//!
//! Strings and arrays are copied into storage owned by the buffer, so whatever
//! the transport reads out of a slot stays valid for as long as the buffer does.

use std::ffi::CStr;
use std::ffi::CString;
use std::os::fd::RawFd;

use crate::error::Error;
use crate::error::Result;
use crate::fixed::Fixed;
use crate::protocol::MessageDescriptor;
use crate::signature::ArgKind;

/// Opaque identity of an object on the native side.
///
/// Equality and hashing use only the wrapped value; it is never dereferenced.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

impl NativeHandle {
    pub const NULL: NativeHandle = NativeHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// What the native side knows about a referenced object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub handle: NativeHandle,
    /// Protocol-scoped object id.
    pub id: u32,
}

/// One argument slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireArg {
    Int(i32),
    Uint(u32),
    Fixed(i32),
    Object(Option<ObjectRef>),
    NewId(u32),
    Str(Option<CString>),
    Array(Option<Vec<u8>>),
    Fd(RawFd),
}

impl WireArg {
    pub fn kind(&self) -> ArgKind {
        match self {
            Self::Int(_) => ArgKind::Int,
            Self::Uint(_) => ArgKind::Uint,
            Self::Fixed(_) => ArgKind::Fixed,
            Self::Object(_) => ArgKind::Object,
            Self::NewId(_) => ArgKind::NewId,
            Self::Str(_) => ArgKind::Str,
            Self::Array(_) => ArgKind::Array,
            Self::Fd(_) => ArgKind::Fd,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Object(None) | Self::Str(None) | Self::Array(None))
    }

    /// The string payload as raw C bytes, if this is a non-null string slot.
    pub fn as_c_str(&self) -> Option<&CStr> {
        match self {
            Self::Str(Some(s)) => Some(s.as_c_str()),
            _ => None,
        }
    }
}

impl From<i32> for WireArg {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for WireArg {
    fn from(v: u32) -> Self {
        Self::Uint(v)
    }
}

impl From<Fixed> for WireArg {
    fn from(v: Fixed) -> Self {
        Self::Fixed(v.raw())
    }
}

impl From<ObjectRef> for WireArg {
    fn from(v: ObjectRef) -> Self {
        Self::Object(Some(v))
    }
}

impl From<Option<ObjectRef>> for WireArg {
    fn from(v: Option<ObjectRef>) -> Self {
        Self::Object(v)
    }
}

impl From<Vec<u8>> for WireArg {
    fn from(v: Vec<u8>) -> Self {
        Self::Array(Some(v))
    }
}

impl From<&[u8]> for WireArg {
    fn from(v: &[u8]) -> Self {
        Self::Array(Some(v.to_vec()))
    }
}

/// A pre-sized argument array.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArgumentBuffer {
    slots: Vec<WireArg>,
}

impl ArgumentBuffer {
    /// Allocates `len` zeroed integer slots.
    pub fn with_len(len: usize) -> Self {
        Self { slots: vec![WireArg::Int(0); len] }
    }

    /// Allocates one slot per argument of `message`.
    pub fn for_message(message: &MessageDescriptor) -> Self {
        Self::with_len(message.signature.len())
    }

    /// Wraps slots received from a transport.
    pub fn from_slots(slots: Vec<WireArg>) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[WireArg] {
        &self.slots
    }

    pub fn into_slots(self) -> Vec<WireArg> {
        self.slots
    }

    pub fn get(&self, index: usize) -> Option<&WireArg> {
        self.slots.get(index)
    }

    /// Writes a value into slot `index`.
    pub fn encode(&mut self, index: usize, value: impl Into<WireArg>) -> Result<&mut Self> {
        let len = self.slots.len();
        let slot = self.slots.get_mut(index).ok_or(Error::SlotOutOfRange { index, len })?;
        *slot = value.into();
        Ok(self)
    }

    /// Writes a string into slot `index`, copying it into buffer-owned storage.
    pub fn encode_str(&mut self, index: usize, value: Option<&str>) -> Result<&mut Self> {
        let owned = value
            .map(|s| CString::new(s).map_err(|_| Error::InvalidString(s.to_string())))
            .transpose()?;
        self.encode(index, WireArg::Str(owned))
    }

    pub fn encode_new_id(&mut self, index: usize, id: u32) -> Result<&mut Self> {
        self.encode(index, WireArg::NewId(id))
    }

    pub fn encode_fd(&mut self, index: usize, fd: RawFd) -> Result<&mut Self> {
        self.encode(index, WireArg::Fd(fd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_fills_slots() {
        let mut buf = ArgumentBuffer::with_len(4);
        buf.encode(0, 7u32)
            .unwrap()
            .encode(1, Fixed::from_f64(3.5))
            .unwrap()
            .encode_str(2, Some("hello"))
            .unwrap()
            .encode(3, vec![1u8, 2, 3])
            .unwrap();

        assert_eq!(buf.get(0), Some(&WireArg::Uint(7)));
        assert_eq!(buf.get(1), Some(&WireArg::Fixed(896)));
        assert_eq!(buf.get(2).and_then(WireArg::as_c_str).unwrap().to_str().unwrap(), "hello");
        assert_eq!(buf.get(3), Some(&WireArg::Array(Some(vec![1, 2, 3]))));
    }

    #[test]
    fn test_encode_out_of_range() {
        let mut buf = ArgumentBuffer::with_len(1);
        assert_eq!(buf.encode(1, 0i32).unwrap_err(), Error::SlotOutOfRange { index: 1, len: 1 });
    }

    #[test]
    fn test_encode_rejects_interior_nul() {
        let mut buf = ArgumentBuffer::with_len(1);
        assert!(matches!(buf.encode_str(0, Some("a\0b")), Err(Error::InvalidString(_))));
        buf.encode_str(0, None).unwrap();
        assert!(buf.get(0).unwrap().is_null());
    }
}
