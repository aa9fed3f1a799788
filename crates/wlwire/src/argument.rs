//! Decoded arguments, as handed to handlers.

use std::os::fd::RawFd;

use crate::fixed::Fixed;
use crate::signature::ArgKind;

/// A decoded argument. `O` is whatever the resolver turns object slots into.
#[derive(Clone, Debug, PartialEq)]
pub enum Argument<O> {
    Int(i32),
    Uint(u32),
    Fixed(Fixed),
    Object(Option<O>),
    NewId(u32),
    Str(Option<String>),
    Array(Option<Vec<u8>>),
    Fd(RawFd),
}

impl<O> Argument<O> {
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

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u32> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_fixed(&self) -> Option<Fixed> {
        match self {
            Self::Fixed(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&O> {
        match self {
            Self::Object(v) => v.as_ref(),
            _ => None,
        }
    }

    pub fn as_new_id(&self) -> Option<u32> {
        match self {
            Self::NewId(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => v.as_deref(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[u8]> {
        match self {
            Self::Array(v) => v.as_deref(),
            _ => None,
        }
    }

    pub fn as_fd(&self) -> Option<RawFd> {
        match self {
            Self::Fd(v) => Some(*v),
            _ => None,
        }
    }
}
