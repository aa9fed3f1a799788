//! # Error Definitions
//!
//! The central ledger of table-construction and marshalling failures.

use crate::signature::ArgKind;

/// Failures while building descriptor tables or moving arguments across the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The signature string does not follow `[digit]? ('?'? [iufonsah])*`.
    InvalidSignature { signature: String, position: usize },
    /// A non-nullable argument decoded (or was supplied) as null.
    MissingRequiredArgument { message: String, index: usize },
    /// The slot kind does not match the signature character at this position.
    TypeMismatch { message: String, index: usize, expected: ArgKind, found: ArgKind },
    /// The number of slots differs from the number of declared arguments.
    ArgumentCountMismatch { message: String, expected: usize, found: usize },
    /// Attempted to write past the end of a pre-allocated argument buffer.
    SlotOutOfRange { index: usize, len: usize },
    /// A string argument contains an interior NUL and cannot be put on the wire.
    InvalidString(String),
    /// A string slot does not hold valid UTF-8.
    InvalidUtf8 { message: String, index: usize },
    /// No interface with this name was declared in the table.
    UnknownInterface(String),
    /// An interface was declared but its messages were never defined.
    UndefinedInterface(String),
    /// The `arg_interfaces` list does not have one entry per argument.
    ArgInterfaceCountMismatch { message: String, arguments: usize, interfaces: usize },
    /// The object resolver could not produce an object for a non-null reference.
    UnresolvedObject { message: String, index: usize, reason: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSignature { signature, position } => {
                write!(f, "invalid signature '{}' at position {}", signature, position)
            }
            Self::MissingRequiredArgument { message, index } => {
                write!(f, "non-optional argument {} of '{}' is null", index, message)
            }
            Self::TypeMismatch { message, index, expected, found } => write!(
                f,
                "argument {} of '{}': expected {}, found {}",
                index, message, expected, found
            ),
            Self::ArgumentCountMismatch { message, expected, found } => write!(
                f,
                "'{}' takes {} arguments, got {}",
                message, expected, found
            ),
            Self::SlotOutOfRange { index, len } => {
                write!(f, "slot {} out of range for buffer of {} slots", index, len)
            }
            Self::InvalidString(s) => write!(f, "string contains interior NUL: {:?}", s),
            Self::InvalidUtf8 { message, index } => {
                write!(f, "argument {} of '{}' is not valid UTF-8", index, message)
            }
            Self::UnknownInterface(name) => write!(f, "interface '{}' was never declared", name),
            Self::UndefinedInterface(name) => write!(f, "interface '{}' was declared but never defined", name),
            Self::ArgInterfaceCountMismatch { message, arguments, interfaces } => write!(
                f,
                "'{}' has {} arguments but {} argument interfaces",
                message, arguments, interfaces
            ),
            Self::UnresolvedObject { message, index, reason } => write!(
                f,
                "object argument {} of '{}' could not be resolved: {}",
                index, message, reason
            ),
        }
    }
}

impl std::error::Error for Error {}

/// A specialized Result type for wire operations.
pub type Result<T> = std::result::Result<T, Error>;
