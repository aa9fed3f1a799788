//! # Signature Strings
//!
//! Each message carries a compact signature: one character per argument,
//! optionally prefixed by `?` (nullable), and optionally led by a single digit
//! naming the protocol version the message appeared in.
//!
//! ## Invariants
//! - The version digit is parsed into [`Signature::since`] and never enforced.
//! - A `?` must be followed by a type character.

use crate::error::Error;
use crate::error::Result;

/// The wire type of a single argument.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Int,
    Uint,
    Fixed,
    Object,
    NewId,
    Str,
    Array,
    Fd,
}

impl ArgKind {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'i' => Some(Self::Int),
            'u' => Some(Self::Uint),
            'f' => Some(Self::Fixed),
            'o' => Some(Self::Object),
            'n' => Some(Self::NewId),
            's' => Some(Self::Str),
            'a' => Some(Self::Array),
            'h' => Some(Self::Fd),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Int => 'i',
            Self::Uint => 'u',
            Self::Fixed => 'f',
            Self::Object => 'o',
            Self::NewId => 'n',
            Self::Str => 's',
            Self::Array => 'a',
            Self::Fd => 'h',
        }
    }

    /// Whether a null value is representable in this slot at all.
    pub fn can_be_null(self) -> bool {
        matches!(self, Self::Object | Self::Str | Self::Array)
    }
}

impl std::fmt::Display for ArgKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Fixed => "fixed",
            Self::Object => "object",
            Self::NewId => "new_id",
            Self::Str => "string",
            Self::Array => "array",
            Self::Fd => "fd",
        };
        f.write_str(name)
    }
}

/// One positional argument of a signature.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArgSpec {
    pub kind: ArgKind,
    pub nullable: bool,
}

/// A parsed signature string.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    raw: String,
    since: Option<u32>,
    args: Vec<ArgSpec>,
}

impl Signature {
    /// Parses a signature such as `"2?sio"`.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |position| Error::InvalidSignature { signature: raw.to_string(), position };

        let mut chars = raw.char_indices().peekable();
        let mut since = None;
        if let Some(&(_, c)) = chars.peek() {
            if let Some(digit) = c.to_digit(10) {
                since = Some(digit);
                chars.next();
            }
        }

        let mut args = Vec::new();
        let mut nullable = false;
        for (position, c) in chars {
            if c == '?' {
                if nullable {
                    return Err(invalid(position));
                }
                nullable = true;
                continue;
            }
            let kind = ArgKind::from_char(c).ok_or_else(|| invalid(position))?;
            args.push(ArgSpec { kind, nullable });
            nullable = false;
        }
        if nullable {
            return Err(invalid(raw.len()));
        }

        Ok(Self { raw: raw.to_string(), since, args })
    }

    /// The signature exactly as declared, version digit included.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The legacy per-message version marker, if present.
    pub fn since(&self) -> Option<u32> {
        self.since
    }

    pub fn args(&self) -> &[ArgSpec] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nullable_and_version() {
        let sig = Signature::parse("2?sio").unwrap();
        assert_eq!(sig.since(), Some(2));
        assert_eq!(sig.as_str(), "2?sio");
        assert_eq!(
            sig.args(),
            &[
                ArgSpec { kind: ArgKind::Str, nullable: true },
                ArgSpec { kind: ArgKind::Int, nullable: false },
                ArgSpec { kind: ArgKind::Object, nullable: false },
            ]
        );
    }

    #[test]
    fn test_parse_empty() {
        let sig = Signature::parse("").unwrap();
        assert!(sig.is_empty());
        assert_eq!(sig.since(), None);

        let sig = Signature::parse("3").unwrap();
        assert!(sig.is_empty());
        assert_eq!(sig.since(), Some(3));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(
            Signature::parse("ix").unwrap_err(),
            Error::InvalidSignature { signature: "ix".into(), position: 1 }
        );
        assert!(Signature::parse("i?").is_err());
        assert!(Signature::parse("??s").is_err());
        assert!(Signature::parse("1i2").is_err());
    }

    #[test]
    fn test_every_kind_round_trips_its_char() {
        for c in "iufonsah".chars() {
            assert_eq!(ArgKind::from_char(c).unwrap().as_char(), c);
        }
    }
}
