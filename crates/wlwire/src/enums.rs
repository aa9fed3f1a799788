//! # Protocol Enums
//!
//! Protocol enums and bitfields travel as plain `u32`s in `u`/`i` slots.
//! Generated code maps them back with [`ProtocolEnum`] (for `enum` entries)
//! or [`decode_bitfield`] (for `bitfield="true"` entries, backed by `bitflags`).

use bitflags::Flags;

/// A closed set of named `u32` values.
pub trait ProtocolEnum: Sized + Copy {
    /// Returns `None` for values the protocol version does not define.
    fn from_raw(raw: u32) -> Option<Self>;
    fn to_raw(self) -> u32;
}

/// Declares a `#[repr(u32)]` enum implementing [`ProtocolEnum`].
///
/// ```
/// wlwire::protocol_enum! {
///     /// Output subpixel orientation.
///     pub enum Subpixel {
///         Unknown = 0,
///         None = 1,
///         HorizontalRgb = 2,
///     }
/// }
/// use wlwire::ProtocolEnum;
/// assert_eq!(Subpixel::from_raw(2), Some(Subpixel::HorizontalRgb));
/// assert_eq!(Subpixel::from_raw(9), None);
/// ```
#[macro_export]
macro_rules! protocol_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:expr),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        #[repr(u32)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value),*
        }

        impl $crate::ProtocolEnum for $name {
            fn from_raw(raw: u32) -> Option<Self> {
                match raw {
                    $(v if v == $value => Some(Self::$variant),)*
                    _ => None,
                }
            }

            fn to_raw(self) -> u32 {
                self as u32
            }
        }
    };
}

/// Decodes a bitfield, dropping bits this side does not know about.
pub fn decode_bitfield<F: Flags<Bits = u32>>(raw: u32) -> F {
    let flags = F::from_bits_truncate(raw);
    let unknown = raw & !flags.bits();
    if unknown != 0 {
        tracing::debug!(raw, unknown, "dropping unknown bitfield bits");
    }
    flags
}
