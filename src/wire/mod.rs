//! Stateless wire codec for the Secure Connect protocol stack.
//!
//! Three nested layers, each drivable from plain byte buffers so the whole
//! protocol path is testable without a transport:
//!
//! - [`frame`] — the Secure Connect link layer (connect handshake,
//!   heartbeats, encapsulated NPDUs)
//! - [`npdu`] — the network layer carrying optional routing addresses
//! - [`apdu`] — the application layer (Who-Is/I-Am, ReadProperty,
//!   WriteProperty) and its tagged primitive encodings
//!
//! Every multi-byte read goes through [`Cursor`], which returns
//! [`CodecError::Truncated`] instead of panicking on short input.

pub mod apdu;
pub mod cursor;
pub mod frame;
pub mod npdu;

pub use apdu::{Apdu, ConfirmedService, ObjectId, ObjectType, PropertyId, UnconfirmedService};
pub use cursor::Cursor;
pub use frame::{Frame, FrameFunction};
pub use npdu::{NetworkAddress, Npdu};

/// Errors produced while decoding any wire layer.
///
/// A decode failure is always local to the offending frame; sessions log it
/// and move on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Input ended before a fixed-size field could be read.
    #[error("truncated message: needed {needed} more byte(s), {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    /// Frame function code outside the supported set.
    #[error("unknown frame function: 0x{0:02X}")]
    UnknownFrameFunction(u8),

    /// NPDU version other than 1.
    #[error("unsupported NPDU version: {0}")]
    UnsupportedNpduVersion(u8),

    /// APDU type nibble outside the supported set.
    #[error("unsupported APDU type: 0x{0:X}")]
    UnsupportedApduType(u8),

    /// Service choice not in the closed service set.
    #[error("unknown service choice: 0x{0:02X}")]
    UnknownServiceChoice(u8),

    /// Object type bits outside the recognized set.
    #[error("unknown object type: {0}")]
    UnknownObjectType(u16),

    /// A tag byte did not match what the grammar requires at that position.
    #[error("unexpected tag: expected {expected}, found 0x{found:02X}")]
    UnexpectedTag { expected: &'static str, found: u8 },

    /// A length field that cannot be honored (zero-length VMAC, oversized
    /// address, string without an encoding octet, ...).
    #[error("invalid field length: {0}")]
    InvalidLength(&'static str),
}
