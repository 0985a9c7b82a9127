//! Secure Connect frame layer.
//!
//! The outermost wrapper on the WebSocket transport. One function byte
//! selects the message kind; connect messages carry the sender's identity
//! and proposed frame sizes, heartbeats are bare, and Encapsulated-NPDU
//! carries the routed payload.
//!
//! Frame format:
//!
//! ```text
//! +----------+---------------------------------------------------+
//! | Byte 0   | Payload                                           |
//! +----------+---------------------------------------------------+
//! | Function | Connect-Request/Accept: VMAC(6) UUID(16) sizes(4) |
//! |          | Encapsulated-NPDU: dest(6) src(6) msg-id(2) NPDU  |
//! |          | Heartbeat-Request/Ack: empty                      |
//! +----------+---------------------------------------------------+
//! ```

use bytes::{BufMut, BytesMut};

use super::{CodecError, Cursor};

/// Frame function code (1 byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameFunction {
    /// Encapsulated NPDU
    EncapsulatedNpdu = 0x02,

    /// Connect Request: client opens a session
    ConnectRequest = 0x04,

    /// Connect Accept: hub accepts the session
    ConnectAccept = 0x05,

    /// Heartbeat Request: keep-alive
    HeartbeatRequest = 0x08,

    /// Heartbeat ACK
    HeartbeatAck = 0x09,
}

impl FrameFunction {
    /// Convert from u8, returns None for unknown values
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x02 => Some(Self::EncapsulatedNpdu),
            0x04 => Some(Self::ConnectRequest),
            0x05 => Some(Self::ConnectAccept),
            0x08 => Some(Self::HeartbeatRequest),
            0x09 => Some(Self::HeartbeatAck),
            _ => None,
        }
    }
}

/// Identity and size fields carried by Connect-Request and Connect-Accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectFields {
    /// Virtual MAC address of the sender (6 bytes)
    pub vmac: [u8; 6],

    /// Device UUID of the sender (16 bytes)
    pub uuid: [u8; 16],

    /// Maximum frame size the sender accepts
    pub max_frame: u16,

    /// Maximum NPDU size the sender accepts
    pub max_npdu: u16,
}

/// A decoded Secure Connect frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    ConnectRequest(ConnectFields),
    ConnectAccept(ConnectFields),
    HeartbeatRequest,
    HeartbeatAck,
    EncapsulatedNpdu {
        /// Destination virtual MAC
        dest_vmac: [u8; 6],
        /// Source virtual MAC
        src_vmac: [u8; 6],
        /// Message id, echoed in replies
        message_id: u16,
        /// Embedded network PDU
        npdu: Vec<u8>,
    },
}

impl Frame {
    /// Function code of this frame.
    pub fn function(&self) -> FrameFunction {
        match self {
            Self::ConnectRequest(_) => FrameFunction::ConnectRequest,
            Self::ConnectAccept(_) => FrameFunction::ConnectAccept,
            Self::HeartbeatRequest => FrameFunction::HeartbeatRequest,
            Self::HeartbeatAck => FrameFunction::HeartbeatAck,
            Self::EncapsulatedNpdu { .. } => FrameFunction::EncapsulatedNpdu,
        }
    }

    /// Encode frame to bytes.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(32);
        buf.put_u8(self.function() as u8);

        match self {
            Self::ConnectRequest(fields) | Self::ConnectAccept(fields) => {
                buf.put_slice(&fields.vmac);
                buf.put_slice(&fields.uuid);
                buf.put_u16(fields.max_frame);
                buf.put_u16(fields.max_npdu);
            }
            Self::HeartbeatRequest | Self::HeartbeatAck => {}
            Self::EncapsulatedNpdu {
                dest_vmac,
                src_vmac,
                message_id,
                npdu,
            } => {
                buf.put_slice(dest_vmac);
                buf.put_slice(src_vmac);
                buf.put_u16(*message_id);
                buf.put_slice(npdu);
            }
        }

        buf
    }

    /// Decode a frame from raw bytes.
    pub fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        let mut cur = Cursor::new(raw);
        let function_byte = cur.u8()?;
        let function = FrameFunction::from_u8(function_byte)
            .ok_or(CodecError::UnknownFrameFunction(function_byte))?;

        match function {
            FrameFunction::ConnectRequest => Ok(Self::ConnectRequest(Self::connect_fields(&mut cur)?)),
            FrameFunction::ConnectAccept => Ok(Self::ConnectAccept(Self::connect_fields(&mut cur)?)),
            FrameFunction::HeartbeatRequest => Ok(Self::HeartbeatRequest),
            FrameFunction::HeartbeatAck => Ok(Self::HeartbeatAck),
            FrameFunction::EncapsulatedNpdu => {
                let dest_vmac = cur.take_array()?;
                let src_vmac = cur.take_array()?;
                let message_id = cur.u16_be()?;
                let npdu = cur.rest().to_vec();
                Ok(Self::EncapsulatedNpdu {
                    dest_vmac,
                    src_vmac,
                    message_id,
                    npdu,
                })
            }
        }
    }

    fn connect_fields(cur: &mut Cursor<'_>) -> Result<ConnectFields, CodecError> {
        Ok(ConnectFields {
            vmac: cur.take_array()?,
            uuid: cur.take_array()?,
            max_frame: cur.u16_be()?,
            max_npdu: cur.u16_be()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_connect() -> ConnectFields {
        ConnectFields {
            vmac: [0x01, 0x02, 0x03, 0x04, 0x05, 0x06],
            uuid: [0xAB; 16],
            max_frame: 1500,
            max_npdu: 1497,
        }
    }

    #[test]
    fn connect_request_round_trip() {
        let frame = Frame::ConnectRequest(sample_connect());
        let encoded = frame.encode();
        assert_eq!(encoded[0], 0x04);
        assert_eq!(encoded.len(), 1 + 6 + 16 + 2 + 2);

        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn encapsulated_npdu_round_trip() {
        let frame = Frame::EncapsulatedNpdu {
            dest_vmac: [0; 6],
            src_vmac: [0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F],
            message_id: 0x1234,
            npdu: vec![0x01, 0x00, 0x10, 0x08],
        };

        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn heartbeat_is_a_single_byte() {
        assert_eq!(Frame::HeartbeatRequest.encode().as_ref(), &[0x08]);
        assert_eq!(Frame::decode(&[0x09]).unwrap(), Frame::HeartbeatAck);
    }

    #[test]
    fn unknown_function_is_rejected() {
        assert_eq!(
            Frame::decode(&[0x55]).unwrap_err(),
            CodecError::UnknownFrameFunction(0x55)
        );
    }

    #[test]
    fn truncated_connect_is_rejected() {
        let frame = Frame::ConnectRequest(sample_connect());
        let encoded = frame.encode();
        let err = Frame::decode(&encoded[..10]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }
}
