//! Application layer (APDU) encoding and decoding.
//!
//! Covers the closed service set the gateway speaks: Who-Is / I-Am for
//! discovery, ReadProperty / WriteProperty for point access, plus the
//! Simple-ACK / Complex-ACK / Error / Reject replies confirmed services
//! require. Primitive values use BACnet application tags (big-endian);
//! service parameters use context tags.

use bytes::{BufMut, BytesMut};

use super::{CodecError, Cursor};

/// APDU type nibble (upper 4 bits of the first byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PduType {
    ConfirmedRequest = 0x0,
    UnconfirmedRequest = 0x1,
    SimpleAck = 0x2,
    ComplexAck = 0x3,
    Error = 0x5,
    Reject = 0x6,
}

/// Confirmed service choices.
pub const SERVICE_READ_PROPERTY: u8 = 0x0C;
pub const SERVICE_WRITE_PROPERTY: u8 = 0x0F;
/// Unconfirmed service choices.
pub const SERVICE_I_AM: u8 = 0x00;
pub const SERVICE_WHO_IS: u8 = 0x08;

/// Reject reason: service choice not in the supported set.
pub const REJECT_UNRECOGNIZED_SERVICE: u8 = 9;
/// Reject reason: recognized service with malformed parameter tags.
pub const REJECT_INVALID_TAG: u8 = 4;

/// Error class/code pairs used in Error replies.
pub const ERROR_CLASS_OBJECT: u8 = 1;
pub const ERROR_CLASS_PROPERTY: u8 = 2;
pub const ERROR_CODE_UNKNOWN_OBJECT: u8 = 31;
pub const ERROR_CODE_UNKNOWN_PROPERTY: u8 = 32;
pub const ERROR_CODE_WRITE_ACCESS_DENIED: u8 = 40;
pub const ERROR_CODE_VALUE_OUT_OF_RANGE: u8 = 37;
pub const ERROR_CODE_INVALID_DATA_TYPE: u8 = 9;

/// BACnet object types the gateway recognizes.
///
/// Resolved once at decode time; there is no string-keyed dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ObjectType {
    AnalogInput = 0,
    AnalogOutput = 1,
    AnalogValue = 2,
    BinaryInput = 3,
    BinaryOutput = 4,
    BinaryValue = 5,
    Device = 8,
}

impl ObjectType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::AnalogInput),
            1 => Some(Self::AnalogOutput),
            2 => Some(Self::AnalogValue),
            3 => Some(Self::BinaryInput),
            4 => Some(Self::BinaryOutput),
            5 => Some(Self::BinaryValue),
            8 => Some(Self::Device),
            _ => None,
        }
    }
}

/// Packed object identifier: 10-bit type, 22-bit instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectId {
    pub object_type: ObjectType,
    pub instance: u32,
}

impl ObjectId {
    pub fn new(object_type: ObjectType, instance: u32) -> Self {
        Self {
            object_type,
            instance: instance & 0x3F_FFFF,
        }
    }

    fn packed(&self) -> u32 {
        ((self.object_type as u32) << 22) | (self.instance & 0x3F_FFFF)
    }

    fn unpack(raw: u32) -> Result<Self, CodecError> {
        let type_bits = (raw >> 22) as u16 & 0x3FF;
        let object_type =
            ObjectType::from_u16(type_bits).ok_or(CodecError::UnknownObjectType(type_bits))?;
        Ok(Self {
            object_type,
            instance: raw & 0x3F_FFFF,
        })
    }
}

/// Property identifiers the gateway acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyId {
    ObjectName,
    PresentValue,
    /// Anything else, kept for echoing back in error replies.
    Other(u32),
}

impl PropertyId {
    pub fn from_u32(value: u32) -> Self {
        match value {
            77 => Self::ObjectName,
            85 => Self::PresentValue,
            other => Self::Other(other),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            Self::ObjectName => 77,
            Self::PresentValue => 85,
            Self::Other(v) => *v,
        }
    }
}

/// An application-tagged property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Null — in a WriteProperty, relinquishes the priority slot.
    Null,
    Real(f32),
    CharacterString(String),
}

impl PropertyValue {
    /// Encode with an application tag.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Null => buf.put_u8(0x00),
            Self::Real(v) => {
                buf.put_u8(0x44);
                buf.put_f32(*v);
            }
            Self::CharacterString(s) => {
                // Extended-length form with a one-byte length and the UTF-8
                // encoding octet, as the campus hub has always emitted.
                let bytes = s.as_bytes();
                buf.put_u8(0x75);
                buf.put_u8((bytes.len() + 1) as u8);
                buf.put_u8(0x00);
                buf.put_slice(bytes);
            }
        }
    }

    /// Decode one application-tagged value.
    pub fn decode(cur: &mut Cursor<'_>) -> Result<Self, CodecError> {
        let tag = cur.u8()?;
        match tag {
            0x00 => Ok(Self::Null),
            0x44 => Ok(Self::Real(cur.f32_be()?)),
            0x75 => {
                let len = cur.u8()? as usize;
                if len == 0 {
                    return Err(CodecError::InvalidLength("character string without encoding octet"));
                }
                let encoding = cur.u8()?;
                if encoding != 0x00 {
                    return Err(CodecError::InvalidLength("unsupported string encoding"));
                }
                let bytes = cur.take(len - 1)?;
                let s = String::from_utf8(bytes.to_vec())
                    .map_err(|_| CodecError::InvalidLength("character string is not UTF-8"))?;
                Ok(Self::CharacterString(s))
            }
            found => Err(CodecError::UnexpectedTag {
                expected: "application-tagged value",
                found,
            }),
        }
    }
}

/// Unconfirmed services.
#[derive(Debug, Clone, PartialEq)]
pub enum UnconfirmedService {
    WhoIs {
        /// Optional device-instance range filter.
        range: Option<(u32, u32)>,
    },
    IAm {
        device: ObjectId,
        max_apdu: u32,
        segmentation: u8,
        vendor_id: u32,
    },
}

/// Confirmed services.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmedService {
    ReadProperty {
        object: ObjectId,
        property: PropertyId,
    },
    WriteProperty {
        object: ObjectId,
        property: PropertyId,
        value: PropertyValue,
        /// Command priority 1..16; absent means the weakest slot.
        priority: Option<u8>,
    },
}

impl ConfirmedService {
    pub fn choice(&self) -> u8 {
        match self {
            Self::ReadProperty { .. } => SERVICE_READ_PROPERTY,
            Self::WriteProperty { .. } => SERVICE_WRITE_PROPERTY,
        }
    }
}

/// A decoded application PDU.
#[derive(Debug, Clone, PartialEq)]
pub enum Apdu {
    ConfirmedRequest {
        invoke_id: u8,
        service: ConfirmedService,
    },
    UnconfirmedRequest(UnconfirmedService),
    SimpleAck {
        invoke_id: u8,
        service_choice: u8,
    },
    ComplexAck {
        invoke_id: u8,
        service_choice: u8,
        object: ObjectId,
        property: PropertyId,
        value: PropertyValue,
    },
    Error {
        invoke_id: u8,
        service_choice: u8,
        class: u8,
        code: u8,
    },
    Reject {
        invoke_id: u8,
        reason: u8,
    },
}

impl Apdu {
    /// Encode to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(32);
        match self {
            Self::ConfirmedRequest { invoke_id, service } => {
                buf.put_u8((PduType::ConfirmedRequest as u8) << 4);
                // Max segments / max APDU byte; unsegmented, 1476 octets.
                buf.put_u8(0x05);
                buf.put_u8(*invoke_id);
                buf.put_u8(service.choice());
                match service {
                    ConfirmedService::ReadProperty { object, property } => {
                        put_context_object_id(&mut buf, 0, object);
                        put_context_unsigned(&mut buf, 1, property.as_u32());
                    }
                    ConfirmedService::WriteProperty {
                        object,
                        property,
                        value,
                        priority,
                    } => {
                        put_context_object_id(&mut buf, 0, object);
                        put_context_unsigned(&mut buf, 1, property.as_u32());
                        buf.put_u8(0x3E);
                        value.encode(&mut buf);
                        buf.put_u8(0x3F);
                        if let Some(p) = priority {
                            put_context_unsigned(&mut buf, 4, *p as u32);
                        }
                    }
                }
            }
            Self::UnconfirmedRequest(service) => {
                buf.put_u8((PduType::UnconfirmedRequest as u8) << 4);
                match service {
                    UnconfirmedService::WhoIs { range } => {
                        buf.put_u8(SERVICE_WHO_IS);
                        if let Some((low, high)) = range {
                            put_context_unsigned(&mut buf, 0, *low);
                            put_context_unsigned(&mut buf, 1, *high);
                        }
                    }
                    UnconfirmedService::IAm {
                        device,
                        max_apdu,
                        segmentation,
                        vendor_id,
                    } => {
                        buf.put_u8(SERVICE_I_AM);
                        buf.put_u8(0xC4);
                        buf.put_u32(device.packed());
                        put_app_unsigned(&mut buf, *max_apdu);
                        buf.put_u8(0x91);
                        buf.put_u8(*segmentation);
                        put_app_unsigned(&mut buf, *vendor_id);
                    }
                }
            }
            Self::SimpleAck {
                invoke_id,
                service_choice,
            } => {
                buf.put_u8((PduType::SimpleAck as u8) << 4);
                buf.put_u8(*invoke_id);
                buf.put_u8(*service_choice);
            }
            Self::ComplexAck {
                invoke_id,
                service_choice,
                object,
                property,
                value,
            } => {
                buf.put_u8((PduType::ComplexAck as u8) << 4);
                buf.put_u8(*invoke_id);
                buf.put_u8(*service_choice);
                put_context_object_id(&mut buf, 0, object);
                put_context_unsigned(&mut buf, 1, property.as_u32());
                buf.put_u8(0x3E);
                value.encode(&mut buf);
                buf.put_u8(0x3F);
            }
            Self::Error {
                invoke_id,
                service_choice,
                class,
                code,
            } => {
                buf.put_u8((PduType::Error as u8) << 4);
                buf.put_u8(*invoke_id);
                buf.put_u8(*service_choice);
                buf.put_u8(0x91);
                buf.put_u8(*class);
                buf.put_u8(0x91);
                buf.put_u8(*code);
            }
            Self::Reject { invoke_id, reason } => {
                buf.put_u8((PduType::Reject as u8) << 4);
                buf.put_u8(*invoke_id);
                buf.put_u8(*reason);
            }
        }
        buf.to_vec()
    }

    /// Decode from bytes.
    pub fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        let mut cur = Cursor::new(raw);
        let first = cur.u8()?;
        let type_nibble = first >> 4;

        match type_nibble {
            0x0 => {
                if first & 0x08 != 0 {
                    return Err(CodecError::InvalidLength("segmented requests not supported"));
                }
                let _max_segments_apdu = cur.u8()?;
                let invoke_id = cur.u8()?;
                let choice = cur.u8()?;
                let service = Self::decode_confirmed(choice, &mut cur)?;
                Ok(Self::ConfirmedRequest { invoke_id, service })
            }
            0x1 => {
                let choice = cur.u8()?;
                let service = Self::decode_unconfirmed(choice, &mut cur)?;
                Ok(Self::UnconfirmedRequest(service))
            }
            0x2 => Ok(Self::SimpleAck {
                invoke_id: cur.u8()?,
                service_choice: cur.u8()?,
            }),
            0x3 => {
                let invoke_id = cur.u8()?;
                let service_choice = cur.u8()?;
                let object = read_context_object_id(&mut cur)?;
                let property = PropertyId::from_u32(read_context_unsigned(&mut cur, 1)?);
                expect_tag(&mut cur, 0x3E, "opening tag 3")?;
                let value = PropertyValue::decode(&mut cur)?;
                expect_tag(&mut cur, 0x3F, "closing tag 3")?;
                Ok(Self::ComplexAck {
                    invoke_id,
                    service_choice,
                    object,
                    property,
                    value,
                })
            }
            0x5 => {
                let invoke_id = cur.u8()?;
                let service_choice = cur.u8()?;
                expect_tag(&mut cur, 0x91, "enumerated error class")?;
                let class = cur.u8()?;
                expect_tag(&mut cur, 0x91, "enumerated error code")?;
                let code = cur.u8()?;
                Ok(Self::Error {
                    invoke_id,
                    service_choice,
                    class,
                    code,
                })
            }
            0x6 => Ok(Self::Reject {
                invoke_id: cur.u8()?,
                reason: cur.u8()?,
            }),
            other => Err(CodecError::UnsupportedApduType(other)),
        }
    }

    fn decode_confirmed(choice: u8, cur: &mut Cursor<'_>) -> Result<ConfirmedService, CodecError> {
        match choice {
            SERVICE_READ_PROPERTY => {
                let object = read_context_object_id(cur)?;
                let property = PropertyId::from_u32(read_context_unsigned(cur, 1)?);
                Ok(ConfirmedService::ReadProperty { object, property })
            }
            SERVICE_WRITE_PROPERTY => {
                let object = read_context_object_id(cur)?;
                let property = PropertyId::from_u32(read_context_unsigned(cur, 1)?);
                // Optional array index (context 2) is skipped.
                if !cur.is_empty() && cur.peek_u8()? >> 4 == 2 && cur.peek_u8()? & 0x08 != 0 {
                    let _ = read_context_unsigned(cur, 2)?;
                }
                expect_tag(cur, 0x3E, "opening tag 3")?;
                let value = PropertyValue::decode(cur)?;
                expect_tag(cur, 0x3F, "closing tag 3")?;
                // Optional priority: any context tag 4, whatever length form
                // the sender chose.
                let priority = match cur.peek_u8() {
                    Ok(tag) if tag >> 4 == 4 && tag & 0x08 != 0 => {
                        let raw = read_context_unsigned(cur, 4)?;
                        Some(u8::try_from(raw).unwrap_or(u8::MAX))
                    }
                    _ => None,
                };
                Ok(ConfirmedService::WriteProperty {
                    object,
                    property,
                    value,
                    priority,
                })
            }
            other => Err(CodecError::UnknownServiceChoice(other)),
        }
    }

    fn decode_unconfirmed(
        choice: u8,
        cur: &mut Cursor<'_>,
    ) -> Result<UnconfirmedService, CodecError> {
        match choice {
            SERVICE_WHO_IS => {
                let range = if cur.is_empty() {
                    None
                } else {
                    let low = read_context_unsigned(cur, 0)?;
                    let high = read_context_unsigned(cur, 1)?;
                    Some((low, high))
                };
                Ok(UnconfirmedService::WhoIs { range })
            }
            SERVICE_I_AM => {
                expect_tag(cur, 0xC4, "application object identifier")?;
                let device = ObjectId::unpack(cur.u32_be()?)?;
                let max_apdu = read_app_unsigned(cur)?;
                expect_tag(cur, 0x91, "enumerated segmentation")?;
                let segmentation = cur.u8()?;
                let vendor_id = read_app_unsigned(cur)?;
                Ok(UnconfirmedService::IAm {
                    device,
                    max_apdu,
                    segmentation,
                    vendor_id,
                })
            }
            other => Err(CodecError::UnknownServiceChoice(other)),
        }
    }
}

fn expect_tag(cur: &mut Cursor<'_>, tag: u8, expected: &'static str) -> Result<(), CodecError> {
    let found = cur.u8()?;
    if found != tag {
        return Err(CodecError::UnexpectedTag { expected, found });
    }
    Ok(())
}

fn put_context_object_id(buf: &mut BytesMut, tag_number: u8, object: &ObjectId) {
    buf.put_u8((tag_number << 4) | 0x08 | 0x04);
    buf.put_u32(object.packed());
}

fn read_context_object_id(cur: &mut Cursor<'_>) -> Result<ObjectId, CodecError> {
    expect_tag(cur, 0x0C, "context object identifier")?;
    ObjectId::unpack(cur.u32_be()?)
}

/// Context-tagged unsigned with minimal length (1, 2, or 4 bytes).
fn put_context_unsigned(buf: &mut BytesMut, tag_number: u8, value: u32) {
    let len = unsigned_len(value);
    buf.put_u8((tag_number << 4) | 0x08 | len as u8);
    put_unsigned_bytes(buf, value, len);
}

fn read_context_unsigned(cur: &mut Cursor<'_>, tag_number: u8) -> Result<u32, CodecError> {
    let tag = cur.u8()?;
    if tag >> 4 != tag_number || tag & 0x08 == 0 {
        return Err(CodecError::UnexpectedTag {
            expected: "context-tagged unsigned",
            found: tag,
        });
    }
    read_unsigned_bytes(cur, (tag & 0x07) as usize)
}

/// Application-tagged unsigned (tag 2) with minimal length.
fn put_app_unsigned(buf: &mut BytesMut, value: u32) {
    let len = unsigned_len(value);
    buf.put_u8(0x20 | len as u8);
    put_unsigned_bytes(buf, value, len);
}

fn read_app_unsigned(cur: &mut Cursor<'_>) -> Result<u32, CodecError> {
    let tag = cur.u8()?;
    if tag >> 4 != 2 || tag & 0x08 != 0 {
        return Err(CodecError::UnexpectedTag {
            expected: "application-tagged unsigned",
            found: tag,
        });
    }
    read_unsigned_bytes(cur, (tag & 0x07) as usize)
}

fn unsigned_len(value: u32) -> usize {
    match value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

fn put_unsigned_bytes(buf: &mut BytesMut, value: u32, len: usize) {
    let bytes = value.to_be_bytes();
    buf.put_slice(&bytes[4 - len..]);
}

fn read_unsigned_bytes(cur: &mut Cursor<'_>, len: usize) -> Result<u32, CodecError> {
    if len == 0 || len > 4 {
        return Err(CodecError::InvalidLength("unsigned wider than 4 bytes"));
    }
    let mut value = 0u32;
    for byte in cur.take(len)? {
        value = (value << 8) | u32::from(*byte);
    }
    Ok(value)
}
