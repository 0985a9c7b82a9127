//! Network layer (NPDU) inside an Encapsulated-NPDU frame.
//!
//! Version byte, control byte whose bits flag optional destination and
//! source network addresses, then the embedded application PDU. The gateway
//! never forwards across networks, so decoding only needs to skip the
//! routing fields to reach the APDU; encoding always emits the local form
//! (no addresses).

use bytes::{BufMut, BytesMut};

use super::{CodecError, Cursor};

/// Supported NPDU protocol version.
pub const NPDU_VERSION: u8 = 0x01;

/// Control-byte bit: destination specifier present (DNET/DLEN/DADR + hop count).
const CTRL_DEST_PRESENT: u8 = 0x20;
/// Control-byte bit: source specifier present (SNET/SLEN/SADR).
const CTRL_SRC_PRESENT: u8 = 0x08;

/// A network-layer address specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAddress {
    /// Network number
    pub network: u16,
    /// Link-layer address bytes (length taken from the wire)
    pub address: Vec<u8>,
}

/// A decoded network PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Npdu {
    pub destination: Option<NetworkAddress>,
    pub source: Option<NetworkAddress>,
    /// Present only when a destination specifier is present.
    pub hop_count: Option<u8>,
    /// The embedded application PDU.
    pub apdu: Vec<u8>,
}

impl Npdu {
    /// Wrap an APDU in a local (no routing) NPDU.
    pub fn local(apdu: Vec<u8>) -> Self {
        Self {
            destination: None,
            source: None,
            hop_count: None,
            apdu,
        }
    }

    /// Encode to bytes. Replies are always local, so only the address-free
    /// form is emitted.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(2 + self.apdu.len());
        buf.put_u8(NPDU_VERSION);

        let mut control = 0u8;
        if self.destination.is_some() {
            control |= CTRL_DEST_PRESENT;
        }
        if self.source.is_some() {
            control |= CTRL_SRC_PRESENT;
        }
        buf.put_u8(control);

        if let Some(dest) = &self.destination {
            buf.put_u16(dest.network);
            buf.put_u8(dest.address.len() as u8);
            buf.put_slice(&dest.address);
        }
        if let Some(src) = &self.source {
            buf.put_u16(src.network);
            buf.put_u8(src.address.len() as u8);
            buf.put_slice(&src.address);
        }
        if let Some(hops) = self.hop_count {
            buf.put_u8(hops);
        }

        buf.put_slice(&self.apdu);
        buf
    }

    /// Decode from bytes, skipping routing fields to reach the APDU.
    pub fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        let mut cur = Cursor::new(raw);

        let version = cur.u8()?;
        if version != NPDU_VERSION {
            return Err(CodecError::UnsupportedNpduVersion(version));
        }
        let control = cur.u8()?;

        let destination = if control & CTRL_DEST_PRESENT != 0 {
            Some(Self::read_address(&mut cur)?)
        } else {
            None
        };
        let source = if control & CTRL_SRC_PRESENT != 0 {
            Some(Self::read_address(&mut cur)?)
        } else {
            None
        };
        // Hop count trails the source field but is only present when a
        // destination specifier is.
        let hop_count = if destination.is_some() {
            Some(cur.u8()?)
        } else {
            None
        };

        Ok(Self {
            destination,
            source,
            hop_count,
            apdu: cur.rest().to_vec(),
        })
    }

    fn read_address(cur: &mut Cursor<'_>) -> Result<NetworkAddress, CodecError> {
        let network = cur.u16_be()?;
        let len = cur.u8()? as usize;
        if len > 8 {
            return Err(CodecError::InvalidLength("network address longer than 8 bytes"));
        }
        Ok(NetworkAddress {
            network,
            address: cur.take(len)?.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_npdu_round_trip() {
        let npdu = Npdu::local(vec![0x10, 0x08]);
        let encoded = npdu.encode();
        assert_eq!(&encoded[..2], &[0x01, 0x00]);

        let decoded = Npdu::decode(&encoded).unwrap();
        assert_eq!(decoded, npdu);
    }

    #[test]
    fn routed_npdu_is_unwrapped() {
        // Version, control (dest+src), DNET=1 DLEN=1 DADR=0x42,
        // SNET=2 SLEN=2 SADR, hop count, APDU.
        let raw = [
            0x01, 0x28, 0x00, 0x01, 0x01, 0x42, 0x00, 0x02, 0x02, 0xAA, 0xBB, 0xFF, 0x10, 0x08,
        ];
        let npdu = Npdu::decode(&raw).unwrap();
        assert_eq!(
            npdu.destination,
            Some(NetworkAddress {
                network: 1,
                address: vec![0x42]
            })
        );
        assert_eq!(
            npdu.source,
            Some(NetworkAddress {
                network: 2,
                address: vec![0xAA, 0xBB]
            })
        );
        assert_eq!(npdu.hop_count, Some(0xFF));
        assert_eq!(npdu.apdu, vec![0x10, 0x08]);
    }

    #[test]
    fn bad_version_is_rejected() {
        assert_eq!(
            Npdu::decode(&[0x02, 0x00, 0x10]).unwrap_err(),
            CodecError::UnsupportedNpduVersion(0x02)
        );
    }

    #[test]
    fn truncated_address_is_rejected() {
        // Control claims a destination but the bytes run out mid-address.
        let raw = [0x01, 0x20, 0x00, 0x01, 0x04, 0x42];
        assert!(matches!(
            Npdu::decode(&raw).unwrap_err(),
            CodecError::Truncated { .. }
        ));
    }
}
