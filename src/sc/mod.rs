//! Secure Connect gateway.
//!
//! Terminates encrypted WebSocket connections from remote protocol clients
//! and speaks the Secure Connect frame / network / application layers over
//! them. One task per connection; all of them share the point table, the
//! live snapshot, and the override store.
//!
//! # Message flow
//!
//! 1. Client connects over WSS (subprotocol `bacnet-sc`)
//! 2. Handshake: Connect-Request in, Connect-Accept out
//! 3. Heartbeat-Request / Heartbeat-Ack keep the session alive
//! 4. Encapsulated-NPDU frames carry Who-Is, ReadProperty and
//!    WriteProperty; reads answer from the live snapshot, writes land in
//!    the override store and take effect on the next simulation tick
//!
//! The hub runs in open-hub mode: no client-certificate enforcement, but
//! the identity a client presents in its Connect-Request is recorded on the
//! session and logged.

pub mod hub;
pub mod service;
pub mod session;

pub use hub::{HubConfig, HubError, ScHub};
pub use session::{FrameOutcome, Session, SessionHandler, SessionState};

/// WebSocket subprotocol token negotiated with clients.
pub const SUBPROTOCOL: &str = "bacnet-sc";

/// The gateway's own protocol identity, announced in Connect-Accept and
/// I-Am replies.
#[derive(Debug, Clone)]
pub struct HubIdentity {
    /// Hub virtual MAC (6 bytes)
    pub vmac: [u8; 6],

    /// Hub device UUID (16 bytes)
    pub uuid: [u8; 16],

    /// BACnet device instance
    pub device_id: u32,

    /// Device object name
    pub device_name: String,

    /// Vendor identifier announced in I-Am
    pub vendor_id: u16,

    /// Maximum APDU length accepted
    pub max_apdu: u16,

    /// Maximum frame size accepted
    pub max_frame: u16,

    /// Maximum NPDU size accepted
    pub max_npdu: u16,
}

impl Default for HubIdentity {
    fn default() -> Self {
        Self {
            vmac: [0x00, 0x00, 0x00, 0x00, 0x00, 0x01],
            uuid: *uuid::uuid!("ba51c000-0000-0000-0000-000000000001").as_bytes(),
            device_id: 9999,
            device_name: "CampusGateway".to_string(),
            vendor_id: 15,
            max_apdu: 1476,
            max_frame: 1500,
            max_npdu: 1497,
        }
    }
}
