//! Per-connection protocol state machine.
//!
//! [`SessionHandler`] is pure bytes-in/frames-out: the transport feeds it
//! raw WebSocket payloads and sends back whatever it returns, so the whole
//! connection lifecycle is testable without a socket. A handler is owned
//! exclusively by its connection task.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::overrides::OverrideStore;
use crate::points::{LiveTable, PointTable};
use crate::wire::frame::{ConnectFields, Frame};

use super::service::ServiceContext;
use super::HubIdentity;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, waiting for a valid Connect-Request.
    Handshaking,

    /// Handshake complete, traffic flowing.
    Established,

    /// Peer closed or a fatal frame arrived during handshake.
    Closing,

    /// No traffic within the idle window.
    TimedOut,
}

/// Identity and negotiation state recorded at handshake.
#[derive(Debug, Clone)]
pub struct Session {
    /// Remote virtual MAC presented in Connect-Request
    pub remote_vmac: [u8; 6],

    /// Remote device UUID presented in Connect-Request
    pub remote_uuid: Uuid,

    /// Frame size the peer proposed
    pub remote_max_frame: u16,

    /// NPDU size the peer proposed
    pub remote_max_npdu: u16,

    pub connected_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

/// What the transport should do after one inbound frame.
#[derive(Debug, Default)]
pub struct FrameOutcome {
    /// Encoded frames to write back, in order.
    pub replies: Vec<Vec<u8>>,

    /// Close the transport after sending the replies.
    pub close: bool,
}

impl FrameOutcome {
    fn reply(frame: Frame) -> Self {
        Self {
            replies: vec![frame.encode().to_vec()],
            close: false,
        }
    }

    fn silent() -> Self {
        Self::default()
    }

    fn closed() -> Self {
        Self {
            replies: Vec::new(),
            close: true,
        }
    }
}

/// Per-connection state machine over the shared codec.
pub struct SessionHandler {
    identity: Arc<HubIdentity>,
    points: Arc<PointTable>,
    live: LiveTable,
    store: Arc<OverrideStore>,
    state: SessionState,
    session: Option<Session>,
    /// Transport-level peer label, for logs.
    peer: String,
}

impl SessionHandler {
    pub fn new(
        identity: Arc<HubIdentity>,
        points: Arc<PointTable>,
        live: LiveTable,
        store: Arc<OverrideStore>,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            points,
            live,
            store,
            state: SessionState::Handshaking,
            session: None,
            peer: peer.into(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Record that the idle window elapsed. The transport closes afterwards.
    pub fn on_timeout(&mut self) {
        warn!("session {}: heartbeat timeout, closing", self.peer);
        self.state = SessionState::TimedOut;
    }

    /// Process one raw inbound frame.
    pub fn on_frame(&mut self, raw: &[u8]) -> FrameOutcome {
        match self.state {
            SessionState::Handshaking => self.on_handshake_frame(raw),
            SessionState::Established => self.on_established_frame(raw),
            SessionState::Closing | SessionState::TimedOut => FrameOutcome::silent(),
        }
    }

    /// While handshaking only a valid Connect-Request is acceptable; anything
    /// else closes the connection.
    fn on_handshake_frame(&mut self, raw: &[u8]) -> FrameOutcome {
        match Frame::decode(raw) {
            Ok(Frame::ConnectRequest(fields)) => {
                self.establish(fields);
                FrameOutcome::reply(Frame::ConnectAccept(ConnectFields {
                    vmac: self.identity.vmac,
                    uuid: self.identity.uuid,
                    max_frame: self.identity.max_frame,
                    max_npdu: self.identity.max_npdu,
                }))
            }
            Ok(frame) => {
                warn!(
                    "session {}: {:?} before handshake, closing",
                    self.peer,
                    frame.function()
                );
                self.state = SessionState::Closing;
                FrameOutcome::closed()
            }
            Err(e) => {
                warn!("session {}: undecodable handshake frame ({}), closing", self.peer, e);
                self.state = SessionState::Closing;
                FrameOutcome::closed()
            }
        }
    }

    fn on_established_frame(&mut self, raw: &[u8]) -> FrameOutcome {
        match Frame::decode(raw) {
            Ok(Frame::HeartbeatRequest) => {
                if let Some(session) = &mut self.session {
                    session.last_heartbeat_at = Utc::now();
                }
                FrameOutcome::reply(Frame::HeartbeatAck)
            }
            Ok(Frame::EncapsulatedNpdu {
                src_vmac,
                message_id,
                npdu,
                ..
            }) => {
                let ctx = ServiceContext {
                    identity: &self.identity,
                    points: &self.points,
                    live: &self.live,
                    store: &self.store,
                    source: &self.peer,
                };
                match ctx.handle_npdu(&npdu) {
                    Some(reply_npdu) => FrameOutcome::reply(Frame::EncapsulatedNpdu {
                        dest_vmac: src_vmac,
                        src_vmac: self.identity.vmac,
                        message_id,
                        npdu: reply_npdu,
                    }),
                    None => FrameOutcome::silent(),
                }
            }
            Ok(Frame::ConnectRequest(_)) => {
                debug!("session {}: duplicate Connect-Request ignored", self.peer);
                FrameOutcome::silent()
            }
            Ok(frame) => {
                debug!("session {}: unexpected {:?} ignored", self.peer, frame.function());
                FrameOutcome::silent()
            }
            // Framing errors are local to the frame; the session stays up.
            Err(e) => {
                warn!("session {}: dropped bad frame: {}", self.peer, e);
                FrameOutcome::silent()
            }
        }
    }

    fn establish(&mut self, fields: ConnectFields) {
        let now = Utc::now();
        let remote_uuid = Uuid::from_bytes(fields.uuid);
        info!(
            "session {}: established, remote VMAC {}, UUID {}, max frame {}",
            self.peer,
            format_vmac(&fields.vmac),
            remote_uuid,
            fields.max_frame
        );
        self.session = Some(Session {
            remote_vmac: fields.vmac,
            remote_uuid,
            remote_max_frame: fields.max_frame,
            remote_max_npdu: fields.max_npdu,
            connected_at: now,
            last_heartbeat_at: now,
        });
        self.state = SessionState::Established;
    }
}

fn format_vmac(vmac: &[u8; 6]) -> String {
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        vmac[0], vmac[1], vmac[2], vmac[3], vmac[4], vmac[5]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::{demo_points, PointDef};
    use crate::wire::frame::FrameFunction;

    fn handler() -> SessionHandler {
        let points = Arc::new(PointTable::new(demo_points()));
        SessionHandler::new(
            Arc::new(HubIdentity::default()),
            points,
            LiveTable::new(),
            Arc::new(OverrideStore::new()),
            "test-peer",
        )
    }

    fn connect_request() -> Vec<u8> {
        Frame::ConnectRequest(ConnectFields {
            vmac: [0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F],
            uuid: [0x11; 16],
            max_frame: 1500,
            max_npdu: 1497,
        })
        .encode()
        .to_vec()
    }

    #[test]
    fn handshake_produces_connect_accept() {
        let mut handler = handler();
        assert_eq!(handler.state(), SessionState::Handshaking);

        let outcome = handler.on_frame(&connect_request());
        assert!(!outcome.close);
        assert_eq!(outcome.replies.len(), 1);

        let reply = Frame::decode(&outcome.replies[0]).unwrap();
        match reply {
            Frame::ConnectAccept(fields) => {
                assert_eq!(fields.vmac, [0, 0, 0, 0, 0, 1]);
                assert_eq!(fields.max_frame, 1500);
            }
            other => panic!("expected ConnectAccept, got {:?}", other),
        }

        assert_eq!(handler.state(), SessionState::Established);
        let session = handler.session().unwrap();
        assert_eq!(session.remote_vmac, [0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F]);
    }

    #[test]
    fn non_connect_frame_during_handshake_closes() {
        let mut handler = handler();
        let outcome = handler.on_frame(&Frame::HeartbeatRequest.encode());
        assert!(outcome.close);
        assert!(outcome.replies.is_empty());
        assert_eq!(handler.state(), SessionState::Closing);
    }

    #[test]
    fn garbage_during_handshake_closes() {
        let mut handler = handler();
        let outcome = handler.on_frame(&[0xFF, 0x00, 0x01]);
        assert!(outcome.close);
    }

    #[test]
    fn heartbeat_gets_ack_when_established() {
        let mut handler = handler();
        handler.on_frame(&connect_request());

        let outcome = handler.on_frame(&Frame::HeartbeatRequest.encode());
        assert!(!outcome.close);
        assert_eq!(
            Frame::decode(&outcome.replies[0]).unwrap().function(),
            FrameFunction::HeartbeatAck
        );
    }

    #[test]
    fn bad_frame_when_established_is_dropped_not_fatal() {
        let mut handler = handler();
        handler.on_frame(&connect_request());

        // Unknown function code, then a truncated NPDU frame.
        let outcome = handler.on_frame(&[0x55, 0x01, 0x02]);
        assert!(!outcome.close && outcome.replies.is_empty());
        let outcome = handler.on_frame(&[0x02, 0x01]);
        assert!(!outcome.close && outcome.replies.is_empty());

        // Session still answers heartbeats afterwards.
        let outcome = handler.on_frame(&Frame::HeartbeatRequest.encode());
        assert_eq!(outcome.replies.len(), 1);
        assert_eq!(handler.state(), SessionState::Established);
    }

    #[test]
    fn timeout_silences_the_session() {
        let mut handler = handler();
        handler.on_frame(&connect_request());
        handler.on_timeout();
        assert_eq!(handler.state(), SessionState::TimedOut);

        let outcome = handler.on_frame(&Frame::HeartbeatRequest.encode());
        assert!(outcome.replies.is_empty());
    }

    #[test]
    fn point_table_is_shared_not_copied() {
        // Two handlers over one table observe the same generation.
        let points = Arc::new(PointTable::new(vec![PointDef::new("a.b", "AB")]));
        let identity = Arc::new(HubIdentity::default());
        let live = LiveTable::new();
        let store = Arc::new(OverrideStore::new());
        let h1 = SessionHandler::new(
            identity.clone(),
            points.clone(),
            live.clone(),
            store.clone(),
            "p1",
        );
        let h2 = SessionHandler::new(identity, points.clone(), live, store, "p2");
        assert_eq!(Arc::strong_count(&points), 3);
        drop(h1);
        drop(h2);
    }
}
