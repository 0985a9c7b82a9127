//! Decoder robustness: truncated and mangled frames must never panic and
//! must never affect the session that receives them.

use std::sync::Arc;

use proptest::prelude::*;

use campus_sc::overrides::OverrideStore;
use campus_sc::points::{demo_points, LiveTable, PointTable};
use campus_sc::sc::{HubIdentity, SessionHandler, SessionState};
use campus_sc::wire::apdu::{
    Apdu, ConfirmedService, ObjectId, ObjectType, PropertyId, PropertyValue, UnconfirmedService,
};
use campus_sc::wire::frame::{ConnectFields, Frame};
use campus_sc::wire::npdu::Npdu;

fn established_handler() -> SessionHandler {
    let mut handler = SessionHandler::new(
        Arc::new(HubIdentity::default()),
        Arc::new(PointTable::new(demo_points())),
        LiveTable::new(),
        Arc::new(OverrideStore::new()),
        "fuzz",
    );
    let connect = Frame::ConnectRequest(ConnectFields {
        vmac: [1, 2, 3, 4, 5, 6],
        uuid: [0x33; 16],
        max_frame: 1500,
        max_npdu: 1497,
    });
    handler.on_frame(&connect.encode());
    assert_eq!(handler.state(), SessionState::Established);
    handler
}

/// Representative valid frames covering every layer.
fn valid_frames() -> Vec<Vec<u8>> {
    let who_is = Apdu::UnconfirmedRequest(UnconfirmedService::WhoIs { range: None });
    let read = Apdu::ConfirmedRequest {
        invoke_id: 1,
        service: ConfirmedService::ReadProperty {
            object: ObjectId::new(ObjectType::AnalogValue, 3),
            property: PropertyId::PresentValue,
        },
    };
    let write = Apdu::ConfirmedRequest {
        invoke_id: 2,
        service: ConfirmedService::WriteProperty {
            object: ObjectId::new(ObjectType::AnalogValue, 3),
            property: PropertyId::PresentValue,
            value: PropertyValue::Real(72.5),
            priority: Some(8),
        },
    };

    let mut frames = vec![
        Frame::ConnectRequest(ConnectFields {
            vmac: [9, 9, 9, 9, 9, 9],
            uuid: [0x44; 16],
            max_frame: 1500,
            max_npdu: 1497,
        })
        .encode()
        .to_vec(),
        Frame::HeartbeatRequest.encode().to_vec(),
    ];
    for apdu in [who_is, read, write] {
        frames.push(
            Frame::EncapsulatedNpdu {
                dest_vmac: [0, 0, 0, 0, 0, 1],
                src_vmac: [1, 2, 3, 4, 5, 6],
                message_id: 7,
                npdu: Npdu::local(apdu.encode()).encode().to_vec(),
            }
            .encode()
            .to_vec(),
        );
    }
    frames
}

#[test]
fn truncation_at_every_offset_never_panics() {
    for frame in valid_frames() {
        for cut in 0..frame.len() {
            // Decoder level: must return, never panic.
            let _ = Frame::decode(&frame[..cut]);

            // Session level: the handler must survive and stay established.
            let mut handler = established_handler();
            let outcome = handler.on_frame(&frame[..cut]);
            assert!(!outcome.close, "truncated frame (cut {}) closed the session", cut);
            assert_eq!(handler.state(), SessionState::Established);

            let heartbeat = handler.on_frame(&Frame::HeartbeatRequest.encode());
            assert_eq!(heartbeat.replies.len(), 1, "session unusable after cut {}", cut);
        }
    }
}

#[test]
fn a_bad_frame_on_one_session_leaves_others_untouched() {
    let points = Arc::new(PointTable::new(demo_points()));
    let store = Arc::new(OverrideStore::new());
    let live = LiveTable::new();
    let identity = Arc::new(HubIdentity::default());

    let mut make = |peer: &str| {
        let mut h = SessionHandler::new(
            Arc::clone(&identity),
            Arc::clone(&points),
            live.clone(),
            Arc::clone(&store),
            peer,
        );
        h.on_frame(
            &Frame::ConnectRequest(ConnectFields {
                vmac: [1, 1, 1, 1, 1, 1],
                uuid: [0x55; 16],
                max_frame: 1500,
                max_npdu: 1497,
            })
            .encode(),
        );
        h
    };
    let mut victim = make("victim");
    let mut healthy = make("healthy");

    victim.on_frame(&[0x02, 0xFF]);
    victim.on_frame(&[0xEE; 40]);

    let outcome = healthy.on_frame(&Frame::HeartbeatRequest.encode());
    assert_eq!(outcome.replies.len(), 1);
    assert_eq!(healthy.state(), SessionState::Established);
}

proptest! {
    /// Arbitrary bytes through every codec layer: errors allowed, panics not.
    #[test]
    fn random_bytes_never_panic_the_decoders(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = Frame::decode(&data);
        let _ = Npdu::decode(&data);
        let _ = Apdu::decode(&data);
    }

    /// Arbitrary bytes into an established session: silence or a reply,
    /// never a panic, never a closed session.
    #[test]
    fn random_bytes_never_break_a_session(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut handler = established_handler();
        let outcome = handler.on_frame(&data);
        prop_assert!(!outcome.close);
        prop_assert_eq!(handler.state(), SessionState::Established);
    }

    /// Flipping one byte of a valid encapsulated frame must not panic.
    #[test]
    fn single_byte_mutations_never_panic(index in 0usize..64, value in any::<u8>()) {
        for mut frame in valid_frames() {
            if index < frame.len() {
                frame[index] = value;
            }
            let mut handler = established_handler();
            let _ = handler.on_frame(&frame);
        }
    }
}
