//! Property tests for envelope encoding and decoding.

#![allow(clippy::unwrap_used)]

use parlor_proto::{Command, EventFrame, MessageKind, ProtocolError, ServerEvent};
use proptest::prelude::{any, proptest};

proptest! {
    // Decoding never panics, whatever the wire carries.
    #[test]
    fn decode_arbitrary_input_never_panics(raw in any::<String>()) {
        let _ = EventFrame::decode(&raw);
    }

    // An envelope with a fabricated type is reported as unknown, not
    // malformed: the two failure modes stay distinguishable so the
    // dispatcher can log them differently.
    #[test]
    fn fabricated_types_decode_to_unknown(kind in "[a-z_]{1,24}") {
        let raw = format!(r#"{{"type":"{kind}","success":true,"data":{{}}}}"#);
        let frame = EventFrame::decode(&raw).unwrap();

        match ServerEvent::from_frame(frame) {
            Ok(_) => {}, // Happened to hit a real type with an empty-compatible payload
            Err(ProtocolError::UnknownEventType { event_type }) => assert_eq!(event_type, kind),
            Err(ProtocolError::InvalidPayload { event_type, .. }) => assert_eq!(event_type, kind),
            Err(other) => panic!("unexpected error class: {other}"),
        }
    }

    // Commands always produce an envelope the server can route: valid
    // JSON object, command name present, room_id present.
    #[test]
    fn commands_encode_routable_envelopes(room in "[a-z0-9-]{1,16}", content in ".{0,64}") {
        let cmd = Command::SendMessage {
            room_id: room.clone(),
            local_id: "local-1".into(),
            content,
            kind: MessageKind::Text,
        };

        let wire = cmd.into_frame().unwrap().encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["command"], "send_message");
        assert_eq!(value["room_id"], room.as_str());
        assert!(value["data"].is_object());
    }
}
