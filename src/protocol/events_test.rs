use super::*;
use crate::protocol::payload::{NormalizedPoint, StrokeColor};
use serde_json::json;

fn inbound(event: &str, room: Option<&str>, from: Option<&str>, data: Value) -> Frame {
    let mut frame = Frame::new(event, data);
    frame.room_key = room.map(str::to_owned);
    frame.from = from.map(str::to_owned);
    frame
}

fn room(key: &str) -> RoomKey {
    RoomKey::parse(key).expect("room key")
}

// =============================================================
// RoomKey
// =============================================================

#[test]
fn room_key_rejects_blank_and_trims() {
    assert!(RoomKey::parse("").is_none());
    assert!(RoomKey::parse("   ").is_none());
    assert_eq!(room(" req-1 ").as_str(), "req-1");
    assert_eq!(room("req-1").to_string(), "req-1");
}

// =============================================================
// Outbound
// =============================================================

#[test]
fn join_frame_carries_room_in_envelope_and_payload() {
    let frame = Outbound::Join { room_key: room("r1") }.to_frame();
    assert_eq!(frame.event, ROOM_JOIN);
    assert_eq!(frame.room_key.as_deref(), Some("r1"));
    assert_eq!(frame.data, json!({"roomKey": "r1"}));
}

#[test]
fn leave_frame_is_unscoped() {
    let frame = Outbound::Leave.to_frame();
    assert_eq!(frame.event, ROOM_LEAVE);
    assert!(frame.room_key.is_none());
    assert_eq!(frame.data, json!({}));
}

#[test]
fn stroke_frame_is_decodable_as_inbound() {
    let stroke = Stroke::new(
        NormalizedPoint::new(0.1, 0.2),
        NormalizedPoint::new(0.3, 0.4),
        StrokeColor::default(),
        2.0,
        None,
    )
    .expect("stroke");
    let event = DrawEvent::Stroke(StrokeEvent { room_key: room("r1"), stroke, user_id: "u1".to_owned() });
    let frame = Outbound::Draw(event.clone()).to_frame();

    assert_eq!(frame.event, DRAW_STROKE);
    assert_eq!(frame.from.as_deref(), Some("u1"));
    assert_eq!(Inbound::decode(&frame), Ok(Inbound::Draw(event)));
}

#[test]
fn emote_frame_carries_emoji() {
    let event = DrawEvent::Emote(EmoteEvent {
        room_key: room("r1"),
        emoji: "🎉".to_owned(),
        user_id: "u1".to_owned(),
    });
    let frame = Outbound::Draw(event).to_frame();
    assert_eq!(frame.event, DRAW_EMOTE);
    assert_eq!(frame.data, json!({"emoji": "🎉"}));
}

// =============================================================
// Inbound: room and peer events
// =============================================================

#[test]
fn room_joined_reads_peer_ids() {
    let frame = inbound(ROOM_JOINED, Some("r1"), None, json!({"peerIds": ["u2"]}));
    assert_eq!(
        Inbound::decode(&frame),
        Ok(Inbound::RoomJoined { room_key: room("r1"), peer_ids: vec!["u2".to_owned()] })
    );
}

#[test]
fn room_joined_without_peer_list_is_empty() {
    let frame = inbound(ROOM_JOINED, Some("r1"), None, json!({}));
    assert_eq!(
        Inbound::decode(&frame),
        Ok(Inbound::RoomJoined { room_key: room("r1"), peer_ids: Vec::new() })
    );
}

#[test]
fn room_joined_requires_room_key() {
    let frame = inbound(ROOM_JOINED, None, None, json!({"peerIds": []}));
    assert_eq!(Inbound::decode(&frame), Err(DecodeError::MissingField("roomKey")));
}

#[test]
fn room_joined_rejects_non_string_peer() {
    let frame = inbound(ROOM_JOINED, Some("r1"), None, json!({"peerIds": [7]}));
    assert!(matches!(
        Inbound::decode(&frame),
        Err(DecodeError::InvalidField { field: "peerIds", .. })
    ));
}

#[test]
fn peer_events_require_user_id() {
    let joined = inbound(PEER_JOINED, None, None, json!({"userId": "u2"}));
    assert_eq!(Inbound::decode(&joined), Ok(Inbound::PeerJoined { user_id: "u2".to_owned() }));

    let left = inbound(PEER_LEFT, None, None, json!({}));
    assert_eq!(Inbound::decode(&left), Err(DecodeError::MissingField("userId")));

    let waiting = inbound(PEER_WAITING, Some("r9"), None, json!({"userId": "u2"}));
    assert_eq!(
        Inbound::decode(&waiting),
        Ok(Inbound::PeerWaiting { room_key: room("r9"), user_id: "u2".to_owned() })
    );
}

// =============================================================
// Inbound: drawing events
// =============================================================

#[test]
fn malformed_stroke_is_a_payload_error() {
    let frame = inbound(DRAW_STROKE, Some("r1"), Some("u2"), json!({"from": {"x": "a"}}));
    assert_eq!(
        Inbound::decode(&frame),
        Err(DecodeError::Payload(PayloadError::NotANumber("from")))
    );
}

#[test]
fn drawing_events_require_originating_user() {
    let frame = inbound(DRAW_CLEAR, Some("r1"), None, json!({}));
    assert_eq!(Inbound::decode(&frame), Err(DecodeError::MissingField("userId")));
}

#[test]
fn clear_decodes_with_routing_fields() {
    let frame = inbound(DRAW_CLEAR, Some("r1"), Some("u2"), json!({}));
    let Ok(Inbound::Draw(event)) = Inbound::decode(&frame) else {
        panic!("expected draw event");
    };
    assert_eq!(event.room_key(), &room("r1"));
    assert_eq!(event.user_id(), "u2");
}

#[test]
fn blank_emote_is_rejected() {
    let frame = inbound(DRAW_EMOTE, Some("r1"), Some("u2"), json!({"emoji": " "}));
    assert_eq!(Inbound::decode(&frame), Err(DecodeError::MissingField("emoji")));
}

// =============================================================
// Inbound: errors and chat requests
// =============================================================

#[test]
fn transport_error_reads_status_after_float_round_trip() {
    let frame = inbound(TRANSPORT_ERROR, None, None, json!({"message": "nope", "statusCode": 403.0}));
    assert_eq!(
        Inbound::decode(&frame),
        Ok(Inbound::TransportError { message: "nope".to_owned(), status_code: Some(403) })
    );
}

#[test]
fn transport_error_defaults_message_and_status() {
    let frame = inbound(TRANSPORT_ERROR, None, None, json!({}));
    assert_eq!(
        Inbound::decode(&frame),
        Ok(Inbound::TransportError { message: "request failed".to_owned(), status_code: None })
    );
}

#[test]
fn transport_error_keeps_message_when_status_is_malformed() {
    for status in [json!(40.5), json!(0), json!("500"), json!(true)] {
        let frame = inbound(TRANSPORT_ERROR, None, None, json!({"message": "Not in a room", "statusCode": status}));
        assert_eq!(
            Inbound::decode(&frame),
            Ok(Inbound::TransportError { message: "Not in a room".to_owned(), status_code: None }),
            "status {status}"
        );
    }
}

#[test]
fn connect_error_reads_reason() {
    let frame = inbound(CONNECT_ERROR, None, None, json!({"reason": "Unauthorized"}));
    assert_eq!(
        Inbound::decode(&frame),
        Ok(Inbound::ConnectError { reason: "Unauthorized".to_owned() })
    );
}

#[test]
fn chat_requested_reads_sender() {
    let frame = inbound(
        CHAT_REQUESTED,
        None,
        None,
        json!({"requestId": "req-1", "fromUser": {"id": "u2", "displayName": "Ada"}, "message": "hi"}),
    );
    assert_eq!(
        Inbound::decode(&frame),
        Ok(Inbound::ChatRequested {
            request_id: "req-1".to_owned(),
            from_user_id: "u2".to_owned(),
            from_display_name: "Ada".to_owned(),
            message: "hi".to_owned(),
        })
    );
}

#[test]
fn chat_response_falls_back_to_request_id_for_room() {
    let frame = inbound(CHAT_RESPONSE, None, None, json!({"requestId": "req-1", "accepted": true}));
    assert_eq!(
        Inbound::decode(&frame),
        Ok(Inbound::ChatResponse {
            request_id: "req-1".to_owned(),
            accepted: true,
            room_key: Some(room("req-1")),
        })
    );
}

#[test]
fn chat_response_prefers_room_id_from_payload() {
    let frame = inbound(
        CHAT_RESPONSE,
        Some("envelope-room"),
        None,
        json!({"requestId": "req-1", "roomId": "room-9", "accepted": true}),
    );
    let Ok(Inbound::ChatResponse { room_key, .. }) = Inbound::decode(&frame) else {
        panic!("expected chat response");
    };
    assert_eq!(room_key, Some(room("room-9")));

    let blank = inbound(
        CHAT_RESPONSE,
        Some("envelope-room"),
        None,
        json!({"requestId": "req-1", "roomId": "  ", "accepted": false}),
    );
    let Ok(Inbound::ChatResponse { room_key, .. }) = Inbound::decode(&blank) else {
        panic!("expected chat response");
    };
    assert_eq!(room_key, Some(room("envelope-room")));
}

#[test]
fn chat_response_requires_accepted_flag() {
    let frame = inbound(CHAT_RESPONSE, None, None, json!({"requestId": "req-1"}));
    assert_eq!(Inbound::decode(&frame), Err(DecodeError::MissingField("accepted")));
}

#[test]
fn unknown_event_is_rejected() {
    let frame = inbound("board.join", None, None, json!({}));
    assert_eq!(
        Inbound::decode(&frame),
        Err(DecodeError::UnknownEvent("board.join".to_owned()))
    );
}
