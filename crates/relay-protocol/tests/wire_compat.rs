// Wire-format fixtures for the WebSocket frame schema. These pin the JSON
// shape clients depend on; breaking one of these breaks deployed clients.

use relay_protocol::{ClientFrame, ServerFrame, WireMessage};

#[test]
fn send_frame_round_trip() {
    let json = r#"{"type":"send","conversation":100,"content":"hello","parent":500,
                   "idempotencyKey":"k-1"}"#;
    let frame: ClientFrame = serde_json::from_str(json).unwrap();
    match frame {
        ClientFrame::Send {
            conversation,
            content,
            parent,
            idempotency_key,
            ..
        } => {
            assert_eq!(conversation, 100);
            assert_eq!(content, "hello");
            assert_eq!(parent, Some(500));
            assert_eq!(idempotency_key.as_deref(), Some("k-1"));
        }
        other => panic!("expected send frame, got {:?}", other),
    }
}

#[test]
fn send_frame_optionals_default() {
    let json = r#"{"type":"send","conversation":1,"content":"hi"}"#;
    let frame: ClientFrame = serde_json::from_str(json).unwrap();
    match frame {
        ClientFrame::Send { parent, metadata, idempotency_key, .. } => {
            assert!(parent.is_none());
            assert!(metadata.is_none());
            assert!(idempotency_key.is_none());
        }
        other => panic!("expected send frame, got {:?}", other),
    }
}

#[test]
fn auth_join_leave_typing_ping() {
    let auth: ClientFrame = serde_json::from_str(r#"{"type":"auth","token":"abc"}"#).unwrap();
    assert!(matches!(auth, ClientFrame::Auth { ref token } if token == "abc"));

    let join: ClientFrame = serde_json::from_str(r#"{"type":"join","conversation":7}"#).unwrap();
    assert!(matches!(join, ClientFrame::Join { conversation: 7 }));

    let leave: ClientFrame = serde_json::from_str(r#"{"type":"leave","conversation":7}"#).unwrap();
    assert!(matches!(leave, ClientFrame::Leave { conversation: 7 }));

    let typing: ClientFrame = serde_json::from_str(r#"{"type":"typing","conversation":7}"#).unwrap();
    assert!(matches!(typing, ClientFrame::Typing { conversation: 7 }));

    let ping: ClientFrame = serde_json::from_str(r#"{"type":"ping","timestamp":123}"#).unwrap();
    assert!(matches!(ping, ClientFrame::Ping { timestamp: 123 }));
}

#[test]
fn ack_carries_message_ids() {
    let ack: ClientFrame =
        serde_json::from_str(r#"{"type":"ack","messageIds":[1,2,3]}"#).unwrap();
    match ack {
        ClientFrame::Ack { message_ids } => assert_eq!(message_ids, vec![1, 2, 3]),
        other => panic!("expected ack, got {:?}", other),
    }
}

#[test]
fn history_request_with_cursor() {
    let json = r#"{"type":"history","conversation":100,"beforeCursor":"t|5","limit":20}"#;
    let frame: ClientFrame = serde_json::from_str(json).unwrap();
    match frame {
        ClientFrame::History { conversation, before_cursor, limit } => {
            assert_eq!(conversation, 100);
            assert_eq!(before_cursor.as_deref(), Some("t|5"));
            assert_eq!(limit, Some(20));
        }
        other => panic!("expected history, got {:?}", other),
    }
}

#[test]
fn unknown_frame_type_is_rejected() {
    assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"selfdestruct"}"#).is_err());
}

#[test]
fn message_frame_shape() {
    let frame = ServerFrame::Message(WireMessage {
        id: 512,
        conversation: 100,
        author: 1,
        content: "hello".to_string(),
        parent: None,
        metadata: serde_json::json!({}),
        created_at: "2026-08-01T12:00:00+00:00".to_string(),
        edited: false,
        edit_count: 0,
        pinned: false,
        thread_reply_count: 0,
    });
    let json = frame.to_json();
    assert!(json.contains(r#""type":"message""#));
    assert!(json.contains(r#""conversation":100"#));
    assert!(json.contains(r#""createdAt":"2026-08-01T12:00:00+00:00""#));
    // absent parent must not serialize as null
    assert!(!json.contains(r#""parent""#));
}

#[test]
fn ready_and_error_shapes() {
    let ready = ServerFrame::Ready {
        session_id: "s-1".to_string(),
        user: serde_json::json!({"id": 1, "handle": "alice"}),
    };
    let json = ready.to_json();
    assert!(json.contains(r#""type":"ready""#));
    assert!(json.contains(r#""sessionId":"s-1""#));

    let err = ServerFrame::error("RATE_LIMITED", "slow down");
    let json = err.to_json();
    assert!(json.contains(r#""code":"RATE_LIMITED""#));
    assert!(json.contains(r#""type":"error""#));
}

#[test]
fn reaction_pin_presence_shapes() {
    let reaction = ServerFrame::Reaction {
        message_id: 500,
        user: 3,
        emoji: "👍".to_string(),
        added: true,
    };
    assert!(reaction.to_json().contains(r#""messageId":500"#));

    let pin = ServerFrame::Pin { message_id: 500, conversation: 100, pinned: true };
    assert!(pin.to_json().contains(r#""pinned":true"#));

    let presence = ServerFrame::Presence { user: 2, online: false, last_seen: Some("t".into()) };
    let json = presence.to_json();
    assert!(json.contains(r#""online":false"#));
    assert!(json.contains(r#""lastSeen":"t""#));
}

#[test]
fn notification_frame_shape() {
    // The live-channel frame for dispatcher notifications. Not a
    // conversation message: the payload carries the notification record.
    let frame = ServerFrame::Notification {
        payload: serde_json::json!({
            "id": "0198-a", "kind": "message.mention", "priority": "high"
        }),
    };
    let json = frame.to_json();
    assert!(json.contains(r#""type":"notification""#));
    assert!(json.contains(r#""kind":"message.mention""#));

    let back: ServerFrame = serde_json::from_str(&json).unwrap();
    assert!(matches!(back, ServerFrame::Notification { .. }));
}

#[test]
fn history_page_round_trip() {
    let frame = ServerFrame::History {
        conversation: 100,
        messages: vec![],
        next_cursor: Some("2026-08-01T00:00:00+00:00|9".to_string()),
    };
    let json = frame.to_json();
    let back: ServerFrame = serde_json::from_str(&json).unwrap();
    match back {
        ServerFrame::History { conversation, next_cursor, .. } => {
            assert_eq!(conversation, 100);
            assert!(next_cursor.is_some());
        }
        other => panic!("expected history, got {:?}", other),
    }
}
