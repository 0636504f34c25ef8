//! Wire-format properties of the comm protocol as a backend sees them.

use kernel_chat_protocol::text::{extract_options, split_segments};
use kernel_chat_protocol::{
    EnvelopeHeader, Incoming, Message, MessageDisplay, MessagePart, MessagePartType, MessageType,
    OptionItem, Outgoing, OutgoingEnvelope, ProtocolError, Target,
};
use serde_json::json;

fn option(key: &str, label: &str) -> OptionItem {
    OptionItem {
        key: key.to_string(),
        label: label.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Addressing
// ---------------------------------------------------------------------------

#[test]
fn test_every_target_survives_the_wire() {
    for target in Target::ALL {
        let message = Message::new("x", MessageType::Bot, target);
        let value = serde_json::to_value(&message).unwrap();
        let decoded: Message = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.target(), target, "target {}", target.as_str());
    }
}

#[test]
fn test_build_address_uses_numeric_attributes() {
    let message = Message::new("x", MessageType::Cell, Target::Build);
    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["display"], 1);
    assert_eq!(value["kernelProcess"], 2);
    assert_eq!(value["kernelDisplay"], 2);
    assert_eq!(value["type"], "cell");
}

#[test]
fn test_backend_message_keeps_type_specific_fields() {
    let raw = json!({
        "id": "m-7",
        "text": "pick one",
        "type": "options",
        "timestamp": 1_700_000_000_000_i64,
        "display": 0,
        "kernelProcess": 1,
        "kernelDisplay": 0,
        "feedback": { "thumbs": "up" },
        "alternatives": ["a", "b"]
    });

    let message: Message = serde_json::from_value(raw.clone()).unwrap();

    assert_eq!(message.target(), Target::Bot);
    assert_eq!(message.display, MessageDisplay::Default);
    assert_eq!(message.payload["feedback"], json!({ "thumbs": "up" }));
    let echoed = serde_json::to_value(&message).unwrap();
    assert_eq!(echoed["alternatives"], raw["alternatives"]);
    assert_eq!(echoed["feedback"], raw["feedback"]);
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

#[test]
fn test_unordered_options() {
    assert_eq!(
        extract_options("- a\n- b", MessageType::Options),
        vec![option("OP-0: a", "a"), option("OP-1: b", "b")]
    );
}

#[test]
fn test_ordered_options_with_explicit_keys() {
    assert_eq!(
        extract_options("1::bot::First\n-2::bot::Second", MessageType::Ordered),
        vec![option("1", "1. First"), option("2", "2. Second")]
    );
}

#[test]
fn test_segments_in_order() {
    assert_eq!(
        split_segments("t#: hello ####c#: print(1)####zz#: odd"),
        vec![
            MessagePart {
                kind: MessagePartType::Text,
                text: "hello".to_string(),
            },
            MessagePart {
                kind: MessagePartType::Code,
                text: "print(1)".to_string(),
            },
            MessagePart {
                kind: MessagePartType::Text,
                text: "zz#: odd".to_string(),
            },
        ]
    );
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

#[test]
fn test_outgoing_message_envelope_is_flat() {
    let mut message = Message::reply_to("q-1", "42", MessageType::User, Target::User);
    message.id = "a-1".to_string();
    message.timestamp = 5;
    let envelope = OutgoingEnvelope::new("base", Outgoing::Message { message });

    let value = envelope.to_value().unwrap();

    assert_eq!(envelope.operation(), "message");
    assert_eq!(value["operation"], "message");
    assert_eq!(value["instance"], "base");
    assert_eq!(value["message"]["id"], "a-1");
    assert_eq!(value["message"]["reply"], "q-1");
    assert!(value["message"].get("new").is_none());
}

#[test]
fn test_meta_envelopes_address_the_sentinel() {
    for envelope in [
        OutgoingEnvelope::refresh_meta(),
        OutgoingEnvelope::save_instances(),
        OutgoingEnvelope::remove_instance("x"),
        OutgoingEnvelope::load_instances(json!({})),
    ] {
        assert_eq!(envelope.to_value().unwrap()["instance"], "<meta>");
    }
    assert_eq!(
        OutgoingEnvelope::init().to_value().unwrap(),
        json!({ "operation": "init", "instance": "<all>" })
    );
}

#[test]
fn test_sync_meta_decodes_instance_set() {
    let value = json!({
        "operation": "sync-meta",
        "instance": "<meta>",
        "loaders": { "newton": { "form": ["name"] } },
        "instances": {
            "base": { "mode": "newton", "history": [] },
            "tutor": {
                "mode": "tutor",
                "history": [{ "id": "h-1", "type": "bot", "timestamp": 1 }],
                "config": { "show_time": false }
            }
        }
    });

    let header = EnvelopeHeader::read(&value).unwrap();
    assert!(header.is_meta());
    let Incoming::SyncMeta { loaders, instances } = Incoming::from_value(&value).unwrap() else {
        panic!("expected sync-meta");
    };
    assert!(loaders.contains_key("newton"));

    let decoded = Incoming::decode_instances(instances).unwrap();
    let names: Vec<&str> = decoded.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["base", "tutor"]);
    assert_eq!(decoded[1].1.history[0].id, "h-1");
    assert_eq!(decoded[1].1.config["show_time"], false);
}

#[test]
fn test_unknown_inbound_operation_is_named() {
    let value = json!({ "operation": "teleport", "instance": "base" });
    assert!(matches!(
        Incoming::from_value(&value),
        Err(ProtocolError::UnknownOperation(op)) if op == "teleport"
    ));
}
