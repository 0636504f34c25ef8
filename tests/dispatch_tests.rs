//! Routing of inbound records through `Transport::on_message`.

mod common;

use common::{attached_transport, info_json, reply_envelope, wire_message};
use kernel_chat::{ChatError, DispatchError, InstanceError, TransportEvent};
use kernel_chat_config::ClientConfig;
use kernel_chat_protocol::{MessageType, Target};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

fn record_events(transport: &kernel_chat::Transport) -> Arc<Mutex<Vec<TransportEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    transport.subscribe(move |event| sink.lock().push(event.clone()));
    events
}

// ---------------------------------------------------------------------------
// Unknown instances
// ---------------------------------------------------------------------------

#[test]
fn test_unknown_instance_triggers_one_meta_refresh() {
    let (transport, channel, reporter) = attached_transport(ClientConfig::default(), false);
    let events = record_events(&transport);

    let message = wire_message("m-1", MessageType::Bot, Target::User);
    transport.on_message(reply_envelope("ghost", &message));

    assert_eq!(
        channel.sent(),
        vec![json!({ "operation": "refresh", "instance": "<meta>" })]
    );
    assert_eq!(reporter.len(), 0);
    assert_eq!(transport.unknown_instance_count(), 1);
    assert_eq!(
        *events.lock(),
        vec![TransportEvent::UnknownInstance("ghost".to_string())]
    );
    assert_eq!(transport.registry().names(), vec!["base".to_string()]);
}

#[test]
fn test_unknown_instance_is_checked_before_decoding() {
    let (transport, channel, reporter) = attached_transport(ClientConfig::default(), false);

    // The body is malformed but the instance is unknown, so only the refresh
    // happens.
    transport.on_message(json!({ "operation": "reply", "instance": "ghost" }));

    assert_eq!(channel.operations(), vec!["refresh"]);
    assert_eq!(reporter.len(), 0);
}

// ---------------------------------------------------------------------------
// Meta records
// ---------------------------------------------------------------------------

#[test]
fn test_instances_export_only_in_wizard_mode() {
    let data = json!({ "base": info_json("newton", &[]) });
    let record = json!({ "operation": "instances", "instance": "<meta>", "data": data });

    let (plain, _channel, reporter) = attached_transport(ClientConfig::default(), false);
    let plain_events = record_events(&plain);
    plain.on_message(record.clone());
    assert!(plain_events.lock().is_empty());
    assert_eq!(reporter.len(), 0);

    let (wizard, _channel, reporter) = attached_transport(ClientConfig::default(), true);
    let wizard_events = record_events(&wizard);
    wizard.on_message(record);
    assert_eq!(
        *wizard_events.lock(),
        vec![TransportEvent::InstancesExported(data)]
    );
    assert_eq!(reporter.len(), 0);
}

#[test]
fn test_conversation_operation_on_meta_is_unexpected() {
    let (transport, _channel, reporter) = attached_transport(ClientConfig::default(), false);
    let message = wire_message("m-1", MessageType::Bot, Target::User);

    transport.on_message(reply_envelope("<meta>", &message));

    let reports = reporter.take();
    assert_eq!(reports.len(), 1);
    assert!(matches!(
        &reports[0].error,
        ChatError::Dispatch {
            source: DispatchError::UnexpectedOperation { operation, instance },
            ..
        } if operation == "reply" && instance == "<meta>"
    ));
}

// ---------------------------------------------------------------------------
// Instance records
// ---------------------------------------------------------------------------

#[test]
fn test_init_hydrates_and_marks_kernel() {
    let (transport, channel, reporter) = attached_transport(ClientConfig::default(), false);
    let mut record = info_json(
        "tutor",
        &[
            wire_message("a", MessageType::User, Target::Bot),
            wire_message("b", MessageType::Bot, Target::User),
        ],
    );
    record["operation"] = json!("init");
    record["instance"] = json!("base");
    record["config"] = json!({ "show_time": false });

    transport.on_message(record);

    let base = transport.instance("base").unwrap();
    assert_eq!(base.mode(), "newton");
    assert_eq!(base.len(), 2);
    assert_eq!(base.replying().as_deref(), Some("b"));
    assert!(!base.config_var("show_time").unwrap().get_bool());
    assert!(transport.context().kernel_status().has_kernel);
    assert!(channel.sent().is_empty(), "hydration must not echo config");
    assert_eq!(reporter.len(), 0);
}

#[test]
fn test_init_with_repeated_ids_keeps_log_id_unique() {
    let (transport, _channel, reporter) = attached_transport(ClientConfig::default(), false);
    let mut first = wire_message("a", MessageType::Bot, Target::User);
    first.text = "first".to_string();
    let mut second = wire_message("a", MessageType::Bot, Target::User);
    second.text = "second".to_string();
    let mut record = info_json("newton", &[first, second]);
    record["operation"] = json!("init");
    record["instance"] = json!("base");

    transport.on_message(record);

    let base = transport.instance("base").unwrap();
    let texts: Vec<String> = base.messages().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, vec!["second".to_string()]);
    assert_eq!(base.find_by_id(Some("a")).unwrap().text, "second");
    assert_eq!(reporter.len(), 0);
}

#[test]
fn test_update_message_for_unknown_id_is_reported() {
    let (transport, _channel, reporter) = attached_transport(ClientConfig::default(), false);
    let base = transport.instance("base").unwrap();
    base.push(wire_message("m-1", MessageType::Bot, Target::User))
        .unwrap();
    let before = base.messages();

    transport.on_message(json!({
        "operation": "update-message",
        "instance": "base",
        "message": wire_message("ghost", MessageType::Bot, Target::User)
    }));

    let reports = reporter.take();
    assert_eq!(reports.len(), 1);
    assert!(matches!(
        &reports[0].error,
        ChatError::Dispatch {
            source: DispatchError::Instance(InstanceError::UnknownMessage(id)),
            ..
        } if id == "ghost"
    ));
    assert_eq!(base.messages(), before);
}

#[test]
fn test_duplicate_reply_is_reported_once() {
    let (transport, _channel, reporter) = attached_transport(ClientConfig::default(), false);
    let message = wire_message("m-1", MessageType::Bot, Target::User);

    transport.on_message(reply_envelope("base", &message));
    transport.on_message(reply_envelope("base", &message));

    assert_eq!(transport.instance("base").unwrap().len(), 1);
    assert_eq!(reporter.len(), 1);
}

#[test]
fn test_backend_error_is_reported_with_instance() {
    let (transport, _channel, reporter) = attached_transport(ClientConfig::default(), false);

    transport.on_message(json!({
        "operation": "error",
        "instance": "base",
        "command": "message",
        "message": "bot crashed"
    }));

    let reports = reporter.take();
    assert_eq!(reports.len(), 1);
    assert!(matches!(
        &reports[0].error,
        ChatError::Backend { command, message } if command == "message" && message == "bot crashed"
    ));
    assert_eq!(reports[0].context, vec![json!("base")]);
}

#[test]
fn test_autocomplete_response_routes_to_instance() {
    let (transport, channel, reporter) = attached_transport(ClientConfig::default(), false);
    let base = transport.instance("base").unwrap();
    base.send_autocomplete(3, "im");
    assert_eq!(channel.operations(), vec!["autocomplete-query"]);

    transport.on_message(json!({
        "operation": "autocomplete-response",
        "instance": "base",
        "responseId": 3,
        "items": ["import", "imag"]
    }));

    let state = base.autocomplete();
    assert_eq!(state.response_id, 3);
    assert_eq!(state.items, vec![json!("import"), json!("imag")]);
    assert_eq!(reporter.len(), 0);
}

#[test]
fn test_non_object_record_is_reported() {
    let (transport, _channel, reporter) = attached_transport(ClientConfig::default(), false);
    transport.on_message(json!(["not", "a", "record"]));
    let reports = reporter.take();
    assert_eq!(reports.len(), 1);
    assert!(matches!(
        &reports[0].error,
        ChatError::Dispatch { operation, .. } if operation == "<missing>"
    ));
}
