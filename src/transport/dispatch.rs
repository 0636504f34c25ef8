//! Inbound routing.
//!
//! Each record is decoded into an [`Incoming`] before any state is touched.
//! Records on the `<meta>` sentinel go to the connection-level handlers;
//! records naming an instance the registry does not hold trigger a meta
//! refresh instead of an error; everything else is handed to the named
//! instance. No failure escapes [`Transport::on_message`]: each one becomes
//! a single report to the context's error reporter.

use std::sync::atomic::Ordering;

use kernel_chat_protocol::{EnvelopeHeader, Incoming};
use serde_json::Value;

use super::{Transport, TransportEvent};
use crate::error::{ChatError, DispatchError};
use crate::instance::ChatInstance;

impl Transport {
    /// Route one record received on the comm channel.
    pub fn on_message(&self, value: Value) {
        let header = match EnvelopeHeader::read(&value) {
            Ok(header) => header,
            Err(e) => {
                let operation = value
                    .get("operation")
                    .and_then(Value::as_str)
                    .unwrap_or("<missing>")
                    .to_string();
                self.context.report(
                    ChatError::Dispatch {
                        operation,
                        source: e.into(),
                    },
                    "on_message",
                    vec![value],
                );
                return;
            }
        };
        log::trace!(
            "Received '{}' for instance '{}'",
            header.operation,
            header.instance
        );

        if let Err(source) = self.dispatch(&header, &value) {
            self.context.report(
                ChatError::Dispatch {
                    operation: header.operation,
                    source,
                },
                "on_message",
                vec![value],
            );
        }
    }

    fn dispatch(&self, header: &EnvelopeHeader, value: &Value) -> Result<(), DispatchError> {
        if header.is_meta() {
            let incoming = Incoming::from_value(value)?;
            return self.dispatch_meta(header, incoming);
        }

        let Some(instance) = self.registry.get(&header.instance) else {
            self.recover_unknown_instance(header);
            return Ok(());
        };
        let incoming = Incoming::from_value(value)?;
        self.dispatch_instance(header, &instance, incoming)
    }

    fn dispatch_meta(
        &self,
        header: &EnvelopeHeader,
        incoming: Incoming,
    ) -> Result<(), DispatchError> {
        match incoming {
            Incoming::SyncMeta { loaders, instances } => {
                let reported = Incoming::decode_instances(instances)?;
                *self.loaders.lock() = loaders;
                self.registry.reconcile(reported);
                // Observers must see the reconciled set along with the loaders.
                self.observers.notify(&TransportEvent::LoadersChanged);
                Ok(())
            }
            Incoming::Instances { data } => {
                if self.context.wizard_mode() {
                    log::info!("Backend exported its instance set");
                    self.observers.notify(&TransportEvent::InstancesExported(data));
                } else {
                    log::debug!("Ignoring instance export outside wizard mode");
                }
                Ok(())
            }
            _ => Err(unexpected(header)),
        }
    }

    fn dispatch_instance(
        &self,
        header: &EnvelopeHeader,
        instance: &ChatInstance,
        incoming: Incoming,
    ) -> Result<(), DispatchError> {
        match incoming {
            Incoming::Init(info) | Incoming::Refresh(info) => {
                self.mark_has_kernel();
                instance.hydrate(info);
            }
            Incoming::Reply { message } => {
                self.mark_has_kernel();
                instance.push(message)?;
            }
            Incoming::UpdateMessage { message } => {
                self.mark_has_kernel();
                instance.update_message(message)?;
            }
            Incoming::UpdateConfig { config } => {
                instance.hydrate_config(&config);
            }
            Incoming::Error { command, message } => {
                self.context.report(
                    ChatError::Backend { command, message },
                    "on_message",
                    vec![Value::String(header.instance.clone())],
                );
            }
            Incoming::AutocompleteResponse { response_id, items } => {
                instance.receive_autocomplete(response_id, items);
            }
            Incoming::SyncMeta { .. } | Incoming::Instances { .. } => {
                return Err(unexpected(header));
            }
        }
        Ok(())
    }

    /// A record for an instance we do not hold: the backend knows something
    /// we missed, so ask for the whole set again.
    fn recover_unknown_instance(&self, header: &EnvelopeHeader) {
        let seen = self.unknown_instances.fetch_add(1, Ordering::Relaxed) + 1;
        log::warn!(
            "'{}' for unknown instance '{}' (seen {seen} so far); refreshing instance set",
            header.operation,
            header.instance
        );
        self.observers.notify(&TransportEvent::UnknownInstance(header.instance.clone()));
        self.refresh_meta();
    }

    fn mark_has_kernel(&self) {
        self.context.update_status(|status| status.has_kernel = true);
    }
}

fn unexpected(header: &EnvelopeHeader) -> DispatchError {
    DispatchError::UnexpectedOperation {
        operation: header.operation.clone(),
        instance: header.instance.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AppContext;
    use crate::test_support::{CollectingReporter, RecordingChannel};
    use kernel_chat_config::ClientConfig;
    use serde_json::json;
    use std::sync::Arc;

    fn transport() -> (Arc<Transport>, Arc<RecordingChannel>, Arc<CollectingReporter>) {
        let reporter = Arc::new(CollectingReporter::default());
        let context = Arc::new(AppContext::with_reporter(false, reporter.clone()));
        let transport = Transport::new(ClientConfig::default(), context);
        let channel = RecordingChannel::new("c-1");
        transport.attach_channel(channel.clone());
        (transport, channel, reporter)
    }

    #[test]
    fn test_unknown_operation_is_reported() {
        let (transport, _channel, reporter) = transport();
        transport.on_message(json!({ "operation": "explode", "instance": "base" }));
        let reports = reporter.take();
        assert_eq!(reports.len(), 1);
        assert!(matches!(
            &reports[0].error,
            ChatError::Dispatch { source: DispatchError::UnknownOperation(op), .. } if op == "explode"
        ));
    }

    #[test]
    fn test_missing_instance_field_is_reported() {
        let (transport, _channel, reporter) = transport();
        transport.on_message(json!({ "operation": "reply" }));
        let reports = reporter.take();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].origin, "on_message");
    }

    #[test]
    fn test_meta_operation_on_instance_is_unexpected() {
        let (transport, _channel, reporter) = transport();
        transport.on_message(json!({ "operation": "sync-meta", "instance": "base" }));
        let reports = reporter.take();
        assert!(matches!(
            &reports[0].error,
            ChatError::Dispatch { source: DispatchError::UnexpectedOperation { .. }, .. }
        ));
    }

    #[test]
    fn test_update_config_hydrates_known_cells() {
        let (transport, channel, reporter) = transport();
        transport.on_message(json!({
            "operation": "update-config",
            "instance": "base",
            "config": { "show_index": true, "bogus": 3 }
        }));
        let base = transport.instance("base").unwrap();
        assert!(base.config_var("show_index").unwrap().get_bool());
        assert!(reporter.take().is_empty());
        assert!(channel.sent().is_empty());
    }

    #[test]
    fn test_reply_sets_has_kernel() {
        let (transport, _channel, _reporter) = transport();
        assert!(!transport.context().kernel_status().has_kernel);
        transport.on_message(json!({
            "operation": "reply",
            "instance": "base",
            "message": { "id": "m-1", "text": "hi", "type": "bot", "timestamp": 1 }
        }));
        assert!(transport.context().kernel_status().has_kernel);
        assert_eq!(transport.instance("base").unwrap().len(), 1);
    }
}
