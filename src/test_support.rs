//! In-memory doubles for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use kernel_chat_protocol::{Message, MessageType, Target};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{ErrorReport, ErrorReporter};
use crate::transport::comm::CommChannel;

/// Comm channel that records every record sent on it.
pub struct RecordingChannel {
    id: String,
    open: AtomicBool,
    sent: Mutex<Vec<Value>>,
}

impl RecordingChannel {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub fn operations(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|value| value["operation"].as_str().map(str::to_string))
            .collect()
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl CommChannel for RecordingChannel {
    fn comm_id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, data: Value) -> Result<(), String> {
        if !self.is_open() {
            return Err("closed".to_string());
        }
        self.sent.lock().push(data);
        Ok(())
    }
}

/// Reporter that keeps every report for inspection.
#[derive(Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<ErrorReport>>,
}

impl CollectingReporter {
    pub fn take(&self) -> Vec<ErrorReport> {
        std::mem::take(&mut *self.reports.lock())
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, report: ErrorReport) {
        self.reports.lock().push(report);
    }
}

/// A message as the backend would send it: fixed id and timestamp.
pub fn wire_message(id: &str, kind: MessageType, target: Target) -> Message {
    let mut message = Message::new(format!("text of {id}"), kind, target);
    message.id = id.to_string();
    message.timestamp = 1_700_000_000_000;
    message
}
