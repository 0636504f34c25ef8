//! Shared integration test helpers for kernel-chat.
//!
//! This module provides an in-memory comm channel, a scripted kernel session
//! and a collecting error reporter, plus factories wiring them to a
//! [`Transport`].
//!
//! # Usage
//!
//! ```ignore
//! mod common;
//! use common::{connected_transport, reply_envelope};
//! ```
//!
//! Note: Rust integration tests use `mod common;` (not `use`) to bring in
//! helpers from `tests/common/mod.rs`. The `#![allow(dead_code)]` attribute
//! suppresses warnings when only a subset of helpers are used per file.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kernel_chat::{
    AppContext, BoxFuture, ChatError, CommChannel, CommOpen, CommOpenHandler, ErrorReport,
    ErrorReporter, ExecuteOutcome, ExecuteRequest, KernelInfo, KernelSession, KernelState,
    Transport,
};
use kernel_chat_config::ClientConfig;
use kernel_chat_protocol::{Message, MessageType, Target};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};

// ---------------------------------------------------------------------------
// Comm channel
// ---------------------------------------------------------------------------

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

    pub fn clear(&self) {
        self.sent.lock().clear();
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

// ---------------------------------------------------------------------------
// Error reporter
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<ErrorReport>>,
}

impl CollectingReporter {
    pub fn take(&self) -> Vec<ErrorReport> {
        std::mem::take(&mut *self.reports.lock())
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, report: ErrorReport) {
        self.reports.lock().push(report);
    }
}

// ---------------------------------------------------------------------------
// Scripted kernel session
// ---------------------------------------------------------------------------

/// Kernel session driven by the test.
///
/// Executing code records it and, like the real backend's init function,
/// opens a comm on the registered target.
pub struct ScriptedKernel {
    info: KernelInfo,
    ready_error: Mutex<Option<String>>,
    outcome: Mutex<ExecuteOutcome>,
    handlers: Mutex<HashMap<String, Arc<dyn Fn(CommOpen) + Send + Sync>>>,
    executed: Mutex<Vec<ExecuteRequest>>,
    comms: Mutex<Vec<(Arc<RecordingChannel>, mpsc::UnboundedSender<Value>)>>,
    status: broadcast::Sender<KernelState>,
    target: String,
}

impl ScriptedKernel {
    pub fn new(name: &str, language: &str) -> Arc<Self> {
        let (status, _) = broadcast::channel(16);
        Arc::new(Self {
            info: KernelInfo {
                name: name.to_string(),
                language: language.to_string(),
            },
            ready_error: Mutex::new(None),
            outcome: Mutex::new(ExecuteOutcome::Ok),
            handlers: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
            comms: Mutex::new(Vec::new()),
            status,
            target: ClientConfig::default().comm_target,
        })
    }

    pub fn python() -> Arc<Self> {
        Self::new("python3", "python")
    }

    pub fn fail_ready(&self, message: &str) {
        *self.ready_error.lock() = Some(message.to_string());
    }

    pub fn set_outcome(&self, outcome: ExecuteOutcome) {
        *self.outcome.lock() = outcome;
    }

    pub fn executed(&self) -> Vec<ExecuteRequest> {
        self.executed.lock().clone()
    }

    pub fn comm_count(&self) -> usize {
        self.comms.lock().len()
    }

    /// Most recently opened comm and the sender feeding its inbound side.
    pub fn last_comm(&self) -> (Arc<RecordingChannel>, mpsc::UnboundedSender<Value>) {
        self.comms
            .lock()
            .last()
            .cloned()
            .expect("no comm has been opened")
    }

    /// Open a comm on the registered target as the kernel would.
    pub fn open_comm(&self) {
        let handler = self.handlers.lock().get(&self.target).cloned();
        let Some(handler) = handler else {
            return;
        };
        let id = format!("comm-{}", self.comms.lock().len() + 1);
        let channel = RecordingChannel::new(&id);
        let (sender, inbound) = mpsc::unbounded_channel();
        self.comms.lock().push((Arc::clone(&channel), sender));
        handler(CommOpen { channel, inbound });
    }

    pub fn emit(&self, state: KernelState) {
        let _ = self.status.send(state);
    }
}

impl KernelSession for ScriptedKernel {
    fn ready(&self) -> BoxFuture<'_, Result<KernelInfo, ChatError>> {
        let result = match self.ready_error.lock().clone() {
            Some(message) => Err(ChatError::Connection(message)),
            None => Ok(self.info.clone()),
        };
        Box::pin(async move { result })
    }

    fn execute(&self, request: ExecuteRequest) -> BoxFuture<'_, Result<ExecuteOutcome, ChatError>> {
        self.executed.lock().push(request);
        self.open_comm();
        let outcome = self.outcome.lock().clone();
        Box::pin(async move { Ok(outcome) })
    }

    fn register_comm_target(&self, target: &str, handler: CommOpenHandler) {
        self.handlers.lock().insert(target.to_string(), Arc::from(handler));
    }

    fn status_changes(&self) -> broadcast::Receiver<KernelState> {
        self.status.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// A transport with a collecting reporter and a recording channel attached.
pub fn attached_transport(
    config: ClientConfig,
    wizard_mode: bool,
) -> (Arc<Transport>, Arc<RecordingChannel>, Arc<CollectingReporter>) {
    let reporter = Arc::new(CollectingReporter::default());
    let context = Arc::new(AppContext::with_reporter(wizard_mode, reporter.clone()));
    let transport = Transport::new(config, context);
    let channel = RecordingChannel::new("c-1");
    transport.attach_channel(channel.clone());
    (transport, channel, reporter)
}

/// A transport with no channel attached.
pub fn detached_transport() -> (Arc<Transport>, Arc<CollectingReporter>) {
    let reporter = Arc::new(CollectingReporter::default());
    let context = Arc::new(AppContext::with_reporter(false, reporter.clone()));
    (Transport::new(ClientConfig::default(), context), reporter)
}

/// A message as the backend would send it: fixed id and timestamp.
pub fn wire_message(id: &str, kind: MessageType, target: Target) -> Message {
    let mut message = Message::new(format!("text of {id}"), kind, target);
    message.id = id.to_string();
    message.timestamp = 1_700_000_000_000;
    message
}

pub fn reply_envelope(instance: &str, message: &Message) -> Value {
    json!({ "operation": "reply", "instance": instance, "message": message })
}

pub fn info_json(mode: &str, history: &[Message]) -> Value {
    json!({
        "mode": mode,
        "history": history,
        "config": {},
        "bot_config": {},
        "bot_config_loader": {}
    })
}

/// Poll `done` until it holds, yielding to spawned tasks in between.
pub async fn settle(mut done: impl FnMut() -> bool) {
    for _ in 0..400 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}
