//! Backend-synchronized configuration cells.
//!
//! A [`ConfigVar`] is written locally by [`ConfigVar::set`], which also tells
//! the backend, and hydrated by [`ConfigVar::load`], which never does. Until
//! the first hydration every `set` is sent with mode `init`; afterwards with
//! mode `update`.

use std::sync::Weak;

use kernel_chat_protocol::{ConfigMode, Outgoing, OutgoingEnvelope};
use parking_lot::Mutex;
use serde_json::Value;

use crate::observer::{ObserverId, Observers};
use crate::transport::comm::{CommSlot, SendOutcome, send_via};

/// Names and defaults of the cells every instance starts with.
pub const DEFAULT_CONFIG: [(&str, bool); 12] = [
    ("process_in_kernel", true),
    ("enable_autocomplete", true),
    ("enable_auto_loading", false),
    ("loading", false),
    ("process_base_chat_message", true),
    ("show_replied", false),
    ("show_index", false),
    ("show_time", true),
    ("show_build_messages", true),
    ("show_kernel_messages", true),
    ("show_metadata", false),
    ("direct_send_to_user", false),
];

#[derive(Debug)]
struct CellState {
    value: Value,
    initialized: bool,
}

/// One named configuration value of a conversation.
pub struct ConfigVar {
    instance: String,
    name: String,
    state: Mutex<CellState>,
    comm: Weak<CommSlot>,
    observers: Observers<Value>,
}

impl ConfigVar {
    pub(crate) fn new(
        instance: impl Into<String>,
        name: impl Into<String>,
        initial: Value,
        comm: Weak<CommSlot>,
    ) -> Self {
        Self {
            instance: instance.into(),
            name: name.into(),
            state: Mutex::new(CellState {
                value: initial,
                initialized: false,
            }),
            comm,
            observers: Observers::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> Value {
        self.state.lock().value.clone()
    }

    /// Current value as a flag; non-boolean values read as `false`.
    pub fn get_bool(&self) -> bool {
        self.state.lock().value.as_bool().unwrap_or(false)
    }

    /// Whether the backend has hydrated this cell at least once.
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Set the value locally and send it to the backend.
    pub fn set(&self, value: Value) -> SendOutcome {
        let mode = {
            let mut state = self.state.lock();
            state.value = value.clone();
            if state.initialized {
                ConfigMode::Update
            } else {
                ConfigMode::Init
            }
        };
        self.observers.notify(&value);
        send_via(
            &self.comm,
            &OutgoingEnvelope::new(
                self.instance.as_str(),
                Outgoing::Config {
                    key: self.name.clone(),
                    value,
                    mode,
                },
            ),
        )
    }

    /// Hydrate from the backend. Never sends.
    pub fn load(&self, value: Value) {
        self.apply_load(value);
        self.notify_current();
    }

    /// Hydrate without notifying, for callers batching several changes.
    pub(crate) fn apply_load(&self, value: Value) {
        let mut state = self.state.lock();
        state.value = value;
        state.initialized = true;
    }

    pub(crate) fn notify_current(&self) {
        let value = self.get();
        self.observers.notify(&value);
    }

    pub fn subscribe(&self, listener: impl Fn(&Value) + Send + Sync + 'static) -> ObserverId {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }
}
