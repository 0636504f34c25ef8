//! Application-wide flags shared by every conversation.
//!
//! One [`AppContext`] is created by the host and passed by `Arc` to the
//! transport, which hands it on to every instance it creates.

use std::sync::Arc;

use kernel_chat_protocol::Message;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{ChatError, ErrorReport, ErrorReporter, LogReporter};
use crate::observer::{ObserverId, Observers};

/// What is known about the kernel behind the comm channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelStatus {
    /// A session has become ready at least once since the last reset.
    pub connected_once: bool,
    /// A comm channel is currently attached.
    pub connected_now: bool,
    /// The backend has answered on the channel since the last reset.
    pub has_kernel: bool,
}

/// Change notifications from [`AppContext`].
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
    WizardModeChanged(bool),
    PreviewAppended(Message),
    KernelStatusChanged(KernelStatus),
    ConnectionReady(bool),
}

#[derive(Debug, Default)]
struct ContextState {
    wizard_mode: bool,
    preview: Vec<Message>,
    status: KernelStatus,
    connection_ready: bool,
}

/// Shared flags, the wizard preview list and the error reporter.
pub struct AppContext {
    state: Mutex<ContextState>,
    reporter: Arc<dyn ErrorReporter>,
    observers: Observers<ContextEvent>,
}

impl AppContext {
    /// Create a context that reports errors to the log.
    pub fn new(wizard_mode: bool) -> Self {
        Self::with_reporter(wizard_mode, Arc::new(LogReporter))
    }

    pub fn with_reporter(wizard_mode: bool, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            state: Mutex::new(ContextState {
                wizard_mode,
                ..Default::default()
            }),
            reporter,
            observers: Observers::new(),
        }
    }

    /// Whether the wizard currently holds the turn.
    pub fn wizard_mode(&self) -> bool {
        self.state.lock().wizard_mode
    }

    pub fn set_wizard_mode(&self, wizard_mode: bool) {
        let changed = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.wizard_mode, wizard_mode) != wizard_mode
        };
        if changed {
            self.observers
                .notify(&ContextEvent::WizardModeChanged(wizard_mode));
        }
    }

    /// Append to the wizard preview list. The list is never trimmed.
    pub fn push_preview(&self, message: Message) {
        self.state.lock().preview.push(message.clone());
        self.observers.notify(&ContextEvent::PreviewAppended(message));
    }

    pub fn preview(&self) -> Vec<Message> {
        self.state.lock().preview.clone()
    }

    pub fn kernel_status(&self) -> KernelStatus {
        self.state.lock().status
    }

    /// Apply `update` to the kernel status, notifying only on change.
    pub fn update_status(&self, update: impl FnOnce(&mut KernelStatus)) {
        let changed = {
            let mut state = self.state.lock();
            let before = state.status;
            update(&mut state.status);
            (before != state.status).then_some(state.status)
        };
        if let Some(status) = changed {
            self.observers
                .notify(&ContextEvent::KernelStatusChanged(status));
        }
    }

    pub fn reset_status(&self) {
        self.update_status(|status| *status = KernelStatus::default());
    }

    /// Whether connect/init has completed on the current session.
    pub fn connection_ready(&self) -> bool {
        self.state.lock().connection_ready
    }

    pub fn set_connection_ready(&self, ready: bool) {
        let changed = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.connection_ready, ready) != ready
        };
        if changed {
            self.observers.notify(&ContextEvent::ConnectionReady(ready));
        }
    }

    /// Funnel a failure to the installed reporter.
    pub fn report(&self, error: ChatError, origin: &'static str, context: Vec<Value>) {
        self.reporter.report(ErrorReport {
            error,
            origin,
            context,
        });
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&ContextEvent) + Send + Sync + 'static,
    ) -> ObserverId {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new(false)
    }
}
