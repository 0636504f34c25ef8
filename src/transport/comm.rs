//! The comm channel slot.
//!
//! At most one [`CommChannel`] is attached at a time. It is replaced whenever
//! the kernel opens a new comm and cleared on reset, so every send looks the
//! channel up again. Sending with no live channel is a silent drop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use kernel_chat_protocol::OutgoingEnvelope;
use parking_lot::Mutex;
use serde_json::Value;

/// One end of a comm opened by the kernel.
pub trait CommChannel: Send + Sync {
    /// Kernel-assigned comm id.
    fn comm_id(&self) -> &str;

    /// Whether the kernel still holds the other end.
    fn is_open(&self) -> bool;

    /// Queue one record for the kernel.
    fn send(&self, data: Value) -> Result<(), String>;
}

/// Result of a send attempt. A drop is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Dropped,
}

impl SendOutcome {
    pub fn is_sent(self) -> bool {
        self == SendOutcome::Sent
    }
}

/// Holder of the currently attached channel, plus send counters.
pub struct CommSlot {
    channel: Mutex<Option<Arc<dyn CommChannel>>>,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl CommSlot {
    pub fn new() -> Self {
        Self {
            channel: Mutex::new(None),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Attach `channel`, replacing any previous one.
    pub fn attach(&self, channel: Arc<dyn CommChannel>) {
        log::info!("Comm channel '{}' attached", channel.comm_id());
        *self.channel.lock() = Some(channel);
    }

    /// Forget the current channel.
    pub fn detach(&self) -> Option<Arc<dyn CommChannel>> {
        let previous = self.channel.lock().take();
        if let Some(channel) = &previous {
            log::info!("Comm channel '{}' detached", channel.comm_id());
        }
        previous
    }

    /// Forget the current channel only if it is `comm_id`.
    pub fn detach_id(&self, comm_id: &str) -> bool {
        let mut channel = self.channel.lock();
        if channel
            .as_ref()
            .is_some_and(|current| current.comm_id() == comm_id)
        {
            *channel = None;
            log::info!("Comm channel '{comm_id}' closed by the kernel");
            true
        } else {
            false
        }
    }

    /// Whether a send right now would reach the kernel.
    pub fn is_live(&self) -> bool {
        self.channel
            .lock()
            .as_ref()
            .is_some_and(|channel| channel.is_open())
    }

    /// Send `envelope` on the live channel, or drop it.
    pub fn send(&self, envelope: &OutgoingEnvelope) -> SendOutcome {
        let operation = envelope.operation();
        let channel = self.channel.lock().clone();
        let Some(channel) = channel.filter(|channel| channel.is_open()) else {
            return self.drop_send(operation, &envelope.instance, "no live comm channel");
        };

        let data = match envelope.to_value() {
            Ok(data) => data,
            Err(e) => {
                log::error!("Failed to encode '{operation}' envelope: {e}");
                return self.drop_send(operation, &envelope.instance, "encode failure");
            }
        };

        match channel.send(data) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                log::debug!("Sent '{operation}' for instance '{}'", envelope.instance);
                SendOutcome::Sent
            }
            Err(e) => self.drop_send(operation, &envelope.instance, &e),
        }
    }

    fn drop_send(&self, operation: &str, instance: &str, reason: &str) -> SendOutcome {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        log::debug!("Dropped '{operation}' for instance '{instance}': {reason}");
        SendOutcome::Dropped
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for CommSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Send through a slot the caller does not own. A slot that no longer
/// exists drops the send.
pub(crate) fn send_via(comm: &Weak<CommSlot>, envelope: &OutgoingEnvelope) -> SendOutcome {
    match comm.upgrade() {
        Some(slot) => slot.send(envelope),
        None => {
            log::debug!(
                "Dropped '{}' for instance '{}': transport is gone",
                envelope.operation(),
                envelope.instance
            );
            SendOutcome::Dropped
        }
    }
}
