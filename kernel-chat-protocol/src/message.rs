//! Chat message model.
//!
//! A [`Message`] is the unit of the conversation log. Its identity (`id`) and
//! creation time (`timestamp`) are fixed once assigned; the backend may later
//! patch mutable fields such as `loading` through a sync round-trip.
//!
//! The three address attributes (`display`, `kernelProcess`, `kernelDisplay`)
//! travel as small integers. Their logical meaning is resolved in
//! [`crate::target`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::target::{Address, Target};

/// Opaque unique message token (UUID v4 text for client-created messages).
pub type MessageId = String;

// ---------------------------------------------------------------------------
// Closed attribute sets
// ---------------------------------------------------------------------------

/// Content kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Bot,
    Ordered,
    Options,
    Cell,
    User,
    Error,
    Unified,
}

impl MessageType {
    /// Wire name of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Bot => "bot",
            MessageType::Ordered => "ordered",
            MessageType::Options => "options",
            MessageType::Cell => "cell",
            MessageType::User => "user",
            MessageType::Error => "error",
            MessageType::Unified => "unified",
        }
    }
}

/// Where a message is shown. Used for both `display` and `kernelDisplay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageDisplay {
    #[default]
    Default,
    Hidden,
    /// Input composed while in wizard mode; shown as a preview and, as a
    /// `kernelDisplay`, marks build messages.
    WizardInput,
}

impl From<MessageDisplay> for u8 {
    fn from(value: MessageDisplay) -> Self {
        match value {
            MessageDisplay::Default => 0,
            MessageDisplay::Hidden => 1,
            MessageDisplay::WizardInput => 2,
        }
    }
}

impl TryFrom<u8> for MessageDisplay {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageDisplay::Default),
            1 => Ok(MessageDisplay::Hidden),
            2 => Ok(MessageDisplay::WizardInput),
            other => Err(ProtocolError::InvalidDiscriminant {
                field: "display",
                value: other,
            }),
        }
    }
}

/// Whether the kernel should run its bot over the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum KernelProcess {
    #[default]
    Prevent,
    /// Process when the instance's `process_in_kernel` setting allows it.
    Process,
    /// Always process.
    Force,
}

impl From<KernelProcess> for u8 {
    fn from(value: KernelProcess) -> Self {
        match value {
            KernelProcess::Prevent => 0,
            KernelProcess::Process => 1,
            KernelProcess::Force => 2,
        }
    }
}

impl TryFrom<u8> for KernelProcess {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(KernelProcess::Prevent),
            1 => Ok(KernelProcess::Process),
            2 => Ok(KernelProcess::Force),
            other => Err(ProtocolError::InvalidDiscriminant {
                field: "kernelProcess",
                value: other,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One entry of a conversation log.
///
/// Type-dependent content beyond `text` (feedback, alternatives, ...) is kept
/// verbatim in [`Message::payload`] so that a message survives a round trip
/// through the client untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub reply: Option<MessageId>,
    #[serde(default)]
    pub display: MessageDisplay,
    #[serde(default)]
    pub kernel_process: KernelProcess,
    #[serde(default)]
    pub kernel_display: MessageDisplay,
    #[serde(default)]
    pub loading: bool,
    /// Client-local "unseen" marker. Never transmitted.
    #[serde(default, skip_serializing)]
    pub new: bool,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Message {
    /// Build a client-originated message with a fresh id and timestamp.
    pub fn new(text: impl Into<String>, kind: MessageType, target: Target) -> Self {
        let address = target.resolve();
        Self {
            id: new_message_id(),
            text: text.into(),
            kind,
            timestamp: now_millis(),
            reply: None,
            display: address.display,
            kernel_process: address.kernel_process,
            kernel_display: address.kernel_display,
            loading: false,
            new: false,
            payload: Map::new(),
        }
    }

    /// Build a client-originated answer to `reply`.
    pub fn reply_to(
        reply: impl Into<MessageId>,
        text: impl Into<String>,
        kind: MessageType,
        target: Target,
    ) -> Self {
        Self::new(text, kind, target).with_reply(reply)
    }

    /// Set the message this one answers.
    pub fn with_reply(mut self, reply: impl Into<MessageId>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Raw address triple as carried on the wire.
    pub fn address(&self) -> Address {
        Address {
            display: self.display,
            kernel_process: self.kernel_process,
            kernel_display: self.kernel_display,
        }
    }

    /// Logical target of the message (see [`Target::classify`]).
    pub fn target(&self) -> Target {
        Target::classify(self.address())
    }

    /// Overwrite the address triple with the canonical encoding of `target`.
    pub fn set_target(&mut self, target: Target) {
        let address = target.resolve();
        self.display = address.display;
        self.kernel_process = address.kernel_process;
        self.kernel_display = address.kernel_display;
    }

    /// Copy this message under a new identity, re-addressed to `target`.
    ///
    /// The copy never shares `id` or `timestamp` with the original.
    pub fn clone_as(&self, target: Target) -> Message {
        let mut copy = self.clone();
        copy.id = new_message_id();
        copy.timestamp = now_millis();
        copy.set_target(target);
        copy
    }

    /// Whether this message leaves the conversation waiting for an answer.
    ///
    /// Only User- and Bot-addressed messages qualify, and only when the
    /// current turn (`wizard_mode` means the wizard is answering) differs from
    /// the side that produced the message.
    pub fn expects_reply(&self, wizard_mode: bool) -> bool {
        let from_bot = self.kind != MessageType::User;
        matches!(self.target(), Target::User | Target::Bot) && wizard_mode != from_bot
    }
}

fn new_message_id() -> MessageId {
    uuid::Uuid::new_v4().to_string()
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Pick lists
// ---------------------------------------------------------------------------

/// Entry of the message-type picker offered to wizard authors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeItem {
    pub kind: MessageType,
    pub label: &'static str,
    pub key: &'static str,
}

/// Message types selectable when composing a bot message, with shortcut keys.
pub const BOT_TYPES: [TypeItem; 7] = [
    TypeItem {
        kind: MessageType::Bot,
        label: "Bot",
        key: "n",
    },
    TypeItem {
        kind: MessageType::Ordered,
        label: "Ordered",
        key: "o",
    },
    TypeItem {
        kind: MessageType::Options,
        label: "Items",
        key: "i",
    },
    TypeItem {
        kind: MessageType::Cell,
        label: "Code",
        key: "c",
    },
    TypeItem {
        kind: MessageType::User,
        label: "User",
        key: "u",
    },
    TypeItem {
        kind: MessageType::Error,
        label: "Error",
        key: "e",
    },
    TypeItem {
        kind: MessageType::Unified,
        label: "Unified",
        key: "a",
    },
];

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
