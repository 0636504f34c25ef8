//! kernel-chat-protocol: wire model for the kernel-chat comm channel.
//!
//! Both halves of the conversation (the client state and the kernel-side
//! backend) exchange JSON records over a single comm channel. This crate owns
//! the shape of those records and the pure helpers that operate on them.
//!
//! # Modules
//!
//! - [`message`] - Chat messages, message types, and the raw address attributes
//! - [`target`] - The logical address of a message and its wire triple
//! - [`text`] - Option-list and segment extraction from raw message text
//! - [`envelope`] - Outgoing and incoming operation envelopes
//! - [`error`] - Errors raised while reading envelopes

pub mod envelope;
pub mod error;
pub mod message;
pub mod target;
pub mod text;

pub use envelope::{
    ALL_INSTANCES, AutoCompleteItem, BotConfig, ConfigMode, EnvelopeHeader, Incoming,
    InstanceInfo, LoaderForm, META_INSTANCE, Outgoing, OutgoingEnvelope, SyncPatch,
};
pub use error::ProtocolError;
pub use message::{
    BOT_TYPES, KernelProcess, Message, MessageDisplay, MessageId, MessageType, TypeItem,
};
pub use target::{Address, BOT_TARGETS, Target, TargetItem};
pub use text::{MessagePart, MessagePartType, OPTION_KEY_SEPARATOR, OptionItem};
