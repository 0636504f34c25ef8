//! kernel-chat: chat client state synchronized with a restart-prone kernel.
//!
//! The client keeps one [`instance::ChatInstance`] per conversation, owned by
//! the [`registry::InstanceRegistry`], and talks to the backend through the
//! [`transport::Transport`], which owns the single comm channel and routes
//! every inbound record.
//!
//! # Locking
//!
//! All client state sits behind `parking_lot` locks that are held only for
//! the duration of one mutation and never across an `.await`. Observers are
//! always notified after the lock is released, so a listener may call back
//! into the object that notified it.

/// Application version (root crate version).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod debug;

pub mod cli;
pub mod context;
pub mod error;
pub mod instance;
pub mod observer;
pub mod registry;
pub mod stdio_kernel;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use context::{AppContext, ContextEvent, KernelStatus};
pub use error::{ChatError, DispatchError, ErrorReport, ErrorReporter, InstanceError, LogReporter};
pub use instance::{AutoCompleteState, ChatInstance, ConfigVar, InstanceEvent};
pub use observer::{ObserverId, Observers};
pub use registry::{InstanceRegistry, ReconcileReport, RegistryEvent};
pub use transport::comm::{CommChannel, CommSlot, SendOutcome};
pub use transport::kernel::{
    BoxFuture, CommOpen, CommOpenHandler, ExecuteOutcome, ExecuteRequest, KernelFlavor,
    KernelInfo, KernelSession, KernelState,
};
pub use transport::{Transport, TransportEvent};
