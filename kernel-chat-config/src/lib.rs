//! kernel-chat-config: client configuration for kernel-chat.
//!
//! The configuration lives in `~/.config/kernel-chat/config.yaml` and covers
//! how the client reaches its backend (comm target, backend module, kernel
//! command) and which conversation it opens first.
//!
//! # Modules
//!
//! - [`config`] - The [`ClientConfig`] structure, defaults and validation
//! - [`persistence`] - Path resolution and YAML load/save
//! - [`error`] - Typed load/save/validation errors

pub mod config;
pub mod error;
pub mod persistence;

pub use config::{ClientConfig, DefaultInstance, KernelSettings, LogLevel};
pub use error::ConfigError;
