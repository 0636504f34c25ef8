//! The kernel session seam.
//!
//! The host supplies a [`KernelSession`]: something that becomes ready,
//! executes code, lets the client register a comm target and reports
//! execution-state changes. The transport never assumes anything about the
//! session surviving a restart.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use kernel_chat_config::ClientConfig;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::error::ChatError;
use crate::transport::comm::CommChannel;

/// Boxed future returned by [`KernelSession`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What the kernel says about itself once ready.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelInfo {
    pub name: String,
    pub language: String,
}

/// Code to run on the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub code: String,
    pub silent: bool,
    pub store_history: bool,
    pub stop_on_error: bool,
}

impl ExecuteRequest {
    /// A background request: no output, no history, no abort on error.
    pub fn silent(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            silent: true,
            store_history: false,
            stop_on_error: false,
        }
    }
}

/// Acknowledgment of one execute request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    Ok,
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
}

/// Kernel execution state as reported on the status stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    Starting,
    Idle,
    Busy,
    Restarting,
    Dead,
}

impl KernelState {
    /// Map a wire status string. Anything ending in `restarting`
    /// (`restarting`, `autorestarting`) is a restart.
    pub fn from_wire(status: &str) -> Option<Self> {
        match status {
            "starting" => Some(Self::Starting),
            "idle" => Some(Self::Idle),
            "busy" => Some(Self::Busy),
            "dead" => Some(Self::Dead),
            other if other.ends_with("restarting") => Some(Self::Restarting),
            _ => None,
        }
    }
}

/// A comm the kernel opened on a registered target.
pub struct CommOpen {
    pub channel: Arc<dyn CommChannel>,
    /// Records the kernel sends on this comm, in order.
    pub inbound: mpsc::UnboundedReceiver<Value>,
}

/// Callback run for every comm opened on a registered target.
pub type CommOpenHandler = Box<dyn Fn(CommOpen) + Send + Sync>;

/// The active backend session.
pub trait KernelSession: Send + Sync {
    /// Resolve once the kernel can accept requests.
    fn ready(&self) -> BoxFuture<'_, Result<KernelInfo, ChatError>>;

    /// Run `request` and wait for its acknowledgment.
    fn execute(&self, request: ExecuteRequest) -> BoxFuture<'_, Result<ExecuteOutcome, ChatError>>;

    /// Route comms the kernel opens on `target` to `handler`. Registering the
    /// same target again replaces the handler.
    fn register_comm_target(&self, target: &str, handler: CommOpenHandler);

    /// Subscribe to execution-state changes.
    fn status_changes(&self) -> broadcast::Receiver<KernelState>;
}

/// Backend runtime flavor, which decides the init script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelFlavor {
    /// Unrecognized runtime; nothing is run on init.
    Generic,
    Python {
        init_script: String,
        missing_module_evalue: String,
    },
}

impl KernelFlavor {
    pub fn detect(info: &KernelInfo, config: &ClientConfig) -> Self {
        let is_python = [&info.name, &info.language]
            .iter()
            .any(|field| field.to_ascii_lowercase().contains("python"));
        if !is_python {
            return Self::Generic;
        }
        let flag = if config.load_instances { "True" } else { "False" };
        let module = &config.backend_module;
        Self::Python {
            init_script: format!("import {module}; {module}.init({flag})"),
            missing_module_evalue: config.missing_module_evalue(),
        }
    }

    pub fn language(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Python { .. } => "python",
        }
    }

    pub fn init_script(&self) -> Option<&str> {
        match self {
            Self::Generic => None,
            Self::Python { init_script, .. } => Some(init_script),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_suffix() {
        assert_eq!(KernelState::from_wire("restarting"), Some(KernelState::Restarting));
        assert_eq!(KernelState::from_wire("autorestarting"), Some(KernelState::Restarting));
        assert_eq!(KernelState::from_wire("idle"), Some(KernelState::Idle));
        assert_eq!(KernelState::from_wire("weird"), None);
    }

    #[test]
    fn test_detect_python_builds_init_script() {
        let info = KernelInfo {
            name: "python3".to_string(),
            language: "python".to_string(),
        };
        let config = ClientConfig {
            load_instances: true,
            ..Default::default()
        };
        let flavor = KernelFlavor::detect(&info, &config);
        assert_eq!(
            flavor.init_script(),
            Some("import newtonchat.comm; newtonchat.comm.init(True)")
        );
        assert_eq!(flavor.language(), "python");
    }

    #[test]
    fn test_detect_unknown_is_generic() {
        let info = KernelInfo {
            name: "ir".to_string(),
            language: "R".to_string(),
        };
        let flavor = KernelFlavor::detect(&info, &ClientConfig::default());
        assert_eq!(flavor, KernelFlavor::Generic);
        assert!(flavor.init_script().is_none());
    }
}
