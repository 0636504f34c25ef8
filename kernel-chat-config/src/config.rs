//! [`ClientConfig`]: everything the client needs to reach its backend.

use std::collections::HashMap;
use std::path::PathBuf;

use kernel_chat_protocol::{ALL_INSTANCES, META_INSTANCE};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Log verbosity for the debug log file.
///
/// The `--log-level` CLI flag and `RUST_LOG` take precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to `log::LevelFilter`
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// The conversation created eagerly at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultInstance {
    pub name: String,
    pub mode: String,
}

impl Default for DefaultInstance {
    fn default() -> Self {
        Self {
            name: "base".to_string(),
            mode: "newton".to_string(),
        }
    }
}

/// How to launch the process-backed kernel used by the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelSettings {
    /// Executable to spawn.
    pub command: String,
    pub args: Vec<String>,
    /// Extra environment for the kernel process.
    pub env: HashMap<String, String>,
    /// Kernel spec name reported to the flavor matcher.
    pub name: String,
    /// Language reported to the flavor matcher when the kernel does not say.
    pub language: String,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec!["-m".to_string(), "newtonchat.stdio".to_string()],
            env: HashMap::new(),
            name: "python3".to_string(),
            language: "python".to_string(),
        }
    }
}

/// Client configuration, loaded from `config.yaml`.
///
/// Every field falls back to its default when absent from the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Comm target name the backend opens its channel on.
    pub comm_target: String,

    /// Backend module imported by the python init script.
    pub backend_module: String,

    /// Start with the wizard holding the turn.
    pub wizard_mode: bool,

    /// Ask the backend to load a saved instance set during init.
    pub load_instances: bool,

    /// Saved instance-set file handed to the backend (`NewtonInstancesPath`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances_path: Option<String>,

    /// Instance modes the client may create. Empty means unrestricted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub restrict: Vec<String>,

    pub default_instance: DefaultInstance,

    /// Where exported instance sets are written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_dir: Option<PathBuf>,

    pub kernel: KernelSettings,

    pub log_level: LogLevel,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            comm_target: "newton.comm".to_string(),
            backend_module: "newtonchat.comm".to_string(),
            wizard_mode: false,
            load_instances: false,
            instances_path: None,
            restrict: Vec::new(),
            default_instance: DefaultInstance::default(),
            export_dir: None,
            kernel: KernelSettings::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl ClientConfig {
    /// Check field values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.comm_target.trim().is_empty() {
            return Err(ConfigError::Validation(
                "comm_target must not be empty".to_string(),
            ));
        }
        if self.backend_module.trim().is_empty() {
            return Err(ConfigError::Validation(
                "backend_module must not be empty".to_string(),
            ));
        }
        let name = self.default_instance.name.trim();
        if name.is_empty() {
            return Err(ConfigError::Validation(
                "default_instance.name must not be empty".to_string(),
            ));
        }
        if name == META_INSTANCE || name == ALL_INSTANCES {
            return Err(ConfigError::Validation(format!(
                "default_instance.name '{name}' is reserved"
            )));
        }
        Ok(())
    }

    /// Whether the client may create an instance of `mode`.
    pub fn allows_mode(&self, mode: &str) -> bool {
        self.restrict.is_empty() || self.restrict.iter().any(|allowed| allowed == mode)
    }

    /// Error value the backend reports when the init script cannot import
    /// [`Self::backend_module`].
    pub fn missing_module_evalue(&self) -> String {
        format!("No module named '{}'", self.backend_module)
    }

    /// Environment for the kernel process, including the saved instance path.
    pub fn kernel_env(&self) -> HashMap<String, String> {
        let mut env = self.kernel.env.clone();
        if let Some(path) = &self.instances_path {
            env.insert("NewtonInstancesPath".to_string(), path.clone());
        }
        env
    }
}
