//! Command-line interface for kernel-chat.
//!
//! This module handles CLI argument parsing. The line-oriented chat commands
//! typed at the prompt live in the [`repl`] submodule.

pub mod repl;

use clap::Parser;
use std::path::PathBuf;

/// kernel-chat - Chat with a bot backend running inside an execution kernel
#[derive(Parser, Debug)]
#[command(name = "kernel-chat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (default: ~/.config/kernel-chat/config.yaml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Set debug log level (overrides config and RUST_LOG)
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,

    /// Conversation to talk to (default: the configured default instance)
    #[arg(long, value_name = "NAME")]
    pub instance: Option<String>,

    /// Start with the wizard holding the turn
    #[arg(long)]
    pub wizard: bool,

    /// Print the backend's instance set and exit
    #[arg(long)]
    pub list_instances: bool,
}

/// Log level argument for CLI
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LogLevelArg {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevelArg {
    /// Convert to `log::LevelFilter`
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevelArg::Off => log::LevelFilter::Off,
            LogLevelArg::Error => log::LevelFilter::Error,
            LogLevelArg::Warn => log::LevelFilter::Warn,
            LogLevelArg::Info => log::LevelFilter::Info,
            LogLevelArg::Debug => log::LevelFilter::Debug,
            LogLevelArg::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Runtime options passed from CLI to the application
#[derive(Clone, Debug, Default)]
pub struct RuntimeOptions {
    /// Explicit configuration file
    pub config_path: Option<PathBuf>,
    /// Log level override from CLI
    pub log_level: Option<log::LevelFilter>,
    /// Instance selected at startup
    pub instance: Option<String>,
    /// Force wizard mode on
    pub wizard: bool,
    /// List instances and exit
    pub list_instances: bool,
}

impl From<Cli> for RuntimeOptions {
    fn from(cli: Cli) -> Self {
        Self {
            config_path: cli.config,
            log_level: cli.log_level.map(|l| l.to_level_filter()),
            instance: cli.instance,
            wizard: cli.wizard,
            list_instances: cli.list_instances,
        }
    }
}

/// Parse the process arguments.
pub fn process_cli() -> RuntimeOptions {
    Cli::parse().into()
}
