//! Unified logging for kernel-chat.
//!
//! [`init_log_bridge`] installs a `log::Log` implementation that writes every
//! record to `kernel_chat_debug.log` in the temp directory, keeping stdout
//! free for the conversation. When `RUST_LOG` is set, records are mirrored
//! to stderr as well.
//!
//! Level precedence: `--log-level` > `RUST_LOG` > config `log_level`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

use kernel_chat_config::LogLevel;
use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;

struct LogBridge {
    file: Option<Mutex<File>>,
    mirror_stderr: bool,
}

impl LogBridge {
    fn open() -> Self {
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(log_path())
            .ok()
            .map(|mut file| {
                let rule = "=".repeat(80);
                let _ = writeln!(
                    file,
                    "{rule}\nkernel-chat session started at {}\n{rule}",
                    timestamp()
                );
                Mutex::new(file)
            });
        Self {
            file,
            mirror_stderr: std::env::var_os("RUST_LOG").is_some(),
        }
    }
}

impl Log for LogBridge {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{}] [{:<5}] [{}] {}",
            timestamp(),
            record.level(),
            record.target(),
            record.args()
        );
        if let Some(file) = &self.file {
            let mut file = file.lock();
            let _ = writeln!(file, "{line}");
        }
        if self.mirror_stderr {
            eprintln!("{line}");
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.lock().flush();
        }
    }
}

static BRIDGE: OnceLock<LogBridge> = OnceLock::new();

/// Where the log file lives.
pub fn log_path() -> PathBuf {
    std::env::temp_dir().join("kernel_chat_debug.log")
}

/// Install the logger. Safe to call more than once; later calls only adjust
/// the level.
pub fn init_log_bridge(cli_level: Option<LevelFilter>, config_level: LogLevel) -> LevelFilter {
    let level = effective_level(
        cli_level,
        std::env::var("RUST_LOG").ok().as_deref(),
        config_level,
    );
    let bridge = BRIDGE.get_or_init(LogBridge::open);
    if log::set_logger(bridge).is_err() {
        log::debug!("Logger already installed");
    }
    log::set_max_level(level);
    level
}

/// Resolve the level from the CLI flag, `RUST_LOG` and the config file.
///
/// Only a plain level name in `RUST_LOG` is understood; anything else
/// (module filters) falls through to the config level.
pub fn effective_level(
    cli_level: Option<LevelFilter>,
    rust_log: Option<&str>,
    config_level: LogLevel,
) -> LevelFilter {
    if let Some(level) = cli_level {
        return level;
    }
    if let Some(level) = rust_log.and_then(|value| value.trim().parse::<LevelFilter>().ok()) {
        return level;
    }
    config_level.to_level_filter()
}

fn timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}
