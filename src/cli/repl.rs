//! Prompt commands.
//!
//! Each stdin line is either chat text, sent to the current instance as a
//! User-addressed message, or a `/`-prefixed command:
//!
//! | command | effect |
//! |---|---|
//! | `/refresh` | meta refresh plus a refresh of every instance |
//! | `/new <name> [mode]` | ask the backend to create an instance |
//! | `/remove <name>` | ask the backend to remove an instance |
//! | `/save` | ask the backend to save the instance set |
//! | `/use <name>` | switch the current instance |
//! | `/config <key> <json>` | set a config cell of the current instance |
//! | `/complete <query>` | send an autocomplete query |
//! | `/compose <target> <type> <text>` | send a message with an explicit address and type, picked by key |
//! | `/quit` | leave |

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use kernel_chat_protocol::text::{extract_options, split_segments};
use kernel_chat_protocol::{BOT_TARGETS, BOT_TYPES, BotConfig, Message, MessageType, Target};
use serde_json::Value;
use thiserror::Error;

use crate::error::ChatError;
use crate::transport::Transport;
use crate::transport::comm::SendOutcome;

/// One parsed prompt line.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Say(String),
    Refresh,
    New { name: String, mode: Option<String> },
    Remove(String),
    Save,
    Use(String),
    Config { key: String, value: Value },
    Complete(String),
    Compose {
        target: Target,
        kind: MessageType,
        text: String,
    },
    Quit,
}

#[derive(Debug, Error)]
pub enum ReplError {
    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unknown command '/{0}'")]
    UnknownCommand(String),

    #[error("unknown {what} key '{key}'")]
    UnknownKey { what: &'static str, key: String },

    #[error("value for '{key}' is not valid JSON: {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse one prompt line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ReplCommand>, ReplError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(ReplCommand::Say(line.to_string())));
    };

    let (verb, rest) = command
        .split_once(char::is_whitespace)
        .map(|(verb, rest)| (verb, rest.trim()))
        .unwrap_or((command, ""));
    let mut words = rest.split_whitespace();

    let parsed = match verb {
        "refresh" => ReplCommand::Refresh,
        "save" => ReplCommand::Save,
        "quit" | "exit" => ReplCommand::Quit,
        "new" => {
            let name = words.next().ok_or(ReplError::Usage("/new <name> [mode]"))?;
            ReplCommand::New {
                name: name.to_string(),
                mode: words.next().map(str::to_string),
            }
        }
        "remove" => ReplCommand::Remove(
            words
                .next()
                .ok_or(ReplError::Usage("/remove <name>"))?
                .to_string(),
        ),
        "use" => ReplCommand::Use(
            words
                .next()
                .ok_or(ReplError::Usage("/use <name>"))?
                .to_string(),
        ),
        "config" => {
            let (key, raw) = rest
                .split_once(char::is_whitespace)
                .ok_or(ReplError::Usage("/config <key> <json>"))?;
            let value = serde_json::from_str(raw.trim()).map_err(|source| {
                ReplError::InvalidValue {
                    key: key.to_string(),
                    source,
                }
            })?;
            ReplCommand::Config {
                key: key.to_string(),
                value,
            }
        }
        "complete" => {
            if rest.is_empty() {
                return Err(ReplError::Usage("/complete <query>"));
            }
            ReplCommand::Complete(rest.to_string())
        }
        "compose" => {
            const USAGE: &str = "/compose <target> <type> <text>";
            let mut parts = rest.splitn(3, char::is_whitespace);
            let (Some(target_key), Some(type_key), Some(text)) =
                (parts.next(), parts.next(), parts.next())
            else {
                return Err(ReplError::Usage(USAGE));
            };
            let text = text.trim();
            if text.is_empty() {
                return Err(ReplError::Usage(USAGE));
            }
            let target = BOT_TARGETS
                .iter()
                .find(|item| item.key == target_key)
                .ok_or_else(|| ReplError::UnknownKey {
                    what: "target",
                    key: target_key.to_string(),
                })?
                .target;
            let kind = BOT_TYPES
                .iter()
                .find(|item| item.key == type_key)
                .ok_or_else(|| ReplError::UnknownKey {
                    what: "type",
                    key: type_key.to_string(),
                })?
                .kind;
            ReplCommand::Compose {
                target,
                kind,
                text: text.to_string(),
            }
        }
        other => return Err(ReplError::UnknownCommand(other.to_string())),
    };
    Ok(Some(parsed))
}

/// Applies prompt commands to a transport.
pub struct ReplSession {
    transport: Arc<Transport>,
    current: String,
    next_request: i64,
}

impl ReplSession {
    pub fn new(transport: Arc<Transport>, current: impl Into<String>) -> Self {
        Self {
            transport,
            current: current.into(),
            next_request: 0,
        }
    }

    /// Name of the instance chat text goes to.
    pub fn current(&self) -> &str {
        &self.current
    }

    /// Run one command. Returns a status line for the user, if any.
    pub fn apply(&mut self, command: ReplCommand) -> Result<Option<String>, ChatError> {
        match command {
            ReplCommand::Say(text) => {
                let instance = self.transport.instance(&self.current)?;
                let mut message = Message::new(text, MessageType::User, Target::User);
                if let Some(pending) = instance.replying() {
                    message = message.with_reply(pending);
                }
                Ok(dropped_notice(instance.add_new(message)))
            }
            ReplCommand::Refresh => {
                self.transport.refresh_all();
                Ok(Some("refreshing all instances".to_string()))
            }
            ReplCommand::New { name, mode } => {
                let mode =
                    mode.unwrap_or_else(|| self.transport.config().default_instance.mode.clone());
                let outcome = self
                    .transport
                    .create_instance(&name, &mode, BotConfig::new())?;
                Ok(dropped_notice(outcome)
                    .or_else(|| Some(format!("requested instance '{name}' ({mode})"))))
            }
            ReplCommand::Remove(name) => Ok(dropped_notice(self.transport.remove_instance(&name))),
            ReplCommand::Save => Ok(dropped_notice(self.transport.save_instances())),
            ReplCommand::Use(name) => {
                self.transport.instance(&name)?;
                self.current = name;
                Ok(Some(format!("now talking to '{}'", self.current)))
            }
            ReplCommand::Config { key, value } => {
                let instance = self.transport.instance(&self.current)?;
                match instance.config_var(&key) {
                    Some(cell) => Ok(dropped_notice(cell.set(value))),
                    None => Ok(Some(format!("unknown config '{key}'"))),
                }
            }
            ReplCommand::Complete(query) => {
                let instance = self.transport.instance(&self.current)?;
                self.next_request += 1;
                Ok(dropped_notice(
                    instance.send_autocomplete(self.next_request, query),
                ))
            }
            ReplCommand::Compose { target, kind, text } => {
                let instance = self.transport.instance(&self.current)?;
                Ok(dropped_notice(instance.add_new(Message::new(text, kind, target))))
            }
            ReplCommand::Quit => Ok(None),
        }
    }
}

fn dropped_notice(outcome: SendOutcome) -> Option<String> {
    (!outcome.is_sent()).then(|| "(no kernel connection; nothing was sent)".to_string())
}

/// Plain-text rendering of a message for the terminal.
pub fn render_message(message: &Message) -> String {
    match message.kind {
        MessageType::Options | MessageType::Ordered => {
            let mut lines = Vec::new();
            for option in extract_options(&message.text, message.kind) {
                lines.push(format!("  [{}] {}", option.key, option.label));
            }
            lines.join("\n")
        }
        MessageType::Unified => split_segments(&message.text)
            .into_iter()
            .map(|part| part.text)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => message.text.clone(),
    }
}

/// Write an exported instance set to `<dir>/instances.json`.
pub fn write_export(dir: &Path, data: &Value) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create export directory {}", dir.display()))?;
    let path = dir.join("instances.json");
    let json = serde_json::to_string_pretty(data).context("failed to encode instance set")?;
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
