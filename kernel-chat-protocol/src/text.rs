//! Text segmentation helpers used when building and rendering message payloads.
//!
//! Both functions are pure. Bots encode option lists as dash-prefixed lines
//! (`- first\n- second`, optionally `key::bot::label`) and compound messages as
//! `####`-separated segments whose optional `marker#:` prefix selects the part
//! type.

use serde::{Deserialize, Serialize};

use crate::message::MessageType;

/// Separates an explicit option key from its label inside one option line.
pub const OPTION_KEY_SEPARATOR: &str = "::bot::";

/// Separates the parts of a unified message.
pub const SEGMENT_DELIMITER: &str = "####";

/// Separates a segment's type marker from its text.
pub const SEGMENT_MARKER: &str = "#:";

const OPTION_LINE_DELIMITER: &str = "\n-";

/// A selectable option extracted from message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionItem {
    pub key: String,
    pub label: String,
}

/// Render kind of one part of a unified message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessagePartType {
    Text,
    Html,
    /// Unordered list.
    Ul,
    /// Ordered list.
    Ol,
    /// Unordered list rendered with full option text.
    Ful,
    /// Ordered list rendered with full option text.
    Fol,
    Code,
    DirectCode,
    Input,
}

impl MessagePartType {
    /// Resolve a segment marker (case-insensitive) through the alias table.
    pub fn from_alias(marker: &str) -> Option<Self> {
        let kind = match marker.trim().to_lowercase().as_str() {
            "t" | "text" => MessagePartType::Text,
            "h" | "html" => MessagePartType::Html,
            "u" | "ul" | "unordered" => MessagePartType::Ul,
            "o" | "ol" | "ordered" => MessagePartType::Ol,
            "fu" | "ful" | "full-unordered" => MessagePartType::Ful,
            "fo" | "fol" | "full-ordered" => MessagePartType::Fol,
            "c" | "code" => MessagePartType::Code,
            "dc" | "direct-code" => MessagePartType::DirectCode,
            "i" | "input" => MessagePartType::Input,
            _ => return None,
        };
        Some(kind)
    }
}

/// One typed part of a unified message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "type")]
    pub kind: MessagePartType,
    pub text: String,
}

/// Extract the option list encoded in `text`.
///
/// Lines without an explicit key get `OP-<n>: <label>`, `n` counting every line
/// from zero. For [`MessageType::Ordered`] the label is prefixed with its
/// 1-based position after the key split.
pub fn extract_options(text: &str, kind: MessageType) -> Vec<OptionItem> {
    let mut text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if let Some(rest) = text.strip_prefix(['-', '!']) {
        text = rest.trim();
    }

    text.split(OPTION_LINE_DELIMITER)
        .enumerate()
        .map(|(index, line)| {
            let line = line.trim();
            let mut key = format!("OP-{index}: {line}");
            let mut label = line.to_string();

            let fields: Vec<&str> = line.split(OPTION_KEY_SEPARATOR).collect();
            if let [explicit_key, explicit_label] = fields.as_slice() {
                key = explicit_key.trim().to_string();
                label = explicit_label.trim().to_string();
            }

            if kind == MessageType::Ordered {
                label = format!("{}. {label}", index + 1);
            }
            OptionItem { key, label }
        })
        .collect()
}

/// Split a unified message into typed parts, preserving order.
///
/// Blank segments are dropped. A segment whose marker is missing or not in the
/// alias table becomes a single text part holding the whole segment.
pub fn split_segments(text: &str) -> Vec<MessagePart> {
    text.split(SEGMENT_DELIMITER)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let typed = segment.split_once(SEGMENT_MARKER).and_then(|(marker, rest)| {
                MessagePartType::from_alias(marker).map(|kind| MessagePart {
                    kind,
                    text: rest.trim().to_string(),
                })
            });
            typed.unwrap_or_else(|| MessagePart {
                kind: MessagePartType::Text,
                text: segment.to_string(),
            })
        })
        .collect()
}
