//! Operation envelopes exchanged over the comm channel.
//!
//! Every record is a flat JSON object `{operation, instance, ...fields}`.
//! [`OutgoingEnvelope`] covers the client-to-kernel catalog; [`Incoming`] the
//! kernel-to-client catalog. Inbound records are read in two steps: the
//! [`EnvelopeHeader`] (routing only) and then the typed body, so the caller
//! can decide on routing before paying for, or failing on, the full decode.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::message::{Message, MessageId};

/// Instance name addressing the connection as a whole rather than one
/// conversation.
pub const META_INSTANCE: &str = "<meta>";

/// Instance name addressing every conversation at once.
pub const ALL_INSTANCES: &str = "<all>";

/// Backend-owned description of a bot's configuration form.
pub type LoaderForm = Map<String, Value>;

/// Backend-owned bot configuration values.
pub type BotConfig = Map<String, Value>;

/// One autocomplete suggestion. Its shape belongs to the bot.
pub type AutoCompleteItem = Value;

// ---------------------------------------------------------------------------
// Shared records
// ---------------------------------------------------------------------------

/// Full hydration record for one conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub bot_config: BotConfig,
    #[serde(default)]
    pub bot_config_loader: LoaderForm,
}

/// How the backend should treat a config value sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigMode {
    /// Client-chosen default; the backend keeps its own value if it has one.
    Init,
    /// Deliberate client override.
    Update,
}

/// Partial message sent to request a backend-side patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPatch {
    pub id: MessageId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SyncPatch {
    pub fn new(id: impl Into<MessageId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Add one field to the patch.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Outgoing
// ---------------------------------------------------------------------------

/// Client-to-kernel operation body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "kebab-case")]
pub enum Outgoing {
    Init,
    Message {
        message: Message,
    },
    NewInstance {
        name: String,
        mode: String,
        data: BotConfig,
    },
    RemoveInstance {
        name: String,
    },
    Refresh,
    SaveInstances,
    LoadInstances {
        data: Value,
    },
    Config {
        key: String,
        value: Value,
        #[serde(alias = "_mode")]
        mode: ConfigMode,
    },
    SyncMessage {
        message: SyncPatch,
    },
    AutocompleteQuery {
        #[serde(rename = "requestId")]
        request_id: i64,
        query: String,
    },
    UpdateInstanceBot {
        data: BotConfig,
    },
}

impl Outgoing {
    /// Operation tag as written on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Outgoing::Init => "init",
            Outgoing::Message { .. } => "message",
            Outgoing::NewInstance { .. } => "new-instance",
            Outgoing::RemoveInstance { .. } => "remove-instance",
            Outgoing::Refresh => "refresh",
            Outgoing::SaveInstances => "save-instances",
            Outgoing::LoadInstances { .. } => "load-instances",
            Outgoing::Config { .. } => "config",
            Outgoing::SyncMessage { .. } => "sync-message",
            Outgoing::AutocompleteQuery { .. } => "autocomplete-query",
            Outgoing::UpdateInstanceBot { .. } => "update-instance-bot",
        }
    }
}

/// A client-to-kernel record: the operation body plus its instance address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingEnvelope {
    pub instance: String,
    #[serde(flatten)]
    pub body: Outgoing,
}

impl OutgoingEnvelope {
    pub fn new(instance: impl Into<String>, body: Outgoing) -> Self {
        Self {
            instance: instance.into(),
            body,
        }
    }

    /// Broadcast `init` asking every conversation to re-send its state.
    pub fn init() -> Self {
        Self::new(ALL_INSTANCES, Outgoing::Init)
    }

    /// Refresh one conversation.
    pub fn refresh(instance: impl Into<String>) -> Self {
        Self::new(instance, Outgoing::Refresh)
    }

    /// Ask the backend to re-send the loader table and instance set.
    pub fn refresh_meta() -> Self {
        Self::new(META_INSTANCE, Outgoing::Refresh)
    }

    pub fn new_instance(name: impl Into<String>, mode: impl Into<String>, data: BotConfig) -> Self {
        Self::new(
            META_INSTANCE,
            Outgoing::NewInstance {
                name: name.into(),
                mode: mode.into(),
                data,
            },
        )
    }

    pub fn remove_instance(name: impl Into<String>) -> Self {
        Self::new(META_INSTANCE, Outgoing::RemoveInstance { name: name.into() })
    }

    pub fn save_instances() -> Self {
        Self::new(META_INSTANCE, Outgoing::SaveInstances)
    }

    pub fn load_instances(data: Value) -> Self {
        Self::new(META_INSTANCE, Outgoing::LoadInstances { data })
    }

    /// Operation tag of the body.
    pub fn operation(&self) -> &'static str {
        self.body.name()
    }

    /// Encode as the JSON object written to the channel.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

// ---------------------------------------------------------------------------
// Incoming
// ---------------------------------------------------------------------------

/// Routing fields of an inbound record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub operation: String,
    pub instance: String,
}

impl EnvelopeHeader {
    /// Read the routing fields without decoding the body.
    pub fn read(value: &Value) -> Result<Self, ProtocolError> {
        let field = |name: &'static str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(ProtocolError::MissingField(name))
        };
        Ok(Self {
            operation: field("operation")?,
            instance: field("instance")?,
        })
    }

    /// Whether the record addresses the connection rather than a conversation.
    pub fn is_meta(&self) -> bool {
        self.instance == META_INSTANCE
    }
}

/// Kernel-to-client operation body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "kebab-case")]
pub enum Incoming {
    /// Meta: loader table and the authoritative instance set.
    SyncMeta {
        #[serde(default)]
        loaders: Map<String, Value>,
        #[serde(default)]
        instances: Map<String, Value>,
    },
    /// Meta: exported instance set.
    Instances {
        #[serde(default)]
        data: Value,
    },
    Init(InstanceInfo),
    Refresh(InstanceInfo),
    Reply {
        message: Message,
    },
    UpdateMessage {
        message: Message,
    },
    UpdateConfig {
        config: Map<String, Value>,
    },
    Error {
        #[serde(default)]
        command: String,
        #[serde(default)]
        message: String,
    },
    AutocompleteResponse {
        #[serde(rename = "responseId")]
        response_id: i64,
        #[serde(default)]
        items: Vec<AutoCompleteItem>,
    },
}

impl Incoming {
    /// Every operation tag the client understands.
    pub const OPERATIONS: [&'static str; 9] = [
        "sync-meta",
        "instances",
        "init",
        "refresh",
        "reply",
        "update-message",
        "update-config",
        "error",
        "autocomplete-response",
    ];

    /// Decode a full inbound record.
    ///
    /// Unknown operation tags are reported as such rather than as a generic
    /// decode failure.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let header = EnvelopeHeader::read(value)?;
        if !Self::OPERATIONS.contains(&header.operation.as_str()) {
            return Err(ProtocolError::UnknownOperation(header.operation));
        }
        Incoming::deserialize(value).map_err(|source| ProtocolError::Malformed {
            operation: header.operation,
            source,
        })
    }

    /// Decode the instance set carried by `sync-meta`.
    pub fn decode_instances(
        instances: Map<String, Value>,
    ) -> Result<Vec<(String, InstanceInfo)>, ProtocolError> {
        instances
            .into_iter()
            .map(|(name, info)| {
                serde_json::from_value(info)
                    .map(|info| (name, info))
                    .map_err(|source| ProtocolError::Malformed {
                        operation: "sync-meta".to_string(),
                        source,
                    })
            })
            .collect()
    }
}
