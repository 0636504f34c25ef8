//! Per-conversation client state.
//!
//! A [`ChatInstance`] holds one conversation: the ordered message log and its
//! id index, the config cells, the id of the message awaiting a reply, the
//! backend's bot form/config blobs and the autocomplete correlation state.
//!
//! Every mutation takes the state lock once, applies all of its changes, and
//! notifies observers only after the lock is released. A mutation that fails
//! returns before touching anything, so observers never see a half-applied
//! change.

pub mod config_var;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use kernel_chat_protocol::{
    AutoCompleteItem, BotConfig, InstanceInfo, LoaderForm, Message, MessageDisplay, MessageId,
    Outgoing, OutgoingEnvelope, SyncPatch, Target,
};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use crate::context::AppContext;
use crate::error::InstanceError;
use crate::observer::{ObserverId, Observers};
use crate::transport::comm::{CommSlot, SendOutcome, send_via};

pub use config_var::{ConfigVar, DEFAULT_CONFIG};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Autocomplete correlation state.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoCompleteState {
    /// Id of the most recent query sent, if any.
    pub last_request: Option<i64>,
    /// Id of the response currently held in `items` (`-1` before any).
    pub response_id: i64,
    pub items: Vec<AutoCompleteItem>,
    /// Responses discarded because they did not answer `last_request`.
    pub stale_responses: u64,
}

impl Default for AutoCompleteState {
    fn default() -> Self {
        Self {
            last_request: None,
            response_id: -1,
            items: Vec::new(),
            stale_responses: 0,
        }
    }
}

/// Change notifications from a [`ChatInstance`].
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceEvent {
    MessagePushed(Message),
    MessageUpdated(Message),
    /// The log was replaced wholesale; carries the new length.
    LogLoaded(usize),
    Reset,
    ReplyingChanged(Option<MessageId>),
    AutoCompleteChanged { response_id: i64 },
    BotConfigChanged,
    BotLoaderChanged,
}

#[derive(Debug, Default)]
struct InstanceState {
    log: Vec<Message>,
    index: HashMap<MessageId, usize>,
    replying: Option<MessageId>,
    bot_loader: LoaderForm,
    bot_config: BotConfig,
    autocomplete: AutoCompleteState,
}

impl InstanceState {
    /// Install a snapshot as the log. When an id occurs more than once only
    /// its last occurrence is kept, so the log stays id-unique.
    fn replace_log(&mut self, history: Vec<Message>) {
        let last_seen: HashMap<MessageId, usize> = history
            .iter()
            .enumerate()
            .map(|(position, message)| (message.id.clone(), position))
            .collect();
        let total = history.len();
        let log: Vec<Message> = history
            .into_iter()
            .enumerate()
            .filter(|(position, message)| last_seen.get(&message.id) == Some(position))
            .map(|(_, message)| message)
            .collect();
        if log.len() != total {
            log::warn!(
                "Snapshot holds {total} messages but {} distinct ids; kept the last of each",
                log.len()
            );
        }
        self.index = log
            .iter()
            .enumerate()
            .map(|(position, message)| (message.id.clone(), position))
            .collect();
        self.log = log;
    }

    /// Point `replying` at the last message if it expects a reply.
    fn track_reply(&mut self, wizard_mode: bool) -> Option<Option<MessageId>> {
        let last = self.log.last()?;
        if !last.expects_reply(wizard_mode) {
            return None;
        }
        let id = Some(last.id.clone());
        if self.replying == id {
            return None;
        }
        self.replying = id.clone();
        Some(id)
    }
}

// ---------------------------------------------------------------------------
// ChatInstance
// ---------------------------------------------------------------------------

/// One conversation.
pub struct ChatInstance {
    name: String,
    mode: String,
    state: Mutex<InstanceState>,
    config: RwLock<BTreeMap<String, Arc<ConfigVar>>>,
    comm: Weak<CommSlot>,
    context: Arc<AppContext>,
    observers: Observers<InstanceEvent>,
}

impl ChatInstance {
    /// Create an empty conversation with the default config cells.
    pub fn new(
        name: impl Into<String>,
        mode: impl Into<String>,
        bot_loader: LoaderForm,
        bot_config: BotConfig,
        comm: Weak<CommSlot>,
        context: Arc<AppContext>,
    ) -> Self {
        let instance = Self {
            name: name.into(),
            mode: mode.into(),
            state: Mutex::new(InstanceState {
                bot_loader,
                bot_config,
                ..Default::default()
            }),
            config: RwLock::new(BTreeMap::new()),
            comm,
            context,
            observers: Observers::new(),
        };
        for (name, initial) in DEFAULT_CONFIG {
            instance.create_config_var(name, Value::Bool(initial));
        }
        instance
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend-assigned bot mode.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    // -- Log ----------------------------------------------------------------

    /// Append a message received from the backend.
    ///
    /// The message is flagged `new`. If it expects a reply it becomes the
    /// pending `replying` message. Wizard-preview input is also copied, under
    /// a fresh id, into the context's preview list.
    pub fn push(&self, mut message: Message) -> Result<(), InstanceError> {
        let wizard_mode = self.context.wizard_mode();
        message.new = true;

        let replying = {
            let mut state = self.state.lock();
            if state.index.contains_key(&message.id) {
                return Err(InstanceError::DuplicateMessage(message.id));
            }
            let position = state.log.len();
            state.index.insert(message.id.clone(), position);
            state.log.push(message.clone());
            state.track_reply(wizard_mode)
        };

        if message.display == MessageDisplay::WizardInput {
            self.context.push_preview(message.clone_as(Target::User));
        }
        self.observers.notify(&InstanceEvent::MessagePushed(message));
        if let Some(replying) = replying {
            self.observers.notify(&InstanceEvent::ReplyingChanged(replying));
        }
        Ok(())
    }

    /// Send a message composed on the client.
    ///
    /// In wizard mode with auto-loading on, answering the pending message
    /// first asks the backend to clear that message's loading flag.
    pub fn add_new(&self, message: Message) -> SendOutcome {
        if self.context.wizard_mode() && self.config_bool("enable_auto_loading") {
            let pending = self.replying();
            if let Some(reply) = &message.reply
                && pending.as_ref() == Some(reply)
            {
                self.remove_loading(reply);
            }
        }
        self.send(Outgoing::Message { message })
    }

    /// Replace the log with a backend snapshot.
    ///
    /// `replying` moves to the snapshot's last message if it expects a reply
    /// and is otherwise left as it was.
    pub fn load(&self, history: Vec<Message>) {
        let wizard_mode = self.context.wizard_mode();
        let (len, replying) = {
            let mut state = self.state.lock();
            state.replace_log(history);
            (state.log.len(), state.track_reply(wizard_mode))
        };
        self.observers.notify(&InstanceEvent::LogLoaded(len));
        if let Some(replying) = replying {
            self.observers.notify(&InstanceEvent::ReplyingChanged(replying));
        }
    }

    /// Replace an existing message in place. Never inserts.
    pub fn update_message(&self, message: Message) -> Result<(), InstanceError> {
        {
            let mut state = self.state.lock();
            let Some(&position) = state.index.get(&message.id) else {
                return Err(InstanceError::UnknownMessage(message.id));
            };
            state.log[position] = message.clone();
        }
        self.observers.notify(&InstanceEvent::MessageUpdated(message));
        Ok(())
    }

    /// Ask the backend to patch a message. The local log is not touched; the
    /// change becomes visible when the backend echoes it.
    pub fn submit_sync_message(&self, patch: SyncPatch) -> SendOutcome {
        self.send(Outgoing::SyncMessage { message: patch })
    }

    /// Ask the backend to clear a message's loading flag.
    pub fn remove_loading(&self, id: &str) -> SendOutcome {
        self.submit_sync_message(SyncPatch::new(id).with("loading", false))
    }

    /// Clear the log, the index, the pending reply and autocomplete state.
    /// Config cells keep their values.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.log.clear();
            state.index.clear();
            state.replying = None;
            state.autocomplete = AutoCompleteState::default();
        }
        self.observers.notify(&InstanceEvent::Reset);
    }

    /// Look a message up by id. `None` for an unknown or absent id.
    pub fn find_by_id(&self, id: Option<&str>) -> Option<Message> {
        let id = id?;
        let state = self.state.lock();
        state
            .index
            .get(id)
            .and_then(|&position| state.log.get(position))
            .cloned()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().log.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the message awaiting a reply.
    pub fn replying(&self) -> Option<MessageId> {
        self.state.lock().replying.clone()
    }

    // -- Hydration ----------------------------------------------------------

    /// Fully hydrate from an `init`/`refresh` record.
    pub fn hydrate(&self, info: InstanceInfo) {
        let wizard_mode = self.context.wizard_mode();
        let (len, replying) = {
            let mut state = self.state.lock();
            state.replace_log(info.history);
            state.bot_config = info.bot_config;
            state.bot_loader = info.bot_config_loader;
            (state.log.len(), state.track_reply(wizard_mode))
        };
        let hydrated = self.apply_config(&info.config);

        self.observers.notify(&InstanceEvent::LogLoaded(len));
        if let Some(replying) = replying {
            self.observers.notify(&InstanceEvent::ReplyingChanged(replying));
        }
        self.observers.notify(&InstanceEvent::BotConfigChanged);
        self.observers.notify(&InstanceEvent::BotLoaderChanged);
        for cell in hydrated {
            cell.notify_current();
        }
    }

    /// Hydrate the named cells that exist. Returns how many were hydrated.
    pub fn hydrate_config(&self, config: &Map<String, Value>) -> usize {
        let hydrated = self.apply_config(config);
        for cell in &hydrated {
            cell.notify_current();
        }
        hydrated.len()
    }

    fn apply_config(&self, config: &Map<String, Value>) -> Vec<Arc<ConfigVar>> {
        let cells = self.config.read();
        config
            .iter()
            .filter_map(|(key, value)| match cells.get(key) {
                Some(cell) => {
                    cell.apply_load(value.clone());
                    Some(Arc::clone(cell))
                }
                None => {
                    log::debug!("Instance '{}' ignores unknown config '{key}'", self.name);
                    None
                }
            })
            .collect()
    }

    // -- Config cells -------------------------------------------------------

    /// Create (or replace) a config cell.
    pub fn create_config_var(&self, name: &str, initial: Value) -> Arc<ConfigVar> {
        let cell = Arc::new(ConfigVar::new(
            self.name.as_str(),
            name,
            initial,
            self.comm.clone(),
        ));
        self.config
            .write()
            .insert(name.to_string(), Arc::clone(&cell));
        cell
    }

    pub fn config_var(&self, name: &str) -> Option<Arc<ConfigVar>> {
        self.config.read().get(name).cloned()
    }

    /// Value of every cell, by name.
    pub fn config_values(&self) -> Map<String, Value> {
        self.config
            .read()
            .iter()
            .map(|(name, cell)| (name.clone(), cell.get()))
            .collect()
    }

    fn config_bool(&self, name: &str) -> bool {
        self.config_var(name).is_some_and(|cell| cell.get_bool())
    }

    // -- Bot blobs ----------------------------------------------------------

    pub fn bot_config(&self) -> BotConfig {
        self.state.lock().bot_config.clone()
    }

    pub fn bot_loader(&self) -> LoaderForm {
        self.state.lock().bot_loader.clone()
    }

    /// Send a new bot configuration for this conversation.
    pub fn send_update_instance_bot(&self, data: BotConfig) -> SendOutcome {
        self.send(Outgoing::UpdateInstanceBot { data })
    }

    // -- Autocomplete -------------------------------------------------------

    /// Send an autocomplete query; only the response carrying `request_id`
    /// will be accepted.
    pub fn send_autocomplete(&self, request_id: i64, query: impl Into<String>) -> SendOutcome {
        self.state.lock().autocomplete.last_request = Some(request_id);
        self.send(Outgoing::AutocompleteQuery {
            request_id,
            query: query.into(),
        })
    }

    /// Accept an autocomplete response if it answers the latest query.
    /// Returns `false` for a stale response, which is counted and discarded.
    pub fn receive_autocomplete(&self, response_id: i64, items: Vec<AutoCompleteItem>) -> bool {
        {
            let mut state = self.state.lock();
            let autocomplete = &mut state.autocomplete;
            if autocomplete.last_request != Some(response_id) {
                autocomplete.stale_responses += 1;
                log::debug!(
                    "Instance '{}' discards stale autocomplete response {response_id} (expected {:?})",
                    self.name,
                    autocomplete.last_request
                );
                return false;
            }
            autocomplete.response_id = response_id;
            autocomplete.items = items;
        }
        self.observers.notify(&InstanceEvent::AutoCompleteChanged { response_id });
        true
    }

    pub fn autocomplete(&self) -> AutoCompleteState {
        self.state.lock().autocomplete.clone()
    }

    // -- Misc ---------------------------------------------------------------

    /// Ask the backend to re-send this conversation's full state.
    pub fn refresh(&self) -> SendOutcome {
        log::info!("Refreshing instance '{}'", self.name);
        self.send(Outgoing::Refresh)
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&InstanceEvent) + Send + Sync + 'static,
    ) -> ObserverId {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    fn send(&self, body: Outgoing) -> SendOutcome {
        send_via(&self.comm, &OutgoingEnvelope::new(self.name.as_str(), body))
    }
}
