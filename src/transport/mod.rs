//! Transport and dispatcher.
//!
//! The [`Transport`] owns the single comm channel to the active kernel
//! session, the [`InstanceRegistry`] and the loader table. Outgoing calls are
//! serialized into tagged envelopes and written to whatever channel is live;
//! inbound records are routed by [`Transport::on_message`] (see
//! [`dispatch`]).
//!
//! The channel is disposable. Every restart signal resets all instance state
//! and re-runs the init sequence from scratch.

pub mod comm;
pub mod dispatch;
pub mod kernel;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use kernel_chat_config::ClientConfig;
use kernel_chat_protocol::{BotConfig, LoaderForm, OutgoingEnvelope};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::context::AppContext;
use crate::error::ChatError;
use crate::instance::ChatInstance;
use crate::observer::{ObserverId, Observers};
use crate::registry::InstanceRegistry;

use comm::{CommChannel, CommSlot, SendOutcome};
use kernel::{CommOpen, ExecuteOutcome, ExecuteRequest, KernelFlavor, KernelInfo, KernelSession, KernelState};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Change notifications from [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The backend exported its instance set (wizard mode only).
    InstancesExported(Value),
    /// A record named an instance the registry does not hold.
    UnknownInstance(String),
    /// A restart was handled and the init sequence re-run.
    Restarted,
    /// `sync-meta` replaced the loader table.
    LoadersChanged,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct Transport {
    config: ClientConfig,
    context: Arc<AppContext>,
    comm: Arc<CommSlot>,
    registry: InstanceRegistry,
    loaders: Mutex<LoaderForm>,
    flavor: Mutex<KernelFlavor>,
    session: Mutex<Option<Arc<dyn KernelSession>>>,
    restart_task: Mutex<Option<JoinHandle<()>>>,
    comm_task: Mutex<Option<JoinHandle<()>>>,
    unknown_instances: AtomicU64,
    observers: Observers<TransportEvent>,
}

impl Transport {
    /// Create the transport and the eagerly created default instance.
    pub fn new(config: ClientConfig, context: Arc<AppContext>) -> Arc<Self> {
        let comm = Arc::new(CommSlot::new());
        let registry = InstanceRegistry::new(Arc::clone(&context), Arc::downgrade(&comm));
        registry.insert(&config.default_instance.name, &config.default_instance.mode);
        Arc::new(Self {
            config,
            context,
            comm,
            registry,
            loaders: Mutex::new(LoaderForm::new()),
            flavor: Mutex::new(KernelFlavor::Generic),
            session: Mutex::new(None),
            restart_task: Mutex::new(None),
            comm_task: Mutex::new(None),
            unknown_instances: AtomicU64::new(0),
            observers: Observers::new(),
        })
    }

    // -- Connection lifecycle -----------------------------------------------

    /// Bind to `session` and run the init sequence.
    ///
    /// Resets all instance state, waits for the session, installs the restart
    /// listener and initializes the backend. A session that never becomes
    /// ready is reported and returned as [`ChatError::Connection`].
    pub async fn connect(self: &Arc<Self>, session: Arc<dyn KernelSession>) -> Result<(), ChatError> {
        self.reset_data();
        *self.session.lock() = Some(Arc::clone(&session));

        let info = match session.ready().await {
            Ok(info) => info,
            Err(e) => return Err(self.connection_failed("connect", e)),
        };
        log::info!("Kernel '{}' ({}) is ready", info.name, info.language);
        self.context.update_status(|status| status.connected_once = true);

        self.listen_for_restart(&session);
        self.init_bot(&session, &info).await;
        self.context.set_connection_ready(true);
        Ok(())
    }

    /// Re-run the init sequence on the current session.
    pub async fn reconnect(self: &Arc<Self>) -> Result<(), ChatError> {
        let Some(session) = self.current_session() else {
            return Err(self.connection_failed(
                "reconnect",
                ChatError::Connection("no kernel session was supplied".to_string()),
            ));
        };
        self.connect(session).await
    }

    /// Forget the comm channel and clear every instance in place.
    pub fn reset_data(&self) {
        self.context.set_connection_ready(false);
        self.context.reset_status();
        if let Some(task) = self.comm_task.lock().take() {
            task.abort();
        }
        self.comm.detach();
        self.registry.reset_all();
    }

    async fn init_bot(self: &Arc<Self>, session: &Arc<dyn KernelSession>, info: &KernelInfo) {
        let flavor = KernelFlavor::detect(info, &self.config);
        log::info!("Initializing {} kernel", flavor.language());
        *self.flavor.lock() = flavor.clone();
        let live = self.comm.is_live();
        self.context.update_status(|status| {
            status.connected_once = true;
            status.connected_now = live;
        });

        let weak: Weak<Self> = Arc::downgrade(self);
        session.register_comm_target(
            &self.config.comm_target,
            Box::new(move |open| {
                if let Some(transport) = weak.upgrade() {
                    transport.attach_comm(open);
                }
            }),
        );

        if let KernelFlavor::Python {
            init_script,
            missing_module_evalue,
        } = &flavor
        {
            match session.execute(ExecuteRequest::silent(init_script.as_str())).await {
                Ok(ExecuteOutcome::Ok) => log::debug!("Init script acknowledged"),
                Ok(ExecuteOutcome::Error {
                    ename,
                    evalue,
                    traceback,
                }) => {
                    if &evalue == missing_module_evalue {
                        self.context.report(
                            ChatError::InitScript {
                                ename,
                                evalue,
                                traceback,
                            },
                            "init_bot",
                            vec![Value::String(init_script.clone())],
                        );
                    } else {
                        log::warn!("Init script failed: {ename}: {evalue}");
                    }
                }
                Err(e) => self.context.report(e, "init_bot", Vec::new()),
            }
        }

        self.comm.send(&OutgoingEnvelope::init());
    }

    /// Take over a comm the kernel opened and start routing its records.
    fn attach_comm(self: &Arc<Self>, open: CommOpen) {
        let CommOpen {
            channel,
            mut inbound,
        } = open;
        let comm_id = channel.comm_id().to_string();
        self.attach_channel(channel);

        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(value) = inbound.recv().await {
                let Some(transport) = weak.upgrade() else {
                    return;
                };
                transport.on_message(value);
            }
            if let Some(transport) = weak.upgrade()
                && transport.comm.detach_id(&comm_id)
            {
                transport
                    .context
                    .update_status(|status| status.connected_now = false);
            }
        });
        if let Some(previous) = self.comm_task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Make `channel` the live comm without starting a reader. Records from
    /// the kernel must then be fed to [`Self::on_message`] by the caller.
    pub fn attach_channel(&self, channel: Arc<dyn CommChannel>) {
        self.comm.attach(channel);
        self.context
            .update_status(|status| status.connected_now = true);
    }

    fn listen_for_restart(self: &Arc<Self>, session: &Arc<dyn KernelSession>) {
        let mut states = session.status_changes();
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                let state = match states.recv().await {
                    Ok(state) => state,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Missed {skipped} kernel status updates");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(transport) = weak.upgrade() else {
                    break;
                };
                match state {
                    KernelState::Restarting => transport.handle_restart().await,
                    KernelState::Dead => transport.handle_dead(),
                    _ => {}
                }
            }
            log::debug!("Kernel status stream ended");
        });
        if let Some(previous) = self.restart_task.lock().replace(task) {
            previous.abort();
        }
    }

    async fn handle_restart(self: &Arc<Self>) {
        log::info!("Kernel is restarting; resetting all instances");
        self.context.update_status(|status| status.has_kernel = false);
        self.reset_data();

        let Some(session) = self.current_session() else {
            return;
        };
        let info = match session.ready().await {
            Ok(info) => info,
            Err(e) => {
                self.connection_failed("restart", e);
                return;
            }
        };
        self.context.update_status(|status| status.connected_once = true);
        self.init_bot(&session, &info).await;
        self.context.set_connection_ready(true);
        self.observers.notify(&TransportEvent::Restarted);
    }

    fn handle_dead(&self) {
        log::warn!("Kernel died; comm channel is gone");
        self.comm.detach();
        self.context.set_connection_ready(false);
        self.context
            .update_status(|status| status.connected_now = false);
    }

    fn connection_failed(&self, origin: &'static str, error: ChatError) -> ChatError {
        let message = error.to_string();
        self.context.report(error, origin, Vec::new());
        ChatError::Connection(message)
    }

    fn current_session(&self) -> Option<Arc<dyn KernelSession>> {
        self.session.lock().clone()
    }

    // -- Meta operations ----------------------------------------------------

    /// Ask the backend to create an instance of `mode`.
    pub fn create_instance(
        &self,
        name: &str,
        mode: &str,
        data: BotConfig,
    ) -> Result<SendOutcome, ChatError> {
        if !self.config.allows_mode(mode) {
            log::warn!("Refusing to create instance '{name}': mode '{mode}' is restricted");
            return Err(ChatError::ModeNotAllowed(mode.to_string()));
        }
        Ok(self
            .comm
            .send(&OutgoingEnvelope::new_instance(name, mode, data)))
    }

    pub fn remove_instance(&self, name: &str) -> SendOutcome {
        self.comm.send(&OutgoingEnvelope::remove_instance(name))
    }

    pub fn save_instances(&self) -> SendOutcome {
        self.comm.send(&OutgoingEnvelope::save_instances())
    }

    pub fn load_instances(&self, data: Value) -> SendOutcome {
        self.comm.send(&OutgoingEnvelope::load_instances(data))
    }

    /// Ask the backend to re-send the instance set and the loader table.
    pub fn refresh_meta(&self) -> SendOutcome {
        self.comm.send(&OutgoingEnvelope::refresh_meta())
    }

    /// Meta refresh followed by a refresh of every local instance.
    pub fn refresh_all(&self) {
        self.refresh_meta();
        for instance in self.registry.all() {
            instance.refresh();
        }
    }

    // -- Accessors ----------------------------------------------------------

    /// Look an instance up by name.
    pub fn instance(&self, name: &str) -> Result<Arc<ChatInstance>, ChatError> {
        self.registry
            .get(name)
            .ok_or_else(|| ChatError::UnknownInstance(name.to_string()))
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn comm(&self) -> &CommSlot {
        &self.comm
    }

    pub fn flavor(&self) -> KernelFlavor {
        self.flavor.lock().clone()
    }

    /// Loader table from the latest `sync-meta`.
    pub fn loaders(&self) -> LoaderForm {
        self.loaders.lock().clone()
    }

    /// How many inbound records named an instance the registry did not hold.
    pub fn unknown_instance_count(&self) -> u64 {
        self.unknown_instances.load(Ordering::Relaxed)
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&TransportEvent) + Send + Sync + 'static,
    ) -> ObserverId {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        for task in [self.restart_task.get_mut().take(), self.comm_task.get_mut().take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}
