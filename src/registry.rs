//! The set of conversations held by the client.
//!
//! The backend owns the authoritative instance set. [`InstanceRegistry::reconcile`]
//! brings the local set in line with a reported one: locals the backend no
//! longer reports are dropped, reported names missing locally are created,
//! hydrated and refreshed, and instances present on both sides are left
//! alone.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use kernel_chat_protocol::{BotConfig, InstanceInfo, LoaderForm};
use parking_lot::Mutex;

use crate::context::AppContext;
use crate::instance::ChatInstance;
use crate::observer::{ObserverId, Observers};
use crate::transport::comm::CommSlot;

/// Membership change produced by one registry operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Change notifications from [`InstanceRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    MembershipChanged(ReconcileReport),
}

/// Owner of every [`ChatInstance`], keyed by name.
pub struct InstanceRegistry {
    instances: Mutex<BTreeMap<String, Arc<ChatInstance>>>,
    comm: Weak<CommSlot>,
    context: Arc<AppContext>,
    observers: Observers<RegistryEvent>,
}

impl InstanceRegistry {
    pub fn new(context: Arc<AppContext>, comm: Weak<CommSlot>) -> Self {
        Self {
            instances: Mutex::new(BTreeMap::new()),
            comm,
            context,
            observers: Observers::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ChatInstance>> {
        self.instances.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.lock().contains_key(name)
    }

    /// Instance names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.instances.lock().keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<Arc<ChatInstance>> {
        self.instances.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create an empty instance ahead of any backend report, or return the
    /// existing one.
    pub fn insert(&self, name: &str, mode: &str) -> Arc<ChatInstance> {
        let (instance, created) = {
            let mut instances = self.instances.lock();
            match instances.get(name) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let instance = self.create(name, mode, LoaderForm::new(), BotConfig::new());
                    instances.insert(name.to_string(), Arc::clone(&instance));
                    (instance, true)
                }
            }
        };
        if created {
            log::info!("Created instance '{name}' (mode '{mode}')");
            self.observers.notify(&RegistryEvent::MembershipChanged(ReconcileReport {
                added: vec![name.to_string()],
                removed: Vec::new(),
            }));
        }
        instance
    }

    /// Bring the local set in line with `reported`.
    ///
    /// Emits a single membership notification, and only when the set changed.
    pub fn reconcile(&self, reported: Vec<(String, InstanceInfo)>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut created = Vec::new();
        {
            let mut instances = self.instances.lock();
            let reported_names: BTreeSet<&str> =
                reported.iter().map(|(name, _)| name.as_str()).collect();

            instances.retain(|name, _| {
                let keep = reported_names.contains(name.as_str());
                if !keep {
                    report.removed.push(name.clone());
                }
                keep
            });

            for (name, info) in reported {
                if instances.contains_key(&name) {
                    continue;
                }
                let instance = self.create(
                    &name,
                    &info.mode,
                    info.bot_config_loader.clone(),
                    info.bot_config.clone(),
                );
                instance.hydrate(info);
                instances.insert(name.clone(), Arc::clone(&instance));
                report.added.push(name);
                created.push(instance);
            }
        }

        for instance in &created {
            instance.refresh();
        }

        if report.is_changed() {
            log::info!(
                "Instance set changed: added {:?}, removed {:?}",
                report.added,
                report.removed
            );
            self.observers.notify(&RegistryEvent::MembershipChanged(report.clone()));
        } else {
            log::debug!("Instance set unchanged");
        }
        report
    }

    /// Reset every instance in place; none is removed.
    pub fn reset_all(&self) {
        for instance in self.all() {
            instance.reset();
        }
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&RegistryEvent) + Send + Sync + 'static,
    ) -> ObserverId {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    fn create(
        &self,
        name: &str,
        mode: &str,
        loader: LoaderForm,
        bot_config: BotConfig,
    ) -> Arc<ChatInstance> {
        Arc::new(ChatInstance::new(
            name,
            mode,
            loader,
            bot_config,
            self.comm.clone(),
            Arc::clone(&self.context),
        ))
    }
}
