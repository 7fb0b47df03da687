//! Adapter orchestration engine: getter registry, routing table
//! reconciliation, lazy pusher cache, and the entry points the control API
//! calls into.
//!
//! The registry is owned here and mutated only by reconciliation
//! operations, which run under a single lock so no interleaved partial
//! reconciliation is observable. Getters are registered iff at least one
//! configured pair references them; pushers are not registry entries and
//! are resolved lazily per push, cached by combined name.

pub mod notify;
pub mod refresh;
pub mod tasks;
pub mod triggers;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::adapter::directory::{AdapterDirectory, AdapterError, AdapterKind, GetterFactory};
use crate::adapter::{AdapterSpec, Getter, NetContext, Pusher, PusherSpec};
use crate::config::ConfigHandle;
use crate::envelope::Envelope;
use crate::store::ArticleStore;

pub use refresh::{NewArticle, RefreshReport};
pub use tasks::{TaskRegistry, TaskStatus};

/// A registered getter with its runtime refresh state.
pub struct GetterSlot {
    pub spec: AdapterSpec,
    pub(crate) getter: Arc<dyn Getter>,
    pub(crate) working: AtomicBool,
    pub(crate) first: AtomicBool,
    pub(crate) failures: AtomicU32,
    pub(crate) triggers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl GetterSlot {
    fn new(spec: AdapterSpec, getter: Arc<dyn Getter>) -> Arc<Self> {
        Arc::new(Self {
            spec,
            getter,
            working: AtomicBool::new(false),
            first: AtomicBool::new(true),
            failures: AtomicU32::new(0),
            triggers: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> String {
        self.spec.name()
    }

    pub fn working(&self) -> bool {
        self.working.load(Ordering::SeqCst)
    }

    pub fn is_first_refresh(&self) -> bool {
        self.first.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Currently-armed cron expressions.
    pub fn armed_triggers(&self) -> Vec<String> {
        let armed = self.triggers.lock().expect("trigger mutex poisoned");
        let mut out: Vec<String> = armed.keys().cloned().collect();
        out.sort();
        out
    }

    /// Availability check at cycle start: atomically claims the slot so two
    /// near-simultaneous triggers cannot both enter a cycle.
    pub(crate) fn begin_cycle(&self) -> bool {
        self.working
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_cycle(&self) {
        self.working.store(false, Ordering::SeqCst);
    }
}

/// Registered-getter summary for the control API.
#[derive(Debug, Clone, Serialize)]
pub struct GetterInfo {
    pub name: String,
    pub class_name: String,
    pub working: bool,
    pub config: serde_json::Value,
    pub instance_config: Option<serde_json::Value>,
}

pub struct Engine {
    pub(crate) config: ConfigHandle,
    pub(crate) directory: Arc<AdapterDirectory>,
    pub(crate) store: Arc<dyn ArticleStore>,
    registry: Mutex<Vec<Arc<GetterSlot>>>,
    pushers: Mutex<HashMap<String, Arc<dyn Pusher>>>,
    tasks: TaskRegistry,
}

impl Engine {
    pub fn new(
        config: ConfigHandle,
        directory: Arc<AdapterDirectory>,
        store: Arc<dyn ArticleStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            directory,
            store,
            registry: Mutex::new(Vec::new()),
            pushers: Mutex::new(HashMap::new()),
            tasks: TaskRegistry::new(),
        })
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ArticleStore> {
        &self.store
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Recompute the routing table from the configured pairs and reconcile
    /// the live registry: unregister getters no longer referenced, register
    /// new ones. A pair that fails to parse or resolve is skipped with a
    /// warning and never aborts the rest. Idempotent for unchanged
    /// configuration: existing slots and their triggers are left untouched.
    pub fn update_getters(self: &Arc<Self>) {
        let cfg = self.config.snapshot();

        // Desired getters, in pair order, deduped by combined name.
        let mut desired: Vec<(AdapterSpec, Arc<dyn GetterFactory>)> = Vec::new();
        for pair in &cfg.pair {
            let parsed = (|| -> Result<(AdapterSpec, PusherSpec)> {
                let (getter_str, pusher_str) = pair
                    .split_once(' ')
                    .context("pair must be \"<getter-spec> <pusher-spec>\"")?;
                let getter = AdapterSpec::parse_getter(getter_str)?;
                let pusher = PusherSpec::parse(pusher_str)?;
                Ok((getter, pusher))
            })();
            let (getter_spec, pusher_spec) = match parsed {
                Ok(p) => p,
                Err(e) => {
                    warn!(target: "engine", pair = %pair, error = %e, "failed to parse pair, skipped");
                    continue;
                }
            };

            let getter_factory = match self.directory.resolve_getter(
                &getter_spec.class_name,
                cfg.url.get(&getter_spec.class_name).map(String::as_str),
            ) {
                Ok(f) => f,
                Err(e) => {
                    warn!(target: "engine", pair = %pair, error = %e, "failed to resolve getter class, skipped");
                    continue;
                }
            };
            // Validate the pusher class up front so a dead destination is
            // caught at reconcile time, not first push.
            if let Err(e) = self.directory.resolve_pusher(
                &pusher_spec.spec.class_name,
                cfg.url.get(&pusher_spec.spec.class_name).map(String::as_str),
            ) {
                warn!(target: "engine", pair = %pair, error = %e, "failed to resolve pusher class, skipped");
                continue;
            }

            if !desired.iter().any(|(s, _)| s.name() == getter_spec.name()) {
                desired.push((getter_spec, getter_factory));
            }
        }

        // Single guard for the whole reconciliation.
        let mut registry = self.registry.lock().expect("registry mutex poisoned");

        registry.retain(|slot| {
            let keep = desired.iter().any(|(s, _)| s.name() == slot.name());
            if !keep {
                self.unregister_slot(slot);
            }
            keep
        });

        for (spec, factory) in desired {
            if registry.iter().any(|slot| slot.name() == spec.name()) {
                continue;
            }
            let class_cfg = cfg
                .adapter_config(&spec.class_name)
                .cloned()
                .unwrap_or_default();
            let inst_cfg = spec
                .instance_id
                .as_ref()
                .and_then(|_| cfg.adapter_config(&spec.name()))
                .cloned();
            let getter =
                match factory.build(spec.instance_id.as_deref(), &class_cfg, inst_cfg.as_ref()) {
                    Ok(g) => g,
                    Err(e) => {
                        warn!(target: "engine", getter = %spec, error = %e, "failed to build getter, skipped");
                        continue;
                    }
                };
            let slot = GetterSlot::new(spec, getter);
            triggers::update_triggers(self, &slot);
            if cfg.policy.refresh_when_start {
                self.spawn_refresh(slot.clone());
            }
            debug!(target: "engine", getter = %slot.spec, "getter registered");
            registry.push(slot);
        }
    }

    fn unregister_slot(&self, slot: &GetterSlot) {
        let mut armed = slot.triggers.lock().expect("trigger mutex poisoned");
        for (expr, handle) in armed.drain() {
            handle.abort();
            debug!(target: "engine", getter = %slot.spec, trigger = %expr, "trigger disarmed");
        }
        debug!(target: "engine", getter = %slot.spec, "getter unregistered");
    }

    pub fn get_slot(&self, name: &str) -> Option<Arc<GetterSlot>> {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .iter()
            .find(|slot| slot.name() == name)
            .cloned()
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .iter()
            .map(|slot| slot.name())
            .collect()
    }

    pub fn list_getters(&self) -> Vec<GetterInfo> {
        let cfg = self.config.snapshot();
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .iter()
            .map(|slot| GetterInfo {
                name: slot.name(),
                class_name: slot.spec.class_name.clone(),
                working: slot.working(),
                config: cfg
                    .adapter_config(&slot.spec.class_name)
                    .and_then(|c| serde_json::to_value(c).ok())
                    .unwrap_or(serde_json::Value::Null),
                instance_config: slot
                    .spec
                    .instance_id
                    .as_ref()
                    .and_then(|_| cfg.adapter_config(&slot.name()))
                    .and_then(|c| serde_json::to_value(c).ok()),
            })
            .collect()
    }

    /// Run one full refresh cycle for a getter and wait for its report.
    /// The cycle itself executes on its own spawned task so adapter code
    /// never runs inline on the caller.
    pub async fn refresh(self: &Arc<Self>, slot: &Arc<GetterSlot>) -> RefreshReport {
        triggers::update_triggers(self, slot);
        let engine = self.clone();
        let slot = slot.clone();
        match tokio::spawn(async move { refresh::run_cycle(engine, slot).await }).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(target: "refresh", error = %e, "refresh task aborted");
                Vec::new()
            }
        }
    }

    /// Hand a cycle to the task registry and return its handle immediately.
    pub fn spawn_refresh(self: &Arc<Self>, slot: Arc<GetterSlot>) -> String {
        let engine = self.clone();
        self.tasks.spawn(async move {
            triggers::update_triggers(&engine, &slot);
            let eng = engine.clone();
            let s = slot.clone();
            match tokio::spawn(async move { refresh::run_cycle(eng, s).await }).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(target: "refresh", error = %e, "refresh task aborted");
                    Vec::new()
                }
            }
        })
    }

    pub fn refresh_by_name(self: &Arc<Self>, name: &str) -> Option<String> {
        let slot = self.get_slot(name)?;
        Some(self.spawn_refresh(slot))
    }

    /// One cycle handle per registered getter.
    pub fn refresh_all(self: &Arc<Self>) -> Vec<String> {
        let slots: Vec<Arc<GetterSlot>> = self
            .registry
            .lock()
            .expect("registry mutex poisoned")
            .clone();
        slots
            .into_iter()
            .map(|slot| self.spawn_refresh(slot))
            .collect()
    }

    /// Force-reload an adapter class. Getter classes additionally rebuild
    /// every live instance: each is unregistered and `update_getters`
    /// re-registers them against the fresh definition. Pusher classes drop
    /// that class's cached instances so the next push rebuilds them;
    /// instances of other pusher classes survive.
    pub fn reload_adapter_class(self: &Arc<Self>, class_name: &str) -> Result<(), AdapterError> {
        let cfg = self.config.snapshot();
        let kind = self
            .directory
            .reload(class_name, cfg.url.get(class_name).map(String::as_str))?;
        match kind {
            AdapterKind::Getter => {
                {
                    let mut registry = self.registry.lock().expect("registry mutex poisoned");
                    registry.retain(|slot| {
                        let keep = slot.spec.class_name != class_name;
                        if !keep {
                            self.unregister_slot(slot);
                        }
                        keep
                    });
                }
                self.update_getters();
            }
            AdapterKind::Pusher => {
                // Cache keys are combined names, `Class` or `Class.id`.
                self.pushers
                    .lock()
                    .expect("pusher mutex poisoned")
                    .retain(|name, _| name.split('.').next() != Some(class_name));
            }
        }
        Ok(())
    }

    /// Pusher specs currently routed to a getter, from a fresh config
    /// snapshot, deduped in pair order.
    pub fn routes_for(&self, getter_name: &str) -> Vec<PusherSpec> {
        let cfg = self.config.snapshot();
        let mut out: Vec<PusherSpec> = Vec::new();
        for pair in &cfg.pair {
            let Some((getter_str, pusher_str)) = pair.split_once(' ') else {
                continue;
            };
            let Ok(spec) = AdapterSpec::parse_getter(getter_str) else {
                continue;
            };
            if spec.name() != getter_name {
                continue;
            }
            let Ok(pusher) = PusherSpec::parse(pusher_str) else {
                continue;
            };
            if !out.contains(&pusher) {
                out.push(pusher);
            }
        }
        out
    }

    /// Deliver one envelope through a pusher spec, resolving and caching
    /// the instance by combined name.
    pub async fn push_to_spec(
        &self,
        spec: &PusherSpec,
        content: &Envelope,
        net: &NetContext,
    ) -> Result<()> {
        let pusher = self.pusher_instance(&spec.spec)?;
        debug!(target: "push", pusher = %spec, preview = %content.preview(), "push start");
        pusher.push(content, spec.to.as_deref(), net).await?;
        debug!(target: "push", pusher = %spec, "push finished");
        Ok(())
    }

    fn pusher_instance(&self, spec: &AdapterSpec) -> Result<Arc<dyn Pusher>> {
        if let Some(p) = self
            .pushers
            .lock()
            .expect("pusher mutex poisoned")
            .get(&spec.name())
        {
            return Ok(p.clone());
        }
        let cfg = self.config.snapshot();
        let factory = self.directory.resolve_pusher(
            &spec.class_name,
            cfg.url.get(&spec.class_name).map(String::as_str),
        )?;
        let class_cfg = cfg
            .adapter_config(&spec.class_name)
            .cloned()
            .unwrap_or_default();
        let inst_cfg = spec
            .instance_id
            .as_ref()
            .and_then(|_| cfg.adapter_config(&spec.name()))
            .cloned();
        let pusher = factory
            .build(spec.instance_id.as_deref(), &class_cfg, inst_cfg.as_ref())
            .with_context(|| format!("building pusher {}", spec.name()))?;
        self.pushers
            .lock()
            .expect("pusher mutex poisoned")
            .insert(spec.name(), pusher.clone());
        debug!(target: "push", pusher = %spec, "pusher initialized");
        Ok(pusher)
    }
}
