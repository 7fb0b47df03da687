// tests/common/mod.rs
// Scripted adapters and wiring helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use feedrelay::adapter::directory::AdapterDirectory;
use feedrelay::adapter::{AdapterConfig, Getter, ItemDetail, NetContext, Pusher};
use feedrelay::config::{AppConfig, ConfigHandle};
use feedrelay::engine::Engine;
use feedrelay::envelope::Envelope;
use feedrelay::store::MemoryStore;

#[derive(Clone)]
pub struct ScriptItem {
    pub id: String,
    pub author: String,
    pub body: String,
    pub ts: i64,
}

/// Shared script controlling what `CaseGetter` instances return.
#[derive(Default)]
pub struct GetterScript {
    items: Mutex<Vec<ScriptItem>>,
    /// Ids that show up in `list` but whose detail fetch fails.
    ghosts: Mutex<Vec<String>>,
    fail_list: AtomicBool,
    batched: AtomicBool,
}

impl GetterScript {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_item(&self, id: &str, body: &str, ts: i64) {
        self.items.lock().unwrap().push(ScriptItem {
            id: id.to_string(),
            author: "case".to_string(),
            body: body.to_string(),
            ts,
        });
    }

    pub fn push_ghost(&self, id: &str) {
        self.ghosts.lock().unwrap().push(id.to_string());
    }

    pub fn clear(&self) {
        self.items.lock().unwrap().clear();
        self.ghosts.lock().unwrap().clear();
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Advertise the batched-detail capability.
    pub fn set_batched(&self, batched: bool) {
        self.batched.store(batched, Ordering::SeqCst);
    }
}

pub struct CaseGetter {
    script: Arc<GetterScript>,
}

#[async_trait]
impl Getter for CaseGetter {
    async fn list(&self, _net: &NetContext) -> anyhow::Result<Vec<String>> {
        if self.script.fail_list.load(Ordering::SeqCst) {
            anyhow::bail!("scripted list failure");
        }
        let mut ids: Vec<String> = self
            .script
            .items
            .lock()
            .unwrap()
            .iter()
            .map(|it| it.id.clone())
            .collect();
        ids.extend(self.script.ghosts.lock().unwrap().iter().cloned());
        Ok(ids)
    }

    async fn detail(&self, id: &str, _net: &NetContext) -> anyhow::Result<ItemDetail> {
        let items = self.script.items.lock().unwrap();
        let item = items
            .iter()
            .find(|it| it.id == id)
            .ok_or_else(|| anyhow::anyhow!("unknown id {id}"))?;
        Ok(ItemDetail {
            user_id: item.author.clone(),
            ts: item.ts,
            content: Envelope::new().text(item.body.clone()),
        })
    }

    async fn details(&self, ids: &[String], _net: &NetContext) -> anyhow::Result<ItemDetail> {
        let items = self.script.items.lock().unwrap();
        let mut bodies = Vec::new();
        let mut ts = 0;
        for id in ids {
            let item = items
                .iter()
                .find(|it| &it.id == id)
                .ok_or_else(|| anyhow::anyhow!("unknown id {id}"))?;
            bodies.push(item.body.clone());
            ts = ts.max(item.ts);
        }
        Ok(ItemDetail {
            user_id: "case".to_string(),
            ts,
            content: Envelope::new().text(bodies.join("\n")),
        })
    }

    fn supports_batched_detail(&self) -> bool {
        self.script.batched.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PushEntry {
    pub text: String,
    pub to: Option<String>,
}

/// Records every delivery made through a `CasePusher` (or alert pusher)
/// built against it; flips to failure mode on demand.
#[derive(Default)]
pub struct PushLog {
    entries: Mutex<Vec<PushEntry>>,
    fail: AtomicBool,
    builds: std::sync::atomic::AtomicUsize,
}

impl PushLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<PushEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// How many pusher instances the factory has built against this log.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

pub struct CasePusher {
    log: Arc<PushLog>,
}

#[async_trait]
impl Pusher for CasePusher {
    async fn push(&self, content: &Envelope, to: Option<&str>, _net: &NetContext) -> anyhow::Result<()> {
        if self.log.fail.load(Ordering::SeqCst) {
            anyhow::bail!("scripted push failure");
        }
        self.log.entries.lock().unwrap().push(PushEntry {
            text: content.to_string(),
            to: to.map(|s| s.to_string()),
        });
        Ok(())
    }
}

/// Directory with one scripted getter class and two pusher classes:
/// `CasePusher` writes to `log`, `AlertPusher` writes to `alerts`.
pub fn directory(
    script: &Arc<GetterScript>,
    log: &Arc<PushLog>,
    alerts: &Arc<PushLog>,
) -> Arc<AdapterDirectory> {
    let dir = Arc::new(AdapterDirectory::new());

    let s = script.clone();
    dir.register_getter(
        "CaseGetter",
        Arc::new(
            move |_: Option<&str>, _: &AdapterConfig, _: Option<&AdapterConfig>| {
                Ok(Arc::new(CaseGetter { script: s.clone() }) as Arc<dyn Getter>)
            },
        ),
    )
    .unwrap();

    let l = log.clone();
    dir.register_pusher(
        "CasePusher",
        Arc::new(
            move |_: Option<&str>, _: &AdapterConfig, _: Option<&AdapterConfig>| {
                l.builds.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(CasePusher { log: l.clone() }) as Arc<dyn Pusher>)
            },
        ),
    )
    .unwrap();

    let a = alerts.clone();
    dir.register_pusher(
        "AlertPusher",
        Arc::new(
            move |_: Option<&str>, _: &AdapterConfig, _: Option<&AdapterConfig>| {
                a.builds.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(CasePusher { log: a.clone() }) as Arc<dyn Pusher>)
            },
        ),
    )
    .unwrap();

    dir
}

/// Baseline config for engine tests: no triggers, no startup refresh, no
/// first-cycle suppression unless a test opts back in.
pub fn base_config(pairs: &[&str]) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.pair = pairs.iter().map(|p| p.to_string()).collect();
    cfg.policy.refresh_when_start = false;
    cfg.policy.skip_first = false;
    cfg
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub script: Arc<GetterScript>,
    pub pushes: Arc<PushLog>,
    pub alerts: Arc<PushLog>,
    pub store: Arc<MemoryStore>,
    pub config: ConfigHandle,
}

impl Harness {
    pub fn new(cfg: AppConfig) -> Self {
        let script = GetterScript::new();
        let pushes = PushLog::new();
        let alerts = PushLog::new();
        let dir = directory(&script, &pushes, &alerts);
        let store = Arc::new(MemoryStore::new());
        let config = ConfigHandle::new(cfg);
        let engine = Engine::new(config.clone(), dir, store.clone());
        Self {
            engine,
            script,
            pushes,
            alerts,
            store,
            config,
        }
    }

    /// Run one refresh cycle for a registered getter and wait for it.
    pub async fn refresh(&self, name: &str) -> feedrelay::engine::RefreshReport {
        let slot = self.engine.get_slot(name).expect("getter not registered");
        self.engine.refresh(&slot).await
    }
}

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
