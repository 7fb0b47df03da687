//! Main configuration: routing pairs, push policy, alerting, API surface,
//! and per-adapter sections. Loaded from TOML; the engine always reads a
//! point-in-time snapshot through `ConfigHandle`, so edits applied via
//! `replace`/`reload_from_disk` take effect on the next cycle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapter::AdapterConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Routing pairs, one `"<getter-spec> <pusher-spec>"` per line.
    pub pair: Vec<String>,
    /// Install source per adapter class, handed to the directory installer.
    pub url: HashMap<String, String>,
    pub alert: AlertConfig,
    pub policy: PolicyConfig,
    pub api: ApiConfig,
    pub network: NetworkConfig,
    /// Keyed by class name (`RssGetter`) or combined instance name
    /// (`RssGetter.hn`).
    pub adapter: HashMap<String, AdapterConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pair: Vec::new(),
            url: HashMap::new(),
            alert: AlertConfig::default(),
            policy: PolicyConfig::default(),
            api: ApiConfig::default(),
            network: NetworkConfig::default(),
            adapter: HashMap::new(),
        }
    }
}

impl AppConfig {
    pub fn adapter_config(&self, name: &str) -> Option<&AdapterConfig> {
        self.adapter.get(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Pusher specs that receive operator alerts.
    pub to: Vec<String>,
    /// Consecutive-failure counts that fire an alert, exact matches only.
    pub escalation_failures: Vec<u32>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            to: Vec::new(),
            escalation_failures: vec![2, 5, 10],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Launch a refresh cycle when a getter is registered.
    pub refresh_when_start: bool,
    /// Suppress pushes from a getter's very first successful cycle.
    pub skip_first: bool,
    /// Regexes matched against the rendered content; a match suppresses
    /// the push (the article is still recorded).
    pub block_rules: Vec<String>,
    /// Items older than this many days are recorded but not pushed.
    pub article_max_age_days: u32,
    /// Try the batched detail fetch when the getter supports it.
    pub merged_details: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            refresh_when_start: true,
            skip_first: true,
            block_rules: Vec::new(),
            article_max_age_days: 180,
            merged_details: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
    /// Accepted bearer tokens; empty disables auth.
    pub token: Vec<String>,
    pub cors_allow_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 11589,
            token: Vec::new(),
            cors_allow_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Outbound proxy applied to every adapter call within a cycle.
    pub proxy: Option<String>,
}

/// Shared read handle over the current configuration.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<AppConfig>>>,
    path: Option<PathBuf>,
}

impl ConfigHandle {
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
            path: None,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = read_config(path)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
            path: Some(path.to_path_buf()),
        })
    }

    /// Point-in-time snapshot; cheap to clone and safe to hold across awaits.
    pub fn snapshot(&self) -> Arc<AppConfig> {
        self.inner.read().expect("config lock poisoned").clone()
    }

    pub fn replace(&self, config: AppConfig) {
        *self.inner.write().expect("config lock poisoned") = Arc::new(config);
    }

    pub fn reload_from_disk(&self) -> Result<()> {
        let Some(path) = &self.path else {
            anyhow::bail!("config handle has no backing file");
        };
        self.replace(read_config(path)?);
        tracing::info!(target: "engine", path = %path.display(), "configuration reloaded");
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<AppConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_contract() {
        let cfg = AppConfig::default();
        assert!(cfg.policy.refresh_when_start);
        assert!(cfg.policy.skip_first);
        assert!(cfg.policy.merged_details);
        assert_eq!(cfg.policy.article_max_age_days, 180);
        assert_eq!(cfg.alert.escalation_failures, vec![2, 5, 10]);
        assert_eq!(cfg.api.port, 11589);
    }

    #[test]
    fn parses_pairs_and_adapter_sections() {
        let cfg: AppConfig = toml::from_str(
            r#"
            pair = ["RssGetter.hn WebhookPusher..https://hook"]

            [policy]
            skip_first = false
            block_rules = ["spam"]

            [adapter.RssGetter]
            trigger = ["0 */5 * * * *"]
            url = "https://example.com/rss"

            [adapter."RssGetter.hn"]
            override_trigger = ["0 0 * * * *"]
            url = "https://news.ycombinator.com/rss"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.pair.len(), 1);
        assert!(!cfg.policy.skip_first);
        let class = cfg.adapter_config("RssGetter").unwrap();
        assert_eq!(class.trigger, vec!["0 */5 * * * *"]);
        let inst = cfg.adapter_config("RssGetter.hn").unwrap();
        assert_eq!(
            inst.override_trigger.as_deref(),
            Some(&["0 0 * * * *".to_string()][..])
        );
    }

    #[test]
    fn handle_snapshot_is_stable_across_replace() {
        let handle = ConfigHandle::new(AppConfig::default());
        let before = handle.snapshot();

        let mut next = AppConfig::default();
        next.pair.push("A B".to_string());
        handle.replace(next);

        assert!(before.pair.is_empty());
        assert_eq!(handle.snapshot().pair.len(), 1);
    }
}
