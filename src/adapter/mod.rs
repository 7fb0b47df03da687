//! Adapter capability surface: identity, configuration, and the
//! `Getter`/`Pusher` traits every adapter class implements.
//!
//! A getter spec is `Class` or `Class.instance`; a pusher spec is
//! `Class.instance.to` where the instance and `to` segments may be empty
//! (`WebhookPusher..https://hook` targets the class default instance).

pub mod builtin;
pub mod directory;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::envelope::Envelope;

/// Identity of a configured adapter instance: class plus optional
/// instance id. Two specs with the same combined name refer to the same
/// live instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdapterSpec {
    pub class_name: String,
    pub instance_id: Option<String>,
}

impl AdapterSpec {
    pub fn new(class_name: impl Into<String>, instance_id: Option<String>) -> Self {
        Self {
            class_name: class_name.into(),
            instance_id,
        }
    }

    /// Parse a getter spec: `Class` or `Class.instance`.
    pub fn parse_getter(spec: &str) -> Result<Self> {
        let mut parts = spec.splitn(2, '.');
        let class = parts.next().unwrap_or_default();
        if class.is_empty() || class.contains(char::is_whitespace) {
            return Err(anyhow!("invalid getter spec {spec:?}"));
        }
        let instance = parts
            .next()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        Ok(Self::new(class, instance))
    }

    /// Combined unique name: `Class` or `Class.instance`.
    pub fn name(&self) -> String {
        match &self.instance_id {
            Some(id) => format!("{}.{}", self.class_name, id),
            None => self.class_name.clone(),
        }
    }
}

impl fmt::Display for AdapterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Parsed pusher spec: identity plus the optional delivery target that is
/// handed to `Pusher::push` verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PusherSpec {
    pub spec: AdapterSpec,
    pub to: Option<String>,
}

impl PusherSpec {
    /// Parse `Class`, `Class.instance`, or `Class.instance.to`. The `to`
    /// segment may itself contain dots (URLs, channel ids).
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.splitn(3, '.');
        let class = parts.next().unwrap_or_default();
        if class.is_empty() || class.contains(char::is_whitespace) {
            return Err(anyhow!("invalid pusher spec {raw:?}"));
        }
        let instance = parts
            .next()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        let to = parts.next().filter(|s| !s.is_empty()).map(|s| s.to_string());
        Ok(Self {
            spec: AdapterSpec::new(class, instance),
            to,
        })
    }
}

impl fmt::Display for PusherSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec.name())?;
        if let Some(to) = &self.to {
            write!(f, " -> {to}")?;
        }
        Ok(())
    }
}

/// Result of a detail fetch: who posted it, when, and the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDetail {
    pub user_id: String,
    pub ts: i64,
    pub content: Envelope,
}

/// Cycle-scoped network context. The engine builds one per refresh cycle
/// with the configured outbound proxy applied, so concurrent cycles never
/// observe each other's override.
#[derive(Clone)]
pub struct NetContext {
    pub client: reqwest::Client,
}

impl NetContext {
    /// Client without a proxy; also the test default.
    pub fn direct() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_proxy(proxy: Option<&str>) -> Result<Self> {
        let client = match proxy {
            Some(url) if !url.is_empty() => reqwest::Client::builder()
                .proxy(reqwest::Proxy::all(url)?)
                .build()?,
            _ => reqwest::Client::new(),
        };
        Ok(Self { client })
    }
}

impl Default for NetContext {
    fn default() -> Self {
        Self::direct()
    }
}

/// Class- or instance-level adapter configuration section. `trigger` and
/// `override_trigger` are engine-owned; everything else is adapter-specific
/// and deserialized by the factory into its own typed struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub trigger: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_trigger: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl AdapterConfig {
    /// Deserialize the adapter-specific fields into a typed config,
    /// validating them up front instead of on first access.
    pub fn typed<T: DeserializeOwned>(&self) -> Result<T> {
        let value = toml::Value::Table(self.extra.clone());
        T::deserialize(value).map_err(|e| anyhow!("invalid adapter config: {e}"))
    }

    /// Instance fields layered over class fields (instance wins).
    pub fn merged_extra(class: &AdapterConfig, instance: Option<&AdapterConfig>) -> toml::Table {
        let mut table = class.extra.clone();
        if let Some(inst) = instance {
            for (k, v) in &inst.extra {
                table.insert(k.clone(), v.clone());
            }
        }
        table
    }
}

/// A source adapter: lists newest item ids and fetches their content.
#[async_trait]
pub trait Getter: Send + Sync {
    /// Newest raw item ids, unprefixed.
    async fn list(&self, net: &NetContext) -> Result<Vec<String>>;

    /// Detail of one raw id.
    async fn detail(&self, id: &str, net: &NetContext) -> Result<ItemDetail>;

    /// Merge a batch of ids into a single detail. Only called when
    /// `supports_batched_detail` returns true.
    async fn details(&self, _ids: &[String], _net: &NetContext) -> Result<ItemDetail> {
        Err(anyhow!("batched detail not supported"))
    }

    /// Capability flag gating the batched path.
    fn supports_batched_detail(&self) -> bool {
        false
    }
}

/// A delivery adapter: sends one envelope to one destination.
#[async_trait]
pub trait Pusher: Send + Sync {
    async fn push(&self, content: &Envelope, to: Option<&str>, net: &NetContext) -> Result<()>;
}
