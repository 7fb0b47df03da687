//! Adapter directory: resolves adapter classes by name.
//!
//! Classes are factories registered at process start (builtins, or anything
//! the embedding binary adds). A pluggable installer can supply classes
//! that are not registered yet; by default an unknown class is simply not
//! found. Runtime source fetching is deliberately out of scope — "install"
//! is a deployment-time concern behind the `AdapterInstaller` seam.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use super::{AdapterConfig, Getter, Pusher};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter class {0} not found")]
    NotFound(String),
    #[error("adapter class {0} already exists")]
    AlreadyExists(String),
    #[error("adapter class {0} is not installable: {1}")]
    NotInstallable(String, String),
    #[error("failed to build adapter {name}: {source}")]
    Build {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// What a resolved class is, so the engine knows whether live getter
/// instances must be rebuilt after a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Getter,
    Pusher,
}

/// Builds getter instances from an instance id plus class/instance config.
/// Factories validate their typed config here, not lazily on first use.
pub trait GetterFactory: Send + Sync {
    fn build(
        &self,
        instance_id: Option<&str>,
        class_cfg: &AdapterConfig,
        instance_cfg: Option<&AdapterConfig>,
    ) -> anyhow::Result<Arc<dyn Getter>>;
}

pub trait PusherFactory: Send + Sync {
    fn build(
        &self,
        instance_id: Option<&str>,
        class_cfg: &AdapterConfig,
        instance_cfg: Option<&AdapterConfig>,
    ) -> anyhow::Result<Arc<dyn Pusher>>;
}

impl<F> GetterFactory for F
where
    F: Fn(Option<&str>, &AdapterConfig, Option<&AdapterConfig>) -> anyhow::Result<Arc<dyn Getter>>
        + Send
        + Sync,
{
    fn build(
        &self,
        instance_id: Option<&str>,
        class_cfg: &AdapterConfig,
        instance_cfg: Option<&AdapterConfig>,
    ) -> anyhow::Result<Arc<dyn Getter>> {
        self(instance_id, class_cfg, instance_cfg)
    }
}

impl<F> PusherFactory for F
where
    F: Fn(Option<&str>, &AdapterConfig, Option<&AdapterConfig>) -> anyhow::Result<Arc<dyn Pusher>>
        + Send
        + Sync,
{
    fn build(
        &self,
        instance_id: Option<&str>,
        class_cfg: &AdapterConfig,
        instance_cfg: Option<&AdapterConfig>,
    ) -> anyhow::Result<Arc<dyn Pusher>> {
        self(instance_id, class_cfg, instance_cfg)
    }
}

/// A class produced by an installer.
pub enum InstalledAdapter {
    Getter(Arc<dyn GetterFactory>),
    Pusher(Arc<dyn PusherFactory>),
}

/// Seam for supplying classes that are not statically registered. The
/// `source_url` comes from the `[url]` section of the main config when
/// present.
pub trait AdapterInstaller: Send + Sync {
    fn install(
        &self,
        class_name: &str,
        source_url: Option<&str>,
    ) -> Result<InstalledAdapter, AdapterError>;
}

#[derive(Default)]
pub struct AdapterDirectory {
    getters: RwLock<HashMap<String, Arc<dyn GetterFactory>>>,
    pushers: RwLock<HashMap<String, Arc<dyn PusherFactory>>>,
    installer: Option<Box<dyn AdapterInstaller>>,
}

impl AdapterDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_installer(installer: Box<dyn AdapterInstaller>) -> Self {
        Self {
            installer: Some(installer),
            ..Self::default()
        }
    }

    pub fn register_getter(
        &self,
        class_name: &str,
        factory: Arc<dyn GetterFactory>,
    ) -> Result<(), AdapterError> {
        let mut map = self.getters.write().expect("directory lock poisoned");
        if map.contains_key(class_name) {
            return Err(AdapterError::AlreadyExists(class_name.to_string()));
        }
        map.insert(class_name.to_string(), factory);
        tracing::debug!(target: "engine", class = class_name, "getter class registered");
        Ok(())
    }

    pub fn register_pusher(
        &self,
        class_name: &str,
        factory: Arc<dyn PusherFactory>,
    ) -> Result<(), AdapterError> {
        let mut map = self.pushers.write().expect("directory lock poisoned");
        if map.contains_key(class_name) {
            return Err(AdapterError::AlreadyExists(class_name.to_string()));
        }
        map.insert(class_name.to_string(), factory);
        tracing::debug!(target: "engine", class = class_name, "pusher class registered");
        Ok(())
    }

    /// Cached factory, else ask the installer, else not found.
    pub fn resolve_getter(
        &self,
        class_name: &str,
        source_url: Option<&str>,
    ) -> Result<Arc<dyn GetterFactory>, AdapterError> {
        if let Some(f) = self
            .getters
            .read()
            .expect("directory lock poisoned")
            .get(class_name)
        {
            return Ok(f.clone());
        }
        match self.try_install(class_name, source_url)? {
            AdapterKind::Getter => Ok(self
                .getters
                .read()
                .expect("directory lock poisoned")
                .get(class_name)
                .cloned()
                .expect("installed getter factory missing")),
            AdapterKind::Pusher => Err(AdapterError::NotFound(class_name.to_string())),
        }
    }

    pub fn resolve_pusher(
        &self,
        class_name: &str,
        source_url: Option<&str>,
    ) -> Result<Arc<dyn PusherFactory>, AdapterError> {
        if let Some(f) = self
            .pushers
            .read()
            .expect("directory lock poisoned")
            .get(class_name)
        {
            return Ok(f.clone());
        }
        match self.try_install(class_name, source_url)? {
            AdapterKind::Pusher => Ok(self
                .pushers
                .read()
                .expect("directory lock poisoned")
                .get(class_name)
                .cloned()
                .expect("installed pusher factory missing")),
            AdapterKind::Getter => Err(AdapterError::NotFound(class_name.to_string())),
        }
    }

    pub fn kind_of(&self, class_name: &str) -> Option<AdapterKind> {
        if self
            .getters
            .read()
            .expect("directory lock poisoned")
            .contains_key(class_name)
        {
            return Some(AdapterKind::Getter);
        }
        if self
            .pushers
            .read()
            .expect("directory lock poisoned")
            .contains_key(class_name)
        {
            return Some(AdapterKind::Pusher);
        }
        None
    }

    /// Force-refresh a class definition. With an installer present the
    /// class is reinstalled and the cached factory replaced; statically
    /// registered factories have nothing to reload and keep their entry.
    pub fn reload(
        &self,
        class_name: &str,
        source_url: Option<&str>,
    ) -> Result<AdapterKind, AdapterError> {
        if let Some(installer) = &self.installer {
            let installed = installer.install(class_name, source_url)?;
            return Ok(self.cache_installed(class_name, installed));
        }
        self.kind_of(class_name)
            .ok_or_else(|| AdapterError::NotFound(class_name.to_string()))
    }

    fn try_install(
        &self,
        class_name: &str,
        source_url: Option<&str>,
    ) -> Result<AdapterKind, AdapterError> {
        let Some(installer) = &self.installer else {
            return Err(AdapterError::NotFound(class_name.to_string()));
        };
        tracing::debug!(target: "engine", class = class_name, "installing adapter class");
        let installed = installer.install(class_name, source_url)?;
        Ok(self.cache_installed(class_name, installed))
    }

    fn cache_installed(&self, class_name: &str, installed: InstalledAdapter) -> AdapterKind {
        match installed {
            InstalledAdapter::Getter(f) => {
                self.getters
                    .write()
                    .expect("directory lock poisoned")
                    .insert(class_name.to_string(), f);
                AdapterKind::Getter
            }
            InstalledAdapter::Pusher(f) => {
                self.pushers
                    .write()
                    .expect("directory lock poisoned")
                    .insert(class_name.to_string(), f);
                AdapterKind::Pusher
            }
        }
    }
}
