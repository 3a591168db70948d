//! Configuration source contract and a thread-safe in-memory implementation of it.
use std::sync::{Arc, RwLock};

use crate::{Error, ProjectConfig, Result};

/// Supplies the current [`ProjectConfig`] snapshot on demand.
///
/// Implementations must be safe to call concurrently. Failing to supply a snapshot is fatal for
/// the calling client method.
pub trait ProjectConfigManager: Send + Sync {
    /// Get the current snapshot.
    ///
    /// # Errors
    ///
    /// Implementation-defined. [`ConfigurationStore`] returns [`Error::ConfigurationMissing`] if
    /// no snapshot has been stored yet.
    fn get_config(&self) -> Result<Arc<dyn ProjectConfig>>;
}

/// `ConfigurationStore` provides a Sync storage for project configuration that allows concurrent
/// access for readers and writers.
///
/// Snapshots are never mutated; [`ConfigurationStore::set_config`] replaces them wholesale.
#[derive(Default)]
pub struct ConfigurationStore {
    config: RwLock<Option<Arc<dyn ProjectConfig>>>,
}

impl ConfigurationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        ConfigurationStore::default()
    }

    /// Create a store already holding `config`.
    pub fn with_config(config: Arc<dyn ProjectConfig>) -> Self {
        ConfigurationStore {
            config: RwLock::new(Some(config)),
        }
    }

    /// Set a new snapshot, returning the previous one.
    pub fn set_config(&self, config: Arc<dyn ProjectConfig>) -> Option<Arc<dyn ProjectConfig>> {
        log::debug!(target: "expkit",
                    project_id = config.project_id(),
                    revision = config.revision();
                    "storing new project config");

        // A writer can only poison the lock by panicking inside `mem::replace`, which does not
        // happen. Recover the guard anyway rather than crash the app.
        let mut slot = self
            .config
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::replace(&mut slot, Some(config))
    }
}

impl ProjectConfigManager for ConfigurationStore {
    fn get_config(&self) -> Result<Arc<dyn ProjectConfig>> {
        let slot = self
            .config
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        slot.clone().ok_or(Error::ConfigurationMissing)
    }
}
