use crate::error::StorageError;
use crate::plugin_store::PluginStore;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-local store, mostly for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    namespaces: RwLock<HashMap<String, BTreeMap<String, String>>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl PluginStore for MemoryStore {
    fn get(&self, plugin_id: &str, key: &str) -> Result<Option<String>, StorageError> {
        self.ensure_open()?;
        let namespaces = self.namespaces.read();
        Ok(namespaces
            .get(plugin_id)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    fn set(&self, plugin_id: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.namespaces
            .write()
            .entry(plugin_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, plugin_id: &str, key: &str) -> Result<(), StorageError> {
        self.ensure_open()?;
        if let Some(ns) = self.namespaces.write().get_mut(plugin_id) {
            ns.remove(key);
        }
        Ok(())
    }

    fn list(&self, plugin_id: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.ensure_open()?;
        let namespaces = self.namespaces.read();
        let Some(ns) = namespaces.get(plugin_id) else {
            return Ok(Vec::new());
        };
        Ok(ns
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
