use crate::error::StorageError;

/// Key/value storage partitioned by plugin id.
///
/// Every call names the namespace explicitly; the engine never hands a
/// plugin a store handle, only a scope bound to its own id.
pub trait PluginStore: Send + Sync {
    /// Fetch a value, `None` when the key is absent.
    fn get(&self, plugin_id: &str, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, plugin_id: &str, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Removing an absent key is not an error.
    fn delete(&self, plugin_id: &str, key: &str) -> Result<(), StorageError>;

    /// All keys in the namespace starting with `prefix`. No ordering contract.
    fn list(&self, plugin_id: &str, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Release underlying resources. Further calls fail with [`StorageError::Closed`].
    fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
