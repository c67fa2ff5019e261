pub mod error;
pub mod memory_store;
pub mod plugin_store;
pub mod sqlite_store;

pub use error::StorageError;
pub use memory_store::MemoryStore;
pub use plugin_store::PluginStore;
pub use sqlite_store::SqliteStore;
