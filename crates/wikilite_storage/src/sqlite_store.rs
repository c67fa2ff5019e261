use crate::error::StorageError;
use crate::plugin_store::PluginStore;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// File-backed store on an embedded SQLite database.
///
/// A single connection is shared behind a mutex; callers are worker threads
/// doing short point reads and writes.
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database. A path without an extension gets `.db`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let mut path = path.as_ref().to_path_buf();
        if path.extension().is_none() {
            path.set_extension("db");
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path).map_err(|source| StorageError::Open {
            path: path.display().to_string(),
            source,
        })?;
        conn.busy_timeout(Duration::from_secs(1))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS plugin_kv (
                plugin_id TEXT NOT NULL,
                key       TEXT NOT NULL,
                value     TEXT NOT NULL,
                PRIMARY KEY (plugin_id, key)
            );
            ",
        )?;

        debug!("Opened plugin store at {}", path.display());

        Ok(Self {
            path,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Resolved database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StorageError> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;
        Ok(f(conn)?)
    }
}

impl PluginStore for SqliteStore {
    fn get(&self, plugin_id: &str, key: &str) -> Result<Option<String>, StorageError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM plugin_kv WHERE plugin_id = ?1 AND key = ?2",
                params![plugin_id, key],
                |row| row.get::<_, String>(0),
            )
            .optional()
        })
    }

    fn set(&self, plugin_id: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "
                INSERT INTO plugin_kv (plugin_id, key, value) VALUES (?1, ?2, ?3)
                ON CONFLICT (plugin_id, key) DO UPDATE SET value = excluded.value
                ",
                params![plugin_id, key, value],
            )
            .map(|_| ())
        })
    }

    fn delete(&self, plugin_id: &str, key: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM plugin_kv WHERE plugin_id = ?1 AND key = ?2",
                params![plugin_id, key],
            )
            .map(|_| ())
        })
    }

    fn list(&self, plugin_id: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.with_conn(|conn| {
            // substr() instead of LIKE so '%' and '_' in prefixes stay literal
            let mut statement = conn.prepare(
                "
                SELECT key FROM plugin_kv
                WHERE plugin_id = ?1 AND substr(key, 1, length(?2)) = ?2
                ORDER BY key ASC
                ",
            )?;
            let rows = statement.query_map(params![plugin_id, prefix], |row| {
                row.get::<_, String>(0)
            })?;

            let mut keys = Vec::new();
            for row in rows {
                keys.push(row?);
            }
            Ok(keys)
        })
    }

    fn close(&self) -> Result<(), StorageError> {
        if let Some(conn) = self.conn.lock().take() {
            conn.close().map_err(|(_, e)| StorageError::Sqlite(e))?;
            debug!("Closed plugin store at {}", self.path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_appends_db_extension() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("plugin_storage")).unwrap();
        assert_eq!(store.path(), dir.path().join("plugin_storage.db"));
        assert!(store.path().exists());
    }

    #[test]
    fn test_set_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("kv.db")).unwrap();
        store.set("p", "k", "one").unwrap();
        store.set("p", "k", "two").unwrap();
        assert_eq!(store.get("p", "k").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn test_list_prefix_is_literal() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("kv.db")).unwrap();
        store.set("p", "100%_done", "1").unwrap();
        store.set("p", "100xydone", "1").unwrap();

        let keys = store.list("p", "100%_").unwrap();
        assert_eq!(keys, vec!["100%_done".to_string()]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("kv.db")).unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.get("p", "k"), Err(StorageError::Closed)));
    }
}
