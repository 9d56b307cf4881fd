//! Pluggable key-value storage
//!
//! The palette library and the remote cache snapshot each persist one JSON
//! document under their own key. [`Storage`] is the seam that lets the same
//! logic run against memory, a directory of files, or the SQLite catalog.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
}

/// Namespaced get/set/remove over string documents
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local storage, mostly for tests and one-shot runs
#[derive(Debug, Default)]
pub struct MemoryStorage {
    namespace: String,
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            values: Mutex::new(HashMap::new()),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(lock(&self.values).get(&self.full_key(key)).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        lock(&self.values).insert(self.full_key(key), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.values).remove(&self.full_key(key));
        Ok(())
    }
}

/// One JSON document per key under `<root>/<namespace>/`
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            dir: root.as_ref().join(namespace),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir).map_err(|source| StorageError::Io {
            path: self.dir.clone(),
            source,
        })?;

        // Write next to the target, then rename so readers never see half a document
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, value).map_err(|source| StorageError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}

/// Key-value documents stored in a SQLite database
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    namespace: String,
}

impl SqliteStorage {
    /// Open (or create) the database and initialize the schema.
    ///
    /// The parent directory is created if it does not exist yet.
    pub fn open(db_path: impl Into<PathBuf>, namespace: impl Into<String>) -> Result<Self, StorageError> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&db_path)?;
        info!("📁 Palette database opened at: {}", db_path.display());

        let storage = Self {
            conn: Mutex::new(conn),
            db_path,
            namespace: namespace.into(),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Default database location under the user's data directory
    ///
    /// - Linux: ~/.local/share/palette-studio/palette_studio.db
    /// - macOS: ~/Library/Application Support/palette-studio/palette_studio.db
    /// - Windows: %APPDATA%\palette-studio\palette_studio.db
    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::data_dir().or_else(dirs::home_dir)?;
        path.push("palette-studio");
        path.push("palette_studio.db");
        Some(path)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        lock(&self.conn).execute(
            "CREATE TABLE IF NOT EXISTS kv (
                namespace       TEXT NOT NULL,
                key             TEXT NOT NULL,
                value           TEXT NOT NULL,
                updated_at      INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            )",
            [],
        )?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

impl Storage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = lock(&self.conn)
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                rusqlite::params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        lock(&self.conn).execute(
            "INSERT INTO kv (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![self.namespace, key, value, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.conn).execute(
            "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
            rusqlite::params![self.namespace, key],
        )?;
        Ok(())
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("db_path", &self.db_path)
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &dyn Storage) {
        assert_eq!(storage.get("palettes").unwrap(), None);

        storage.set("palettes", "[1,2,3]").unwrap();
        assert_eq!(storage.get("palettes").unwrap().as_deref(), Some("[1,2,3]"));

        storage.set("palettes", "[]").unwrap();
        assert_eq!(storage.get("palettes").unwrap().as_deref(), Some("[]"));

        storage.remove("palettes").unwrap();
        assert_eq!(storage.get("palettes").unwrap(), None);

        // Removing twice is fine
        storage.remove("palettes").unwrap();
    }

    #[test]
    fn test_memory_storage() {
        exercise(&MemoryStorage::new("test"));
    }

    #[test]
    fn test_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path(), "studio");
        exercise(&storage);
        assert!(storage.dir().ends_with("studio"));
    }

    #[test]
    fn test_file_storage_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path(), "studio");
        assert!(matches!(
            storage.set("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_sqlite_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::open(dir.path().join("nested/studio.db"), "studio").unwrap();
        exercise(&storage);
    }

    #[test]
    fn test_sqlite_namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("studio.db");
        let a = SqliteStorage::open(&path, "a").unwrap();
        let b = SqliteStorage::open(&path, "b").unwrap();

        a.set("k", "from a").unwrap();
        assert_eq!(b.get("k").unwrap(), None);
        assert_eq!(a.get("k").unwrap().as_deref(), Some("from a"));
    }

    #[test]
    fn test_sqlite_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("studio.db");
        {
            let storage = SqliteStorage::open(&path, "studio").unwrap();
            storage.set("saved-palettes", "[]").unwrap();
        }
        let reopened = SqliteStorage::open(&path, "studio").unwrap();
        assert_eq!(reopened.get("saved-palettes").unwrap().as_deref(), Some("[]"));
    }
}
