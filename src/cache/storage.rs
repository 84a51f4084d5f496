//! Cache storage trait and SQLite implementation.

use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Cached enum tables for one service: attribute name to ordered names.
pub type Entries = BTreeMap<String, Vec<String>>;

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Load every cached attribute for a service.
  fn load(&self, service: &str) -> Result<Entries>;

  /// Replace the cached attributes of a service.
  fn store(&self, service: &str, entries: &Entries) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn load(&self, _service: &str) -> Result<Entries> {
    Ok(Entries::new()) // Always empty
  }

  fn store(&self, _service: &str, _entries: &Entries) -> Result<()> {
    Ok(()) // Discard
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    Self::with_connection(Connection::open(path)?)
  }

  #[cfg(test)]
  pub fn in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Cache("could not determine data directory".to_string()))?;

    Ok(data_dir.join("trk").join("cache.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Cache(format!("lock poisoned: {}", e)))
  }

  fn run_migrations(&self) -> Result<()> {
    self.lock()?.execute_batch(CACHE_SCHEMA)?;
    Ok(())
  }
}

/// Values are stored comma-separated in backend order.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS enum_cache (
    service TEXT NOT NULL,
    attribute TEXT NOT NULL,
    value_list TEXT NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (service, attribute)
);
"#;

impl CacheStorage for SqliteStorage {
  fn load(&self, service: &str) -> Result<Entries> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT attribute, value_list FROM enum_cache WHERE service = ?")?;

    let rows = stmt.query_map(params![service], |row| {
      Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut entries = Entries::new();
    for row in rows {
      let (attribute, value_list) = row?;
      entries.insert(attribute, split_values(&value_list));
    }
    Ok(entries)
  }

  fn store(&self, service: &str, entries: &Entries) -> Result<()> {
    // value lists are comma-joined, so a comma would shift every later code
    for (attribute, values) in entries {
      if let Some(value) = values.iter().find(|v| v.contains(',')) {
        return Err(Error::Cache(format!(
          "cannot store {} value {:?}: names must not contain ','",
          attribute, value
        )));
      }
    }

    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM enum_cache WHERE service = ?", params![service])?;
    for (attribute, values) in entries {
      tx.execute(
        "INSERT INTO enum_cache (service, attribute, value_list, cached_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![service, attribute, values.join(",")],
      )?;
    }

    tx.commit()?;
    Ok(())
  }
}

fn split_values(value_list: &str) -> Vec<String> {
  if value_list.is_empty() {
    return Vec::new();
  }
  value_list.split(',').map(String::from).collect()
}
