//! Persistent lookup tables for backend enum codes.
//!
//! Trackers return status, priority, keyword and user references as opaque
//! 1-based numeric codes. The cache maps each code to its display name using
//! the order the backend assigned the codes in:
//! - entry *i* of an attribute holds the name of code *i + 1*
//! - entries are never resorted client-side
//! - a code past the end of a table means the cache is stale; lookups fall
//!   back to the raw code instead of failing

mod storage;

pub use storage::{CacheStorage, Entries, NoopStorage, SqliteStorage};

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::Result;

/// Attributes every service cache carries, empty until the first refresh.
pub const ATTRIBUTES: &[&str] = &["status", "priority", "keyword", "users"];

/// Outcome of resolving a code through the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
  Name(&'a str),
  /// The code is not cached yet; the raw code is the best available name.
  Stale(u64),
}

impl Lookup<'_> {
  pub fn is_stale(&self) -> bool {
    matches!(self, Lookup::Stale(_))
  }
}

impl fmt::Display for Lookup<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Lookup::Name(name) => f.write_str(name),
      Lookup::Stale(code) => write!(f, "{}", code),
    }
  }
}

/// Stable cache namespace for a service base URL.
pub fn service_key(base_url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(base_url.trim_end_matches('/').as_bytes());
  hex::encode(hasher.finalize())
}

/// Code-to-name tables for one service.
pub struct EnumCache {
  service: String,
  storage: Arc<dyn CacheStorage>,
  entries: Entries,
  stale_seen: Mutex<BTreeSet<String>>,
}

impl EnumCache {
  /// Load the cached tables of `service`, defaulting every known attribute
  /// to an empty table.
  pub fn load(service: impl Into<String>, storage: Arc<dyn CacheStorage>) -> Result<Self> {
    let service = service.into();
    let mut entries = storage.load(&service)?;
    for attribute in ATTRIBUTES {
      entries.entry(attribute.to_string()).or_default();
    }
    debug!(service = %service, attributes = entries.len(), "loaded enum cache");

    Ok(Self {
      service,
      storage,
      entries,
      stale_seen: Mutex::new(BTreeSet::new()),
    })
  }

  /// A cache that is never persisted.
  pub fn detached() -> Self {
    let mut entries = Entries::new();
    for attribute in ATTRIBUTES {
      entries.insert(attribute.to_string(), Vec::new());
    }
    Self {
      service: String::new(),
      storage: Arc::new(NoopStorage),
      entries,
      stale_seen: Mutex::new(BTreeSet::new()),
    }
  }

  pub fn values(&self, attribute: &str) -> &[String] {
    self
      .entries
      .get(attribute)
      .map(Vec::as_slice)
      .unwrap_or_default()
  }

  pub fn entries(&self) -> &Entries {
    &self.entries
  }

  pub fn get(&self, attribute: &str, code: u64) -> Lookup<'_> {
    let name = code
      .checked_sub(1)
      .and_then(|i| usize::try_from(i).ok())
      .and_then(|i| self.values(attribute).get(i));
    match name {
      Some(name) => Lookup::Name(name),
      None => Lookup::Stale(code),
    }
  }

  /// Display name for `code`, or the code itself when the cache is stale.
  ///
  /// Staleness is logged once per attribute.
  pub fn resolve(&self, attribute: &str, code: u64) -> String {
    let lookup = self.get(attribute, code);
    if lookup.is_stale() {
      self.note_stale(attribute, code);
    }
    lookup.to_string()
  }

  /// Code of a display name, the inverse of `get`.
  pub fn code_of(&self, attribute: &str, name: &str) -> Option<u64> {
    self
      .values(attribute)
      .iter()
      .position(|v| v == name)
      .map(|i| i as u64 + 1)
  }

  /// Replace an attribute's table, keeping the given order.
  pub fn update(&mut self, attribute: impl Into<String>, values: Vec<String>) {
    let attribute = attribute.into();
    self.forget_stale(&attribute);
    self.entries.insert(attribute, values);
  }

  /// Whether any lookup has fallen back to a raw code so far.
  pub fn saw_stale(&self) -> bool {
    self
      .stale_seen
      .lock()
      .map(|seen| !seen.is_empty())
      .unwrap_or(false)
  }

  pub fn persist(&self) -> Result<()> {
    self.storage.store(&self.service, &self.entries)?;
    debug!(service = %self.service, "persisted enum cache");
    Ok(())
  }

  fn note_stale(&self, attribute: &str, code: u64) {
    if let Ok(mut seen) = self.stale_seen.lock() {
      if seen.insert(attribute.to_string()) {
        warn!(attribute, code, "cached values look stale, run `trk cache update`");
      }
    }
  }

  fn forget_stale(&self, attribute: &str) {
    if let Ok(mut seen) = self.stale_seen.lock() {
      seen.remove(attribute);
    }
  }
}

impl fmt::Debug for EnumCache {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EnumCache")
      .field("service", &self.service)
      .field("entries", &self.entries)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn test_update_then_get() {
    let mut cache = EnumCache::detached();
    cache.update("status", strings(&["open", "closed"]));

    assert_eq!(cache.get("status", 1), Lookup::Name("open"));
    assert_eq!(cache.get("status", 2), Lookup::Name("closed"));
    assert_eq!(cache.get("status", 99), Lookup::Stale(99));
    assert_eq!(cache.get("status", 0), Lookup::Stale(0));
  }

  #[test]
  fn test_resolve_falls_back_to_raw_code() {
    let mut cache = EnumCache::detached();
    cache.update("status", strings(&["open", "closed"]));

    assert!(!cache.saw_stale());
    assert_eq!(cache.resolve("status", 1), "open");
    assert_eq!(cache.resolve("status", 99), "99");
    assert!(cache.saw_stale());

    cache.update("status", strings(&["open", "closed"]));
    assert!(!cache.saw_stale());
  }

  #[test]
  fn test_unknown_attribute_is_empty_and_stale() {
    let cache = EnumCache::detached();
    assert!(cache.values("status").is_empty());
    assert!(cache.values("nonexistent").is_empty());
    assert_eq!(cache.get("priority", 1), Lookup::Stale(1));
  }

  #[test]
  fn test_update_keeps_backend_order() {
    let mut cache = EnumCache::detached();
    cache.update("priority", strings(&["critical", "urgent", "bug", "feature", "wish"]));
    assert_eq!(cache.code_of("priority", "bug"), Some(3));
    assert_eq!(cache.get("priority", 5), Lookup::Name("wish"));
    assert_eq!(cache.code_of("priority", "missing"), None);
  }

  #[test]
  fn test_persist_round_trip() {
    let storage: Arc<dyn CacheStorage> = Arc::new(SqliteStorage::in_memory().unwrap());

    let mut cache = EnumCache::load("svc", storage.clone()).unwrap();
    assert!(cache.values("users").is_empty());
    cache.update("users", strings(&["admin", "anonymous", "alice"]));
    cache.persist().unwrap();

    let reloaded = EnumCache::load("svc", storage).unwrap();
    assert_eq!(reloaded.get("users", 3), Lookup::Name("alice"));
    assert_eq!(reloaded.values("status"), &[] as &[String]);
  }

  #[test]
  fn test_service_key_is_stable() {
    assert_eq!(
      service_key("https://bugs.example.org/"),
      service_key("https://bugs.example.org")
    );
    assert_ne!(
      service_key("https://bugs.example.org"),
      service_key("https://tracker.example.org")
    );
    assert_eq!(service_key("x").len(), 64);
  }
}
