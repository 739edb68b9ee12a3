//! Cache store trait and SQLite implementation.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::traits::{CachePartition, CachedResponse};
use crate::http::Response;

/// Trait for response-cache backends.
///
/// Entries are single-valued per request key: a write always replaces, never
/// appends. The store assumes a single writer process; two processes sharing
/// the same file may race on overwrites.
pub trait CacheStore: Send + Sync {
  /// Pin a response into the static partition (install time).
  fn put_static(&self, key: &str, url: &str, response: &Response) -> Result<()>;

  /// Store a response in the dynamic partition, replacing any previous
  /// dynamic entry. Keys held by the static partition are left untouched.
  fn put_dynamic(&self, key: &str, url: &str, response: &Response) -> Result<()>;

  /// Look up a response. Expired dynamic entries count as misses.
  fn get(&self, key: &str) -> Result<Option<CachedResponse>>;

  /// Drop a single entry; no-op when absent.
  fn invalidate(&self, key: &str) -> Result<()>;

  /// Drop the whole dynamic partition.
  fn clear_dynamic(&self) -> Result<()>;

  /// Drop entries written under a different cache version (activation).
  fn prune_versions(&self, current: &str) -> Result<()>;

  fn count(&self, partition: CachePartition) -> Result<usize>;
}

/// Tuning for the SQLite store, taken from `OfflineConfig`.
#[derive(Debug, Clone)]
pub struct CacheOptions {
  pub version: String,
  pub max_dynamic_entries: usize,
  /// Age after which a dynamic entry reads as a miss. `None` disables expiry.
  pub ttl: Option<Duration>,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      version: "v1".into(),
      max_dynamic_entries: 512,
      ttl: Some(Duration::hours(24)),
    }
  }
}

/// SQLite-based response cache.
pub struct SqliteCacheStore {
  conn: Mutex<Connection>,
  options: CacheOptions,
}

impl SqliteCacheStore {
  /// Open the cache at the default location.
  pub fn open_default(options: CacheOptions) -> Result<Self> {
    let path = crate::config::Config::data_dir()?.join("cache.db");
    Self::open(&path, options)
  }

  pub fn open(path: &Path, options: CacheOptions) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn, options)
  }

  /// In-memory store, used by tests.
  pub fn open_in_memory(options: CacheOptions) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn, options)
  }

  fn from_connection(conn: Connection, options: CacheOptions) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
      options,
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn put(&self, key: &str, url: &str, partition: CachePartition, response: &Response) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if partition == CachePartition::Dynamic {
      // Static entries are pinned; runtime traffic never overwrites them.
      let existing: Option<String> = conn
        .query_row(
          "SELECT partition FROM response_cache WHERE request_key = ?",
          params![key],
          |row| row.get(0),
        )
        .optional()
        .map_err(|e| eyre!("Failed to check cache partition: {}", e))?;
      if existing.as_deref() == Some(CachePartition::Static.as_str()) {
        return Ok(());
      }
    }

    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache
           (request_key, partition, version, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          key,
          partition.as_str(),
          self.options.version,
          url,
          response.status,
          headers,
          response.body,
          Utc::now().to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    if partition == CachePartition::Dynamic {
      conn
        .execute(
          "DELETE FROM response_cache
           WHERE partition = 'dynamic' AND request_key NOT IN (
             SELECT request_key FROM response_cache
             WHERE partition = 'dynamic'
             ORDER BY cached_at DESC, rowid DESC
             LIMIT ?
           )",
          params![self.options.max_dynamic_entries],
        )
        .map_err(|e| eyre!("Failed to evict cache entries: {}", e))?;
    }

    Ok(())
  }
}

/// Schema for the response cache.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    request_key TEXT PRIMARY KEY,
    partition TEXT NOT NULL,
    version TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_response_cache_partition
    ON response_cache(partition, cached_at);
"#;

impl CacheStore for SqliteCacheStore {
  fn put_static(&self, key: &str, url: &str, response: &Response) -> Result<()> {
    self.put(key, url, CachePartition::Static, response)
  }

  fn put_dynamic(&self, key: &str, url: &str, response: &Response) -> Result<()> {
    self.put(key, url, CachePartition::Dynamic, response)
  }

  fn get(&self, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(String, u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT partition, status, headers, body, cached_at
         FROM response_cache WHERE request_key = ?",
        params![key],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache: {}", e))?;

    let (partition, status, headers, body, cached_at) = match row {
      Some(row) => row,
      None => return Ok(None),
    };

    let partition = match partition.as_str() {
      "static" => CachePartition::Static,
      _ => CachePartition::Dynamic,
    };
    let cached_at = parse_datetime(&cached_at)?;

    if partition == CachePartition::Dynamic {
      if let Some(ttl) = self.options.ttl {
        if Utc::now() - cached_at >= ttl {
          conn
            .execute("DELETE FROM response_cache WHERE request_key = ?", params![key])
            .map_err(|e| eyre!("Failed to drop expired entry: {}", e))?;
          return Ok(None);
        }
      }
    }

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

    Ok(Some(CachedResponse {
      response: Response { status, headers, body },
      partition,
      cached_at,
    }))
  }

  fn invalidate(&self, key: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute("DELETE FROM response_cache WHERE request_key = ?", params![key])
      .map_err(|e| eyre!("Failed to invalidate cache entry: {}", e))?;
    Ok(())
  }

  fn clear_dynamic(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute("DELETE FROM response_cache WHERE partition = 'dynamic'", [])
      .map_err(|e| eyre!("Failed to clear dynamic partition: {}", e))?;
    Ok(())
  }

  fn prune_versions(&self, current: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let dropped = conn
      .execute(
        "DELETE FROM response_cache WHERE version != ?",
        params![current],
      )
      .map_err(|e| eyre!("Failed to prune old cache versions: {}", e))?;
    if dropped > 0 {
      tracing::debug!(dropped, "pruned cache entries from old versions");
    }
    Ok(())
  }

  fn count(&self, partition: CachePartition) -> Result<usize> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM response_cache WHERE partition = ?",
        params![partition.as_str()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
    Ok(count as usize)
  }
}

/// Parse an RFC 3339 timestamp written by this store.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn store() -> SqliteCacheStore {
    SqliteCacheStore::open_in_memory(CacheOptions::default()).unwrap()
  }

  fn response(marker: &str) -> Response {
    Response::json(200, &json!({ "marker": marker }))
  }

  #[test]
  fn put_get_roundtrip() {
    let store = store();
    store.put_dynamic("k1", "/api/cases", &response("a")).unwrap();

    let hit = store.get("k1").unwrap().unwrap();
    assert_eq!(hit.partition, CachePartition::Dynamic);
    assert_eq!(hit.response, response("a"));
  }

  #[test]
  fn dynamic_write_replaces_previous_entry() {
    let store = store();
    store.put_dynamic("k1", "/api/cases", &response("old")).unwrap();
    store.put_dynamic("k1", "/api/cases", &response("new")).unwrap();

    let hit = store.get("k1").unwrap().unwrap();
    assert_eq!(hit.response.body_json().unwrap()["marker"], "new");
    assert_eq!(store.count(CachePartition::Dynamic).unwrap(), 1);
  }

  #[test]
  fn static_entries_survive_runtime_overwrites() {
    let store = store();
    store.put_static("root", "/", &response("pinned")).unwrap();
    store.put_dynamic("root", "/", &response("runtime")).unwrap();

    let hit = store.get("root").unwrap().unwrap();
    assert_eq!(hit.partition, CachePartition::Static);
    assert_eq!(hit.response.body_json().unwrap()["marker"], "pinned");
  }

  #[test]
  fn dynamic_partition_is_bounded() {
    let store = SqliteCacheStore::open_in_memory(CacheOptions {
      max_dynamic_entries: 3,
      ..CacheOptions::default()
    })
    .unwrap();
    store.put_static("s", "/", &response("pinned")).unwrap();

    for i in 0..5 {
      let key = format!("k{}", i);
      store.put_dynamic(&key, "/api/cases", &response(&key)).unwrap();
    }

    assert_eq!(store.count(CachePartition::Dynamic).unwrap(), 3);
    // Static partition is exempt from eviction
    assert_eq!(store.count(CachePartition::Static).unwrap(), 1);
    // Oldest entries went first
    assert!(store.get("k0").unwrap().is_none());
    assert!(store.get("k4").unwrap().is_some());
  }

  #[test]
  fn expired_dynamic_entries_read_as_misses() {
    let store = SqliteCacheStore::open_in_memory(CacheOptions {
      ttl: Some(Duration::zero()),
      ..CacheOptions::default()
    })
    .unwrap();
    store.put_dynamic("k1", "/api/cases", &response("stale")).unwrap();
    store.put_static("s", "/", &response("pinned")).unwrap();

    assert!(store.get("k1").unwrap().is_none());
    // Static entries never expire
    assert!(store.get("s").unwrap().is_some());
  }

  #[test]
  fn prune_versions_drops_other_versions_only() {
    let store = store();
    store.put_dynamic("k1", "/api/cases", &response("a")).unwrap();

    let v2 = SqliteCacheStore::open_in_memory(CacheOptions {
      version: "v2".into(),
      ..CacheOptions::default()
    })
    .unwrap();
    v2.put_dynamic("k2", "/api/chambers", &response("b")).unwrap();

    store.prune_versions("v1").unwrap();
    assert!(store.get("k1").unwrap().is_some());

    v2.prune_versions("v1").unwrap();
    assert!(v2.get("k2").unwrap().is_none());
  }

  #[test]
  fn invalidate_and_clear() {
    let store = store();
    store.put_static("s", "/", &response("pinned")).unwrap();
    store.put_dynamic("k1", "/api/cases", &response("a")).unwrap();
    store.put_dynamic("k2", "/api/chambers", &response("b")).unwrap();

    store.invalidate("k1").unwrap();
    assert!(store.get("k1").unwrap().is_none());
    // Idempotent
    store.invalidate("k1").unwrap();

    store.clear_dynamic().unwrap();
    assert_eq!(store.count(CachePartition::Dynamic).unwrap(), 0);
    assert!(store.get("s").unwrap().is_some());
  }

  #[test]
  fn entries_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let store = SqliteCacheStore::open(&path, CacheOptions::default()).unwrap();
      store.put_dynamic("k1", "/api/cases", &response("a")).unwrap();
    }

    let store = SqliteCacheStore::open(&path, CacheOptions::default()).unwrap();
    assert!(store.get("k1").unwrap().is_some());
  }
}
