//! Durable queue of writes awaiting delivery.
//!
//! Each record is one unacknowledged submission: the endpoint it was headed
//! for plus the JSON body, keyed by an auto-incrementing id so replay order
//! is insertion order. Records stay on disk until a replay pass gets a
//! success response for them, or the user clears local storage.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

/// A locally queued write. Never transmitted as a unit; only the payload is
/// replayed, against the recorded endpoint.
#[derive(Debug, Clone)]
pub struct PendingWrite {
  pub id: i64,
  pub endpoint: String,
  pub payload: Value,
  pub queued_at: DateTime<Utc>,
}

/// SQLite-backed pending-write queue. Single writer process assumed.
pub struct Outbox {
  conn: Mutex<Connection>,
}

impl Outbox {
  /// Open the queue at the default location.
  pub fn open_default() -> Result<Self> {
    let path = crate::config::Config::data_dir()?.join("outbox.db");
    Self::open(&path)
  }

  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create outbox directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open outbox database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// In-memory queue, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory outbox database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let outbox = Self {
      conn: Mutex::new(conn),
    };
    outbox.run_migrations()?;
    Ok(outbox)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute_batch(
        "CREATE TABLE IF NOT EXISTS pending_writes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            endpoint TEXT NOT NULL,
            payload TEXT NOT NULL,
            queued_at TEXT NOT NULL
        );",
      )
      .map_err(|e| eyre!("Failed to run outbox migrations: {}", e))?;
    Ok(())
  }

  /// Append a write. Returns the generated id.
  pub fn enqueue(&self, endpoint: &str, payload: &Value) -> Result<i64> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let payload = serde_json::to_string(payload)
      .map_err(|e| eyre!("Failed to serialize pending write: {}", e))?;
    conn
      .execute(
        "INSERT INTO pending_writes (endpoint, payload, queued_at) VALUES (?, ?, ?)",
        params![endpoint, payload, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to enqueue pending write: {}", e))?;
    Ok(conn.last_insert_rowid())
  }

  /// All queued writes in insertion order (replay order is FIFO).
  pub fn list_pending(&self) -> Result<Vec<PendingWrite>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut stmt = conn
      .prepare("SELECT id, endpoint, payload, queued_at FROM pending_writes ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare outbox query: {}", e))?;

    let rows: Vec<(i64, String, String, String)> = stmt
      .query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .map_err(|e| eyre!("Failed to query pending writes: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut pending = Vec::with_capacity(rows.len());
    for (id, endpoint, payload, queued_at) in rows {
      let payload = serde_json::from_str(&payload)
        .map_err(|e| eyre!("Failed to deserialize pending write {}: {}", id, e))?;
      let queued_at = DateTime::parse_from_rfc3339(&queued_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| eyre!("Failed to parse queued_at for write {}: {}", id, e))?;
      pending.push(PendingWrite {
        id,
        endpoint,
        payload,
        queued_at,
      });
    }

    Ok(pending)
  }

  /// Delete one record. A second call with the same id is a no-op.
  pub fn remove(&self, id: i64) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute("DELETE FROM pending_writes WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove pending write: {}", e))?;
    Ok(())
  }

  pub fn len(&self) -> Result<usize> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending_writes", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count pending writes: {}", e))?;
    Ok(count as usize)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn replay_order_is_insertion_order() {
    let outbox = Outbox::open_in_memory().unwrap();
    outbox.enqueue("/api/diary-entries", &json!({"n": 1})).unwrap();
    outbox.enqueue("/api/diary-entries", &json!({"n": 2})).unwrap();
    outbox.enqueue("/api/cases", &json!({"n": 3})).unwrap();

    let pending = outbox.list_pending().unwrap();
    let order: Vec<i64> = pending.iter().map(|p| p.payload["n"].as_i64().unwrap()).collect();
    assert_eq!(order, vec![1, 2, 3]);
    assert_eq!(pending[2].endpoint, "/api/cases");
  }

  #[test]
  fn remove_is_idempotent() {
    let outbox = Outbox::open_in_memory().unwrap();
    let id = outbox.enqueue("/api/diary-entries", &json!({})).unwrap();

    outbox.remove(id).unwrap();
    assert!(outbox.is_empty().unwrap());
    // Second call is a no-op, not an error
    outbox.remove(id).unwrap();
  }

  #[test]
  fn ids_keep_increasing_after_removal() {
    let outbox = Outbox::open_in_memory().unwrap();
    let first = outbox.enqueue("/api/diary-entries", &json!({"n": 1})).unwrap();
    outbox.remove(first).unwrap();
    let second = outbox.enqueue("/api/diary-entries", &json!({"n": 2})).unwrap();
    assert!(second > first);
  }

  #[test]
  fn queue_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outbox.db");

    {
      let outbox = Outbox::open(&path).unwrap();
      outbox.enqueue("/api/diary-entries", &json!({"remarks": "adjourned"})).unwrap();
    }

    let outbox = Outbox::open(&path).unwrap();
    let pending = outbox.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload["remarks"], "adjourned");
  }
}
