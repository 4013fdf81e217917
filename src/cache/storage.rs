//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use crate::db::Database;
use crate::http::Response;

use super::key::RequestKey;

/// A single cached response.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  /// The stored response snapshot
  pub response: Response,
  /// When the entry was written
  pub stored_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Individual writes are serialized by the backend; concurrent writes to the
/// same key are last-write-wins.
pub trait CacheStorage: Send + Sync {
  /// Create a partition if it does not exist yet.
  fn open_partition(&self, name: &str) -> Result<()>;

  /// Names of every existing partition, oldest first.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Delete a partition and all of its entries. Returns whether it existed.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Look up an entry in one partition.
  fn get_entry(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Look up an entry in any partition, oldest partition first.
  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Store a response. Fails if the partition does not exist.
  fn put_entry(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store several responses at once; either all are written or none.
  fn put_entries(&self, partition: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Keys of every entry in a partition.
  fn entry_keys(&self, partition: &str) -> Result<Vec<RequestKey>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

const INSERT_ENTRY: &str = "INSERT OR REPLACE INTO cache_entries
   (partition, key_hash, method, url, status, headers, body, stored_at)
   SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now')
   WHERE EXISTS (SELECT 1 FROM cache_partitions WHERE name = ?1)";

fn insert_entry(
  conn: &rusqlite::Connection,
  partition: &str,
  key: &RequestKey,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(response.headers())
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  let inserted = conn
    .execute(
      INSERT_ENTRY,
      params![
        partition,
        key.cache_hash(),
        key.method(),
        key.url(),
        response.status(),
        headers,
        response.body().as_ref(),
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;

  if inserted == 0 {
    return Err(eyre!("Cache partition {} does not exist", partition));
  }
  Ok(())
}

fn entry_from_row(
  status: u16,
  headers: String,
  body: Vec<u8>,
  stored_at: String,
) -> Result<CachedEntry> {
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
  let stored_at = parse_datetime(&stored_at)?;
  Ok(CachedEntry {
    response: Response::new(status, headers, body).stored(stored_at),
    stored_at,
  })
}

type EntryRow = (u16, String, Vec<u8>, String);

impl CacheStorage for SqliteStorage {
  fn open_partition(&self, name: &str) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open partition {}: {}", name, e))?;
    Ok(())
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_partitions ORDER BY created_at, rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE partition = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let deleted = tx
      .execute("DELETE FROM cache_partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  fn get_entry(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.db.conn()?;
    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM cache_entries
         WHERE partition = ? AND key_hash = ?",
        params![partition, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key, partition, e))?;

    row
      .map(|(status, headers, body, stored_at)| entry_from_row(status, headers, body, stored_at))
      .transpose()
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.db.conn()?;
    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT e.status, e.headers, e.body, e.stored_at FROM cache_entries e
         INNER JOIN cache_partitions p ON p.name = e.partition
         WHERE e.key_hash = ?
         ORDER BY p.created_at, p.rowid
         LIMIT 1",
        params![key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    row
      .map(|(status, headers, body, stored_at)| entry_from_row(status, headers, body, stored_at))
      .transpose()
  }

  fn put_entry(&self, partition: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self.db.conn()?;
    insert_entry(&conn, partition, key, response)
  }

  fn put_entries(&self, partition: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, response) in entries {
      // Dropping the transaction on error rolls everything back
      insert_entry(&tx, partition, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn entry_keys(&self, partition: &str) -> Result<Vec<RequestKey>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT method, url FROM cache_entries WHERE partition = ? ORDER BY url")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![partition], |row| {
        let method: String = row.get(0)?;
        let url: String = row.get(1)?;
        Ok(RequestKey::new(&method, &url))
      })
      .map_err(|e| eyre!("Failed to list entries of {}: {}", partition, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry key: {}", e))?;

    Ok(keys)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
