//! Generation storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};

use super::traits::{CachedResponse, GenerationInfo, GenerationState};
use crate::db::{parse_datetime, Database};
use crate::error::EngineError;
use crate::http::{RequestKey, Response};

/// Trait for cache generation backends.
pub trait GenerationStore: Send + Sync {
  /// Atomically store a fully precached generation. Entries already present
  /// under the same key are replaced; an existing active generation of the
  /// same name stays active.
  fn install_generation(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Make `name` the only generation; returns the names that were purged.
  fn activate(&self, name: &str) -> Result<Vec<String>>;

  /// Name of the active generation, if any.
  fn active_generation(&self) -> Result<Option<String>>;

  /// All stored generations, ordered by name.
  fn generations(&self) -> Result<Vec<GenerationInfo>>;

  /// Look up a stored response.
  fn lookup(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Store (or replace) a single response in an existing generation.
  fn store(&self, generation: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Number of responses stored in a generation.
  fn entry_count(&self, generation: &str) -> Result<usize>;
}

/// SQLite-based generation storage.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl GenerationStore for SqliteStorage {
  fn install_generation(&self, name: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT INTO generations (name, state) VALUES (?, 'installed')
       ON CONFLICT(name) DO NOTHING",
      params![name],
    )
    .map_err(|e| eyre!("Failed to create generation {}: {}", name, e))?;

    for (key, response) in entries {
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO cache_entries (generation, method, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![name, key.method, key.url, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key.url, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit generation {}: {}", name, e))?;

    Ok(())
  }

  fn activate(&self, name: &str) -> Result<Vec<String>> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let exists: Option<String> = tx
      .query_row(
        "SELECT name FROM generations WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query generation {}: {}", name, e))?;

    if exists.is_none() {
      return Err(EngineError::NotInstalled(name.to_string()).into());
    }

    let purged: Vec<String> = {
      let mut stmt = tx
        .prepare("SELECT name FROM generations WHERE name != ? ORDER BY name")
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
      let names = stmt
        .query_map(params![name], |row| row.get(0))
        .map_err(|e| eyre!("Failed to list generations: {}", e))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(|e| eyre!("Failed to read generation name: {}", e))?;
      names
    };

    tx.execute("DELETE FROM cache_entries WHERE generation != ?", params![name])
      .map_err(|e| eyre!("Failed to purge cache entries: {}", e))?;
    tx.execute("DELETE FROM generations WHERE name != ?", params![name])
      .map_err(|e| eyre!("Failed to purge generations: {}", e))?;
    tx.execute(
      "UPDATE generations SET state = 'active' WHERE name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to activate {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit activation of {}: {}", name, e))?;

    Ok(purged)
  }

  fn active_generation(&self) -> Result<Option<String>> {
    let conn = self.db.conn()?;

    conn
      .query_row(
        "SELECT name FROM generations WHERE state = 'active'",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query active generation: {}", e))
  }

  fn generations(&self) -> Result<Vec<GenerationInfo>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT g.name, g.state, COUNT(e.url) FROM generations g
         LEFT JOIN cache_entries e ON e.generation = g.name
         GROUP BY g.name, g.state
         ORDER BY g.name",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, i64>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list generations: {}", e))?;

    let mut generations = Vec::new();
    for row in rows {
      let (name, state, entries) = row.map_err(|e| eyre!("Failed to read generation: {}", e))?;
      let state = GenerationState::parse(&state)
        .ok_or_else(|| eyre!("Unknown state {:?} for generation {}", state, name))?;
      generations.push(GenerationInfo {
        name,
        state,
        entries: entries as usize,
      });
    }

    Ok(generations)
  }

  fn lookup(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE generation = ? AND method = ? AND url = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![generation, key.method, key.url], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key.url, e))?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key.url, e))?;
        Ok(Some(CachedResponse {
          response: Response {
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn store(&self, generation: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self.db.conn()?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (generation, method, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![generation, key.method, key.url, response.status, headers, response.body],
      )
      .map_err(|e| eyre!("Failed to store {} in {}: {}", key.url, generation, e))?;

    Ok(())
  }

  fn entry_count(&self, generation: &str) -> Result<usize> {
    let conn = self.db.conn()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", generation, e))?;

    Ok(count as usize)
  }
}
