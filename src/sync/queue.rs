//! Durable queue of mutating requests that could not reach the network.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::db::{parse_datetime, Database};
use crate::http::{fetch_with_timeout, Network, Request};

/// A queued request, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEntry {
  pub id: i64,
  pub request: Request,
  /// Replays attempted so far
  pub attempts: u32,
  pub last_error: Option<String>,
  pub queued_at: DateTime<Utc>,
}

/// What `enqueue` did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
  Queued(i64),
  /// The identical request was already waiting
  AlreadyQueued(i64),
}

impl Enqueued {
  pub fn id(&self) -> i64 {
    match self {
      Enqueued::Queued(id) | Enqueued::AlreadyQueued(id) => *id,
    }
  }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Entries replayed against the network
  pub replayed: usize,
  /// Entries answered 2xx and removed
  pub delivered: usize,
  /// Entries that failed again and stay queued
  pub retained: usize,
  /// Another drain was already running; this trigger joined it
  pub coalesced: bool,
}

/// Queue of failed mutating requests under one syncable path prefix.
///
/// Replay is at-least-once: an entry leaves the queue only after a 2xx
/// answer, and there is no bound on how often it is retried.
#[derive(Clone)]
pub struct SyncQueue {
  db: Database,
  network: Arc<dyn Network>,
  scope: String,
  timeout: Option<Duration>,
  drain_lock: Arc<AsyncMutex<()>>,
}

impl SyncQueue {
  pub fn new(db: Database, network: Arc<dyn Network>, scope: &str) -> Self {
    Self {
      db,
      network,
      scope: scope.to_string(),
      timeout: None,
      drain_lock: Arc::new(AsyncMutex::new(())),
    }
  }

  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  /// Syncable path prefix this queue owns.
  pub fn scope(&self) -> &str {
    &self.scope
  }

  /// Whether a failed request belongs in this queue.
  ///
  /// The scope matches whole path segments: `/api/beats` owns
  /// `/api/beats/upload` but not `/api/beatsaber`.
  pub fn accepts(&self, request: &Request) -> bool {
    if !request.is_mutating() {
      return false;
    }

    let scope = self.scope.trim_end_matches('/');
    match request.url.path().strip_prefix(scope) {
      Some(rest) => rest.is_empty() || rest.starts_with('/'),
      None => false,
    }
  }

  /// Record a request that failed with a connectivity error.
  ///
  /// Identical requests (method, URL, headers, body) are stored once.
  pub fn enqueue(&self, request: &Request) -> Result<Enqueued> {
    let conn = self.db.conn()?;
    let identity = identity(request);
    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let inserted = conn
      .execute(
        "INSERT OR IGNORE INTO sync_queue (scope, identity, method, url, headers, body)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          self.scope,
          identity,
          request.method,
          request.url.as_str(),
          headers,
          request.body
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue {}: {}", request.url, e))?;

    let id: i64 = conn
      .query_row(
        "SELECT id FROM sync_queue WHERE scope = ? AND identity = ?",
        params![self.scope, identity],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to read queue entry: {}", e))?;

    if inserted == 0 {
      debug!(id, url = %request.url, "request already queued");
      Ok(Enqueued::AlreadyQueued(id))
    } else {
      info!(id, method = %request.method, url = %request.url, "queued request for sync");
      Ok(Enqueued::Queued(id))
    }
  }

  /// Queued entries, oldest first.
  pub fn entries(&self) -> Result<Vec<SyncEntry>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT id, method, url, headers, body, attempts, last_error, queued_at
         FROM sync_queue WHERE scope = ? ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![self.scope], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, Vec<u8>>(4)?,
          row.get::<_, u32>(5)?,
          row.get::<_, Option<String>>(6)?,
          row.get::<_, String>(7)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query sync queue: {}", e))?;

    let mut entries = Vec::new();
    for row in rows {
      let (id, method, url, headers, body, attempts, last_error, queued_at) =
        row.map_err(|e| eyre!("Failed to read queue entry: {}", e))?;

      let url = Url::parse(&url).map_err(|e| eyre!("Invalid queued URL {}: {}", url, e))?;
      let headers = serde_json::from_str(&headers)
        .map_err(|e| eyre!("Failed to deserialize headers of entry {}: {}", id, e))?;

      entries.push(SyncEntry {
        id,
        request: Request {
          method,
          url,
          headers,
          body,
        },
        attempts,
        last_error,
        queued_at: parse_datetime(&queued_at)?,
      });
    }

    Ok(entries)
  }

  pub fn len(&self) -> Result<usize> {
    let conn = self.db.conn()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM sync_queue WHERE scope = ?",
        params![self.scope],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count sync queue: {}", e))?;
    Ok(count as usize)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Replay every queued entry, oldest first.
  ///
  /// Entries answered 2xx are removed; everything else stays for the next
  /// trigger. If a drain is already running this returns immediately with
  /// `coalesced` set, so no entry is submitted twice.
  pub async fn drain(&self) -> Result<DrainReport> {
    let Ok(_guard) = self.drain_lock.try_lock() else {
      debug!(scope = %self.scope, "drain already in progress");
      return Ok(DrainReport {
        coalesced: true,
        ..DrainReport::default()
      });
    };

    let entries = self.entries()?;
    let mut report = DrainReport::default();

    for entry in entries {
      report.replayed += 1;

      let outcome = match fetch_with_timeout(self.network.as_ref(), &entry.request, self.timeout).await {
        Ok(response) if response.is_success() => Ok(()),
        Ok(response) => Err(format!("status {}", response.status)),
        Err(e) => Err(e.to_string()),
      };

      match outcome {
        Ok(()) => {
          self.remove(entry.id)?;
          report.delivered += 1;
        }
        Err(reason) => {
          warn!(
            id = entry.id,
            url = %entry.request.url,
            attempts = entry.attempts + 1,
            %reason,
            "sync replay failed, keeping entry"
          );
          self.record_failure(entry.id, &reason)?;
          report.retained += 1;
        }
      }
    }

    info!(
      scope = %self.scope,
      replayed = report.replayed,
      delivered = report.delivered,
      retained = report.retained,
      "sync drain finished"
    );

    Ok(report)
  }

  fn remove(&self, id: i64) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute("DELETE FROM sync_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queue entry {}: {}", id, e))?;
    Ok(())
  }

  fn record_failure(&self, id: i64, reason: &str) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "UPDATE sync_queue SET attempts = attempts + 1, last_error = ? WHERE id = ?",
        params![reason, id],
      )
      .map_err(|e| eyre!("Failed to update queue entry {}: {}", id, e))?;
    Ok(())
  }
}

/// SHA256 over method, URL, headers and body
fn identity(request: &Request) -> String {
  let mut hasher = Sha256::new();
  hasher.update(request.method.as_bytes());
  hasher.update([0u8]);
  hasher.update(request.url.as_str().as_bytes());
  hasher.update([0u8]);
  for (name, value) in &request.headers {
    hasher.update(name.to_lowercase().as_bytes());
    hasher.update(b":");
    hasher.update(value.as_bytes());
    hasher.update([0u8]);
  }
  hasher.update(&request.body);
  hex::encode(hasher.finalize())
}
