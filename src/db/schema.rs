/// Schema for cache generations and the sync queue.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per cache generation; at most one is active
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    state TEXT NOT NULL CHECK (state IN ('installed', 'active')),
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_generations_single_active
    ON generations(state) WHERE state = 'active';

-- Stored responses keyed by request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, method, url),
    FOREIGN KEY (generation) REFERENCES generations(name) ON DELETE CASCADE
);

-- Mutating requests that could not reach the network
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scope TEXT NOT NULL,
    identity TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    queued_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (scope, identity)
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_scope ON sync_queue(scope, id);
"#;
