/// Schema for the worker database.
pub const SCHEMA: &str = r#"
-- Cache partitions (one row per generation name)
CREATE TABLE IF NOT EXISTS cache_partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Cached responses, keyed by a hash of method + URL
CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(key_hash);

-- Key-value slots shared with the UI layer (pending orders, cart, worker state)
CREATE TABLE IF NOT EXISTS slots (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
