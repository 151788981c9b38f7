/// Schema for the response cache and the offline mutation queue.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named cache partitions, in creation order
CREATE TABLE IF NOT EXISTS cache_partitions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored response snapshots, keyed by sha256(method + url)
CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    kind TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition, key_hash),
    FOREIGN KEY (partition) REFERENCES cache_partitions(name) ON DELETE CASCADE
);

-- Orders attempted while offline (seq preserves enqueue order)
CREATE TABLE IF NOT EXISTS offline_orders (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    payload BLOB NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Static partition of the generation that last finished activating
CREATE TABLE IF NOT EXISTS agent_state (
    slot INTEGER PRIMARY KEY CHECK (slot = 1),
    active_static TEXT NOT NULL,
    activated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- At most one pending cart
CREATE TABLE IF NOT EXISTS offline_cart (
    slot INTEGER PRIMARY KEY CHECK (slot = 1),
    payload BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
