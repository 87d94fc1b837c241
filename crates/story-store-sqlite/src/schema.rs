//! SQL schema for the story SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS stories (
    owner_id   INTEGER NOT NULL,
    story_id   INTEGER NOT NULL,
    expires_at INTEGER,            -- NULL unless swept once expired
    data       BLOB    NOT NULL,   -- JSON-encoded Story
    PRIMARY KEY (owner_id, story_id)
);

CREATE TABLE IF NOT EXISTS active_stories (
    owner_id    INTEGER PRIMARY KEY,
    list_id     TEXT,              -- 'main' | 'archive' | NULL
    story_order INTEGER NOT NULL,
    data        BLOB    NOT NULL   -- JSON-encoded SavedActiveStories
);

CREATE TABLE IF NOT EXISTS story_list_state (
    list_id TEXT PRIMARY KEY,
    data    BLOB NOT NULL          -- JSON-encoded SavedStoryList
);

-- Intents are appended and erased, never updated in place.
-- A rewrite deletes the old row and appends a new one.
CREATE TABLE IF NOT EXISTS intents (
    log_event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind         TEXT NOT NULL,    -- discriminant of the Intent variant
    payload      TEXT NOT NULL     -- JSON payload (inner data only)
);

CREATE INDEX IF NOT EXISTS stories_expires_idx
    ON stories(expires_at) WHERE expires_at IS NOT NULL;
CREATE INDEX IF NOT EXISTS active_stories_list_idx
    ON active_stories(list_id, story_order, owner_id);

PRAGMA user_version = 1;
";
