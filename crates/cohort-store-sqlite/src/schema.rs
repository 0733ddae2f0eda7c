//! SQL schema for the Cohort SQLite store.
//!
//! Executed once at connection startup. Schema changes are out of scope; the
//! version number is recorded for operators only.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS segments (
    segment_id  TEXT PRIMARY KEY,
    slug        TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL
);

-- One row per (user, segment). Re-adding overwrites expiration_time.
CREATE TABLE IF NOT EXISTS memberships (
    user_id         INTEGER NOT NULL,
    segment_id      TEXT NOT NULL REFERENCES segments(segment_id),
    expiration_time TEXT,            -- fixed-width RFC 3339 UTC or NULL
    PRIMARY KEY (user_id, segment_id)
);

-- History is strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS history (
    history_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id      INTEGER NOT NULL,
    segment_slug TEXT NOT NULL,      -- by value; survives segment deletion
    operation    TEXT NOT NULL CHECK (operation IN ('add', 'remove')),
    recorded_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS memberships_segment_idx ON memberships(segment_id);
CREATE INDEX IF NOT EXISTS memberships_expiry_idx
    ON memberships(expiration_time) WHERE expiration_time IS NOT NULL;
CREATE INDEX IF NOT EXISTS history_user_time_idx ON history(user_id, recorded_at);

PRAGMA user_version = 1;
";
