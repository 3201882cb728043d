/// Inline SQL migrations for the questline session store.
///
/// One statement per entry. Timestamps are Unix milliseconds; list-valued
/// fields are JSON text.

pub const MIGRATIONS: &[&str] = &[
    // Migration 1: sessions table
    r#"
CREATE TABLE IF NOT EXISTS sessions (
    id                       TEXT PRIMARY KEY,
    user_id                  TEXT NOT NULL,
    status                   TEXT NOT NULL DEFAULT 'live',
    started_at               INTEGER NOT NULL,
    last_heartbeat_at        INTEGER NOT NULL,
    ended_at                 INTEGER,
    pause_intervals          TEXT NOT NULL DEFAULT '[]',
    rate_segments            TEXT NOT NULL,
    total_duration_seconds   REAL,
    focused_duration_seconds REAL,
    xp_total                 INTEGER,
    xp_breakdown             TEXT,
    completed_reason         TEXT,
    interruption_reason      TEXT,
    synced_to_django         INTEGER NOT NULL DEFAULT 0,
    last_synced_at           INTEGER,
    revision                 INTEGER NOT NULL DEFAULT 0
);
"#,
    // Migration 2: staleness sweep lookup
    r#"CREATE INDEX IF NOT EXISTS idx_sessions_status_heartbeat ON sessions(status, last_heartbeat_at);"#,
    // Migration 3: sync reconciliation lookup
    r#"CREATE INDEX IF NOT EXISTS idx_sessions_sync ON sessions(synced_to_django, status);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, started_at DESC);"#,
];
