/// Inline SQL migrations for the lumina local store.
///
/// We use simple inline migrations rather than sqlx migration files
/// because the schema is small and self-contained. Table and column names
/// match what earlier clients wrote, so existing databases are adopted as-is.

pub const MIGRATIONS: &[&str] = &[
    // Migration 1: sessions table
    r#"
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_email TEXT NOT NULL,
    name TEXT,
    start_time TEXT NOT NULL,
    end_time TEXT,
    synced INTEGER NOT NULL DEFAULT 0,
    cloud_session_id INTEGER,
    deleted INTEGER NOT NULL DEFAULT 0
);
"#,
    // Migration 2: blink samples table
    r#"
CREATE TABLE IF NOT EXISTS local_blinks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_email TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    count INTEGER NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0
);
"#,
    // Migration 3: samples attach to sessions (NULL = unassigned)
    r#"ALTER TABLE local_blinks ADD COLUMN session_id INTEGER;"#,
    // Migrations 4-7: lookup indexes for active-session and resend-cursor scans
    r#"CREATE INDEX IF NOT EXISTS idx_sessions_owner_open ON sessions(user_email, end_time, deleted);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_sessions_owner_synced ON sessions(user_email, synced, id);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_blinks_owner_synced ON local_blinks(user_email, synced, id);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_blinks_session ON local_blinks(session_id);"#,
];
