use rusqlite::Connection;

pub const SCHEMA_VERSION: i32 = 1;

/// Create all tables (drops existing tables first to ensure clean state)
pub fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Drop existing tables to ensure clean state for new session
        DROP TABLE IF EXISTS samples;
        DROP TABLE IF EXISTS leaks;
        DROP TABLE IF EXISTS meta;

        -- Metadata table
        CREATE TABLE meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- One row per sampler tick
        CREATE TABLE samples (
            id INTEGER PRIMARY KEY,
            timestamp_ms INTEGER NOT NULL,
            cpu REAL NOT NULL,
            memory_mb REAL NOT NULL,
            fps REAL NOT NULL,
            leaks REAL NOT NULL
        );

        CREATE INDEX idx_samples_timestamp ON samples(timestamp_ms);

        -- One row per confirmed leak, upserted on resolution
        CREATE TABLE leaks (
            correlation INTEGER PRIMARY KEY,
            entity INTEGER NOT NULL,
            kind TEXT NOT NULL,
            details TEXT NOT NULL,
            detected_at TEXT NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            resolution_secs REAL,
            snapshot BLOB
        );
        "#,
    )
}

/// Set a metadata key
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        [key, value],
    )?;
    Ok(())
}

/// Get a metadata key
pub fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    use rusqlite::OptionalExtension;
    conn.query_row("SELECT value FROM meta WHERE key = ?", [key], |row| {
        row.get(0)
    })
    .optional()
}
