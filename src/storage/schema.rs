//! Database schema and migrations.

use anyhow::Result;
use rusqlite::{params, Connection};

/// Version the schema is at once `migrate` returns.
pub const SCHEMA_VERSION: i64 = 2;

/// Highest applied migration, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<i64> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn record_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        params![version],
    )?;
    Ok(())
}

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS batches (
            id TEXT PRIMARY KEY,
            backend TEXT NOT NULL,
            tasks_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_batches_created ON batches(created_at);",
    )?;
    record_version(conn, 1)?;

    // Migration: Add 'note' to batches if missing
    let has_note: i32 = conn
        .query_row(
            "SELECT count(*) FROM pragma_table_info('batches') WHERE name='note'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if has_note == 0 {
        conn.execute("ALTER TABLE batches ADD COLUMN note TEXT", [])?;
    }
    record_version(conn, 2)?;

    Ok(())
}
