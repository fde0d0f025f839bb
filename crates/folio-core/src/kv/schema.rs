//! SQLite schema for the key-value store.

use rusqlite::{Connection, OptionalExtension, Result};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
///
/// Creates all tables if they don't exist. Databases written by a newer
/// build are left untouched.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        tracing::warn!(
            found = current_version,
            supported = SCHEMA_VERSION,
            "kv database has a newer schema version"
        );
    }

    Ok(())
}

/// Get the current schema version (0 if not initialized).
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Entries keyed by the order-preserving tuple encoding
        CREATE TABLE IF NOT EXISTS kv_entries (
            key BLOB PRIMARY KEY,
            value TEXT NOT NULL,
            versionstamp INTEGER NOT NULL,
            expires_at INTEGER
        ) WITHOUT ROWID;

        CREATE INDEX IF NOT EXISTS idx_kv_entries_expires
            ON kv_entries(expires_at) WHERE expires_at IS NOT NULL;

        -- Monotonic versionstamp source (single row)
        CREATE TABLE IF NOT EXISTS kv_sequence (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            value INTEGER NOT NULL
        );

        INSERT OR IGNORE INTO kv_sequence (id, value) VALUES (1, 0);
        "#,
    )
}
