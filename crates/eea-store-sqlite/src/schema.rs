//! Schema for the four logical tables named in spec.md §6, plus the
//! entity table that backs [`eea_core::interfaces::EntityStore`].

use rusqlite::Connection;

/// Applies WAL-mode and busy-timeout pragmas appropriate for a single
/// writer thread with concurrent readers.
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Creates every table if it does not already exist.
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS entity (
            entity_id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            project_id INTEGER NOT NULL,
            provider_id TEXT NOT NULL,
            properties_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entity_lock (
            entity_id TEXT PRIMARY KEY REFERENCES entity(entity_id) ON DELETE CASCADE,
            locked_by TEXT NOT NULL,
            locked_at INTEGER NOT NULL,
            interval_seconds INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS flush_queue (
            entity_id TEXT PRIMARY KEY REFERENCES entity(entity_id) ON DELETE CASCADE,
            project_id INTEGER NOT NULL,
            enqueued_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rule_evaluation (
            profile_id INTEGER NOT NULL,
            rule_type_id INTEGER NOT NULL,
            entity_id TEXT NOT NULL REFERENCES entity(entity_id) ON DELETE CASCADE,
            verdict TEXT NOT NULL,
            detail_json TEXT NOT NULL,
            evaluated_at INTEGER NOT NULL,
            alert_metadata_json TEXT,
            remediation_metadata_json TEXT,
            PRIMARY KEY (profile_id, rule_type_id, entity_id)
        );
        ",
    )
}
