//! Schema creation and versioning via `PRAGMA user_version`.

use rusqlite::Connection;

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    employee_id TEXT,
    active      INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS reference_embeddings (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id   TEXT NOT NULL REFERENCES identities(id),
    vector        BLOB NOT NULL,
    model_version TEXT,
    created_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reference_embeddings_identity
    ON reference_embeddings(identity_id);

CREATE TABLE IF NOT EXISTS attendance_events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id TEXT NOT NULL REFERENCES identities(id),
    marked_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_attendance_events_marked_at
    ON attendance_events(marked_at);

CREATE TABLE IF NOT EXISTS recognition_logs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id TEXT,
    confidence  REAL NOT NULL,
    status      TEXT NOT NULL,
    logged_at   TEXT NOT NULL
);
";

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("database schema version {found} is newer than supported version {supported}")]
    TooNew { found: i32, supported: i32 },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Bring the connection up to [`CURRENT_SCHEMA_VERSION`].
pub fn migrate(conn: &mut Connection) -> Result<(), SchemaError> {
    conn.pragma_update(None, "foreign_keys", true)?;

    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version > CURRENT_SCHEMA_VERSION {
        return Err(SchemaError::TooNew {
            found: version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_V1)?;
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;

    tracing::info!(from = version, to = CURRENT_SCHEMA_VERSION, "database schema migrated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_refuses_newer_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION + 1)
            .unwrap();
        assert!(matches!(migrate(&mut conn), Err(SchemaError::TooNew { .. })));
    }
}
