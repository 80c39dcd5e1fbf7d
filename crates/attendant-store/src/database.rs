//! Synchronous SQLite handle: enrollment, identity management, gallery
//! load, attendance reports and the recognition log.

use crate::codec::{decode_timestamp, decode_vector, encode_timestamp, encode_vector};
use crate::schema::{self, SchemaError};
use attendant_core::{AttendanceRecord, Embedding, Gallery, GalleryError, Identity, IdentityId};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("identity not found: {0}")]
    NotFound(IdentityId),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("async connection: {0}")]
    Async(#[from] tokio_rusqlite::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentitySummary {
    pub id: IdentityId,
    pub name: String,
    pub employee_id: Option<String>,
    pub active: bool,
    pub references: u32,
    pub created_at: DateTime<Utc>,
}

/// One identity's marks on one UTC day.
#[derive(Debug, Clone, Serialize)]
pub struct DailyAttendance {
    pub identity: IdentityId,
    pub name: String,
    pub employee_id: Option<String>,
    pub first_mark: DateTime<Utc>,
    pub last_mark: DateTime<Utc>,
    pub marks: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlySummary {
    pub identity: IdentityId,
    pub name: String,
    pub employee_id: Option<String>,
    pub days_present: u32,
    pub marks: u32,
}

/// One decision outcome, as recorded when recognition logging is enabled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionLog {
    pub identity: Option<IdentityId>,
    pub confidence: f32,
    pub status: String,
    pub logged_at: DateTime<Utc>,
}

/// One stored attendance mark with its identity's details.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceEntry {
    pub identity: IdentityId,
    pub name: String,
    pub employee_id: Option<String>,
    pub marked_at: DateTime<Utc>,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating parent directories and schema as needed).
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path)?;
        schema::migrate(&mut conn)?;
        tracing::debug!(path = %path.display(), "database opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let mut conn = Connection::open_in_memory()?;
        schema::migrate(&mut conn)?;
        Ok(Self { conn })
    }

    /// Register a new identity with its reference embeddings.
    pub fn enroll(
        &mut self,
        name: &str,
        employee_id: Option<&str>,
        references: &[Embedding],
        now: DateTime<Utc>,
    ) -> Result<IdentityId, DatabaseError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DatabaseError::InvalidInput("name must not be empty".into()));
        }
        let first = references
            .first()
            .ok_or_else(|| DatabaseError::InvalidInput("at least one reference embedding is required".into()))?;
        if let Some(bad) = references.iter().find(|r| r.dim() != first.dim()) {
            return Err(DatabaseError::InvalidInput(format!(
                "reference embeddings disagree on dimension ({} vs {})",
                first.dim(),
                bad.dim()
            )));
        }

        let id = IdentityId(uuid::Uuid::new_v4().to_string());
        let created_at = encode_timestamp(now);

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO identities (id, name, employee_id, active, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![id.as_str(), name, employee_id, created_at],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO reference_embeddings (identity_id, vector, model_version, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for reference in references {
                stmt.execute(params![
                    id.as_str(),
                    encode_vector(&reference.values),
                    reference.model_version,
                    created_at,
                ])?;
            }
        }
        tx.commit()?;

        tracing::info!(
            identity = %id,
            name,
            references = references.len(),
            "identity enrolled"
        );
        Ok(id)
    }

    pub fn list_identities(&self) -> Result<Vec<IdentitySummary>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.name, i.employee_id, i.active, i.created_at, COUNT(r.id)
             FROM identities i
             LEFT JOIN reference_embeddings r ON r.identity_id = i.id
             GROUP BY i.id
             ORDER BY i.created_at, i.rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            let created_at: String = row.get(4)?;
            Ok(IdentitySummary {
                id: IdentityId(row.get(0)?),
                name: row.get(1)?,
                employee_id: row.get(2)?,
                active: row.get(3)?,
                created_at: decode_timestamp("created_at", &created_at)?,
                references: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Mark an identity inactive. Its rows stay for reporting, but it is no
    /// longer loaded into the gallery.
    pub fn deactivate(&self, id: &IdentityId) -> Result<(), DatabaseError> {
        let changed = self
            .conn
            .execute("UPDATE identities SET active = 0 WHERE id = ?1", params![id.as_str()])?;
        if changed == 0 {
            return Err(DatabaseError::NotFound(id.clone()));
        }
        tracing::info!(identity = %id, "identity deactivated");
        Ok(())
    }

    /// Load all active identities, ordered by their first stored reference.
    ///
    /// Fails with [`GalleryError::Empty`] when nothing is enrolled.
    pub fn load_gallery(&self) -> Result<Gallery, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.name, i.employee_id, r.vector, r.model_version
             FROM reference_embeddings r
             JOIN identities i ON i.id = r.identity_id
             WHERE i.active = 1
             ORDER BY r.id",
        )?;
        let mut rows = stmt.query([])?;

        let mut identities: Vec<Identity> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(3)?;
            let embedding = Embedding {
                values: decode_vector(&blob)?,
                model_version: row.get(4)?,
            };

            match index.get(&id) {
                Some(&i) => identities[i].references.push(embedding),
                None => {
                    index.insert(id.clone(), identities.len());
                    identities.push(Identity {
                        id: IdentityId(id),
                        name: row.get(1)?,
                        employee_id: row.get(2)?,
                        references: vec![embedding],
                    });
                }
            }
        }

        Ok(Gallery::new(identities)?)
    }

    pub fn append_attendance(&self, record: &AttendanceRecord) -> Result<(), DatabaseError> {
        insert_attendance(&self.conn, record)?;
        Ok(())
    }

    /// Per-identity first/last mark and mark count for one UTC day.
    pub fn attendance_on(&self, day: NaiveDate) -> Result<Vec<DailyAttendance>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.name, i.employee_id, MIN(a.marked_at), MAX(a.marked_at), COUNT(*)
             FROM attendance_events a
             JOIN identities i ON i.id = a.identity_id
             WHERE substr(a.marked_at, 1, 10) = ?1
             GROUP BY i.id
             ORDER BY MIN(a.marked_at)",
        )?;
        let rows = stmt.query_map(params![day.format("%Y-%m-%d").to_string()], |row| {
            let first: String = row.get(3)?;
            let last: String = row.get(4)?;
            Ok(DailyAttendance {
                identity: IdentityId(row.get(0)?),
                name: row.get(1)?,
                employee_id: row.get(2)?,
                first_mark: decode_timestamp("marked_at", &first)?,
                last_mark: decode_timestamp("marked_at", &last)?,
                marks: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Distinct days present per identity for one month.
    pub fn monthly_summary(&self, year: i32, month: u32) -> Result<Vec<MonthlySummary>, DatabaseError> {
        if !(1..=12).contains(&month) {
            return Err(DatabaseError::InvalidInput(format!("month {month} out of range 1-12")));
        }
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.name, i.employee_id,
                    COUNT(DISTINCT substr(a.marked_at, 1, 10)), COUNT(*)
             FROM attendance_events a
             JOIN identities i ON i.id = a.identity_id
             WHERE substr(a.marked_at, 1, 7) = ?1
             GROUP BY i.id
             ORDER BY i.name",
        )?;
        let rows = stmt.query_map(params![format!("{year:04}-{month:02}")], |row| {
            Ok(MonthlySummary {
                identity: IdentityId(row.get(0)?),
                name: row.get(1)?,
                employee_id: row.get(2)?,
                days_present: row.get(3)?,
                marks: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Marks for one identity, newest first, optionally bounded by inclusive
    /// UTC days. Deactivated identities keep their history.
    pub fn identity_history(
        &self,
        id: &IdentityId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceEntry>, DatabaseError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(DatabaseError::InvalidInput(format!("range start {from} is after end {to}")));
            }
        }
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM identities WHERE id = ?1)",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(DatabaseError::NotFound(id.clone()));
        }

        let day = |d: Option<NaiveDate>| d.map(|d| d.format("%Y-%m-%d").to_string());
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.name, i.employee_id, a.marked_at
             FROM attendance_events a
             JOIN identities i ON i.id = a.identity_id
             WHERE a.identity_id = ?1
               AND (?2 IS NULL OR substr(a.marked_at, 1, 10) >= ?2)
               AND (?3 IS NULL OR substr(a.marked_at, 1, 10) <= ?3)
             ORDER BY a.marked_at DESC, a.id DESC",
        )?;
        let rows = stmt.query_map(params![id.as_str(), day(from), day(to)], row_to_entry)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every mark in one month, in time order; ties by name.
    pub fn month_entries(&self, year: i32, month: u32) -> Result<Vec<AttendanceEntry>, DatabaseError> {
        if !(1..=12).contains(&month) {
            return Err(DatabaseError::InvalidInput(format!("month {month} out of range 1-12")));
        }
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.name, i.employee_id, a.marked_at
             FROM attendance_events a
             JOIN identities i ON i.id = a.identity_id
             WHERE substr(a.marked_at, 1, 7) = ?1
             ORDER BY a.marked_at, i.name, a.id",
        )?;
        let rows = stmt.query_map(params![format!("{year:04}-{month:02}")], row_to_entry)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn log_recognition(&self, entry: &RecognitionLog) -> Result<(), DatabaseError> {
        insert_recognition_log(&self.conn, entry)?;
        Ok(())
    }

    /// Most recent recognition log entries, newest first.
    pub fn recent_logs(&self, limit: u32) -> Result<Vec<RecognitionLog>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT identity_id, confidence, status, logged_at
             FROM recognition_logs
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_log)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

pub(crate) fn insert_attendance(conn: &Connection, record: &AttendanceRecord) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO attendance_events (identity_id, marked_at) VALUES (?1, ?2)",
        params![record.identity.as_str(), encode_timestamp(record.marked_at)],
    )?;
    Ok(())
}

pub(crate) fn insert_recognition_log(conn: &Connection, entry: &RecognitionLog) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO recognition_logs (identity_id, confidence, status, logged_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            entry.identity.as_ref().map(|id| id.as_str()),
            entry.confidence as f64,
            entry.status,
            encode_timestamp(entry.logged_at),
        ],
    )?;
    Ok(())
}

fn row_to_entry(row: &Row) -> rusqlite::Result<AttendanceEntry> {
    let marked_at: String = row.get(3)?;
    Ok(AttendanceEntry {
        identity: IdentityId(row.get(0)?),
        name: row.get(1)?,
        employee_id: row.get(2)?,
        marked_at: decode_timestamp("marked_at", &marked_at)?,
    })
}

fn row_to_log(row: &Row) -> rusqlite::Result<RecognitionLog> {
    let identity: Option<String> = row.get(0)?;
    let confidence: f64 = row.get(1)?;
    let logged_at: String = row.get(3)?;
    Ok(RecognitionLog {
        identity: identity.map(IdentityId),
        confidence: confidence as f32,
        status: row.get(2)?,
        logged_at: decode_timestamp("logged_at", &logged_at)?,
    })
}
