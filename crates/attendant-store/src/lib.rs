//! attendant-store: SQLite persistence for the attendance monitor.
//!
//! [`Database`] is the synchronous handle used by the CLI and for the
//! one-shot gallery load at daemon startup. [`AttendanceWriter`] owns a
//! `tokio-rusqlite` connection and implements the core's
//! [`attendant_core::AttendanceStore`] with bounded write latency.

mod codec;
pub mod database;
pub mod schema;
pub mod writer;

pub use database::{AttendanceEntry, DailyAttendance, Database, DatabaseError, IdentitySummary, MonthlySummary, RecognitionLog};
pub use writer::AttendanceWriter;

use std::path::PathBuf;

/// Default database location: `$XDG_DATA_HOME/attendant/attendance.db`.
pub fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("attendant/attendance.db")
}
