//! Timed attendance writer on a `tokio-rusqlite` connection.
//!
//! Each write carries a deadline. SQLite lock waits are capped at the time
//! left, and the connection thread and the caller race for a single claim
//! before `COMMIT`: either the commit goes ahead and the caller reports its
//! real result, or the caller reports a timeout and the transaction is
//! rolled back. A write reported as timed out never lands afterwards.

use crate::database::{insert_attendance, insert_recognition_log, DatabaseError, RecognitionLog};
use crate::schema;
use attendant_core::{AttendanceRecord, AttendanceStore, StoreError};
use rusqlite::{ErrorCode, TransactionBehavior};
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

const PENDING: u8 = 0;
const COMMITTING: u8 = 1;
const ABANDONED: u8 = 2;

#[derive(Debug, thiserror::Error)]
#[error("write deadline passed before commit")]
struct DeadlineExceeded;

fn deadline_exceeded() -> tokio_rusqlite::Error {
    tokio_rusqlite::Error::Other(Box::new(DeadlineExceeded))
}

fn is_busy(err: &tokio_rusqlite::Error) -> bool {
    matches!(
        err,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

#[derive(Clone)]
pub struct AttendanceWriter {
    conn: tokio_rusqlite::Connection,
    handle: Handle,
    timeout: Duration,
}

impl AttendanceWriter {
    /// Open the database on the current tokio runtime.
    pub async fn open(path: &Path, timeout: Duration) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        Self::init(conn, timeout).await
    }

    pub async fn open_in_memory(timeout: Duration) -> Result<Self, DatabaseError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn, timeout).await
    }

    async fn init(conn: tokio_rusqlite::Connection, timeout: Duration) -> Result<Self, DatabaseError> {
        conn.call(|c| schema::migrate(c).map_err(|e| tokio_rusqlite::Error::Other(Box::new(e))))
            .await?;
        tracing::debug!(timeout_ms = timeout.as_millis() as u64, "attendance writer ready");
        Ok(Self {
            conn,
            handle: Handle::current(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The underlying async connection, for callers that need to read back.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Append one attendance record within the configured timeout.
    ///
    /// `Ok` means the row is committed. `Err` means it is not and never
    /// will be.
    pub async fn append_async(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let deadline = Instant::now() + self.timeout;
        let claim = Arc::new(AtomicU8::new(PENDING));
        let record = record.clone();

        let writer_claim = claim.clone();
        let mut write = Box::pin(self.conn.call(move |c| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || writer_claim.load(Ordering::Acquire) != PENDING {
                return Err(deadline_exceeded());
            }
            c.busy_timeout(remaining)?;
            let tx = c.transaction_with_behavior(TransactionBehavior::Immediate)?;
            insert_attendance(&tx, &record)?;
            if writer_claim
                .compare_exchange(PENDING, COMMITTING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // Dropping the transaction rolls it back.
                return Err(deadline_exceeded());
            }
            tx.commit()?;
            Ok(())
        }));

        let result = match tokio::time::timeout(self.timeout, &mut write).await {
            Ok(result) => result,
            Err(_) => {
                if claim
                    .compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Err(StoreError::Timeout(self.timeout));
                }
                // COMMIT already under way on the connection thread.
                write.await
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(tokio_rusqlite::Error::Other(e)) if e.is::<DeadlineExceeded>() => {
                Err(StoreError::Timeout(self.timeout))
            }
            Err(e) if is_busy(&e) => Err(StoreError::Timeout(self.timeout)),
            Err(tokio_rusqlite::Error::ConnectionClosed) => {
                Err(StoreError::Unavailable("connection closed".into()))
            }
            Err(e) => Err(StoreError::Write(e.to_string())),
        }
    }

    /// Best-effort append of one frame's recognition log entries in a
    /// single transaction; failures are only logged.
    pub async fn log_recognitions_async(&self, entries: Vec<RecognitionLog>) {
        if entries.is_empty() {
            return;
        }
        let count = entries.len();
        let busy = self.timeout;
        let write = self.conn.call(move |c| {
            c.busy_timeout(busy)?;
            let tx = c.transaction()?;
            for entry in &entries {
                insert_recognition_log(&tx, entry)?;
            }
            tx.commit()?;
            Ok(())
        });
        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, entries = count, "recognition log write failed"),
            Err(_) => tracing::warn!(
                timeout_ms = self.timeout.as_millis() as u64,
                entries = count,
                "recognition log write timed out"
            ),
        }
    }

    /// Queue [`Self::log_recognitions_async`] on the runtime and return at
    /// once. Safe to call from threads outside the runtime.
    pub fn queue_recognitions(&self, entries: Vec<RecognitionLog>) -> JoinHandle<()> {
        let writer = self.clone();
        self.handle
            .spawn(async move { writer.log_recognitions_async(entries).await })
    }
}

/// Blocking bridge for the engine thread. Must not be called from inside
/// the tokio runtime's own worker threads.
impl AttendanceStore for AttendanceWriter {
    fn append(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.handle.block_on(self.append_async(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendant_core::IdentityId;
    use chrono::{TimeZone, Utc};

    fn record() -> AttendanceRecord {
        AttendanceRecord {
            identity: IdentityId::from("alice"),
            marked_at: Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
        }
    }

    async fn count_events(writer: &AttendanceWriter) -> i64 {
        writer
            .connection()
            .call(|c| Ok(c.query_row("SELECT COUNT(*) FROM attendance_events", [], |r| r.get(0))?))
            .await
            .unwrap()
    }

    async fn seed_identity(writer: &AttendanceWriter) {
        writer
            .connection()
            .call(|c| {
                c.execute(
                    "INSERT INTO identities (id, name, active, created_at)
                     VALUES ('alice', 'Alice', 1, '2026-03-01T00:00:00.000Z')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_append_async_persists() {
        let writer = AttendanceWriter::open_in_memory(Duration::from_secs(2)).await.unwrap();
        seed_identity(&writer).await;
        writer.append_async(&record()).await.unwrap();
        assert_eq!(count_events(&writer).await, 1);
    }

    #[tokio::test]
    async fn test_append_unknown_identity_is_write_error() {
        let writer = AttendanceWriter::open_in_memory(Duration::from_secs(2)).await.unwrap();
        let err = writer.append_async(&record()).await.unwrap_err();
        assert!(matches!(err, StoreError::Write(_)), "got {err:?}");
        assert_eq!(count_events(&writer).await, 0);
    }

    #[tokio::test]
    async fn test_expired_write_never_commits() {
        let writer = AttendanceWriter::open_in_memory(Duration::ZERO).await.unwrap();
        let err = writer.append_async(&record()).await.unwrap_err();
        assert_eq!(err, StoreError::Timeout(Duration::ZERO));

        // The connection thread is FIFO: once this read returns, the
        // abandoned write closure has already run and refused to commit.
        assert_eq!(count_events(&writer).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_append_from_plain_thread() {
        let writer = AttendanceWriter::open_in_memory(Duration::from_secs(2)).await.unwrap();
        seed_identity(&writer).await;

        let blocking = writer.clone();
        let result = std::thread::spawn(move || blocking.append(&record()))
            .join()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(count_events(&writer).await, 1);
    }

    fn temp_db() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("attendant-writer-{}.db", uuid::Uuid::new_v4()))
    }

    /// Holds SQLite's write lock from a second connection for `hold`.
    fn hold_write_lock(path: &Path, hold: Duration) -> std::thread::JoinHandle<()> {
        let holder = rusqlite::Connection::open(path).unwrap();
        holder.execute_batch("BEGIN IMMEDIATE").unwrap();
        std::thread::spawn(move || {
            std::thread::sleep(hold);
            holder.execute_batch("COMMIT").unwrap();
        })
    }

    #[tokio::test]
    async fn test_write_stuck_on_lock_never_lands_later() {
        let path = temp_db();
        let timeout = Duration::from_millis(200);
        let writer = AttendanceWriter::open(&path, timeout).await.unwrap();
        seed_identity(&writer).await;

        let holder = hold_write_lock(&path, Duration::from_millis(600));
        let err = writer.append_async(&record()).await.unwrap_err();
        assert_eq!(err, StoreError::Timeout(timeout));

        holder.join().unwrap();
        // FIFO connection thread: the abandoned write has finished by now.
        assert_eq!(count_events(&writer).await, 0);

        writer.append_async(&record()).await.unwrap();
        assert_eq!(count_events(&writer).await, 1);
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_engine_keeps_one_record_per_cooldown_under_lock_contention() {
        use attendant_core::{
            BoundingBox, CooldownTracker, DecisionEngine, DistanceMetric, Embedding, FaceMatcher,
            Gallery, Identity, Observation,
        };
        use chrono::TimeDelta;

        let path = temp_db();
        let writer = AttendanceWriter::open(&path, Duration::from_millis(200)).await.unwrap();
        seed_identity(&writer).await;

        let gallery = Gallery::new(vec![Identity {
            id: "alice".into(),
            name: "Alice".into(),
            employee_id: None,
            references: vec![Embedding::new(vec![0.0])],
        }])
        .unwrap();
        let matcher = FaceMatcher::new(Arc::new(gallery), DistanceMetric::Euclidean, 0.6);
        let cooldown = Arc::new(CooldownTracker::new(TimeDelta::minutes(5)));
        let engine = DecisionEngine::new(matcher, cooldown, writer.clone());
        let alice = Observation {
            region: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
                confidence: 0.9,
                landmarks: None,
            },
            embedding: Embedding::new(vec![0.1]),
        };

        let holder = hold_write_lock(&path, Duration::from_millis(600));
        let t0 = record().marked_at;
        let statuses = std::thread::spawn(move || {
            let first = engine.decide(&alice, t0);
            holder.join().unwrap();
            let second = engine.decide(&alice, t0 + TimeDelta::seconds(1));
            let third = engine.decide(&alice, t0 + TimeDelta::seconds(2));
            [first.status(), second.status(), third.status()]
        })
        .join()
        .unwrap();
        assert_eq!(statuses, ["store_failed", "marked", "cooldown"]);

        let marks: Vec<String> = writer
            .connection()
            .call(|c| {
                let mut stmt = c.prepare("SELECT marked_at FROM attendance_events ORDER BY id")?;
                let rows = stmt.query_map([], |r| r.get(0))?;
                Ok(rows.collect::<Result<Vec<String>, _>>()?)
            })
            .await
            .unwrap();
        assert_eq!(marks, vec!["2026-03-02T08:00:01.000Z".to_string()]);
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_recognition_logs_batched_best_effort() {
        let writer = AttendanceWriter::open_in_memory(Duration::from_secs(2)).await.unwrap();
        let entry = |status: &str| RecognitionLog {
            identity: None,
            confidence: 0.3,
            status: status.into(),
            logged_at: Utc::now(),
        };
        writer.log_recognitions_async(Vec::new()).await;
        writer
            .queue_recognitions(vec![entry("unknown"), entry("unknown")])
            .await
            .unwrap();

        let logged: i64 = writer
            .connection()
            .call(|c| Ok(c.query_row("SELECT COUNT(*) FROM recognition_logs", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(logged, 2);
    }
}
