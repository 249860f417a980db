//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::{error, info};

use super::{
    validate_new_job, Batch, BatchFile, BatchId, BatchStatus, CreatedJob, JobId, JobStore,
    QueueError, ResourceType,
};
use crate::metrics::BATCH_TRANSITIONS;

const BATCH_COLUMNS: &str = "batch_id, job_id, sequence, organization_id, organization_npi, \
     provider_npi, patients, resource_types, since, priority, transaction_time, status, \
     submit_time, start_time, complete_time, worker_id, failure_reason, request_url, \
     requesting_ip, is_bulk";

/// SQLite-backed job store.
///
/// All access goes through one connection; the relational transaction is the
/// only concurrency control for the batch table.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, QueueError> {
        let conn = Connection::open(path).map_err(storage_error)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().map_err(storage_error)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), QueueError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS job_queue_batch (
                batch_id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                organization_id TEXT NOT NULL,
                organization_npi TEXT NOT NULL,
                provider_npi TEXT NOT NULL,
                patients TEXT NOT NULL,
                resource_types TEXT NOT NULL,
                since TEXT,
                priority INTEGER NOT NULL,
                transaction_time TEXT NOT NULL,
                status TEXT NOT NULL
                    CHECK (status IN ('QUEUED', 'IN_PROGRESS', 'COMPLETED', 'FAILED')),
                submit_time TEXT NOT NULL,
                start_time TEXT,
                complete_time TEXT,
                worker_id TEXT,
                failure_reason TEXT,
                request_url TEXT NOT NULL,
                requesting_ip TEXT NOT NULL,
                is_bulk INTEGER NOT NULL,
                UNIQUE (job_id, sequence)
            );

            CREATE INDEX IF NOT EXISTS idx_job_queue_batch_job_id ON job_queue_batch(job_id);
            CREATE INDEX IF NOT EXISTS idx_job_queue_batch_claim
                ON job_queue_batch(status, priority, submit_time, batch_id);

            CREATE TABLE IF NOT EXISTS job_queue_batch_file (
                batch_id TEXT NOT NULL REFERENCES job_queue_batch(batch_id) ON DELETE CASCADE,
                resource_type TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                file_name TEXT NOT NULL,
                count INTEGER NOT NULL,
                PRIMARY KEY (batch_id, resource_type, sequence)
            );
            "#,
        )
        .map_err(storage_error)?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, QueueError> {
        self.conn
            .lock()
            .map_err(|_| QueueError::PersistenceFailure("connection lock poisoned".to_string()))
    }

    fn row_to_batch(row: &rusqlite::Row) -> rusqlite::Result<Batch> {
        let batch_id: String = row.get(0)?;
        let job_id: String = row.get(1)?;
        let patients_json: String = row.get(6)?;
        let resource_types_json: String = row.get(7)?;
        let since: Option<String> = row.get(8)?;
        let transaction_time: String = row.get(10)?;
        let status: String = row.get(11)?;
        let submit_time: String = row.get(12)?;
        let start_time: Option<String> = row.get(13)?;
        let complete_time: Option<String> = row.get(14)?;
        let requesting_ip: String = row.get(18)?;

        // Undecodable rows are surfaced as errors, never replaced by defaults.
        Ok(Batch {
            batch_id: decode(0, batch_id.parse::<BatchId>())?,
            job_id: decode(1, job_id.parse::<JobId>())?,
            sequence: row.get(2)?,
            organization_id: row.get(3)?,
            organization_npi: row.get(4)?,
            provider_npi: row.get(5)?,
            patients: decode(6, serde_json::from_str(&patients_json))?,
            resource_types: decode(7, serde_json::from_str(&resource_types_json))?,
            since: since.map(|s| parse_timestamp(8, &s)).transpose()?,
            priority: row.get(9)?,
            transaction_time: parse_timestamp(10, &transaction_time)?,
            status: decode(11, status.parse::<BatchStatus>())?,
            submit_time: parse_timestamp(12, &submit_time)?,
            start_time: start_time.map(|s| parse_timestamp(13, &s)).transpose()?,
            complete_time: complete_time.map(|s| parse_timestamp(14, &s)).transpose()?,
            worker_id: row.get(15)?,
            failure_reason: row.get(16)?,
            request_url: row.get(17)?,
            requesting_ip: decode(18, requesting_ip.parse())?,
            is_bulk: row.get(19)?,
            output_files: Vec::new(),
        })
    }

    fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<BatchFile> {
        let resource_type: String = row.get(0)?;
        Ok(BatchFile {
            resource_type: decode(0, resource_type.parse::<ResourceType>())?,
            sequence: row.get(1)?,
            file_name: row.get(2)?,
            count: decode(3, u64::try_from(row.get::<_, i64>(3)?))?,
        })
    }

    fn load_files(conn: &Connection, batch: &mut Batch) -> Result<(), QueueError> {
        let mut stmt = conn
            .prepare_cached(
                "SELECT resource_type, sequence, file_name, count FROM job_queue_batch_file \
                 WHERE batch_id = ? ORDER BY resource_type ASC, sequence ASC",
            )
            .map_err(storage_error)?;

        let rows = stmt
            .query_map(params![batch.batch_id.to_string()], Self::row_to_file)
            .map_err(storage_error)?;

        let mut files = Vec::new();
        for row_result in rows {
            files.push(row_result.map_err(storage_error)?);
        }
        batch.output_files = files;

        Ok(())
    }

    fn fetch_batch(conn: &Connection, batch_id: &str) -> Result<Option<Batch>, QueueError> {
        let sql = format!("SELECT {} FROM job_queue_batch WHERE batch_id = ?", BATCH_COLUMNS);
        let batch = conn
            .query_row(&sql, params![batch_id], Self::row_to_batch)
            .optional()
            .map_err(storage_error)?;

        match batch {
            Some(mut batch) => {
                Self::load_files(conn, &mut batch)?;
                Ok(Some(batch))
            }
            None => Ok(None),
        }
    }

    /// Move a batch to `to`, applying `extra` inside the same transaction.
    fn transition<F>(&self, batch_id: &BatchId, to: BatchStatus, extra: F) -> Result<Batch, QueueError>
    where
        F: FnOnce(&Connection, &Batch, &str) -> Result<(), QueueError>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_error)?;

        let id = batch_id.to_string();
        let current = Self::fetch_batch(&tx, &id)?
            .ok_or_else(|| QueueError::NotFound(format!("batch {}", batch_id)))?;

        if !current.status.can_transition_to(to) {
            return Err(QueueError::InvalidTransition {
                batch_id: *batch_id,
                from: current.status,
                to,
            });
        }

        let now = format_timestamp(&Utc::now());
        let updated = tx
            .execute(
                "UPDATE job_queue_batch SET status = ?, complete_time = ? \
                 WHERE batch_id = ? AND status = ?",
                params![to.as_str(), now, id, current.status.as_str()],
            )
            .map_err(storage_error)?;
        if updated == 0 {
            return Err(QueueError::InvalidTransition {
                batch_id: *batch_id,
                from: current.status,
                to,
            });
        }

        extra(&tx, &current, &id)?;

        let batch = Self::fetch_batch(&tx, &id)?
            .ok_or_else(|| QueueError::NotFound(format!("batch {}", batch_id)))?;
        tx.commit().map_err(storage_error)?;

        BATCH_TRANSITIONS.with_label_values(&[to.as_str()]).inc();
        info!(batch_id = %batch_id, job_id = %batch.job_id, from = %current.status, to = %to, "Batch status changed");

        Ok(batch)
    }
}

impl JobStore for SqliteJobStore {
    fn insert_batches(&self, batches: &[Batch]) -> Result<CreatedJob, QueueError> {
        let job_id = validate_new_job(batches)?;

        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_error)?;

        let sql = format!(
            "INSERT INTO job_queue_batch ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            BATCH_COLUMNS
        );

        // Dropping `tx` on any early return rolls the whole job back.
        {
            let mut stmt = tx.prepare(&sql).map_err(storage_error)?;
            for batch in batches {
                let patients_json = serde_json::to_string(&batch.patients)
                    .map_err(|e| QueueError::InvalidRequest(e.to_string()))?;
                let resource_types_json = serde_json::to_string(&batch.resource_types)
                    .map_err(|e| QueueError::InvalidRequest(e.to_string()))?;

                stmt.execute(params![
                    batch.batch_id.to_string(),
                    batch.job_id.to_string(),
                    batch.sequence,
                    batch.organization_id,
                    batch.organization_npi,
                    batch.provider_npi,
                    patients_json,
                    resource_types_json,
                    batch.since.as_ref().map(format_timestamp),
                    batch.priority,
                    format_timestamp(&batch.transaction_time),
                    batch.status.as_str(),
                    format_timestamp(&batch.submit_time),
                    batch.start_time.as_ref().map(format_timestamp),
                    batch.complete_time.as_ref().map(format_timestamp),
                    batch.worker_id,
                    batch.failure_reason,
                    batch.request_url,
                    batch.requesting_ip.to_string(),
                    batch.is_bulk,
                ])
                .map_err(|e| {
                    error!(job_id = %job_id, batch_id = %batch.batch_id, "Batch insert failed: {}", e);
                    storage_error(e)
                })?;
            }
        }

        tx.commit().map_err(storage_error)?;

        Ok(CreatedJob {
            job_id,
            batch_ids: batches.iter().map(|b| b.batch_id).collect(),
        })
    }

    fn batches_for_job(&self, job_id: &JobId) -> Result<Vec<Batch>, QueueError> {
        let conn = self.lock()?;

        let sql = format!(
            "SELECT {} FROM job_queue_batch WHERE job_id = ? ORDER BY sequence ASC",
            BATCH_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(storage_error)?;
        let rows = stmt
            .query_map(params![job_id.to_string()], Self::row_to_batch)
            .map_err(storage_error)?;

        let mut batches = Vec::new();
        for row_result in rows {
            let mut batch = row_result.map_err(storage_error)?;
            Self::load_files(&conn, &mut batch)?;
            batches.push(batch);
        }

        Ok(batches)
    }

    fn get_batch(&self, batch_id: &BatchId) -> Result<Option<Batch>, QueueError> {
        let conn = self.lock()?;
        Self::fetch_batch(&conn, &batch_id.to_string())
    }

    fn claim_next(&self, worker_id: &str) -> Result<Option<Batch>, QueueError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_error)?;

        let candidate: Option<String> = tx
            .query_row(
                "SELECT batch_id FROM job_queue_batch WHERE status = 'QUEUED' \
                 ORDER BY priority ASC, submit_time ASC, batch_id ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_error)?;

        let Some(batch_id) = candidate else {
            return Ok(None);
        };

        // Conditional update: a competing claimer that got there first leaves
        // zero rows changed.
        let updated = tx
            .execute(
                "UPDATE job_queue_batch SET status = 'IN_PROGRESS', worker_id = ?, start_time = ? \
                 WHERE batch_id = ? AND status = 'QUEUED'",
                params![worker_id, format_timestamp(&Utc::now()), batch_id],
            )
            .map_err(storage_error)?;
        if updated == 0 {
            return Ok(None);
        }

        let batch = Self::fetch_batch(&tx, &batch_id)?;
        tx.commit().map_err(storage_error)?;

        if let Some(ref batch) = batch {
            BATCH_TRANSITIONS
                .with_label_values(&[BatchStatus::InProgress.as_str()])
                .inc();
            info!(batch_id = %batch.batch_id, job_id = %batch.job_id, worker_id, "Batch claimed");
        }

        Ok(batch)
    }

    fn complete_batch(&self, batch_id: &BatchId, files: &[BatchFile]) -> Result<Batch, QueueError> {
        self.transition(batch_id, BatchStatus::Completed, |conn, current, id| {
            if let Some(file) = files
                .iter()
                .find(|f| !current.resource_types.contains(&f.resource_type))
            {
                return Err(QueueError::InvalidRequest(format!(
                    "batch {} did not request {}",
                    batch_id, file.resource_type
                )));
            }
            let counts = files
                .iter()
                .map(|f| {
                    i64::try_from(f.count).map_err(|_| {
                        QueueError::InvalidRequest(format!(
                            "record count {} for {} is out of range",
                            f.count, f.file_name
                        ))
                    })
                })
                .collect::<Result<Vec<i64>, _>>()?;

            let mut stmt = conn
                .prepare(
                    "INSERT INTO job_queue_batch_file (batch_id, resource_type, sequence, file_name, count) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .map_err(storage_error)?;
            for (file, count) in files.iter().zip(counts) {
                stmt.execute(params![
                    id,
                    file.resource_type.as_str(),
                    file.sequence,
                    file.file_name,
                    count,
                ])
                .map_err(storage_error)?;
            }
            Ok(())
        })
    }

    fn fail_batch(&self, batch_id: &BatchId, reason: &str) -> Result<Batch, QueueError> {
        self.transition(batch_id, BatchStatus::Failed, |conn, _, id| {
            conn.execute(
                "UPDATE job_queue_batch SET failure_reason = ? WHERE batch_id = ?",
                params![reason, id],
            )
            .map_err(storage_error)?;
            Ok(())
        })
    }

    fn count_by_status(&self, status: BatchStatus) -> Result<i64, QueueError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM job_queue_batch WHERE status = ?",
            params![status.as_str()],
            |row| row.get(0),
        )
        .map_err(storage_error)
    }
}

/// Classify a SQLite error as retryable or not.
fn storage_error(e: rusqlite::Error) -> QueueError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            QueueError::ConstraintViolation(e.to_string())
        }
        _ => QueueError::PersistenceFailure(e.to_string()),
    }
}

fn decode<T, E>(idx: usize, result: Result<T, E>) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    result.map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Fixed-width UTC timestamps so text order equals time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    decode(
        idx,
        DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc)),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use rusqlite::functions::FunctionFlags;

    use super::*;
    use crate::job::{FailurePolicy, JobStatusAggregator};
    use crate::testing::fixtures;

    fn create_test_store() -> SqliteJobStore {
        SqliteJobStore::in_memory().unwrap()
    }

    fn create_test_job(patients: usize, batch_size: usize) -> Vec<Batch> {
        fixtures::factory(batch_size)
            .build(
                "org-1",
                &fixtures::provider_info(),
                &fixtures::patients(patients),
                &fixtures::request_details(),
            )
            .unwrap()
    }

    /// Make the `n`th batch insert on this store fail with a non-constraint
    /// SQLite error.
    fn fail_nth_insert(store: &SqliteJobStore, n: usize) {
        let conn = store.conn.lock().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        conn.create_scalar_function(
            "simulated_failure",
            0,
            FunctionFlags::SQLITE_UTF8,
            move |_ctx| {
                if seen.fetch_add(1, Ordering::SeqCst) + 1 == n {
                    Err(rusqlite::Error::UserFunctionError(
                        "simulated connection loss".into(),
                    ))
                } else {
                    Ok(0i64)
                }
            },
        )
        .unwrap();
        conn.execute_batch(
            "CREATE TEMP TRIGGER inject_insert_failure BEFORE INSERT ON job_queue_batch \
             BEGIN SELECT simulated_failure(); END;",
        )
        .unwrap();
    }

    #[test]
    fn test_insert_and_read_back() {
        let store = create_test_store();
        let batches = create_test_job(25, 10);

        let created = store.insert_batches(&batches).unwrap();
        assert_eq!(created.job_id, batches[0].job_id);
        assert_eq!(created.batch_ids.len(), 3);

        let stored = store.batches_for_job(&created.job_id).unwrap();
        assert_eq!(stored.len(), 3);
        for (stored, original) in stored.iter().zip(&batches) {
            assert_eq!(stored.batch_id, original.batch_id);
            assert_eq!(stored.patients, original.patients);
            assert_eq!(stored.resource_types, original.resource_types);
            assert_eq!(stored.requesting_ip, original.requesting_ip);
            assert_eq!(stored.status, BatchStatus::Queued);
            assert_eq!(
                stored.transaction_time.timestamp_micros(),
                original.transaction_time.timestamp_micros()
            );
        }
    }

    #[test]
    fn test_unknown_job_has_no_batches() {
        let store = create_test_store();
        let batches = store.batches_for_job(&JobId::new()).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn test_failure_mid_insert_rolls_back_whole_job() {
        let store = create_test_store();
        fail_nth_insert(&store, 2);
        let batches = create_test_job(25, 10);

        let result = store.insert_batches(&batches);
        assert!(matches!(result, Err(QueueError::PersistenceFailure(_))));
        assert!(result.unwrap_err().is_retryable());

        assert!(store.batches_for_job(&batches[0].job_id).unwrap().is_empty());
        assert_eq!(store.count_by_status(BatchStatus::Queued).unwrap(), 0);
        assert!(store.get_batch(&batches[0].batch_id).unwrap().is_none());

        let aggregator = JobStatusAggregator::new(Arc::new(store), FailurePolicy::FailFast);
        let status = aggregator.status(&batches[0].job_id);
        assert!(matches!(status, Err(QueueError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_batch_id_is_constraint_violation() {
        let store = create_test_store();
        let first = create_test_job(5, 10);
        store.insert_batches(&first).unwrap();

        // Second job reuses an existing batch id in its last chunk.
        let mut second = create_test_job(15, 10);
        second[1].batch_id = first[0].batch_id;

        let result = store.insert_batches(&second);
        assert!(matches!(result, Err(QueueError::ConstraintViolation(_))));
        assert!(!result.unwrap_err().is_retryable());
        assert!(store.batches_for_job(&second[0].job_id).unwrap().is_empty());
        assert_eq!(store.count_by_status(BatchStatus::Queued).unwrap(), 1);
    }

    #[test]
    fn test_insert_rejects_empty_set() {
        let store = create_test_store();
        let result = store.insert_batches(&[]);
        assert!(matches!(result, Err(QueueError::InvalidRequest(_))));
    }

    #[test]
    fn test_claim_follows_priority_order() {
        let store = create_test_store();
        for priority in [5, 1, 3] {
            let mut batches = create_test_job(1, 10);
            batches[0].priority = priority;
            store.insert_batches(&batches).unwrap();
        }

        let claimed: Vec<i32> = (0..3)
            .map(|_| store.claim_next("worker-1").unwrap().unwrap().priority)
            .collect();
        assert_eq!(claimed, vec![1, 3, 5]);
        assert!(store.claim_next("worker-1").unwrap().is_none());
    }

    #[test]
    fn test_claim_records_worker_and_start_time() {
        let store = create_test_store();
        let batches = create_test_job(3, 10);
        store.insert_batches(&batches).unwrap();

        let claimed = store.claim_next("worker-7").unwrap().unwrap();
        assert_eq!(claimed.batch_id, batches[0].batch_id);
        assert_eq!(claimed.status, BatchStatus::InProgress);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-7"));
        assert!(claimed.is_consistent());
    }

    #[test]
    fn test_claim_on_empty_queue() {
        let store = create_test_store();
        assert!(store.claim_next("worker-1").unwrap().is_none());
    }

    #[test]
    fn test_complete_batch_stores_files() {
        let store = create_test_store();
        let batches = create_test_job(3, 10);
        store.insert_batches(&batches).unwrap();
        let claimed = store.claim_next("worker-1").unwrap().unwrap();

        let files = vec![
            BatchFile::new(&claimed.batch_id, ResourceType::Patient, 0, 3),
            BatchFile::new(&claimed.batch_id, ResourceType::ExplanationOfBenefit, 0, 42),
        ];
        let completed = store.complete_batch(&claimed.batch_id, &files).unwrap();

        assert_eq!(completed.status, BatchStatus::Completed);
        assert!(completed.is_consistent());
        assert_eq!(completed.output_files.len(), 2);

        let fetched = store.get_batch(&claimed.batch_id).unwrap().unwrap();
        assert_eq!(fetched.output_files, completed.output_files);
    }

    #[test]
    fn test_complete_rejects_unrequested_resource_type() {
        let store = create_test_store();
        let mut batches = create_test_job(3, 10);
        batches[0].resource_types = vec![ResourceType::Patient];
        store.insert_batches(&batches).unwrap();
        let claimed = store.claim_next("worker-1").unwrap().unwrap();

        let files = vec![BatchFile::new(&claimed.batch_id, ResourceType::Coverage, 0, 1)];
        let result = store.complete_batch(&claimed.batch_id, &files);
        assert!(matches!(result, Err(QueueError::InvalidRequest(_))));

        let fetched = store.get_batch(&claimed.batch_id).unwrap().unwrap();
        assert_eq!(fetched.status, BatchStatus::InProgress);
    }

    #[test]
    fn test_complete_rejects_unrepresentable_record_count() {
        let store = create_test_store();
        store.insert_batches(&create_test_job(3, 10)).unwrap();
        let claimed = store.claim_next("worker-1").unwrap().unwrap();

        let files = vec![
            BatchFile::new(&claimed.batch_id, ResourceType::Coverage, 0, 7),
            BatchFile::new(&claimed.batch_id, ResourceType::Patient, 0, u64::MAX),
        ];
        let result = store.complete_batch(&claimed.batch_id, &files);
        assert!(matches!(result, Err(QueueError::InvalidRequest(_))));

        // Nothing written, batch still running
        let fetched = store.get_batch(&claimed.batch_id).unwrap().unwrap();
        assert_eq!(fetched.status, BatchStatus::InProgress);
        assert!(fetched.output_files.is_empty());

        let max = vec![BatchFile::new(
            &claimed.batch_id,
            ResourceType::Patient,
            0,
            i64::MAX as u64,
        )];
        let completed = store.complete_batch(&claimed.batch_id, &max).unwrap();
        let fetched = store.get_batch(&completed.batch_id).unwrap().unwrap();
        assert_eq!(fetched.output_files[0].count, i64::MAX as u64);
    }

    #[test]
    fn test_cannot_complete_unclaimed_batch() {
        let store = create_test_store();
        let batches = create_test_job(3, 10);
        store.insert_batches(&batches).unwrap();

        let result = store.complete_batch(&batches[0].batch_id, &[]);
        assert!(matches!(
            result,
            Err(QueueError::InvalidTransition {
                from: BatchStatus::Queued,
                to: BatchStatus::Completed,
                ..
            })
        ));
    }

    #[test]
    fn test_fail_batch_records_reason() {
        let store = create_test_store();
        store.insert_batches(&create_test_job(3, 10)).unwrap();
        let claimed = store.claim_next("worker-1").unwrap().unwrap();

        let failed = store.fail_batch(&claimed.batch_id, "upstream timeout").unwrap();
        assert_eq!(failed.status, BatchStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("upstream timeout"));

        let again = store.fail_batch(&claimed.batch_id, "twice");
        assert!(matches!(again, Err(QueueError::InvalidTransition { .. })));
    }

    #[test]
    fn test_transition_unknown_batch() {
        let store = create_test_store();
        let result = store.fail_batch(&BatchId::new(), "gone");
        assert!(matches!(result, Err(QueueError::NotFound(_))));
    }

    #[test]
    fn test_count_by_status() {
        let store = create_test_store();
        store.insert_batches(&create_test_job(30, 10)).unwrap();
        store.claim_next("worker-1").unwrap();

        assert_eq!(store.count_by_status(BatchStatus::Queued).unwrap(), 2);
        assert_eq!(store.count_by_status(BatchStatus::InProgress).unwrap(), 1);
        assert_eq!(store.count_by_status(BatchStatus::Completed).unwrap(), 0);
    }

    #[test]
    fn test_corrupt_row_is_an_error_not_a_default() {
        let store = create_test_store();
        let batches = create_test_job(3, 10);
        store.insert_batches(&batches).unwrap();
        store
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE job_queue_batch SET patients = 'not json' WHERE batch_id = ?",
                params![batches[0].batch_id.to_string()],
            )
            .unwrap();

        let result = store.batches_for_job(&batches[0].job_id);
        assert!(matches!(result, Err(QueueError::PersistenceFailure(_))));
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("queue.db");

        let batches = create_test_job(12, 5);
        {
            let store = SqliteJobStore::new(&db_path).unwrap();
            store.insert_batches(&batches).unwrap();
        }
        assert!(db_path.exists());

        // Reopen and read back
        let store = SqliteJobStore::new(&db_path).unwrap();
        let stored = store.batches_for_job(&batches[0].job_id).unwrap();
        assert_eq!(stored.len(), 3);
    }
}
