//! Postgres-backed job store.
//!
//! ## Claiming
//!
//! `claim_batch` is a single statement: a `FOR UPDATE SKIP LOCKED` subselect picks
//! the oldest claimable rows and the enclosing `UPDATE` flips them to PROCESSING.
//! Rows locked by a concurrent claimer are skipped rather than waited on, so two
//! workers never receive the same job and never block each other.
//!
//! ## Saving
//!
//! `save_claimed` only updates a row that is still PROCESSING. A zero row count
//! means the job was never claimed (or was touched by someone else) and is
//! reported as `NotClaimed`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use lotwise_core::{JobId, UserId};

use super::store::{JobStats, JobStore, JobStoreError};
use super::types::{Job, JobStatus};
use crate::db::describe_sqlx_error;

const JOB_COLUMNS: &str = "id, job_type, status, payload, result, raw_output, attempts, \
    max_attempts, available_at, created_at, updated_at, error_message, tokens_used, \
    cost_estimate_usd, needs_review, owner_user_id, model_name, latency_ms";

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn storage(operation: &str, err: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(describe_sqlx_error(operation, &err))
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type), err)]
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO enrichment_jobs (
                id, job_type, status, payload, result, raw_output, attempts, max_attempts,
                available_at, created_at, updated_at, error_message, tokens_used,
                cost_estimate_usd, needs_review, owner_user_id, model_name, latency_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(&job.job_type)
        .bind(job.status.as_str())
        .bind(&job.payload)
        .bind(&job.result)
        .bind(&job.raw_output)
        .bind(job.attempts as i32)
        .bind(job.max_attempts as i32)
        .bind(job.available_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(&job.error_message)
        .bind(job.tokens_used as i64)
        .bind(job.cost_estimate_usd)
        .bind(job.needs_review)
        .bind(job.owner_user_id.as_uuid())
        .bind(&job.model_name)
        .bind(job.latency_ms.map(|ms| ms as i64))
        .execute(&*self.pool)
        .await;

        match result {
            Ok(_) => Ok(job.id),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                Err(JobStoreError::AlreadyExists(job.id))
            }
            Err(e) => Err(storage("enqueue", e)),
        }
    }

    #[instrument(skip(self), err)]
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM enrichment_jobs WHERE id = $1"
        ))
        .bind(job_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| storage("get", e))?;

        row.map(|row| decode_job(&row)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            r#"
            UPDATE enrichment_jobs
            SET status = 'PROCESSING', updated_at = $2
            WHERE id IN (
                SELECT id
                FROM enrichment_jobs
                WHERE status = 'PENDING' AND available_at <= $2
                ORDER BY created_at ASC, id ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| storage("claim_batch", e))?;

        let mut jobs = rows
            .iter()
            .map(decode_job)
            .collect::<Result<Vec<_>, _>>()?;
        // RETURNING does not preserve the subselect's order.
        jobs.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(jobs)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status), err)]
    async fn save_claimed(&self, job: &Job) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE enrichment_jobs
            SET status = $2,
                result = $3,
                raw_output = $4,
                attempts = $5,
                available_at = $6,
                updated_at = $7,
                error_message = $8,
                tokens_used = $9,
                cost_estimate_usd = $10,
                needs_review = $11,
                model_name = $12,
                latency_ms = $13
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(&job.result)
        .bind(&job.raw_output)
        .bind(job.attempts as i32)
        .bind(job.available_at)
        .bind(job.updated_at)
        .bind(&job.error_message)
        .bind(job.tokens_used as i64)
        .bind(job.cost_estimate_usd)
        .bind(job.needs_review)
        .bind(&job.model_name)
        .bind(job.latency_ms.map(|ms| ms as i64))
        .execute(&*self.pool)
        .await
        .map_err(|e| storage("save_claimed", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotClaimed(job.id));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM enrichment_jobs GROUP BY status",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| storage("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| storage("stats", e))?;
            let count: i64 = row.try_get("count").map_err(|e| storage("stats", e))?;
            let status: JobStatus = status
                .parse()
                .map_err(|e: lotwise_core::DomainError| JobStoreError::Storage(e.to_string()))?;
            stats.add(status, count.max(0) as u64);
        }
        Ok(stats)
    }
}

struct JobRow {
    id: Uuid,
    job_type: String,
    status: String,
    payload: JsonValue,
    result: Option<JsonValue>,
    raw_output: Option<String>,
    attempts: i32,
    max_attempts: i32,
    available_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    error_message: Option<String>,
    tokens_used: i64,
    cost_estimate_usd: f64,
    needs_review: bool,
    owner_user_id: Uuid,
    model_name: Option<String>,
    latency_ms: Option<i64>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for JobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            job_type: row.try_get("job_type")?,
            status: row.try_get("status")?,
            payload: row.try_get("payload")?,
            result: row.try_get("result")?,
            raw_output: row.try_get("raw_output")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            available_at: row.try_get("available_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            error_message: row.try_get("error_message")?,
            tokens_used: row.try_get("tokens_used")?,
            cost_estimate_usd: row.try_get("cost_estimate_usd")?,
            needs_review: row.try_get("needs_review")?,
            owner_user_id: row.try_get("owner_user_id")?,
            model_name: row.try_get("model_name")?,
            latency_ms: row.try_get("latency_ms")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e: lotwise_core::DomainError| JobStoreError::Storage(e.to_string()))?;
        Ok(Job {
            id: JobId::from_uuid(row.id),
            job_type: row.job_type,
            status,
            payload: row.payload,
            result: row.result,
            raw_output: row.raw_output,
            attempts: row.attempts.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            available_at: row.available_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            error_message: row.error_message,
            tokens_used: row.tokens_used.max(0) as u64,
            cost_estimate_usd: row.cost_estimate_usd,
            needs_review: row.needs_review,
            owner_user_id: UserId::from_uuid(row.owner_user_id),
            model_name: row.model_name,
            latency_ms: row.latency_ms.map(|ms| ms.max(0) as u64),
        })
    }
}

fn decode_job(row: &sqlx::postgres::PgRow) -> Result<Job, JobStoreError> {
    let row = JobRow::from_row(row)
        .map_err(|e| JobStoreError::Storage(format!("failed to decode job row: {e}")))?;
    Job::try_from(row)
}

/// Run against a live database: `DATABASE_URL=... cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::ScratchSchema;
    use chrono::Duration;
    use lotwise_ai::JobType;
    use serde_json::json;
    use std::collections::HashSet;

    fn pending(created_at: DateTime<Utc>) -> Job {
        Job::new(UserId::new(), JobType::Normalize, json!({"title": "x"}), created_at)
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn claims_oldest_first_and_skips_future_jobs() {
        let Some(db) = ScratchSchema::create().await else {
            return;
        };
        let store = PostgresJobStore::new(db.pool.clone());
        let t0 = Utc::now() - Duration::minutes(5);
        let newest = store.enqueue(pending(t0 + Duration::seconds(2))).await.unwrap();
        let oldest = store.enqueue(pending(t0)).await.unwrap();
        let deferred =
            pending(t0 - Duration::seconds(1)).available_at(Utc::now() + Duration::hours(1));
        store.enqueue(deferred).await.unwrap();

        let claimed = store.claim_batch(5, Utc::now()).await.unwrap();
        let ids: Vec<_> = claimed.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![oldest, newest]);
        assert!(claimed.iter().all(|j| j.status == JobStatus::Processing));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processing, 2);

        db.cleanup().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "needs DATABASE_URL"]
    async fn concurrent_claims_are_disjoint() {
        let Some(db) = ScratchSchema::create().await else {
            return;
        };
        let store = Arc::new(PostgresJobStore::new(db.pool.clone()));
        let t0 = Utc::now() - Duration::minutes(5);
        for i in 0..40 {
            store.enqueue(pending(t0 + Duration::milliseconds(i))).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_batch(7, Utc::now()).await.unwrap()
            }));
        }

        let mut seen = HashSet::new();
        for h in handles {
            for job in h.await.unwrap() {
                assert!(seen.insert(job.id), "job {} claimed twice", job.id);
            }
        }
        assert_eq!(seen.len(), 40);

        db.cleanup().await;
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn save_only_touches_processing_rows() {
        let Some(db) = ScratchSchema::create().await else {
            return;
        };
        let store = PostgresJobStore::new(db.pool.clone());
        let now = Utc::now();
        let job = pending(now - Duration::seconds(1));
        store.enqueue(job.clone()).await.unwrap();

        assert!(matches!(
            store.save_claimed(&job).await,
            Err(JobStoreError::NotClaimed(_))
        ));

        let mut claimed = store.claim_batch(1, now).await.unwrap().remove(0);
        claimed
            .mark_completed(json!({"title": "X"}), false, now)
            .unwrap();
        store.save_claimed(&claimed).await.unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert_eq!(stored.result, Some(json!({"title": "X"})));

        // Already terminal, a second save is refused.
        assert!(matches!(
            store.save_claimed(&claimed).await,
            Err(JobStoreError::NotClaimed(_))
        ));

        db.cleanup().await;
    }
}
