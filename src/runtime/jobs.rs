/// Durable background job queue
///
/// Jobs live in the `jobs` table so they survive restarts and can be enqueued
/// inside the same transaction as the change that caused them. Delivery is
/// at-least-once: a claimed job that is never completed is handed out again
/// once its lease expires, so every handler must be idempotent.

use crate::{
    config::JobConfig,
    database::Database,
    error::{AppError, Result},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Units of background work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Insert the default state sequence of a freshly created flow
    SeedDefaultStates { flow_id: String },
    /// Stamp an invoice number on a captured payment
    GenerateInvoice { payment_id: String },
    /// Expire a membership whose end date has passed
    MembershipExpiryCheck { membership_id: String },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::SeedDefaultStates { .. } => "seed_default_states",
            Job::GenerateInvoice { .. } => "generate_invoice",
            Job::MembershipExpiryCheck { .. } => "membership_expiry_check",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// Exhausted all attempts
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(AppError::Validation(format!("unknown job status: {}", other))),
        }
    }
}

/// A persisted job row
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    /// Organisation whose change caused the job
    pub organisation_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A job handed to a worker; `attempts` already counts this delivery
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: String,
    pub job: Job,
    pub attempts: i64,
    pub max_attempts: i64,
}

#[derive(Debug, Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    max_attempts: i64,
    backoff_secs: i64,
}

impl JobQueue {
    pub fn new(db: &Database, config: &JobConfig) -> Self {
        Self {
            pool: db.pool().clone(),
            max_attempts: config.max_attempts.max(1),
            backoff_secs: config.backoff_secs.max(0),
        }
    }

    /// Enqueue a job on its own connection
    pub async fn enqueue(&self, organisation_id: &str, job: &Job, run_at: DateTime<Utc>) -> Result<String> {
        let mut conn = self.pool.acquire().await?;
        self.enqueue_with(&mut conn, organisation_id, job, run_at).await
    }

    /// Enqueue a job on the given connection
    ///
    /// Pass an open transaction to make the job part of the same unit of work:
    /// it only becomes visible to workers if the transaction commits.
    pub async fn enqueue_with(
        &self,
        conn: &mut SqliteConnection,
        organisation_id: &str,
        job: &Job,
        run_at: DateTime<Utc>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, organisation_id, kind, payload, status, attempts, max_attempts, run_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'pending', 0, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(organisation_id)
        .bind(job.kind())
        .bind(serde_json::to_string(job)?)
        .bind(self.max_attempts)
        .bind(run_at)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        tracing::debug!("📥 Enqueued job {} ({}) for {}", id, job.kind(), run_at);
        Ok(id)
    }

    /// Move up to `limit` due jobs from pending to running
    pub async fn claim_due(&self, limit: i64) -> Result<Vec<ClaimedJob>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, payload, attempts, max_attempts FROM jobs
            WHERE status = 'pending' AND run_at <= ?
            ORDER BY run_at, created_at
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let payload: String = row.try_get("payload")?;

            let job: Job = match serde_json::from_str(&payload) {
                Ok(job) => job,
                Err(e) => {
                    // Retrying can't fix a payload we don't understand
                    tracing::error!("❌ Job {} has an undecodable payload, marking failed: {}", id, e);
                    sqlx::query(
                        "UPDATE jobs SET status = 'failed', last_error = ?, updated_at = ? WHERE id = ?",
                    )
                    .bind(format!("undecodable payload: {}", e))
                    .bind(now)
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
                    continue;
                }
            };

            let updated = sqlx::query(
                r#"
                UPDATE jobs SET status = 'running', attempts = attempts + 1, updated_at = ?
                WHERE id = ? AND status = 'pending'
                "#,
            )
            .bind(now)
            .bind(&id)
            .execute(&mut *tx)
            .await?;

            // Another worker got there first
            if updated.rows_affected() == 0 {
                continue;
            }

            claimed.push(ClaimedJob {
                id,
                job,
                attempts: row.try_get::<i64, _>("attempts")? + 1,
                max_attempts: row.try_get("max_attempts")?,
            });
        }

        tx.commit().await?;
        Ok(claimed)
    }

    pub async fn complete(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', last_error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed delivery and either reschedule it or give up
    ///
    /// Returns the resulting status (`Pending` when a retry is scheduled).
    pub async fn fail(&self, claimed: &ClaimedJob, error: &str) -> Result<JobStatus> {
        let now = Utc::now();

        if claimed.attempts >= claimed.max_attempts {
            sqlx::query(
                "UPDATE jobs SET status = 'failed', last_error = ?, updated_at = ? WHERE id = ?",
            )
            .bind(error)
            .bind(now)
            .bind(&claimed.id)
            .execute(&self.pool)
            .await?;

            tracing::error!(
                "💀 Job {} ({}) failed permanently after {} attempts: {}",
                claimed.id, claimed.job.kind(), claimed.attempts, error
            );
            return Ok(JobStatus::Failed);
        }

        let delay = backoff_delay(self.backoff_secs, claimed.attempts);
        sqlx::query(
            r#"
            UPDATE jobs SET status = 'pending', last_error = ?, run_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(now + delay)
        .bind(now)
        .bind(&claimed.id)
        .execute(&self.pool)
        .await?;

        tracing::warn!(
            "⚠️ Job {} ({}) attempt {}/{} failed, retrying in {}s: {}",
            claimed.id, claimed.job.kind(), claimed.attempts, claimed.max_attempts,
            delay.num_seconds(), error
        );
        Ok(JobStatus::Pending)
    }

    /// Hand running jobs whose lease expired back to the queue
    pub async fn recover_stale(&self, lease: Duration) -> Result<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', updated_at = ? WHERE status = 'running' AND updated_at < ?",
        )
        .bind(now)
        .bind(now - lease)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::warn!("♻️ Recovered {} stale running jobs", result.rows_affected());
        }
        Ok(result.rows_affected())
    }

    pub async fn get(&self, id: &str) -> Result<JobRecord> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_JOB))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("job"))?;
        job_from_row(&row)
    }

    /// A job of one organisation; jobs of other organisations are not found
    pub async fn get_for_organisation(&self, organisation_id: &str, id: &str) -> Result<JobRecord> {
        let row = sqlx::query(&format!("{} WHERE id = ? AND organisation_id = ?", SELECT_JOB))
            .bind(id)
            .bind(organisation_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("job"))?;
        job_from_row(&row)
    }

    /// List jobs across all organisations, newest first, optionally filtered by status
    pub async fn list(&self, status: Option<JobStatus>) -> Result<Vec<JobRecord>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!("{} WHERE status = ? ORDER BY created_at DESC", SELECT_JOB))
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&format!("{} ORDER BY created_at DESC", SELECT_JOB))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(job_from_row).collect()
    }

    /// List one organisation's jobs, newest first, optionally filtered by status
    pub async fn list_for_organisation(
        &self,
        organisation_id: &str,
        status: Option<JobStatus>,
    ) -> Result<Vec<JobRecord>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "{} WHERE organisation_id = ? AND status = ? ORDER BY created_at DESC",
                    SELECT_JOB
                ))
                .bind(organisation_id)
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("{} WHERE organisation_id = ? ORDER BY created_at DESC", SELECT_JOB))
                    .bind(organisation_id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(job_from_row).collect()
    }
}

/// Exponential backoff: base, 2x base, 4x base, ...
fn backoff_delay(base_secs: i64, attempts: i64) -> Duration {
    let exponent = (attempts - 1).clamp(0, 16) as u32;
    Duration::seconds(base_secs.saturating_mul(1_i64 << exponent))
}

const SELECT_JOB: &str = r#"
    SELECT id, organisation_id, kind, payload, status, attempts, max_attempts, run_at, last_error, created_at, updated_at
    FROM jobs
"#;

fn job_from_row(row: &SqliteRow) -> Result<JobRecord> {
    let payload: String = row.try_get("payload")?;
    let status: String = row.try_get("status")?;
    Ok(JobRecord {
        id: row.try_get("id")?,
        organisation_id: row.try_get("organisation_id")?,
        kind: row.try_get("kind")?,
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::String(payload)),
        status: status.parse()?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        run_at: row.try_get("run_at")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn queue(max_attempts: i64) -> JobQueue {
        let db = Database::in_memory().await.unwrap();
        let config = JobConfig {
            schedule: "*/5 * * * * *".into(),
            batch_size: 10,
            max_attempts,
            backoff_secs: 30,
            lease_secs: 300,
        };
        JobQueue::new(&db, &config)
    }

    fn seed(flow_id: &str) -> Job {
        Job::SeedDefaultStates { flow_id: flow_id.into() }
    }

    #[tokio::test]
    async fn claims_only_due_jobs_once() {
        let queue = queue(3).await;
        queue.enqueue("acme", &seed("now"), Utc::now()).await.unwrap();
        queue.enqueue("acme", &seed("later"), Utc::now() + Duration::hours(1)).await.unwrap();

        let claimed = queue.claim_due(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].job, seed("now"));
        assert_eq!(claimed[0].attempts, 1);

        assert!(queue.claim_due(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failures_retry_with_backoff_then_give_up() {
        let queue = queue(2).await;
        let id = queue.enqueue("acme", &seed("f"), Utc::now()).await.unwrap();

        let first = queue.claim_due(1).await.unwrap().remove(0);
        assert_eq!(queue.fail(&first, "boom").await.unwrap(), JobStatus::Pending);

        let record = queue.get(&id).await.unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.last_error.as_deref(), Some("boom"));
        assert!(record.run_at > Utc::now());

        // Not due yet
        assert!(queue.claim_due(1).await.unwrap().is_empty());

        let second = ClaimedJob { attempts: 2, ..first };
        assert_eq!(queue.fail(&second, "boom again").await.unwrap(), JobStatus::Failed);

        let failed = queue.list(Some(JobStatus::Failed)).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, id);
    }

    #[tokio::test]
    async fn expired_leases_are_redelivered() {
        let queue = queue(3).await;
        let id = queue.enqueue("acme", &seed("lease"), Utc::now()).await.unwrap();
        assert_eq!(queue.claim_due(1).await.unwrap().len(), 1);

        // A zero lease expires everything currently running
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(queue.recover_stale(Duration::zero()).await.unwrap(), 1);

        let again = queue.claim_due(1).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, id);
        assert_eq!(again[0].attempts, 2);
    }

    #[tokio::test]
    async fn enqueue_inside_rolled_back_transaction_is_discarded() {
        let queue = queue(3).await;
        {
            let mut tx = queue.pool.begin().await.unwrap();
            queue.enqueue_with(&mut tx, "acme", &seed("tx"), Utc::now()).await.unwrap();
            tx.rollback().await.unwrap();
        }
        assert!(queue.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn organisations_only_see_their_own_jobs() {
        let queue = queue(3).await;
        let acme_job = queue.enqueue("acme", &seed("a"), Utc::now()).await.unwrap();
        let globex_job = queue.enqueue("globex", &seed("g"), Utc::now()).await.unwrap();

        let acme = queue.list_for_organisation("acme", None).await.unwrap();
        assert_eq!(acme.len(), 1);
        assert_eq!(acme[0].id, acme_job);
        assert_eq!(acme[0].organisation_id, "acme");
        assert!(queue
            .list_for_organisation("acme", Some(JobStatus::Failed))
            .await
            .unwrap()
            .is_empty());

        assert!(queue.get_for_organisation("globex", &globex_job).await.is_ok());
        assert!(matches!(
            queue.get_for_organisation("acme", &globex_job).await,
            Err(AppError::NotFound("job"))
        ));
        assert_eq!(queue.list(None).await.unwrap().len(), 2);
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_delay(10, 1).num_seconds(), 10);
        assert_eq!(backoff_delay(10, 3).num_seconds(), 40);
        assert_eq!(backoff_delay(0, 4).num_seconds(), 0);
    }
}
