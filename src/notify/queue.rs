//! Durable job queues backing the notification pipeline.
//!
//! Completed jobs are removed; jobs that exhaust their retries stay behind
//! with status `failed` so they can be inspected.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{postgres::PgRow, Row};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::Db;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    Notifications,
    Reminders,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Notifications => "notifications",
            QueueName::Reminders => "reminders",
        }
    }
}

/// Queue wire contract: a job name plus arbitrary structured data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Job {
    pub name: String,
    pub data: serde_json::Value,
}

impl Job {
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Waiting,
    Active,
    Failed,
}

impl JobStatus {
    fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "active" => Ok(JobStatus::Active),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Queue(format!("unknown job status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub id: Uuid,
    pub queue: QueueName,
    pub job: Job,
    pub status: JobStatus,
    /// Attempts started so far, including the one in progress.
    pub attempts: i32,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    async fn enqueue(&self, queue: QueueName, job: Job, run_at: DateTime<Utc>) -> Result<Uuid>;
    /// Claims the oldest due waiting job, marking it active and counting the attempt.
    async fn reserve(&self, queue: QueueName, now: DateTime<Utc>) -> Result<Option<QueuedJob>>;
    async fn complete(&self, id: Uuid) -> Result<()>;
    async fn retry(&self, id: Uuid, run_at: DateTime<Utc>, error: &str) -> Result<()>;
    /// Parks an exhausted job as failed.
    async fn bury(&self, id: Uuid, error: &str) -> Result<()>;
    async fn jobs(&self, queue: QueueName, status: JobStatus) -> Result<Vec<QueuedJob>>;
}

#[derive(Clone, Default)]
pub struct MemoryQueue {
    jobs: Arc<Mutex<Vec<QueuedJob>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update(&self, id: Uuid, f: impl FnOnce(&mut QueuedJob)) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| Error::Queue(format!("job {id} not found")))?;
        f(job);
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, queue: QueueName, job: Job, run_at: DateTime<Utc>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.jobs.lock().await.push(QueuedJob {
            id,
            queue,
            job,
            status: JobStatus::Waiting,
            attempts: 0,
            run_at,
            last_error: None,
        });
        Ok(id)
    }

    async fn reserve(&self, queue: QueueName, now: DateTime<Utc>) -> Result<Option<QueuedJob>> {
        let mut jobs = self.jobs.lock().await;
        // min_by_key yields the first of equal run_at, so ties stay FIFO
        let next = jobs
            .iter_mut()
            .filter(|j| j.queue == queue && j.status == JobStatus::Waiting && j.run_at <= now)
            .min_by_key(|j| j.run_at);
        Ok(next.map(|j| {
            j.status = JobStatus::Active;
            j.attempts += 1;
            j.clone()
        }))
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        self.jobs.lock().await.retain(|j| j.id != id);
        Ok(())
    }

    async fn retry(&self, id: Uuid, run_at: DateTime<Utc>, error: &str) -> Result<()> {
        self.update(id, |j| {
            j.status = JobStatus::Waiting;
            j.run_at = run_at;
            j.last_error = Some(error.to_string());
        })
        .await
    }

    async fn bury(&self, id: Uuid, error: &str) -> Result<()> {
        self.update(id, |j| {
            j.status = JobStatus::Failed;
            j.last_error = Some(error.to_string());
        })
        .await
    }

    async fn jobs(&self, queue: QueueName, status: JobStatus) -> Result<Vec<QueuedJob>> {
        Ok(self
            .jobs
            .lock()
            .await
            .iter()
            .filter(|j| j.queue == queue && j.status == status)
            .cloned()
            .collect())
    }
}

/// Queue stored in the `notification_jobs` table.
#[derive(Clone)]
pub struct PgQueue {
    db: Db,
}

impl PgQueue {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn job_from_row(row: &PgRow, queue: QueueName) -> Result<QueuedJob> {
    Ok(QueuedJob {
        id: row.try_get("id")?,
        queue,
        job: Job {
            name: row.try_get("name")?,
            data: row.try_get::<Json<serde_json::Value>, _>("payload")?.0,
        },
        status: JobStatus::parse(&row.try_get::<String, _>("status")?)?,
        attempts: row.try_get("attempts")?,
        run_at: row.try_get("run_at")?,
        last_error: row.try_get("last_error")?,
    })
}

#[async_trait]
impl JobQueue for PgQueue {
    async fn enqueue(&self, queue: QueueName, job: Job, run_at: DateTime<Utc>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO notification_jobs (id, queue, name, payload, status, attempts, run_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'waiting', 0, $5, now(), now())
            "#,
        )
        .bind(id)
        .bind(queue.as_str())
        .bind(&job.name)
        .bind(Json(&job.data))
        .bind(run_at)
        .execute(&self.db)
        .await
        .map_err(|e| Error::Queue(e.to_string()))?;
        Ok(id)
    }

    async fn reserve(&self, queue: QueueName, now: DateTime<Utc>) -> Result<Option<QueuedJob>> {
        let row = sqlx::query(
            r#"
            UPDATE notification_jobs SET status = 'active', attempts = attempts + 1, updated_at = now()
            WHERE id = (
                SELECT id FROM notification_jobs
                WHERE queue = $1 AND status = 'waiting' AND run_at <= $2
                ORDER BY run_at, created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, name, payload, status, attempts, run_at, last_error
            "#,
        )
        .bind(queue.as_str())
        .bind(now)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| Error::Queue(e.to_string()))?;
        row.as_ref().map(|r| job_from_row(r, queue)).transpose()
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM notification_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(|e| Error::Queue(e.to_string()))?;
        Ok(())
    }

    async fn retry(&self, id: Uuid, run_at: DateTime<Utc>, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE notification_jobs SET status = 'waiting', run_at = $2, last_error = $3, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(run_at)
        .bind(error)
        .execute(&self.db)
        .await
        .map_err(|e| Error::Queue(e.to_string()))?;
        Ok(())
    }

    async fn bury(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE notification_jobs SET status = 'failed', last_error = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.db)
        .await
        .map_err(|e| Error::Queue(e.to_string()))?;
        Ok(())
    }

    async fn jobs(&self, queue: QueueName, status: JobStatus) -> Result<Vec<QueuedJob>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, payload, status, attempts, run_at, last_error
            FROM notification_jobs WHERE queue = $1 AND status = $2
            ORDER BY run_at, created_at
            "#,
        )
        .bind(queue.as_str())
        .bind(status.as_str())
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::Queue(e.to_string()))?;
        rows.iter().map(|r| job_from_row(r, queue)).collect()
    }
}
