//! Durable job and result-record storage.
//!
//! [`ResultStore`] is the single source of truth for job status. Workers
//! append records one at a time as images finish, so a status read while a
//! job is running sees its partial progress.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::queries;
use crate::models::job::{BatchJob, JobSnapshot, JobState, ResultRecord};

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Record a newly admitted job in the pending state.
    async fn create_job(&self, job_id: Uuid, total_images: i32) -> Result<BatchJob, StoreError>;

    /// Pending → running. Returns false if the job was not pending.
    async fn mark_running(&self, job_id: Uuid) -> Result<bool, StoreError>;

    /// Running → complete. Returns false if the job was not running.
    async fn mark_complete(&self, job_id: Uuid) -> Result<bool, StoreError>;

    /// Append one result record. Safe to call concurrently.
    async fn append(&self, record: &ResultRecord) -> Result<(), StoreError>;

    /// The job and all of its records, or `None` if it was never admitted.
    async fn query_by_job(&self, job_id: Uuid) -> Result<Option<JobSnapshot>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// PostgreSQL-backed store.
pub struct PgResultStore {
    pool: PgPool,
}

impl PgResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn create_job(&self, job_id: Uuid, total_images: i32) -> Result<BatchJob, StoreError> {
        Ok(queries::create_job(&self.pool, job_id, total_images).await?)
    }

    async fn mark_running(&self, job_id: Uuid) -> Result<bool, StoreError> {
        Ok(queries::transition_job_state(&self.pool, job_id, JobState::Pending, JobState::Running).await?)
    }

    async fn mark_complete(&self, job_id: Uuid) -> Result<bool, StoreError> {
        Ok(queries::transition_job_state(&self.pool, job_id, JobState::Running, JobState::Complete).await?)
    }

    async fn append(&self, record: &ResultRecord) -> Result<(), StoreError> {
        queries::insert_result(&self.pool, record).await.map_err(|e| {
            let unknown_job = matches!(&e, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation());
            if unknown_job {
                StoreError::UnknownJob(record.job_id)
            } else {
                StoreError::Database(e)
            }
        })
    }

    async fn query_by_job(&self, job_id: Uuid) -> Result<Option<JobSnapshot>, StoreError> {
        // Read the job before its records: completion is only written after the
        // last append, so a complete job read here always has every record.
        let Some(job) = queries::get_job(&self.pool, job_id).await? else {
            return Ok(None);
        };
        let records = queries::list_results(&self.pool, job_id).await?;
        Ok(Some(JobSnapshot { job, records }))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Process-local store with the same semantics as [`PgResultStore`].
#[derive(Default)]
pub struct InMemoryResultStore {
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
}

struct JobEntry {
    snapshot: JobSnapshot,
    /// `(row_index, image_index)` of every appended record
    positions: HashSet<(i32, i32)>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of admitted jobs.
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    async fn transition(&self, job_id: Uuid, from: JobState, to: JobState) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = &mut jobs
            .get_mut(&job_id)
            .ok_or(StoreError::UnknownJob(job_id))?
            .snapshot
            .job;
        if job.state != from {
            return Ok(false);
        }
        job.state = to;
        job.updated_at = Utc::now();
        Ok(true)
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn create_job(&self, job_id: Uuid, total_images: i32) -> Result<BatchJob, StoreError> {
        let now = Utc::now();
        let job = BatchJob {
            id: job_id,
            state: JobState::Pending,
            total_images,
            created_at: now,
            updated_at: now,
        };

        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job_id) {
            return Err(StoreError::Corrupt(format!("job {job_id} already exists")));
        }
        jobs.insert(
            job_id,
            JobEntry {
                snapshot: JobSnapshot {
                    job: job.clone(),
                    records: Vec::new(),
                },
                positions: HashSet::new(),
            },
        );
        Ok(job)
    }

    async fn mark_running(&self, job_id: Uuid) -> Result<bool, StoreError> {
        self.transition(job_id, JobState::Pending, JobState::Running).await
    }

    async fn mark_complete(&self, job_id: Uuid) -> Result<bool, StoreError> {
        self.transition(job_id, JobState::Running, JobState::Complete).await
    }

    async fn append(&self, record: &ResultRecord) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(&record.job_id)
            .ok_or(StoreError::UnknownJob(record.job_id))?;

        if !entry.positions.insert((record.row_index, record.image_index)) {
            return Err(StoreError::Corrupt(format!(
                "record ({}, {}) already appended to job {}",
                record.row_index, record.image_index, record.job_id
            )));
        }

        entry.snapshot.records.push(record.clone());
        Ok(())
    }

    async fn query_by_job(&self, job_id: Uuid) -> Result<Option<JobSnapshot>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(&job_id).map(|entry| {
            let mut snapshot = entry.snapshot.clone();
            snapshot
                .records
                .sort_by_key(|r| (r.row_index, r.image_index));
            snapshot
        }))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} was never admitted")]
    UnknownJob(Uuid),

    #[error("Inconsistent store state: {0}")]
    Corrupt(String),
}
