//! Per-job processing.
//!
//! A [`JobWorker`] run owns one job from `pending` to `complete`. Every image
//! reference becomes an independent unit task; units are bounded by a per-job
//! semaphore and each writes its own result record as soon as it finishes.
//! A failing unit is recorded as a failure and never stops its siblings.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::models::batch::RowRecord;
use crate::models::job::ResultRecord;
use crate::services::fetch::{ImageError, ImageProcessor};
use crate::services::notifier::Notifier;
use crate::services::result_store::{ResultStore, StoreError};
use crate::services::storage::{output_key, OutputStore, StorageError};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 250;

/// Processes submitted jobs. Cheap to clone; all collaborators are shared handles.
#[derive(Clone)]
pub struct JobWorker {
    results: Arc<dyn ResultStore>,
    outputs: Arc<dyn OutputStore>,
    processor: Arc<ImageProcessor>,
    notifier: Arc<dyn Notifier>,
    max_concurrent_fetches: usize,
}

/// One image reference of a job, with its position in the batch.
#[derive(Debug, Clone)]
struct ImageUnit {
    job_id: Uuid,
    row_index: i32,
    image_index: i32,
    serial_number: i64,
    product_name: String,
    input_image_url: String,
}

impl ImageUnit {
    fn record(&self, output_image_url: Option<String>, error: Option<String>) -> ResultRecord {
        ResultRecord {
            job_id: self.job_id,
            row_index: self.row_index,
            image_index: self.image_index,
            serial_number: self.serial_number,
            product_name: self.product_name.clone(),
            input_image_url: self.input_image_url.clone(),
            output_image_url,
            error,
        }
    }
}

#[derive(Debug)]
enum UnitError {
    Image(ImageError),
    Storage(StorageError),
}

impl UnitError {
    fn kind(&self) -> &'static str {
        match self {
            UnitError::Image(e) => e.kind(),
            UnitError::Storage(_) => "storage",
        }
    }

    /// Failure marker stored in place of an output locator.
    fn marker(&self) -> String {
        match self {
            UnitError::Image(e) => format!("{}: {}", e.kind(), e),
            UnitError::Storage(e) => format!("storage: {e}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitOutcome {
    Succeeded,
    Failed,
    /// The result store rejected the record.
    Unrecorded,
}

/// Counts kept privately by one worker run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub unrecorded: usize,
    pub completed: bool,
    pub notified: bool,
}

impl JobWorker {
    pub fn new(
        results: Arc<dyn ResultStore>,
        outputs: Arc<dyn OutputStore>,
        processor: Arc<ImageProcessor>,
        notifier: Arc<dyn Notifier>,
        max_concurrent_fetches: usize,
    ) -> Self {
        Self {
            results,
            outputs,
            processor,
            notifier,
            max_concurrent_fetches: max_concurrent_fetches.max(1),
        }
    }

    /// Process every image of `rows`, complete the job and send the
    /// completion notification.
    ///
    /// Store writes are retried. If a record still cannot be written the job
    /// is left `running` and no notification is sent.
    pub async fn run(&self, job_id: Uuid, rows: Vec<RowRecord>) -> JobSummary {
        let started = Instant::now();
        let mut summary = JobSummary::default();

        match self
            .with_retries(job_id, "mark running", || self.results.mark_running(job_id))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(job_id = %job_id, "Job is not pending, skipping run");
                return summary;
            }
            Err(e) => {
                metrics::counter!("batch_jobs_stalled_total", "stage" => "start").increment(1);
                tracing::error!(job_id = %job_id, error = %e, "Could not start job, leaving it pending");
                return summary;
            }
        }

        let units = decompose(job_id, &rows);
        tracing::info!(
            job_id = %job_id,
            rows = rows.len(),
            images = units.len(),
            max_concurrent_fetches = self.max_concurrent_fetches,
            "Processing batch job"
        );
        metrics::gauge!("batch_jobs_running").increment(1.0);

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_fetches));
        let mut tasks = JoinSet::new();
        for unit in units {
            let worker = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                worker.run_unit(unit).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(UnitOutcome::Succeeded) => summary.succeeded += 1,
                Ok(UnitOutcome::Failed) => summary.failed += 1,
                Ok(UnitOutcome::Unrecorded) => summary.unrecorded += 1,
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Image unit task aborted");
                    summary.unrecorded += 1;
                }
            }
        }

        metrics::gauge!("batch_jobs_running").decrement(1.0);

        // A complete job must hold one record per image reference.
        if summary.unrecorded > 0 {
            metrics::counter!("batch_jobs_stalled_total", "stage" => "record").increment(1);
            tracing::error!(
                job_id = %job_id,
                unrecorded = summary.unrecorded,
                "Result records were lost, leaving job running"
            );
            return summary;
        }

        match self
            .with_retries(job_id, "mark complete", || self.results.mark_complete(job_id))
            .await
        {
            Ok(true) => summary.completed = true,
            Ok(false) => tracing::warn!(job_id = %job_id, "Job was no longer running at completion"),
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "Could not mark job complete"),
        }

        if summary.completed {
            metrics::counter!("batch_jobs_completed_total").increment(1);
            match self.notifier.notify(job_id).await {
                Ok(()) => summary.notified = true,
                Err(e) => {
                    metrics::counter!("batch_webhook_failures_total").increment(1);
                    tracing::warn!(job_id = %job_id, error = %e, "Completion notification failed");
                }
            }
        }

        tracing::info!(
            job_id = %job_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            unrecorded = summary.unrecorded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch job finished"
        );

        summary
    }

    async fn run_unit(&self, unit: ImageUnit) -> UnitOutcome {
        let start = Instant::now();
        let result = self.process_unit(&unit).await;
        metrics::histogram!("batch_image_processing_seconds").record(start.elapsed().as_secs_f64());

        let (record, label) = match result {
            Ok(locator) => {
                tracing::debug!(
                    job_id = %unit.job_id,
                    input = %unit.input_image_url,
                    output = %locator,
                    "Image processed"
                );
                (unit.record(Some(locator), None), "success")
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %unit.job_id,
                    serial_number = unit.serial_number,
                    input = %unit.input_image_url,
                    error = %e.marker(),
                    "Image failed, recording failure"
                );
                (unit.record(None, Some(e.marker())), e.kind())
            }
        };
        metrics::counter!("batch_images_processed_total", "outcome" => label).increment(1);

        match self
            .with_retries(unit.job_id, "append result", || self.results.append(&record))
            .await
        {
            Ok(()) if record.is_success() => UnitOutcome::Succeeded,
            Ok(()) => UnitOutcome::Failed,
            Err(e) => {
                tracing::error!(
                    job_id = %unit.job_id,
                    input = %unit.input_image_url,
                    error = %e,
                    "Failed to append result record"
                );
                UnitOutcome::Unrecorded
            }
        }
    }

    async fn process_unit(&self, unit: &ImageUnit) -> Result<String, UnitError> {
        let png = self
            .processor
            .process(&unit.input_image_url)
            .await
            .map_err(UnitError::Image)?;

        let key = output_key(unit.job_id, unit.serial_number, &unit.input_image_url);
        self.outputs.save(&key, &png).await.map_err(UnitError::Storage)
    }

    async fn with_retries<T, F, Fut>(&self, job_id: Uuid, action: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < MAX_RETRIES => {
                    tracing::warn!(job_id = %job_id, attempt, error = %e, "{action} failed, retrying");
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn decompose(job_id: Uuid, rows: &[RowRecord]) -> Vec<ImageUnit> {
    rows.iter()
        .enumerate()
        .flat_map(|(row_index, row)| {
            row.input_image_urls
                .iter()
                .enumerate()
                .map(move |(image_index, url)| ImageUnit {
                    job_id,
                    row_index: row_index as i32,
                    image_index: image_index as i32,
                    serial_number: row.serial_number,
                    product_name: row.product_name.clone(),
                    input_image_url: url.clone(),
                })
        })
        .collect()
}
