use garde::Validate;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::batch::{RowRecord, SubmitBatchRequest};
use crate::services::result_store::{ResultStore, StoreError};
use crate::services::worker::{JobSummary, JobWorker};

/// Accepts batches and hands them to a [`JobWorker`] on the tokio runtime.
pub struct JobAdmission {
    results: Arc<dyn ResultStore>,
    worker: JobWorker,
}

/// An admitted job. The worker handle is only useful to callers that want to
/// wait for processing (tests, CLI tools); dropping it does not cancel the job.
#[derive(Debug)]
pub struct Admitted {
    pub job_id: Uuid,
    pub handle: JoinHandle<JobSummary>,
}

impl JobAdmission {
    pub fn new(results: Arc<dyn ResultStore>, worker: JobWorker) -> Self {
        Self { results, worker }
    }

    /// Validate `rows`, record a pending job and schedule its worker.
    /// Returns as soon as the job is recorded.
    pub async fn submit(&self, rows: Vec<RowRecord>) -> Result<Admitted, AdmissionError> {
        let rows = validate_batch(rows)?;
        let total_images = count_images(&rows)?;

        let job_id = Uuid::new_v4();
        self.results.create_job(job_id, total_images).await?;

        metrics::counter!("batch_jobs_submitted_total").increment(1);
        tracing::info!(
            job_id = %job_id,
            rows = rows.len(),
            total_images,
            "Batch job admitted"
        );

        let worker = self.worker.clone();
        let handle = tokio::spawn(async move { worker.run(job_id, rows).await });

        Ok(Admitted { job_id, handle })
    }
}

/// Normalize and check a batch. Every reference must be an absolute
/// http(s) URL and every row must keep at least one reference.
pub fn validate_batch(rows: Vec<RowRecord>) -> Result<Vec<RowRecord>, AdmissionError> {
    let request = SubmitBatchRequest {
        rows: rows.into_iter().map(RowRecord::normalized).collect(),
    };

    request
        .validate()
        .map_err(|report| AdmissionError::InvalidBatch(report.to_string()))?;

    for (index, row) in request.rows.iter().enumerate() {
        for url in &row.input_image_urls {
            check_image_url(url).map_err(|reason| {
                AdmissionError::InvalidBatch(format!("rows[{index}]: {reason}"))
            })?;
        }
    }

    Ok(request.rows)
}

fn check_image_url(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("invalid image URL {url:?}: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme {other:?} in image URL {url:?}")),
    }
}

fn count_images(rows: &[RowRecord]) -> Result<i32, AdmissionError> {
    let total: usize = rows.iter().map(|r| r.input_image_urls.len()).sum();
    i32::try_from(total)
        .map_err(|_| AdmissionError::InvalidBatch(format!("batch has too many images ({total})")))
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Could not record job: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_batch_rejected() {
        let err = validate_batch(vec![]).unwrap_err();
        assert!(matches!(err, AdmissionError::InvalidBatch(_)));
    }

    #[test]
    fn test_row_with_only_blank_references_rejected() {
        let rows = vec![
            RowRecord::new(1, "Widget", &["http://x/a.png"]),
            RowRecord::new(2, "Gadget", &["", "  "]),
        ];
        assert!(matches!(validate_batch(rows), Err(AdmissionError::InvalidBatch(_))));
    }

    #[test]
    fn test_blank_product_name_rejected() {
        let rows = vec![RowRecord::new(1, "   ", &["http://x/a.png"])];
        assert!(validate_batch(rows).is_err());
    }

    #[test]
    fn test_malformed_or_non_http_url_rejected() {
        for url in ["not a url", "ftp://x/a.png", "/relative/a.png"] {
            let rows = vec![RowRecord::new(1, "Widget", &[url])];
            let err = validate_batch(rows).unwrap_err();
            assert!(err.to_string().contains("rows[0]"), "{err}");
        }
    }

    #[test]
    fn test_valid_batch_is_normalized() {
        let rows = vec![RowRecord::new(1, " Widget ", &["http://x/a.png", " https://x/b.jpg ", ""])];
        let rows = validate_batch(rows).unwrap();
        assert_eq!(rows[0].product_name, "Widget");
        assert_eq!(rows[0].input_image_urls, vec!["http://x/a.png", "https://x/b.jpg"]);
        assert_eq!(count_images(&rows).unwrap(), 2);
    }
}
