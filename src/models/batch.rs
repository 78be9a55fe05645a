use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::job::{JobSnapshot, JobState};

pub const STATUS_COMPLETE: &str = "complete";
pub const STATUS_PROCESSING: &str = "processing";

/// One line of a submitted batch: a product and its source images.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct RowRecord {
    #[garde(skip)]
    pub serial_number: i64,

    #[garde(length(min = 1, max = 500))]
    pub product_name: String,

    #[garde(length(min = 1))]
    pub input_image_urls: Vec<String>,
}

impl RowRecord {
    pub fn new(serial_number: i64, product_name: &str, input_image_urls: &[&str]) -> Self {
        Self {
            serial_number,
            product_name: product_name.to_string(),
            input_image_urls: input_image_urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    /// Trims the product name and every reference, dropping blank references
    /// (a trailing comma in a spreadsheet cell yields one).
    pub fn normalized(self) -> Self {
        Self {
            serial_number: self.serial_number,
            product_name: self.product_name.trim().to_string(),
            input_image_urls: self
                .input_image_urls
                .into_iter()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect(),
        }
    }
}

/// Request body for POST /api/v1/jobs.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct SubmitBatchRequest {
    #[garde(length(min = 1), dive)]
    pub rows: Vec<RowRecord>,
}

/// Response after a batch has been accepted.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitBatchResponse {
    pub job_id: Uuid,
    pub status: String,
}

/// Results for one product name, as parallel arrays in batch order.
/// A failed image has `null` in `output_image_urls` and its reason in `errors`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProductImages {
    pub serial_numbers: Vec<i64>,
    pub input_image_urls: Vec<String>,
    pub output_image_urls: Vec<Option<String>>,
    pub errors: Vec<Option<String>>,
}

/// Response for GET /api/v1/jobs/{job_id}.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: String,
    pub total_images: i32,
    pub processed_images: usize,
    pub failed_images: usize,
    pub data: BTreeMap<String, ProductImages>,
}

impl From<&JobSnapshot> for JobStatusResponse {
    fn from(snapshot: &JobSnapshot) -> Self {
        let mut data: BTreeMap<String, ProductImages> = BTreeMap::new();
        for record in &snapshot.records {
            let entry = data.entry(record.product_name.clone()).or_default();
            entry.serial_numbers.push(record.serial_number);
            entry.input_image_urls.push(record.input_image_url.clone());
            entry.output_image_urls.push(record.output_image_url.clone());
            entry.errors.push(record.error.clone());
        }

        // Status follows the job's own state; a running job can already hold
        // as many records as it will finally have.
        let status = match snapshot.job.state {
            JobState::Complete => STATUS_COMPLETE,
            JobState::Pending | JobState::Running => STATUS_PROCESSING,
        };

        Self {
            job_id: snapshot.job.id,
            status: status.to_string(),
            total_images: snapshot.job.total_images,
            processed_images: snapshot.records.len(),
            failed_images: snapshot.records.iter().filter(|r| !r.is_success()).count(),
            data,
        }
    }
}
