use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Lifecycle state of a batch job. There is no failed state: per-image
/// failures are recorded as result records and the job still completes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Complete,
}

/// A submitted batch job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: Uuid,
    pub state: JobState,
    pub total_images: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One persisted input → output mapping belonging to a job.
///
/// Exactly one of `output_image_url` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRecord {
    pub job_id: Uuid,
    pub row_index: i32,
    pub image_index: i32,
    pub serial_number: i64,
    pub product_name: String,
    pub input_image_url: String,
    pub output_image_url: Option<String>,
    pub error: Option<String>,
}

impl ResultRecord {
    pub fn is_success(&self) -> bool {
        self.output_image_url.is_some()
    }
}

/// A job together with every result record persisted for it so far.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub job: BatchJob,
    pub records: Vec<ResultRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_state_round_trips_through_storage_form() {
        for state in [JobState::Pending, JobState::Running, JobState::Complete] {
            assert_eq!(JobState::from_str(state.as_ref()).unwrap(), state);
        }
        assert_eq!(JobState::Running.to_string(), "running");
    }

    #[test]
    fn test_unknown_state_rejected() {
        assert!(JobState::from_str("failed").is_err());
    }
}
