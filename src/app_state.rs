use std::sync::Arc;

use crate::services::{admission::JobAdmission, result_store::ResultStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub results: Arc<dyn ResultStore>,
    pub admission: Arc<JobAdmission>,
}

impl AppState {
    pub fn new(results: Arc<dyn ResultStore>, admission: JobAdmission) -> Self {
        Self {
            results,
            admission: Arc::new(admission),
        }
    }
}
