//! Test helper utilities: a local image server, a recording notifier and a
//! fully wired in-memory pipeline.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

use product_image_batch::{
    app_state::AppState,
    models::batch::JobStatusResponse,
    models::job::{BatchJob, JobSnapshot, ResultRecord},
    services::{
        admission::JobAdmission,
        fetch::ImageProcessor,
        notifier::{Notifier, NotifyError},
        result_store::{InMemoryResultStore, ResultStore, StoreError},
        storage::LocalOutputStore,
        worker::JobWorker,
    },
};

use crate::fixtures;

pub const SLOW_RESPONSE: Duration = Duration::from_secs(5);

/// Request counters of an [`ImageServer`].
#[derive(Default)]
pub struct ServerStats {
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub requests: AtomicUsize,
}

/// Local HTTP server standing in for remote image hosts.
///
/// - `/images/{name}`: a JPEG when `name` ends in `.jpg`, otherwise a PNG
/// - `/garbage/{name}`: 200 with a body that is not an image
/// - `/slow/{name}`: a PNG after [`SLOW_RESPONSE`]
/// - `/counted/{name}`: a PNG after 100 ms, tracking concurrent requests
/// - anything else: 404
pub struct ImageServer {
    pub base_url: String,
    pub stats: Arc<ServerStats>,
}

impl ImageServer {
    pub async fn start() -> Self {
        let stats = Arc::new(ServerStats::default());
        let app = Router::new()
            .route("/images/{name}", get(serve_image))
            .route(
                "/garbage/{name}",
                get(|| async { "<html>definitely not an image</html>" }),
            )
            .route("/slow/{name}", get(slow_image))
            .route("/counted/{name}", get(counted_image))
            .with_state(stats.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind image server");
        let addr = listener.local_addr().expect("No local address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Image server error");
        });

        Self {
            base_url: format!("http://{addr}"),
            stats,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn image_response(name: &str) -> Response {
    let bytes = if name.ends_with(".jpg") {
        fixtures::jpeg_bytes()
    } else {
        fixtures::png_bytes()
    };
    ([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response()
}

async fn serve_image(Path(name): Path<String>) -> Response {
    image_response(&name)
}

async fn slow_image(Path(name): Path<String>) -> Response {
    sleep(SLOW_RESPONSE).await;
    image_response(&name)
}

async fn counted_image(State(stats): State<Arc<ServerStats>>, Path(name): Path<String>) -> Response {
    stats.requests.fetch_add(1, Ordering::SeqCst);
    let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
    sleep(Duration::from_millis(100)).await;
    stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    image_response(&name)
}

/// Notifier that records every job id it is called with.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<Uuid>>,
    fail: bool,
}

impl RecordingNotifier {
    /// A notifier whose endpoint always answers 503.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls_for(&self, job_id: Uuid) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| **id == job_id)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, job_id: Uuid) -> Result<(), NotifyError> {
        self.calls.lock().unwrap().push(job_id);
        if self.fail {
            return Err(NotifyError::Status(503));
        }
        Ok(())
    }
}

/// Faults injected by a [`FlakyResultStore`].
#[derive(Debug, Default, Clone)]
pub struct StoreFaults {
    /// The next N appends fail once each
    pub transient_appends: usize,
    /// Appends for this input reference always fail
    pub broken_input: Option<String>,
    /// `mark_running` always fails
    pub fail_start: bool,
}

/// In-memory store that fails writes on demand.
pub struct FlakyResultStore {
    inner: Arc<InMemoryResultStore>,
    transient_appends: AtomicUsize,
    broken_input: Option<String>,
    fail_start: bool,
    pub failed_appends: AtomicUsize,
    pub failed_starts: AtomicUsize,
}

impl FlakyResultStore {
    pub fn new(inner: Arc<InMemoryResultStore>, faults: StoreFaults) -> Self {
        Self {
            inner,
            transient_appends: AtomicUsize::new(faults.transient_appends),
            broken_input: faults.broken_input,
            fail_start: faults.fail_start,
            failed_appends: AtomicUsize::new(0),
            failed_starts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ResultStore for FlakyResultStore {
    async fn create_job(&self, job_id: Uuid, total_images: i32) -> Result<BatchJob, StoreError> {
        self.inner.create_job(job_id, total_images).await
    }

    async fn mark_running(&self, job_id: Uuid) -> Result<bool, StoreError> {
        if self.fail_start {
            self.failed_starts.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Corrupt("connection reset".to_string()));
        }
        self.inner.mark_running(job_id).await
    }

    async fn mark_complete(&self, job_id: Uuid) -> Result<bool, StoreError> {
        self.inner.mark_complete(job_id).await
    }

    async fn append(&self, record: &ResultRecord) -> Result<(), StoreError> {
        if self.broken_input.as_deref() == Some(record.input_image_url.as_str()) {
            self.failed_appends.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Corrupt("write rejected".to_string()));
        }
        let transient = self
            .transient_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient {
            self.failed_appends.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Corrupt("connection reset".to_string()));
        }
        self.inner.append(record).await
    }

    async fn query_by_job(&self, job_id: Uuid) -> Result<Option<JobSnapshot>, StoreError> {
        self.inner.query_by_job(job_id).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

/// Admission, worker and stores wired together in memory.
pub struct TestPipeline {
    pub admission: Arc<JobAdmission>,
    pub results: Arc<InMemoryResultStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub output_dir: tempfile::TempDir,
}

impl TestPipeline {
    pub fn new(fetch_timeout: Duration, max_concurrent_fetches: usize) -> Self {
        let results = Arc::new(InMemoryResultStore::new());
        Self::assemble(
            fetch_timeout,
            max_concurrent_fetches,
            results.clone(),
            results,
            RecordingNotifier::default(),
        )
    }

    /// Pipeline whose completion webhook always fails.
    pub fn with_failing_notifier(fetch_timeout: Duration, max_concurrent_fetches: usize) -> Self {
        let results = Arc::new(InMemoryResultStore::new());
        Self::assemble(
            fetch_timeout,
            max_concurrent_fetches,
            results.clone(),
            results,
            RecordingNotifier::failing(),
        )
    }

    /// Pipeline writing through a [`FlakyResultStore`]. `results` still
    /// reads the underlying in-memory store.
    pub fn with_flaky_store(
        fetch_timeout: Duration,
        max_concurrent_fetches: usize,
        faults: StoreFaults,
    ) -> (Self, Arc<FlakyResultStore>) {
        let results = Arc::new(InMemoryResultStore::new());
        let flaky = Arc::new(FlakyResultStore::new(results.clone(), faults));
        let pipeline = Self::assemble(
            fetch_timeout,
            max_concurrent_fetches,
            flaky.clone(),
            results,
            RecordingNotifier::default(),
        );
        (pipeline, flaky)
    }

    fn assemble(
        fetch_timeout: Duration,
        max_concurrent_fetches: usize,
        store: Arc<dyn ResultStore>,
        results: Arc<InMemoryResultStore>,
        notifier: RecordingNotifier,
    ) -> Self {
        let output_dir = tempfile::tempdir().expect("Failed to create output dir");
        let outputs = Arc::new(LocalOutputStore::new(output_dir.path(), None));
        let processor = Arc::new(
            ImageProcessor::new(fetch_timeout, 5 * 1024 * 1024).expect("Failed to build client"),
        );
        let notifier = Arc::new(notifier);

        let worker = JobWorker::new(
            store.clone(),
            outputs,
            processor,
            notifier.clone(),
            max_concurrent_fetches,
        );
        let admission = Arc::new(JobAdmission::new(store, worker));

        Self {
            admission,
            results,
            notifier,
            output_dir,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            results: self.results.clone(),
            admission: self.admission.clone(),
        }
    }
}

/// Poll GET /api/v1/jobs/{job_id} until the job is complete (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: &str,
    timeout_secs: u64,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 20; // Poll every 50ms

    for _ in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/jobs/{}", base_url, job_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<JobStatusResponse>().await?;
        match status_response.status.as_str() {
            "complete" => return Ok(status_response),
            "processing" => sleep(Duration::from_millis(50)).await,
            other => return Err(format!("Unknown job status: {}", other).into()),
        }
    }

    Err(format!("Job did not complete within {} seconds", timeout_secs).into())
}

/// Serve the API router on an ephemeral local port, returning its base URL
pub async fn spawn_api(state: AppState) -> String {
    let app = product_image_batch::routes::api_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind API server");
    let addr = listener.local_addr().expect("No local address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("API server error");
    });
    format!("http://{addr}")
}
