use serde::Deserialize;

/// Where processed images are written.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputBackend {
    Local,
    R2,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Upper bound on pooled PostgreSQL connections
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// Output store backend: "local" or "r2"
    #[serde(default = "default_output_backend")]
    pub output_backend: OutputBackend,

    /// Root directory for the local output backend
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Public URL prefix for stored images; locators fall back to paths when unset
    pub public_base_url: Option<String>,

    /// R2 bucket name
    pub r2_bucket: Option<String>,

    /// R2 endpoint URL
    pub r2_endpoint: Option<String>,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: Option<String>,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: Option<String>,

    /// Endpoint notified when a job completes
    pub webhook_url: Option<String>,

    /// Concurrent image fetches per job
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,

    /// Largest source image accepted, in bytes
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_max_connections() -> u32 {
    20
}

fn default_output_backend() -> OutputBackend {
    OutputBackend::Local
}

fn default_output_dir() -> String {
    "processed_images".to_string()
}

fn default_max_concurrent_fetches() -> usize {
    8
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_notify_timeout_secs() -> u64 {
    10
}

fn default_max_image_bytes() -> usize {
    20 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
