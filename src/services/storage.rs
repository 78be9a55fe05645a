use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const PNG_CONTENT_TYPE: &str = "image/png";
const MAX_STEM_LEN: usize = 64;

/// Sink for processed images. Returns a locator clients can use to reach the
/// stored object.
#[async_trait]
pub trait OutputStore: Send + Sync {
    async fn save(&self, key: &str, data: &[u8]) -> Result<String, StorageError>;
}

/// Object key for a processed image: `{job_id}/{serial_number}/{stem}-{digest}.png`.
///
/// The digest is derived from the full input reference, so two references
/// sharing a file name under the same serial number still get distinct keys.
pub fn output_key(job_id: Uuid, serial_number: i64, input_url: &str) -> String {
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_URL, input_url.as_bytes())
        .simple()
        .to_string();
    format!(
        "{job_id}/{serial_number}/{}-{}.png",
        file_stem(input_url),
        &digest[..12]
    )
}

fn file_stem(input_url: &str) -> String {
    let path = reqwest::Url::parse(input_url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| input_url.to_string());
    let name = path.rsplit('/').next().unwrap_or_default();
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);

    let sanitized: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_STEM_LEN)
        .collect();

    if sanitized.is_empty() {
        "image".to_string()
    } else {
        sanitized
    }
}

fn public_locator(base_url: &str, key: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), key)
}

/// Writes images below a directory on the local filesystem.
pub struct LocalOutputStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalOutputStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl OutputStore for LocalOutputStore {
    async fn save(&self, key: &str, data: &[u8]) -> Result<String, StorageError> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write then rename so readers never see a partial file.
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        Ok(match &self.public_base_url {
            Some(base) => public_locator(base, key),
            None => path.to_string_lossy().into_owned(),
        })
    }
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2OutputStore {
    bucket: Box<Bucket>,
    locator_base: String,
}

impl R2OutputStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_base_url: Option<String>,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let locator_base = public_base_url.unwrap_or_else(|| {
            format!("{}/{}", endpoint.trim_end_matches('/'), bucket_name)
        });

        Ok(Self {
            bucket,
            locator_base,
        })
    }
}

#[async_trait]
impl OutputStore for R2OutputStore {
    async fn save(&self, key: &str, data: &[u8]) -> Result<String, StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, PNG_CONTENT_TYPE)
            .await
            .map_err(StorageError::S3)?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(StorageError::Status(status));
        }

        Ok(public_locator(&self.locator_base, key))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object store rejected upload with HTTP {0}")]
    Status(u16),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
