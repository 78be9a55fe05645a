use image::ImageFormat;
use reqwest::Client;
use std::io::Cursor;
use std::time::Duration;

/// Fetches a source image and re-encodes it as PNG.
///
/// Holds no state besides the HTTP client, so one instance serves any number
/// of concurrent units.
pub struct ImageProcessor {
    http: Client,
    timeout: Duration,
    max_image_bytes: usize,
}

impl ImageProcessor {
    pub fn new(timeout: Duration, max_image_bytes: usize) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(concat!("product-image-batch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            timeout,
            max_image_bytes,
        })
    }

    /// Fetch, decode and re-encode one image reference.
    pub async fn process(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let bytes = self.fetch(url).await?;

        // Decoding and encoding are CPU-bound.
        let owned_url = url.to_string();
        tokio::task::spawn_blocking(move || transcode_to_png(&owned_url, &bytes))
            .await
            .map_err(|e| ImageError::Transform {
                url: url.to_string(),
                reason: format!("transcode task failed: {e}"),
            })?
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if response
            .content_length()
            .is_some_and(|len| len > self.max_image_bytes as u64)
        {
            return Err(self.too_large(url));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.request_error(url, e))? {
            if body.len() + chunk.len() > self.max_image_bytes {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(url = %url, bytes = body.len(), "Fetched source image");
        Ok(body)
    }

    fn request_error(&self, url: &str, source: reqwest::Error) -> ImageError {
        if source.is_timeout() {
            ImageError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            ImageError::Fetch {
                url: url.to_string(),
                source,
            }
        }
    }

    fn too_large(&self, url: &str) -> ImageError {
        ImageError::TooLarge {
            url: url.to_string(),
            limit: self.max_image_bytes,
        }
    }
}

/// Decode any supported raster format and encode it as PNG.
pub fn transcode_to_png(url: &str, bytes: &[u8]) -> Result<Vec<u8>, ImageError> {
    let decoded = image::load_from_memory(bytes).map_err(|source| ImageError::Decode {
        url: url.to_string(),
        source,
    })?;

    let mut encoded = Cursor::new(Vec::new());
    decoded
        .write_to(&mut encoded, ImageFormat::Png)
        .map_err(|e| ImageError::Transform {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    Ok(encoded.into_inner())
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Fetching {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Fetching {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Image at {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("Failed to decode image from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to re-encode image from {url}: {reason}")]
    Transform { url: String, reason: String },
}

impl ImageError {
    /// Failure category recorded in result records and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ImageError::Fetch { .. }
            | ImageError::Timeout { .. }
            | ImageError::Status { .. }
            | ImageError::TooLarge { .. } => "fetch",
            ImageError::Decode { .. } => "decode",
            ImageError::Transform { .. } => "transform",
        }
    }
}
