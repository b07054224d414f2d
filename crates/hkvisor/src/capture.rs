//! Still-image capture from the camera's snapshot endpoint.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::CameraConfig;

/// Snapshot endpoint, relative to the camera's address.
pub const SNAPSHOT_PATH: &str = "/Streaming/channels/1/picture";

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("camera answered {0}")]
    Status(reqwest::StatusCode),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Source of the still image attached to a notification.
#[async_trait]
pub trait ImageCapture: Send + Sync + 'static {
    /// Grab a frame from `camera` and return where it was stored.
    async fn capture(&self, camera: &CameraConfig) -> anyhow::Result<PathBuf>;
}

/// File-system safe form of a camera name: whitespace and path separators
/// become underscores.
pub fn camera_safe_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_whitespace() || c == '/' || c == '\\' {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Deterministic snapshot location for a camera.
pub fn snapshot_path(dir: &Path, camera_name: &str) -> PathBuf {
    dir.join(format!("{}.jpg", camera_safe_name(camera_name)))
}

/// Fetches `GET /Streaming/channels/1/picture` and writes the bytes verbatim.
pub struct HttpSnapshotCapture {
    client: reqwest::Client,
    dir: PathBuf,
}

impl HttpSnapshotCapture {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, dir))
    }

    pub fn with_client(client: reqwest::Client, dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            dir: dir.into(),
        }
    }

    async fn fetch(&self, camera: &CameraConfig) -> Result<PathBuf, CaptureError> {
        let url = format!("http://{}{}", camera.ip_address, SNAPSHOT_PATH);
        let response = self
            .client
            .get(&url)
            .basic_auth(&camera.username, Some(&camera.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CaptureError::Status(status));
        }

        let bytes = response.bytes().await?;
        let path = snapshot_path(&self.dir, &camera.name);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| CaptureError::Write {
                path: path.clone(),
                source,
            })?;

        log::debug!(
            "[{}] Snapshot saved to {} ({} bytes)",
            camera.name,
            path.display(),
            bytes.len()
        );
        Ok(path)
    }
}

#[async_trait]
impl ImageCapture for HttpSnapshotCapture {
    async fn capture(&self, camera: &CameraConfig) -> anyhow::Result<PathBuf> {
        Ok(self.fetch(camera).await?)
    }
}
