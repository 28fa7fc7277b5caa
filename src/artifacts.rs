//! Artifact store collaborator: fetches a named model file into local
//! storage. The production implementation pulls from the Hugging Face hub.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("authentication rejected by artifact store")]
    AuthRejected,
    #[error("artifact {repo_id}/{filename} not found")]
    NotFound { repo_id: String, filename: String },
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch `filename` from `repo_id` into `dest_dir`, returning the local
    /// path of the downloaded file.
    async fn fetch(
        &self,
        repo_id: &str,
        filename: &str,
        credential: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, ArtifactError>;
}

/// Downloads single files from the Hugging Face hub via the `resolve` URL.
pub struct HfArtifactStore {
    client: reqwest::Client,
    base_url: String,
}

impl Default for HfArtifactStore {
    fn default() -> Self {
        Self::new("https://huggingface.co")
    }
}

impl HfArtifactStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ArtifactStore for HfArtifactStore {
    async fn fetch(
        &self,
        repo_id: &str,
        filename: &str,
        credential: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, ArtifactError> {
        let url = format!("{}/{}/resolve/main/{}", self.base_url, repo_id, filename);
        tracing::info!("Downloading model from: {}", url);

        let mut request = self.client.get(&url);
        if !credential.is_empty() {
            request = request.bearer_auth(credential);
        }
        let mut response = request
            .send()
            .await
            .map_err(|e| ArtifactError::Transfer(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ArtifactError::AuthRejected);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ArtifactError::NotFound {
                repo_id: repo_id.to_string(),
                filename: filename.to_string(),
            });
        }
        if !status.is_success() {
            return Err(ArtifactError::Transfer(format!("HTTP status {}", status)));
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let output_path = dest_dir.join(filename);
        let temp_path = dest_dir.join(format!("{}.tmp", filename));

        // Write to a temp file first so a failed transfer never leaves a
        // half-written artifact under the final name.
        let mut temp_file = File::create(&temp_path).await?;
        let expected = response.content_length();
        let mut downloaded: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ArtifactError::Transfer(e.to_string()))?
        {
            temp_file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }
        temp_file.flush().await?;
        drop(temp_file);

        if let Some(expected) = expected {
            if downloaded != expected {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(ArtifactError::Transfer(format!(
                    "incomplete download: got {} bytes, expected {}",
                    downloaded, expected
                )));
            }
        }

        tokio::fs::rename(&temp_path, &output_path).await?;
        tracing::info!("Download complete: {:?} ({} bytes)", output_path, downloaded);
        Ok(output_path)
    }
}
