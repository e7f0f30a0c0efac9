//! HuggingFace Hub downloader
//!
//! Fetches model files (config, tokenizer, safetensors weights) from the Hub
//! into the local model cache, authenticating with the configured token.

use crate::storage::StorageError;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

const HUB_URL: &str = "https://huggingface.co";

/// A model repository on the Hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubRepo {
    pub repo_id: String,
    pub revision: String,
}

fn sanitize_local_filename(filename: &str) -> Result<String, StorageError> {
    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return Err(StorageError::InvalidRepo("empty file name".to_string()));
    }

    let no_leading = trimmed.trim_start_matches('/');
    let flattened = no_leading.replace('\\', "/").replace('/', "__");

    let mut sanitized = String::with_capacity(flattened.len());
    for ch in flattened.chars() {
        let invalid = matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*');
        if invalid || ch.is_control() {
            sanitized.push('_');
        } else {
            sanitized.push(ch);
        }
    }

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() {
        return Err(StorageError::InvalidRepo(filename.to_string()));
    }

    Ok(sanitized)
}

impl HubRepo {
    /// Parse a repo id or Hub URL
    ///
    /// Accepted forms:
    /// 1. `org/name`
    /// 2. `https://huggingface.co/org/name`
    /// 3. `https://huggingface.co/org/name/tree/<revision>`
    ///
    /// `default_revision` is used when the URL does not name one.
    pub fn parse(model: &str, default_revision: &str) -> Result<Self, StorageError> {
        let model = model.trim();
        let model = model.split('?').next().unwrap_or(model);
        let model = model.split('#').next().unwrap_or(model);

        let path = model
            .trim_start_matches("https://huggingface.co/")
            .trim_start_matches("http://huggingface.co/")
            .trim_end_matches('/');

        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 {
            return Err(StorageError::InvalidRepo(model.to_string()));
        }

        let repo_id = format!("{}/{}", parts[0], parts[1]);
        let revision = match parts.iter().position(|&p| p == "tree" || p == "blob" || p == "resolve") {
            Some(pos) if parts.len() > pos + 1 => parts[pos + 1].to_string(),
            _ => default_revision.to_string(),
        };

        Ok(Self { repo_id, revision })
    }

    /// Build the download URL for a file in this repo
    pub fn download_url(&self, filename: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            HUB_URL, self.repo_id, self.revision, filename
        )
    }

    /// Directory holding this repo's files inside the cache root
    pub fn cache_dir(&self, root: &Path) -> Result<PathBuf, StorageError> {
        let repo_dir = format!("models--{}", self.repo_id.replace('/', "--"));
        Ok(root
            .join(sanitize_local_filename(&repo_dir)?)
            .join(sanitize_local_filename(&self.revision)?))
    }
}

/// Authenticated Hub client writing into a cache directory
#[derive(Debug, Clone)]
pub struct HubClient {
    client: reqwest::Client,
    token: Option<String>,
    cache_dir: PathBuf,
}

impl HubClient {
    pub fn new(cache_dir: impl Into<PathBuf>, token: Option<String>) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(3600)) // 1 hour timeout for large weights
            .build()?;
        Ok(Self {
            client,
            token,
            cache_dir: cache_dir.into(),
        })
    }

    /// Local path a repo file is (or will be) cached at
    pub fn cached_path(&self, repo: &HubRepo, filename: &str) -> Result<PathBuf, StorageError> {
        Ok(repo
            .cache_dir(&self.cache_dir)?
            .join(sanitize_local_filename(filename)?))
    }

    /// Download a file unless it is already cached, returning its local path
    pub async fn fetch(&self, repo: &HubRepo, filename: &str) -> Result<PathBuf, StorageError> {
        let output_path = self.cached_path(repo, filename)?;

        if output_path.exists() && fs::metadata(&output_path)?.len() > 0 {
            tracing::debug!("Using cached {:?}", output_path);
            return Ok(output_path);
        }

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut temp_name = output_path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let url = repo.download_url(filename);
        tracing::info!("Downloading from: {}", url);

        let mut request = self
            .client
            .get(&url)
            .header("User-Agent", concat!("textgen-server/", env!("CARGO_PKG_VERSION")));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let mut response = request.send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(format!("{}/{}", repo.repo_id, filename)));
        }
        if !response.status().is_success() {
            return Err(StorageError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let expected = response.content_length();
        if let Some(total) = expected {
            tracing::info!("{}: {}", filename, format_size(total));
        }

        let mut temp_file = File::create(&temp_path).await?;
        let mut downloaded: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            temp_file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }
        temp_file.flush().await?;

        if let Some(expected) = expected {
            if downloaded != expected {
                return Err(StorageError::Incomplete {
                    got: downloaded,
                    expected,
                });
            }
        }

        // Rename temp file to final location (atomic operation)
        fs::rename(&temp_path, &output_path)?;
        tracing::info!("Download complete: {:?}", output_path);

        Ok(output_path)
    }

    /// Download every safetensors file of a repo
    ///
    /// Sharded checkpoints are resolved through `model.safetensors.index.json`;
    /// repos without an index are expected to ship a single `model.safetensors`.
    pub async fn fetch_weights(&self, repo: &HubRepo) -> Result<Vec<PathBuf>, StorageError> {
        match self.fetch(repo, "model.safetensors.index.json").await {
            Ok(index_path) => {
                let index = fs::read_to_string(&index_path)?;
                let mut paths = Vec::new();
                for filename in weight_files_from_index(&index)? {
                    paths.push(self.fetch(repo, &filename).await?);
                }
                Ok(paths)
            }
            Err(StorageError::NotFound(_)) => {
                Ok(vec![self.fetch(repo, "model.safetensors").await?])
            }
            Err(e) => Err(e),
        }
    }
}

/// Distinct shard file names listed in a safetensors index, in order
pub fn weight_files_from_index(index_json: &str) -> Result<Vec<String>, StorageError> {
    let index: serde_json::Value = serde_json::from_str(index_json)?;
    let weight_map = index
        .get("weight_map")
        .and_then(|m| m.as_object())
        .ok_or_else(|| StorageError::InvalidRepo("index has no weight_map".to_string()))?;

    let files: BTreeSet<String> = weight_map
        .values()
        .filter_map(|v| v.as_str())
        .map(str::to_string)
        .collect();
    Ok(files.into_iter().collect())
}

/// Get a human-readable size string
pub fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{} B", bytes as u64)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}
