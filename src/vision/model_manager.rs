// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! OCR model manager: resolves and loads the detector/recognizer pair
//!
//! Sources are tried in order. A source location is either a local path or
//! an `http(s)://` URL; remote files are downloaded once into the cache
//! directory and reused afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::ModelsConfig;
use crate::vision::ocr::{ModelRole, OnnxModel};

pub const DETECTOR_FILENAME: &str = "text_detector.onnx";
pub const RECOGNIZER_FILENAME: &str = "text_recognizer.onnx";

const RELEASE_BASE_URL: &str = "https://github.com/s4na/yomitoku-demo/releases/download/models-v1";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// One place the detector/recognizer pair can come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSource {
    pub name: String,
    /// Local path or URL of the detection model
    pub detector: String,
    /// Local path or URL of the recognition model
    pub recognizer: String,
    /// Expected hex SHA-256 of the detector file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognizer_sha256: Option<String>,
}

impl ModelSource {
    pub fn new(
        name: impl Into<String>,
        detector: impl Into<String>,
        recognizer: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            detector: detector.into(),
            recognizer: recognizer.into(),
            detector_sha256: None,
            recognizer_sha256: None,
        }
    }

    /// Both models under `dir` with their standard file names
    pub fn from_dir(dir: &Path) -> Self {
        Self::new(
            "model-dir",
            dir.join(DETECTOR_FILENAME).to_string_lossy(),
            dir.join(RECOGNIZER_FILENAME).to_string_lossy(),
        )
    }

    /// `./models` first, then the published release assets
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "local",
                format!("./models/{}", DETECTOR_FILENAME),
                format!("./models/{}", RECOGNIZER_FILENAME),
            ),
            Self::new(
                "github-release",
                format!("{}/{}", RELEASE_BASE_URL, DETECTOR_FILENAME),
                format!("{}/{}", RELEASE_BASE_URL, RECOGNIZER_FILENAME),
            ),
        ]
    }
}

/// Where a model file lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelLocation {
    Local(PathBuf),
    Remote(String),
}

impl ModelLocation {
    pub fn parse(location: &str) -> Self {
        if location.starts_with("https://") || location.starts_with("http://") {
            ModelLocation::Remote(location.to_string())
        } else {
            ModelLocation::Local(PathBuf::from(location))
        }
    }
}

/// Availability summary for one configured source
#[derive(Debug, Clone, Serialize)]
pub struct ModelSourceInfo {
    pub name: String,
    pub detector: String,
    pub recognizer: String,
    /// Both files are on disk (locally or in the download cache)
    pub available: bool,
}

/// The loaded pair and the source it came from
#[derive(Debug, Clone)]
pub struct LoadedModels {
    pub source: String,
    pub detector: OnnxModel,
    pub recognizer: OnnxModel,
}

pub struct ModelManager {
    sources: Vec<ModelSource>,
    cache_dir: PathBuf,
    intra_threads: usize,
    client: reqwest::Client,
}

impl ModelManager {
    pub fn new(config: &ModelsConfig, intra_threads: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            sources: config.sources.clone(),
            cache_dir: config.cache_dir.clone(),
            intra_threads,
            client,
        })
    }

    pub fn sources(&self) -> &[ModelSource] {
        &self.sources
    }

    /// Try each source in order until both models load
    ///
    /// # Errors
    /// Returns an error naming every attempted source when none loads.
    pub async fn load(&self) -> Result<LoadedModels> {
        let mut failures = Vec::new();

        for source in &self.sources {
            match self.load_source(source).await {
                Ok(models) => {
                    info!("✅ OCR models loaded from source '{}'", source.name);
                    return Ok(models);
                }
                Err(e) => {
                    warn!("⚠️ OCR model source '{}' failed: {:#}", source.name, e);
                    failures.push(format!("{}: {:#}", source.name, e));
                }
            }
        }

        if failures.is_empty() {
            bail!("No OCR model sources configured");
        }
        bail!(
            "Failed to load OCR models from any source:\n  - {}",
            failures.join("\n  - ")
        )
    }

    /// Report which sources are usable without touching the network
    pub fn list_sources(&self) -> Vec<ModelSourceInfo> {
        self.sources
            .iter()
            .map(|source| {
                let available = [&source.detector, &source.recognizer]
                    .iter()
                    .all(|location| self.on_disk(source, location).is_some());
                ModelSourceInfo {
                    name: source.name.clone(),
                    detector: source.detector.clone(),
                    recognizer: source.recognizer.clone(),
                    available,
                }
            })
            .collect()
    }

    async fn load_source(&self, source: &ModelSource) -> Result<LoadedModels> {
        let detector_path = self
            .resolve(source, &source.detector, source.detector_sha256.as_deref())
            .await
            .context("detector")?;
        let recognizer_path = self
            .resolve(source, &source.recognizer, source.recognizer_sha256.as_deref())
            .await
            .context("recognizer")?;

        let detector = OnnxModel::new(&detector_path, ModelRole::Detector, self.intra_threads).await?;
        let recognizer =
            OnnxModel::new(&recognizer_path, ModelRole::Recognizer, self.intra_threads).await?;

        Ok(LoadedModels {
            source: source.name.clone(),
            detector,
            recognizer,
        })
    }

    /// Local path for a model file, downloading it first if remote
    pub async fn resolve(
        &self,
        source: &ModelSource,
        location: &str,
        expected_sha256: Option<&str>,
    ) -> Result<PathBuf> {
        match ModelLocation::parse(location) {
            ModelLocation::Local(path) => {
                if !path.is_file() {
                    bail!("model file not found: {}", path.display());
                }
                if let Some(expected) = expected_sha256 {
                    verify_checksum(&path, expected).await?;
                }
                Ok(path)
            }
            ModelLocation::Remote(url) => {
                let path = self.cache_path(source, &url);
                if is_non_empty(&path).await {
                    match expected_sha256 {
                        None => {
                            debug!("Using cached model {}", path.display());
                            return Ok(path);
                        }
                        Some(expected) => match verify_checksum(&path, expected).await {
                            Ok(()) => return Ok(path),
                            Err(e) => warn!("Cached model is stale, downloading again: {}", e),
                        },
                    }
                }

                self.download(&url, &path, expected_sha256).await?;
                Ok(path)
            }
        }
    }

    fn on_disk(&self, source: &ModelSource, location: &str) -> Option<PathBuf> {
        let path = match ModelLocation::parse(location) {
            ModelLocation::Local(path) => path,
            ModelLocation::Remote(url) => self.cache_path(source, &url),
        };
        let non_empty = std::fs::metadata(&path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        non_empty.then_some(path)
    }

    /// `<cache_dir>/<source name>/<last URL segment>`
    ///
    /// Both components are sanitized, so the result always stays inside the
    /// cache directory.
    pub fn cache_path(&self, source: &ModelSource, url: &str) -> PathBuf {
        let filename = url
            .split(['?', '#'])
            .next()
            .and_then(|u| u.rsplit('/').next())
            .unwrap_or_default();
        self.cache_dir
            .join(cache_component(&source.name, "source"))
            .join(cache_component(filename, "model.onnx"))
    }

    async fn download(&self, url: &str, path: &Path, expected_sha256: Option<&str>) -> Result<()> {
        info!("Downloading OCR model from {}", url);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create cache directory {}", parent.display()))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            bail!("Download failed with status {}: {}", response.status(), url);
        }
        debug!("Download size: {:?} bytes", response.content_length());

        let temp_path = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;
            file.write_all(&chunk)
                .await
                .context("Failed to write to temp file")?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
        }

        file.flush().await.context("Failed to flush temp file")?;
        drop(file);

        if downloaded == 0 {
            tokio::fs::remove_file(&temp_path).await.ok();
            bail!("Downloaded model is empty: {}", url);
        }

        let hash = hex::encode(hasher.finalize());
        if let Some(expected) = expected_sha256 {
            if !hash.eq_ignore_ascii_case(expected) {
                tokio::fs::remove_file(&temp_path).await.ok();
                bail!("Checksum mismatch for {}: expected {}, got {}", url, expected, hash);
            }
        }

        tokio::fs::rename(&temp_path, path)
            .await
            .context("Failed to move downloaded file to final location")?;

        info!("Downloaded {} bytes to {}", downloaded, path.display());
        Ok(())
    }
}

/// Single path component made of `[A-Za-z0-9._-]`, never `.` or `..`
fn cache_component(raw: &str, fallback: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.chars().all(|c| c == '.') {
        fallback.to_string()
    } else {
        cleaned
    }
}

async fn is_non_empty(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Hex SHA-256 of a file
pub async fn file_sha256(path: &Path) -> Result<String> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(&data)))
}

async fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    let actual = file_sha256(path).await?;
    if !actual.eq_ignore_ascii_case(expected) {
        bail!(
            "Checksum mismatch for {}: expected {}, got {}",
            path.display(),
            expected,
            actual
        );
    }
    Ok(())
}
