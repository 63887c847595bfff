// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! OCR configuration
//!
//! Resolution order: built-in defaults, then an optional TOML file, then
//! environment variables, then CLI flags (applied by the caller).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::vision::model_manager::ModelSource;
use crate::vision::ocr::detection::{DEFAULT_GRID_STEP, DEFAULT_THRESHOLD};
use crate::vision::ocr::pipeline::MIN_REGION_SIZE;
use crate::vision::ocr::preprocessing::{DETECTION_INPUT_SIZE, REC_INPUT_HEIGHT, REC_INPUT_WIDTH};
use crate::vision::ocr::{DecodeMode, ExtractionStrategy};

pub const ENV_DETECTION_THRESHOLD: &str = "OCR_DETECTION_THRESHOLD";
pub const ENV_MAX_CONCURRENT_REGIONS: &str = "OCR_MAX_CONCURRENT_REGIONS";
pub const ENV_MODEL_DIR: &str = "OCR_MODEL_DIR";

/// Top-level OCR configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub detection: DetectionConfig,
    pub recognition: RecognitionConfig,
    pub runtime: RuntimeConfig,
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Square detector input edge in pixels
    pub input_size: u32,
    /// Score a cell must strictly exceed to become a region
    pub threshold: f32,
    /// Detector pixels per score cell
    pub grid_step: u32,
    pub strategy: ExtractionStrategy,
    /// Smallest connected component kept, in score cells
    pub min_component_area: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            input_size: DETECTION_INPUT_SIZE,
            threshold: DEFAULT_THRESHOLD,
            grid_step: DEFAULT_GRID_STEP,
            strategy: ExtractionStrategy::Grid,
            min_component_area: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub input_width: u32,
    pub input_height: u32,
    /// Regions narrower or shorter than this are not recognized
    pub min_region_size: f32,
    pub decode_mode: DecodeMode,
    /// One symbol per line; the built-in charset is used when unset
    pub dictionary_path: Option<PathBuf>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            input_width: REC_INPUT_WIDTH,
            input_height: REC_INPUT_HEIGHT,
            min_region_size: MIN_REGION_SIZE,
            decode_mode: DecodeMode::Greedy,
            dictionary_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Regions recognized at once within a single run
    pub max_concurrent_regions: usize,
    /// ONNX Runtime intra-op threads per session
    pub intra_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_regions: 1,
            intra_threads: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Where remote model files are downloaded to
    pub cache_dir: PathBuf,
    /// Tried in order; the first source where both models load wins
    pub sources: Vec<ModelSource>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./models/cache"),
            sources: ModelSource::defaults(),
        }
    }
}

impl OcrConfig {
    /// Parse a TOML config file; missing keys fall back to defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: OcrConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!("Loaded OCR config from {}", path.display());
        Ok(config)
    }

    /// Defaults or `path`, with environment overrides applied
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key/value lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_DETECTION_THRESHOLD) {
            self.detection.threshold = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_DETECTION_THRESHOLD, value))?;
        }

        if let Some(value) = lookup(ENV_MAX_CONCURRENT_REGIONS) {
            self.runtime.max_concurrent_regions = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_MAX_CONCURRENT_REGIONS, value))?;
        }

        if let Some(dir) = lookup(ENV_MODEL_DIR) {
            self.use_model_dir(dir);
        }

        Ok(())
    }

    /// Try `dir/text_detector.onnx` + `dir/text_recognizer.onnx` before any
    /// configured source
    pub fn use_model_dir<P: AsRef<Path>>(&mut self, dir: P) {
        let source = ModelSource::from_dir(dir.as_ref());
        self.models.sources.retain(|s| s.name != source.name);
        self.models.sources.insert(0, source);
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if d.input_size == 0 {
            bail!("detection.input_size must be greater than 0");
        }
        if !(0.0..=1.0).contains(&d.threshold) {
            bail!("detection.threshold must be within [0, 1], got {}", d.threshold);
        }
        if d.grid_step == 0 {
            bail!("detection.grid_step must be greater than 0");
        }

        let r = &self.recognition;
        if r.input_width == 0 || r.input_height == 0 {
            bail!(
                "recognition input size must be non-zero, got {}x{}",
                r.input_width,
                r.input_height
            );
        }
        if r.min_region_size < 0.0 {
            bail!("recognition.min_region_size must not be negative");
        }

        if self.runtime.max_concurrent_regions == 0 {
            bail!("runtime.max_concurrent_regions must be at least 1");
        }
        if self.models.sources.is_empty() {
            bail!("models.sources must list at least one model source");
        }

        Ok(())
    }
}
