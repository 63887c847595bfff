// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! End-to-end OCR pipeline
//!
//! detect -> extract regions -> (per region) crop, recognize, decode.
//! A failure on one region drops that region only; detector failures abort
//! the run.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use image::{DynamicImage, GenericImageView};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::detection::{Detection, RegionExtractor};
use super::error::{ModelRole, OcrError};
use super::model::{InferenceModel, OcrResult, RecognitionResult};
use super::preprocessing::{DetectionPreprocessor, RecognitionPreprocessor};
use super::recognition::SequenceDecoder;
use super::tensor::{score_grid, TensorCodec};
use crate::config::OcrConfig;

/// Regions narrower or shorter than this (in original pixels) are not recognized
pub const MIN_REGION_SIZE: f32 = 10.0;

/// Orchestrates detection and per-region recognition
///
/// The model handles are injected at construction and shared read-only.
pub struct OcrPipeline {
    detector: Arc<dyn InferenceModel>,
    recognizer: Arc<dyn InferenceModel>,
    detection: DetectionPreprocessor,
    extractor: RegionExtractor,
    recognition: RecognitionPreprocessor,
    decoder: SequenceDecoder,
    min_region_size: f32,
    max_concurrent_regions: usize,
}

impl std::fmt::Debug for OcrPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrPipeline")
            .field("detector_input", &self.detector.input_name())
            .field("recognizer_input", &self.recognizer.input_name())
            .field("extractor", &self.extractor)
            .field("min_region_size", &self.min_region_size)
            .field("max_concurrent_regions", &self.max_concurrent_regions)
            .finish_non_exhaustive()
    }
}

impl OcrPipeline {
    /// Pipeline with default geometry (640 detector, 128x32 recognizer)
    pub fn new(
        detector: Arc<dyn InferenceModel>,
        recognizer: Arc<dyn InferenceModel>,
        decoder: SequenceDecoder,
    ) -> Self {
        Self {
            detector,
            recognizer,
            detection: DetectionPreprocessor::default(),
            extractor: RegionExtractor::default(),
            recognition: RecognitionPreprocessor::default(),
            decoder,
            min_region_size: MIN_REGION_SIZE,
            max_concurrent_regions: 1,
        }
    }

    /// Pipeline configured from `config`
    pub fn from_config(
        config: &OcrConfig,
        detector: Arc<dyn InferenceModel>,
        recognizer: Arc<dyn InferenceModel>,
        decoder: SequenceDecoder,
    ) -> Self {
        let codec = TensorCodec::default();
        let detection_cfg = &config.detection;
        let recognition_cfg = &config.recognition;

        Self {
            detector,
            recognizer,
            detection: DetectionPreprocessor::new(codec.clone(), detection_cfg.input_size),
            extractor: RegionExtractor::default()
                .with_threshold(detection_cfg.threshold)
                .with_grid_step(detection_cfg.grid_step)
                .with_strategy(detection_cfg.strategy)
                .with_min_component_area(detection_cfg.min_component_area),
            recognition: RecognitionPreprocessor::new(
                codec,
                recognition_cfg.input_width,
                recognition_cfg.input_height,
            ),
            decoder,
            min_region_size: recognition_cfg.min_region_size,
            max_concurrent_regions: config.runtime.max_concurrent_regions.max(1),
        }
    }

    pub fn with_extractor(mut self, extractor: RegionExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Recognize up to `n` regions at once; results keep discovery order
    pub fn with_max_concurrent_regions(mut self, n: usize) -> Self {
        self.max_concurrent_regions = n.max(1);
        self
    }

    pub fn with_min_region_size(mut self, size: f32) -> Self {
        self.min_region_size = size.max(0.0);
        self
    }

    /// Run OCR on one image
    ///
    /// An empty `regions` list is a successful "no text found" outcome; errors
    /// mean the run itself failed.
    pub async fn run(&self, image: &DynamicImage) -> Result<OcrResult, OcrError> {
        let start = Instant::now();
        let (width, height) = image.dimensions();

        let detections = self.detect(image).await?;
        let detections_found = detections.len();

        if detections.is_empty() {
            info!("No text regions detected in {}x{} image", width, height);
            return Ok(OcrResult::new(
                vec![],
                0,
                0,
                start.elapsed().as_millis() as u64,
            ));
        }

        let candidates: Vec<Detection> = detections
            .into_iter()
            .filter(|d| d.bbox.meets_min_size(self.min_region_size))
            .collect();
        debug!(
            "{} of {} regions meet the {}px minimum",
            candidates.len(),
            detections_found,
            self.min_region_size
        );

        let outcomes: Vec<(usize, Result<RecognitionResult, OcrError>)> =
            stream::iter(candidates.into_iter().enumerate())
                .map(|(index, detection)| async move {
                    (index, self.recognize_region(image, &detection).await)
                })
                .buffered(self.max_concurrent_regions)
                .collect()
                .await;

        let mut regions = Vec::with_capacity(outcomes.len());
        let mut skipped_regions = 0;
        for (index, outcome) in outcomes {
            match outcome {
                Ok(region) => regions.push(region),
                Err(e) => {
                    warn!(region = index, error = %e, "Skipping region after recognition failure");
                    skipped_regions += 1;
                }
            }
        }

        let result = OcrResult::new(
            regions,
            detections_found,
            skipped_regions,
            start.elapsed().as_millis() as u64,
        );

        info!(
            "OCR complete: {} regions, {} skipped, {:.2} confidence, {}ms",
            result.regions.len(),
            result.skipped_regions,
            result.confidence,
            result.processing_time_ms
        );

        Ok(result)
    }

    /// Run OCR, abandoning it as soon as `cancel_token` fires
    ///
    /// Pending inference futures are dropped and no partial result is
    /// returned.
    pub async fn run_with_cancellation(
        &self,
        image: &DynamicImage,
        cancel_token: &CancellationToken,
    ) -> Result<OcrResult, OcrError> {
        if cancel_token.is_cancelled() {
            return Err(OcrError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                warn!("OCR run cancelled");
                Err(OcrError::Cancelled)
            }
            result = self.run(image) => result,
        }
    }

    /// Detection stage: letterbox, detector call, region extraction
    pub async fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, OcrError> {
        let (width, height) = image.dimensions();
        let (tensor, transform) = self.detection.prepare(image)?;

        let output = self.detector.run(tensor).await.map_err(|e| match e {
            OcrError::InferenceFailure { message, .. } => {
                OcrError::inference(ModelRole::Detector, message)
            }
            other => other,
        })?;
        debug!("Detection output shape: {:?}", output.shape());

        let grid = score_grid(&output)?;
        Ok(self.extractor.extract(&grid, &transform, width, height))
    }

    async fn recognize_region(
        &self,
        image: &DynamicImage,
        detection: &Detection,
    ) -> Result<RecognitionResult, OcrError> {
        let tensor = self.recognition.prepare(image, &detection.bbox)?;
        let output = self.recognizer.run(tensor).await?;
        let decoded = self.decoder.decode(&output)?;

        Ok(RecognitionResult {
            bbox: detection.bbox,
            text: decoded.text,
            confidence: decoded.confidence,
            detection_confidence: detection.confidence,
        })
    }
}
