// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model handle abstraction and OCR result types

use async_trait::async_trait;
use ndarray::{Array4, ArrayD};
use serde::{Deserialize, Serialize};

use super::detection::BoundingBox;
use super::error::OcrError;

/// Inference capability for one model
///
/// Each model has exactly one named input and one named output. Handles are
/// shared read-only across pipeline runs and concurrent region calls, so
/// implementations must accept concurrent `run` calls or serialize them
/// internally.
#[async_trait]
pub trait InferenceModel: Send + Sync {
    /// Name of the model's input tensor
    fn input_name(&self) -> &str;

    /// Name of the model's output tensor
    fn output_name(&self) -> &str;

    /// Run the model on a `[1, 3, H, W]` tensor
    async fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>, OcrError>;
}

/// A recognized text region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    /// Bounding box location in original image pixels
    pub bbox: BoundingBox,
    /// Extracted text content
    pub text: String,
    /// Recognition confidence from the sequence decoder (0.0-1.0)
    pub confidence: f32,
    /// Detector score for this region (0.0-1.0)
    pub detection_confidence: f32,
}

/// Result of OCR processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    /// Full extracted text (all regions joined by newlines)
    pub text: String,
    /// Average confidence score
    pub confidence: f32,
    /// Individual text regions in discovery order
    pub regions: Vec<RecognitionResult>,
    /// Regions proposed by the detector before size filtering
    pub detections_found: usize,
    /// Regions dropped because recognition failed
    pub skipped_regions: usize,
    /// Processing time in milliseconds
    pub processing_time_ms: u64,
}

impl OcrResult {
    pub fn new(
        regions: Vec<RecognitionResult>,
        detections_found: usize,
        skipped_regions: usize,
        processing_time_ms: u64,
    ) -> Self {
        let text = regions
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let confidence = if regions.is_empty() {
            0.0
        } else {
            regions.iter().map(|r| r.confidence).sum::<f32>() / regions.len() as f32
        };

        Self {
            text,
            confidence,
            regions,
            detections_found,
            skipped_regions,
            processing_time_ms,
        }
    }

    /// Successful run that found nothing to report
    pub fn no_text_found(&self) -> bool {
        self.regions.is_empty()
    }

    /// `"1. text\n2. text\n"` listing used by the text report
    pub fn numbered_text(&self) -> String {
        self.regions
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {}\n", i + 1, r.text))
            .collect()
    }
}
