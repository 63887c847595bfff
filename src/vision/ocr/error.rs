// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Error types for the OCR pipeline
//!
//! - `InvalidDimensions` and detector-stage `InferenceFailure` abort a run
//! - recognizer-stage failures and `DecodeShapeMismatch` only drop one region
//! - `Cancelled` is returned when a run is superseded before it completes

use std::fmt;

use thiserror::Error;

/// Which model an inference failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    /// Text detection model (probability map)
    Detector,
    /// Text recognition model (per-position character distributions)
    Recognizer,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRole::Detector => write!(f, "detector"),
            ModelRole::Recognizer => write!(f, "recognizer"),
        }
    }
}

/// Errors raised by the OCR core
#[derive(Error, Debug)]
pub enum OcrError {
    /// A target geometry or source region has a zero dimension
    #[error("Invalid dimensions: {width}x{height} ({context})")]
    InvalidDimensions {
        width: u32,
        height: u32,
        context: &'static str,
    },

    /// A model call errored or returned a tensor of unusable shape
    #[error("{stage} inference failed: {message}")]
    InferenceFailure { stage: ModelRole, message: String },

    /// Recognizer output does not match the configured vocabulary
    #[error("Decode shape mismatch: expected vocabulary of {expected} symbols, got {actual}")]
    DecodeShapeMismatch { expected: usize, actual: usize },

    /// The run was cancelled before producing a final result
    #[error("OCR run cancelled")]
    Cancelled,
}

impl OcrError {
    pub fn inference(stage: ModelRole, message: impl Into<String>) -> Self {
        OcrError::InferenceFailure {
            stage,
            message: message.into(),
        }
    }

    pub fn invalid_dimensions(width: u32, height: u32, context: &'static str) -> Self {
        OcrError::InvalidDimensions {
            width,
            height,
            context,
        }
    }
}
