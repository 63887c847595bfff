// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Two-stage OCR: text detection followed by per-region recognition
//!
//! Components:
//! - `tensor` - image to `[1, 3, H, W]` tensor conversion and output views
//! - `preprocessing` - letterbox for the detector, crop + canvas for the recognizer
//! - `detection` - turning the detector's probability map into boxes
//! - `recognition` - decoding per-position distributions into text
//! - `model` - model handle trait and result types
//! - `onnx` - ONNX Runtime model handle
//! - `pipeline` - the orchestrator

pub mod detection;
pub mod error;
pub mod model;
pub mod onnx;
pub mod pipeline;
pub mod preprocessing;
pub mod recognition;
pub mod tensor;

pub use detection::{BoundingBox, Detection, ExtractionStrategy, RegionExtractor};
pub use error::{ModelRole, OcrError};
pub use model::{InferenceModel, OcrResult, RecognitionResult};
pub use onnx::OnnxModel;
pub use pipeline::OcrPipeline;
pub use preprocessing::{DetectionPreprocessor, LetterboxTransform, RecognitionPreprocessor};
pub use recognition::{DecodeMode, DecodedText, SequenceDecoder, Vocabulary};
pub use tensor::{ScoreGrid, TensorCodec};
