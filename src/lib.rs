// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod cli;
pub mod config;
pub mod vision;

pub use config::OcrConfig;
pub use vision::ocr::{InferenceModel, OcrError, OcrPipeline, OcrResult, RecognitionResult};
