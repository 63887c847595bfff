// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vision processing: CPU OCR over ONNX models
//!
//! - `ocr` - detection + recognition pipeline
//! - `image_utils` - image decoding and result annotation
//! - `model_manager` - locating, downloading and loading the model pair

pub mod image_utils;
pub mod model_manager;
pub mod ocr;

pub use image_utils::{
    annotate_results, decode_base64_image, decode_image_bytes, detect_format, load_image_file,
    ImageError, ImageInfo,
};
pub use model_manager::{LoadedModels, ModelLocation, ModelManager, ModelSource, ModelSourceInfo};
pub use ocr::{OcrError, OcrPipeline, OcrResult};
