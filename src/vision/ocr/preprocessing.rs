// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image preprocessing for the detector and recognizer

use image::{DynamicImage, GenericImageView};
use ndarray::Array4;

use super::detection::BoundingBox;
use super::error::OcrError;
use super::tensor::{Canvas, Placement, TensorCodec, DETECTION_FILL, RECOGNITION_FILL};

/// Target size for the square detector input
pub const DETECTION_INPUT_SIZE: u32 = 640;

/// Recognizer input width
pub const REC_INPUT_WIDTH: u32 = 128;

/// Recognizer input height
pub const REC_INPUT_HEIGHT: u32 = 32;

/// Letterbox parameters recorded during detection preprocessing
///
/// Maps detector-input coordinates back to original image coordinates:
/// `original = (detector - offset) / scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    /// Uniform scale applied to the original image
    pub scale: f32,
    /// Horizontal padding before the scaled image
    pub offset_x: f32,
    /// Vertical padding before the scaled image
    pub offset_y: f32,
    /// Side length of the square detector input
    pub target_size: u32,
}

impl LetterboxTransform {
    /// Compute the letterbox for an image of `width x height`
    pub fn new(width: u32, height: u32, target_size: u32) -> Result<Self, OcrError> {
        if target_size == 0 {
            return Err(OcrError::invalid_dimensions(
                target_size,
                target_size,
                "detection target size",
            ));
        }
        if width == 0 || height == 0 {
            return Err(OcrError::invalid_dimensions(width, height, "detection source image"));
        }

        let target = target_size as f32;
        let scale = (target / width as f32).min(target / height as f32);
        let scaled_width = width as f32 * scale;
        let scaled_height = height as f32 * scale;

        Ok(Self {
            scale,
            offset_x: (target - scaled_width) / 2.0,
            offset_y: (target - scaled_height) / 2.0,
            target_size,
        })
    }

    /// Identity transform for inputs that already match the detector size
    pub fn identity(target_size: u32) -> Self {
        Self {
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            target_size,
        }
    }

    /// Map a point from detector space back to original image space
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.offset_x) / self.scale, (y - self.offset_y) / self.scale)
    }

    /// Map a point from original image space into detector space
    pub fn to_detector(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale + self.offset_x, y * self.scale + self.offset_y)
    }

    /// Raster placement of the scaled image on the detector canvas
    fn placement(&self, width: u32, height: u32) -> Placement {
        let target = self.target_size;
        let scaled_width = ((width as f32 * self.scale).round() as u32).clamp(1, target);
        let scaled_height = ((height as f32 * self.scale).round() as u32).clamp(1, target);

        Placement {
            x: (self.offset_x.round() as u32).min(target - scaled_width),
            y: (self.offset_y.round() as u32).min(target - scaled_height),
            width: scaled_width,
            height: scaled_height,
        }
    }
}

/// Letterboxes images into the detector's fixed square input
#[derive(Debug, Clone)]
pub struct DetectionPreprocessor {
    codec: TensorCodec,
    target_size: u32,
}

impl Default for DetectionPreprocessor {
    fn default() -> Self {
        Self::new(TensorCodec::default(), DETECTION_INPUT_SIZE)
    }
}

impl DetectionPreprocessor {
    pub fn new(codec: TensorCodec, target_size: u32) -> Self {
        Self { codec, target_size }
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    /// Preprocess an image for text detection
    ///
    /// Steps:
    /// 1. Scale uniformly by `min(target / w, target / h)`
    /// 2. Centre on a black `target x target` canvas
    /// 3. Normalize to a `[1, 3, target, target]` tensor
    pub fn prepare(
        &self,
        image: &DynamicImage,
    ) -> Result<(Array4<f32>, LetterboxTransform), OcrError> {
        let (width, height) = image.dimensions();
        let transform = LetterboxTransform::new(width, height, self.target_size)?;

        let canvas = Canvas {
            width: self.target_size,
            height: self.target_size,
            fill: DETECTION_FILL,
        };
        let letterboxed = self.codec.resampler().resample(
            &image.to_rgb8(),
            canvas,
            transform.placement(width, height),
        );

        let tensor = self.codec.to_tensor(
            &DynamicImage::ImageRgb8(letterboxed),
            self.target_size,
            self.target_size,
        )?;

        Ok((tensor, transform))
    }
}

/// Crops detected regions into the recognizer's fixed input geometry
#[derive(Debug, Clone)]
pub struct RecognitionPreprocessor {
    codec: TensorCodec,
    target_width: u32,
    target_height: u32,
}

impl Default for RecognitionPreprocessor {
    fn default() -> Self {
        Self::new(TensorCodec::default(), REC_INPUT_WIDTH, REC_INPUT_HEIGHT)
    }
}

impl RecognitionPreprocessor {
    pub fn new(codec: TensorCodec, target_width: u32, target_height: u32) -> Self {
        Self {
            codec,
            target_width,
            target_height,
        }
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Crop `bbox` out of `image` and resample it onto a white canvas
    ///
    /// The box is snapped outward to whole pixels and clamped to the image.
    pub fn prepare(&self, image: &DynamicImage, bbox: &BoundingBox) -> Result<Array4<f32>, OcrError> {
        if self.target_width == 0 || self.target_height == 0 {
            return Err(OcrError::invalid_dimensions(
                self.target_width,
                self.target_height,
                "recognition target size",
            ));
        }

        let (img_w, img_h) = image.dimensions();
        let x1 = (bbox.x1.max(0.0).floor() as u32).min(img_w);
        let y1 = (bbox.y1.max(0.0).floor() as u32).min(img_h);
        let x2 = (bbox.x2.max(0.0).ceil() as u32).min(img_w);
        let y2 = (bbox.y2.max(0.0).ceil() as u32).min(img_h);

        if x2 <= x1 || y2 <= y1 {
            return Err(OcrError::invalid_dimensions(
                x2.saturating_sub(x1),
                y2.saturating_sub(y1),
                "recognition crop",
            ));
        }

        let crop = image.crop_imm(x1, y1, x2 - x1, y2 - y1).to_rgb8();
        let canvas = Canvas {
            width: self.target_width,
            height: self.target_height,
            fill: RECOGNITION_FILL,
        };
        let resampled = self
            .codec
            .resampler()
            .resample(&crop, canvas, Placement::full(&canvas));

        self.codec.to_tensor(
            &DynamicImage::ImageRgb8(resampled),
            self.target_width,
            self.target_height,
        )
    }
}
