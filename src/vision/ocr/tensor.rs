// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Tensor encoding and decoding for the OCR models
//!
//! Images go in as `[1, 3, H, W]` float tensors with each channel scaled to
//! `[0, 1]`. Raw model outputs come back out as a 2D score grid (detector) or a
//! `[sequence, vocabulary]` distribution matrix (recognizer).

use std::fmt;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use ndarray::{Array2, Array4, ArrayD};

use super::error::{ModelRole, OcrError};

/// Black canvas used behind letterboxed detector input
pub const DETECTION_FILL: Rgb<u8> = Rgb([0, 0, 0]);

/// White canvas used behind recognizer crops
pub const RECOGNITION_FILL: Rgb<u8> = Rgb([255, 255, 255]);

/// Canvas that a resampled image is drawn onto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub fill: Rgb<u8>,
}

/// Destination rectangle on a canvas, in canvas pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Placement {
    /// Placement covering the whole canvas
    pub fn full(canvas: &Canvas) -> Self {
        Self {
            x: 0,
            y: 0,
            width: canvas.width,
            height: canvas.height,
        }
    }
}

/// Pixel sampling capability used by every preprocessing stage
///
/// Implementations scale `image` to the placement size and draw it onto a
/// canvas pre-filled with the canvas colour. Parts of the placement that fall
/// outside the canvas are clipped.
pub trait Resample: Send + Sync + fmt::Debug {
    fn resample(&self, image: &RgbImage, canvas: Canvas, placement: Placement) -> RgbImage;
}

/// `Resample` backed by the `image` crate's resize filters
#[derive(Debug, Clone, Copy)]
pub struct ImageResampler {
    filter: FilterType,
}

impl ImageResampler {
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl Default for ImageResampler {
    fn default() -> Self {
        Self::new(FilterType::Triangle)
    }
}

impl Resample for ImageResampler {
    fn resample(&self, image: &RgbImage, canvas: Canvas, placement: Placement) -> RgbImage {
        let mut output = RgbImage::from_pixel(canvas.width, canvas.height, canvas.fill);
        if placement.width == 0 || placement.height == 0 || image.width() == 0 || image.height() == 0
        {
            return output;
        }

        if image.dimensions() == (placement.width, placement.height) {
            imageops::overlay(&mut output, image, placement.x as i64, placement.y as i64);
        } else {
            let resized = imageops::resize(image, placement.width, placement.height, self.filter);
            imageops::overlay(&mut output, &resized, placement.x as i64, placement.y as i64);
        }

        output
    }
}

/// Converts images into normalized model input tensors
#[derive(Debug, Clone)]
pub struct TensorCodec {
    resampler: Arc<dyn Resample>,
}

impl Default for TensorCodec {
    fn default() -> Self {
        Self::new(Arc::new(ImageResampler::default()))
    }
}

impl TensorCodec {
    pub fn new(resampler: Arc<dyn Resample>) -> Self {
        Self { resampler }
    }

    pub fn resampler(&self) -> &dyn Resample {
        self.resampler.as_ref()
    }

    /// Sample `image` into a `target_width x target_height` tensor `[1, 3, H, W]`
    ///
    /// Each of R, G and B becomes one plane with values `pixel / 255.0`. Alpha is
    /// dropped.
    pub fn to_tensor(
        &self,
        image: &DynamicImage,
        target_width: u32,
        target_height: u32,
    ) -> Result<Array4<f32>, OcrError> {
        if target_width == 0 || target_height == 0 {
            return Err(OcrError::invalid_dimensions(
                target_width,
                target_height,
                "tensor target size",
            ));
        }

        let rgb = image.to_rgb8();
        let canvas = Canvas {
            width: target_width,
            height: target_height,
            fill: DETECTION_FILL,
        };
        let sampled = if rgb.dimensions() == (target_width, target_height) {
            rgb
        } else {
            self.resampler
                .resample(&rgb, canvas, Placement::full(&canvas))
        };

        Ok(rgb_to_tensor(&sampled))
    }
}

/// Write an RGB raster into NCHW planes scaled to `[0, 1]`
pub fn rgb_to_tensor(rgb: &RgbImage) -> Array4<f32> {
    let (width, height) = rgb.dimensions();
    let mut tensor = Array4::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }

    tensor
}

/// Detector probability map, indexed `[row, column]`
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreGrid {
    scores: Array2<f32>,
}

impl ScoreGrid {
    pub fn new(scores: Array2<f32>) -> Self {
        Self { scores }
    }

    pub fn height(&self) -> usize {
        self.scores.nrows()
    }

    pub fn width(&self) -> usize {
        self.scores.ncols()
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.scores[[row, col]]
    }

    pub fn scores(&self) -> &Array2<f32> {
        &self.scores
    }
}

/// Interpret detector output as a score grid
///
/// Accepted shapes: `[1, 1, H, W]`, `[1, H, W]` and `[H, W]`.
pub fn score_grid(output: &ArrayD<f32>) -> Result<ScoreGrid, OcrError> {
    let shape = output.shape();
    let (height, width) = match shape {
        [1, 1, h, w] | [1, h, w] | [h, w] => (*h, *w),
        _ => {
            return Err(OcrError::inference(
                ModelRole::Detector,
                format!("unexpected output shape {:?}, expected [1, 1, H, W]", shape),
            ))
        }
    };

    if height == 0 || width == 0 {
        return Err(OcrError::inference(
            ModelRole::Detector,
            format!("empty score map {:?}", shape),
        ));
    }

    let scores = Array2::from_shape_vec((height, width), output.iter().copied().collect())
        .map_err(|e| OcrError::inference(ModelRole::Detector, e.to_string()))?;

    Ok(ScoreGrid::new(scores))
}

/// Interpret recognizer output as `[sequence_length, vocabulary_size]`
///
/// Accepted shapes: `[L, V]` and `[1, L, V]`.
pub fn sequence_distribution(output: &ArrayD<f32>) -> Result<Array2<f32>, OcrError> {
    let shape = output.shape();
    let (length, vocabulary) = match shape {
        [1, l, v] | [l, v] => (*l, *v),
        _ => {
            return Err(OcrError::inference(
                ModelRole::Recognizer,
                format!("unexpected output shape {:?}, expected [L, V]", shape),
            ))
        }
    };

    Array2::from_shape_vec((length, vocabulary), output.iter().copied().collect())
        .map_err(|e| OcrError::inference(ModelRole::Recognizer, e.to_string()))
}
