// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Text region extraction from the detector's probability map
//!
//! Two strategies share one output contract (boxes in original image
//! coordinates, one confidence per box, row-major discovery order):
//! - `Grid` samples the top-left score of each `grid_step` cell
//! - `ConnectedComponents` labels the thresholded map and boxes each component

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::preprocessing::LetterboxTransform;
use super::tensor::ScoreGrid;

/// Default score threshold (exclusive)
pub const DEFAULT_THRESHOLD: f32 = 0.3;

/// Default grid cell size in score-map cells
pub const DEFAULT_GRID_STEP: u32 = 32;

/// Axis-aligned box in original image pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Check if this box has positive extent on both axes
    pub fn is_valid(&self) -> bool {
        self.x2 > self.x1 && self.y2 > self.y1
    }

    /// Whether both sides are at least `min_size` pixels
    pub fn meets_min_size(&self, min_size: f32) -> bool {
        self.width() >= min_size && self.height() >= min_size
    }
}

/// A candidate text region with its detector confidence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Detection confidence score (0.0-1.0)
    pub confidence: f32,
}

/// How candidate regions are pulled out of the score map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Coarse non-overlapping cell scan, no merging of neighbours
    #[default]
    Grid,
    /// 8-connected components of the thresholded map
    ConnectedComponents,
}

/// Converts a detector score grid into detections in original coordinates
#[derive(Debug, Clone)]
pub struct RegionExtractor {
    threshold: f32,
    grid_step: u32,
    strategy: ExtractionStrategy,
    min_component_area: u32,
}

impl Default for RegionExtractor {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            grid_step: DEFAULT_GRID_STEP,
            strategy: ExtractionStrategy::Grid,
            min_component_area: 1,
        }
    }
}

impl RegionExtractor {
    /// Set the score threshold; a score must be strictly greater to count
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_grid_step(mut self, grid_step: u32) -> Self {
        self.grid_step = grid_step.max(1);
        self
    }

    pub fn with_strategy(mut self, strategy: ExtractionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Components with fewer pixels than this are dropped
    pub fn with_min_component_area(mut self, area: u32) -> Self {
        self.min_component_area = area.max(1);
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn strategy(&self) -> ExtractionStrategy {
        self.strategy
    }

    /// Extract detections from `grid`, mapped back through `transform`
    ///
    /// Returns an empty vector when nothing exceeds the threshold.
    pub fn extract(
        &self,
        grid: &ScoreGrid,
        transform: &LetterboxTransform,
        original_width: u32,
        original_height: u32,
    ) -> Vec<Detection> {
        let mapper = BoxMapper::new(grid, transform, original_width, original_height);

        let detections = match self.strategy {
            ExtractionStrategy::Grid => self.scan_grid(grid, &mapper),
            ExtractionStrategy::ConnectedComponents => self.label_components(grid, &mapper),
        };

        debug!(
            "Extracted {} regions ({:?}, threshold {})",
            detections.len(),
            self.strategy,
            self.threshold
        );

        detections
    }

    fn scan_grid(&self, grid: &ScoreGrid, mapper: &BoxMapper) -> Vec<Detection> {
        let step = self.grid_step as usize;
        let mut detections = Vec::new();

        for y in (0..grid.height()).step_by(step) {
            for x in (0..grid.width()).step_by(step) {
                let score = grid.get(y, x);
                if score > self.threshold {
                    if let Some(bbox) = mapper.map(x, y, x + step, y + step) {
                        detections.push(Detection {
                            bbox,
                            confidence: score.min(1.0),
                        });
                    }
                }
            }
        }

        detections
    }

    fn label_components(&self, grid: &ScoreGrid, mapper: &BoxMapper) -> Vec<Detection> {
        let mask = GrayImage::from_fn(grid.width() as u32, grid.height() as u32, |x, y| {
            if grid.get(y as usize, x as usize) > self.threshold {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        });
        let labeled = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

        // Components in order of their first pixel in a row-major scan
        let mut order: Vec<u32> = Vec::new();
        let mut stats: Vec<Option<ComponentStats>> = Vec::new();

        for (x, y, label) in labeled.enumerate_pixels() {
            let label = label[0];
            if label == 0 {
                continue;
            }
            let index = label as usize;
            if stats.len() <= index {
                stats.resize(index + 1, None);
            }
            let score = grid.get(y as usize, x as usize);
            if let Some(component) = &mut stats[index] {
                component.add(x as usize, y as usize, score);
                continue;
            }
            stats[index] = Some(ComponentStats::new(x as usize, y as usize, score));
            order.push(label);
        }

        order
            .into_iter()
            .filter_map(|label| stats[label as usize])
            .filter(|c| c.count >= self.min_component_area as usize)
            .filter_map(|c| {
                mapper
                    .map(c.min_x, c.min_y, c.max_x + 1, c.max_y + 1)
                    .map(|bbox| Detection {
                        bbox,
                        confidence: (c.sum / c.count as f32).clamp(0.0, 1.0),
                    })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct ComponentStats {
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
    count: usize,
    sum: f32,
}

impl ComponentStats {
    fn new(x: usize, y: usize, score: f32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            count: 1,
            sum: score,
        }
    }

    fn add(&mut self, x: usize, y: usize, score: f32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.count += 1;
        self.sum += score;
    }
}

/// Maps score-grid cell ranges to clamped original-image boxes
struct BoxMapper<'a> {
    transform: &'a LetterboxTransform,
    cell_width: f32,
    cell_height: f32,
    max_x: f32,
    max_y: f32,
}

impl<'a> BoxMapper<'a> {
    fn new(
        grid: &ScoreGrid,
        transform: &'a LetterboxTransform,
        original_width: u32,
        original_height: u32,
    ) -> Self {
        let target = transform.target_size as f32;
        Self {
            transform,
            cell_width: target / grid.width().max(1) as f32,
            cell_height: target / grid.height().max(1) as f32,
            max_x: original_width as f32,
            max_y: original_height as f32,
        }
    }

    /// Map grid cells `[x0, x1) x [y0, y1)` to a box, `None` if it collapses
    fn map(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> Option<BoundingBox> {
        let (left, top) = self
            .transform
            .to_original(x0 as f32 * self.cell_width, y0 as f32 * self.cell_height);
        let (right, bottom) = self
            .transform
            .to_original(x1 as f32 * self.cell_width, y1 as f32 * self.cell_height);

        let bbox = BoundingBox {
            x1: left.max(0.0),
            y1: top.max(0.0),
            x2: right.min(self.max_x),
            y2: bottom.min(self.max_y),
        };

        bbox.is_valid().then_some(bbox)
    }
}
