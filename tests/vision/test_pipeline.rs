// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! OcrPipeline tests with scripted model handles
//!
//! The detector double returns a fixed score map; the recognizer double
//! answers each call from a script, so region order and failure recovery can
//! be checked without ONNX models on disk.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use lite_ocr::config::OcrConfig;
use lite_ocr::vision::ocr::{
    BoundingBox, DecodeMode, InferenceModel, ModelRole, OcrError, OcrPipeline, SequenceDecoder,
    Vocabulary,
};
use ndarray::{Array2, Array4, ArrayD, IxDyn};
use tokio_util::sync::CancellationToken;

/// Detector output is a full-resolution map
const MAP_SIZE: usize = 640;
/// Grid step: hot cells are addressed in units of 32 map pixels
const CELL: usize = 32;

/// `[E] a b c [B] [P]`
const VOCAB: usize = 6;
const END: usize = 0;
const A: usize = 1;
const B: usize = 2;
const C: usize = 3;

struct ScriptedDetector {
    map: ArrayD<f32>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    input_shapes: Mutex<Vec<Vec<usize>>>,
}

impl ScriptedDetector {
    fn with_hot_cells(cells: &[(usize, usize, f32)]) -> Self {
        let mut map = ArrayD::<f32>::zeros(IxDyn(&[1, 1, MAP_SIZE, MAP_SIZE]));
        for &(row, col, score) in cells {
            map[[0, 0, row * CELL, col * CELL]] = score;
        }
        Self::with_map(map)
    }

    fn with_map(map: ArrayD<f32>) -> Self {
        Self {
            map,
            delay: None,
            calls: AtomicUsize::new(0),
            input_shapes: Mutex::new(Vec::new()),
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl InferenceModel for ScriptedDetector {
    fn input_name(&self) -> &str {
        "x"
    }

    fn output_name(&self) -> &str {
        "probs"
    }

    async fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.input_shapes.lock().unwrap().push(input.shape().to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.map.clone())
    }
}

struct FailingDetector;

#[async_trait]
impl InferenceModel for FailingDetector {
    fn input_name(&self) -> &str {
        "x"
    }

    fn output_name(&self) -> &str {
        "probs"
    }

    async fn run(&self, _input: Array4<f32>) -> Result<ArrayD<f32>, OcrError> {
        Err(OcrError::inference(ModelRole::Detector, "session exploded"))
    }
}

/// One scripted answer per call, in call order
enum Reply {
    Text(Vec<usize>),
    Fail,
    Raw(ArrayD<f32>),
}

struct ScriptedRecognizer {
    replies: Vec<Reply>,
    calls: AtomicUsize,
    input_shapes: Mutex<Vec<Vec<usize>>>,
}

impl ScriptedRecognizer {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies,
            calls: AtomicUsize::new(0),
            input_shapes: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceModel for ScriptedRecognizer {
    fn input_name(&self) -> &str {
        "input"
    }

    fn output_name(&self) -> &str {
        "output"
    }

    async fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>, OcrError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.input_shapes.lock().unwrap().push(input.shape().to_vec());

        match self.replies.get(call % self.replies.len()) {
            Some(Reply::Text(symbols)) => Ok(sequence(symbols)),
            Some(Reply::Raw(output)) => Ok(output.clone()),
            Some(Reply::Fail) | None => Err(OcrError::inference(
                ModelRole::Recognizer,
                format!("scripted failure on call {}", call),
            )),
        }
    }
}

/// Grey level step between shaded regions
const SHADE_STEP: u8 = 40;

/// Answers from the crop it is given: a crop of grey level `k * SHADE_STEP`
/// reads as `texts[k]`, and darker crops take longer
struct ShadeRecognizer {
    texts: Vec<Vec<usize>>,
    step: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl InferenceModel for ShadeRecognizer {
    fn input_name(&self) -> &str {
        "input"
    }

    fn output_name(&self) -> &str {
        "output"
    }

    async fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (height, width) = (input.shape()[2], input.shape()[3]);
        let level = input[[0, 0, height / 2, width / 2]] * 255.0;
        let shade = (level / SHADE_STEP as f32).round() as usize;

        let remaining = self.texts.len().saturating_sub(shade) as u32;
        tokio::time::sleep(self.step * remaining).await;

        match self.texts.get(shade) {
            Some(symbols) => Ok(sequence(symbols)),
            None => Err(OcrError::inference(
                ModelRole::Recognizer,
                format!("no text for shade {}", shade),
            )),
        }
    }
}

/// `[1, L, VOCAB]` with 0.9 on each chosen symbol, then End
fn sequence(symbols: &[usize]) -> ArrayD<f32> {
    let rows = symbols.len() + 1;
    let rest = 0.1 / (VOCAB - 1) as f32;
    let mut out = Array2::<f32>::from_elem((rows, VOCAB), rest);
    for (t, &index) in symbols.iter().chain(std::iter::once(&END)).enumerate() {
        out[[t, index]] = 0.9;
    }
    out.insert_axis(ndarray::Axis(0)).into_dyn()
}

fn decoder() -> SequenceDecoder {
    SequenceDecoder::new(Vocabulary::autoregressive("abc"), DecodeMode::Greedy)
}

fn white_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])))
}

fn pipeline(detector: Arc<dyn InferenceModel>, recognizer: Arc<dyn InferenceModel>) -> OcrPipeline {
    OcrPipeline::new(detector, recognizer, decoder())
}

#[tokio::test]
async fn test_blank_image_yields_empty_result_without_recognition() {
    let detector = Arc::new(ScriptedDetector::with_hot_cells(&[]));
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![Reply::Text(vec![A])]));
    let ocr = pipeline(detector.clone(), recognizer.clone());

    let result = ocr.run(&white_image(100, 100)).await.unwrap();

    assert!(result.regions.is_empty());
    assert!(result.no_text_found());
    assert_eq!(result.detections_found, 0);
    assert_eq!(recognizer.calls(), 0);
    assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        detector.input_shapes.lock().unwrap()[0],
        vec![1, 3, 640, 640]
    );
}

#[tokio::test]
async fn test_single_hot_cell_maps_to_region() {
    let detector = Arc::new(ScriptedDetector::with_hot_cells(&[(1, 1, 0.9)]));
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![Reply::Text(vec![A, B])]));
    let ocr = pipeline(detector, recognizer.clone());

    let result = ocr.run(&white_image(640, 640)).await.unwrap();

    assert_eq!(result.regions.len(), 1);
    let region = &result.regions[0];
    assert_eq!(region.bbox, BoundingBox::new(32.0, 32.0, 64.0, 64.0));
    assert_eq!(region.text, "ab");
    assert!((region.confidence - 0.9).abs() < 1e-5);
    assert_eq!(result.text, "ab");
    assert_eq!(
        recognizer.input_shapes.lock().unwrap()[0],
        vec![1, 3, 32, 128]
    );
}

#[tokio::test]
async fn test_threshold_is_exclusive() {
    let detector = Arc::new(ScriptedDetector::with_hot_cells(&[(2, 2, 0.3), (4, 4, 0.31)]));
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![Reply::Text(vec![C])]));
    let ocr = pipeline(detector, recognizer.clone());

    let result = ocr.run(&white_image(640, 640)).await.unwrap();

    assert_eq!(result.detections_found, 1);
    assert_eq!(result.regions[0].bbox, BoundingBox::new(128.0, 128.0, 160.0, 160.0));
    assert_eq!(recognizer.calls(), 1);
}

#[tokio::test]
async fn test_small_region_is_not_recognized() {
    // 160x160 letterboxes at scale 4: one cell covers 8x8 original pixels
    let detector = Arc::new(ScriptedDetector::with_hot_cells(&[(0, 0, 0.9)]));
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![Reply::Text(vec![A])]));
    let ocr = pipeline(detector, recognizer.clone());

    let result = ocr.run(&white_image(160, 160)).await.unwrap();

    assert_eq!(result.detections_found, 1);
    assert!(result.regions.is_empty());
    assert_eq!(recognizer.calls(), 0);
}

#[tokio::test]
async fn test_failed_region_is_skipped_and_order_kept() {
    let detector = Arc::new(ScriptedDetector::with_hot_cells(&[
        (10, 3, 0.8),
        (1, 1, 0.9),
        (1, 5, 0.7),
    ]));
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![
        Reply::Text(vec![A]),
        Reply::Fail,
        Reply::Text(vec![C]),
    ]));
    let ocr = pipeline(detector, recognizer.clone());

    let result = ocr.run(&white_image(640, 640)).await.unwrap();

    assert_eq!(recognizer.calls(), 3);
    assert_eq!(result.skipped_regions, 1);
    assert_eq!(result.regions.len(), 2);
    // Row-major discovery: (1,1), (1,5), (10,3); the second one failed
    assert_eq!(result.regions[0].text, "a");
    assert_eq!(result.regions[0].bbox, BoundingBox::new(32.0, 32.0, 64.0, 64.0));
    assert_eq!(result.regions[1].text, "c");
    assert_eq!(result.regions[1].bbox, BoundingBox::new(96.0, 320.0, 128.0, 352.0));
    assert_eq!(result.text, "a\nc");
}

#[tokio::test]
async fn test_vocabulary_mismatch_drops_only_that_region() {
    let detector = Arc::new(ScriptedDetector::with_hot_cells(&[(1, 1, 0.9), (1, 5, 0.9)]));
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![
        Reply::Raw(ArrayD::zeros(IxDyn(&[1, 4, VOCAB + 1]))),
        Reply::Text(vec![B, B]),
    ]));
    let ocr = pipeline(detector, recognizer);

    let result = ocr.run(&white_image(640, 640)).await.unwrap();

    assert_eq!(result.skipped_regions, 1);
    assert_eq!(result.regions.len(), 1);
    assert_eq!(result.regions[0].text, "bb");
}

#[tokio::test]
async fn test_concurrent_regions_keep_discovery_order() {
    let cells: Vec<(usize, usize, f32)> = (0..4).map(|i| (2, 2 + 4 * i, 0.9)).collect();
    let detector = Arc::new(ScriptedDetector::with_hot_cells(&cells));

    // Region i covers x 64+128i..96+128i, y 64..96 and is painted shade i
    let mut canvas = RgbImage::from_pixel(640, 640, Rgb([255, 255, 255]));
    for i in 0..4u32 {
        let level = SHADE_STEP * i as u8;
        for y in 64..96 {
            for x in (64 + 128 * i)..(96 + 128 * i) {
                canvas.put_pixel(x, y, Rgb([level, level, level]));
            }
        }
    }

    let recognizer = Arc::new(ShadeRecognizer {
        texts: vec![vec![A], vec![B], vec![C], vec![A, A]],
        step: Duration::from_millis(10),
        calls: AtomicUsize::new(0),
    });
    let ocr = pipeline(detector, recognizer.clone()).with_max_concurrent_regions(4);

    let result = ocr.run(&DynamicImage::ImageRgb8(canvas)).await.unwrap();

    // Leftmost regions finish last, yet each box keeps its own text in discovery order
    let pairs: Vec<(f32, &str)> = result
        .regions
        .iter()
        .map(|r| (r.bbox.x1, r.text.as_str()))
        .collect();
    assert_eq!(
        pairs,
        vec![(64.0, "a"), (192.0, "b"), (320.0, "c"), (448.0, "aa")]
    );
    assert_eq!(result.text, "a\nb\nc\naa");
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_region_reports_detector_and_decoder_confidence() {
    let detector = Arc::new(ScriptedDetector::with_hot_cells(&[(1, 1, 0.35)]));
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![Reply::Text(vec![A])]));
    let ocr = pipeline(detector, recognizer);

    let result = ocr.run(&white_image(640, 640)).await.unwrap();

    assert_eq!(result.regions.len(), 1);
    let region = &result.regions[0];
    assert!((region.confidence - 0.9).abs() < 1e-5);
    assert!((region.detection_confidence - 0.35).abs() < 1e-6);
}

#[tokio::test]
async fn test_repeated_runs_are_identical() {
    let detector = Arc::new(ScriptedDetector::with_hot_cells(&[(3, 3, 0.9), (7, 9, 0.6)]));
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![Reply::Text(vec![B, C])]));
    let ocr = pipeline(detector, recognizer);
    let image = white_image(500, 300);

    let first = ocr.run(&image).await.unwrap();
    let second = ocr.run(&image).await.unwrap();

    assert_eq!(first.regions, second.regions);
    assert_eq!(first.text, second.text);
    assert_eq!(first.detections_found, second.detections_found);
}

#[tokio::test]
async fn test_detector_failure_aborts_run() {
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![Reply::Text(vec![A])]));
    let ocr = pipeline(Arc::new(FailingDetector), recognizer.clone());

    let err = ocr.run(&white_image(64, 64)).await.unwrap_err();

    assert!(matches!(
        err,
        OcrError::InferenceFailure {
            stage: ModelRole::Detector,
            ..
        }
    ));
    assert_eq!(recognizer.calls(), 0);
}

#[tokio::test]
async fn test_unusable_detector_shape_aborts_run() {
    let detector = Arc::new(ScriptedDetector::with_map(ArrayD::zeros(IxDyn(&[1, 2, 3, 4, 5]))));
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![Reply::Text(vec![A])]));
    let ocr = pipeline(detector, recognizer);

    let err = ocr.run(&white_image(64, 64)).await.unwrap_err();
    assert!(matches!(
        err,
        OcrError::InferenceFailure {
            stage: ModelRole::Detector,
            ..
        }
    ));
}

#[tokio::test]
async fn test_zero_sized_image_is_invalid() {
    let detector = Arc::new(ScriptedDetector::with_hot_cells(&[]));
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![Reply::Text(vec![A])]));
    let ocr = pipeline(detector.clone(), recognizer);

    let err = ocr.run(&white_image(0, 10)).await.unwrap_err();
    assert!(matches!(err, OcrError::InvalidDimensions { .. }));
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancellation_abandons_run() {
    let detector = Arc::new(
        ScriptedDetector::with_hot_cells(&[(1, 1, 0.9)]).slow(Duration::from_secs(30)),
    );
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![Reply::Text(vec![A])]));
    let ocr = pipeline(detector, recognizer.clone());

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = ocr
        .run_with_cancellation(&white_image(640, 640), &token)
        .await
        .unwrap_err();

    assert!(matches!(err, OcrError::Cancelled));
    assert_eq!(recognizer.calls(), 0);
}

#[tokio::test]
async fn test_already_cancelled_token_skips_detection() {
    let detector = Arc::new(ScriptedDetector::with_hot_cells(&[(1, 1, 0.9)]));
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![Reply::Text(vec![A])]));
    let ocr = pipeline(detector.clone(), recognizer);

    let token = CancellationToken::new();
    token.cancel();

    let err = ocr
        .run_with_cancellation(&white_image(640, 640), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, OcrError::Cancelled));
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_uncancelled_run_completes() {
    let detector = Arc::new(ScriptedDetector::with_hot_cells(&[(1, 1, 0.9)]));
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![Reply::Text(vec![C, A, B])]));
    let ocr = pipeline(detector, recognizer);

    let result = ocr
        .run_with_cancellation(&white_image(640, 640), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.text, "cab");
}

#[tokio::test]
async fn test_pipeline_from_config() {
    let mut config = OcrConfig::default();
    config.detection.threshold = 0.85;
    config.runtime.max_concurrent_regions = 2;

    let detector = Arc::new(ScriptedDetector::with_hot_cells(&[(1, 1, 0.9), (5, 5, 0.8)]));
    let recognizer = Arc::new(ScriptedRecognizer::new(vec![Reply::Text(vec![A])]));
    let ocr = OcrPipeline::from_config(&config, detector, recognizer, decoder());

    let result = ocr.run(&white_image(640, 640)).await.unwrap();
    assert_eq!(result.detections_found, 1);
    assert_eq!(result.regions[0].bbox, BoundingBox::new(32.0, 32.0, 64.0, 64.0));
}
