// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{OcrConfig, RecognitionConfig};
use crate::vision::image_utils::{annotate_results, load_image_file};
use crate::vision::model_manager::ModelManager;
use crate::vision::ocr::recognition::DEFAULT_CHARSET;
use crate::vision::ocr::{OcrError, OcrPipeline, OcrResult, SequenceDecoder, Vocabulary};

/// Arguments for the recognize command
#[derive(Args, Debug)]
pub struct RecognizeArgs {
    /// Image file to read
    pub image: PathBuf,

    /// TOML config file
    #[arg(long, env = "OCR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding text_detector.onnx and text_recognizer.onnx
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// Detection threshold (scores must exceed it)
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Regions recognized concurrently
    #[arg(long)]
    pub max_concurrent_regions: Option<usize>,

    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,

    /// Write a copy of the image with region boxes drawn
    #[arg(long, value_name = "OUT")]
    pub annotate: Option<PathBuf>,
}

pub async fn recognize(args: RecognizeArgs) -> Result<()> {
    let mut config = super::load_config(args.config.as_deref(), args.model_dir.as_ref())?;
    if let Some(threshold) = args.threshold {
        config.detection.threshold = threshold;
    }
    if let Some(n) = args.max_concurrent_regions {
        config.runtime.max_concurrent_regions = n;
    }
    config.validate()?;

    let (image, image_info) = load_image_file(&args.image)
        .with_context(|| format!("Failed to load image {}", args.image.display()))?;
    info!(
        "Loaded {}x{} {:?} image ({} bytes)",
        image_info.width, image_info.height, image_info.format, image_info.size_bytes
    );

    let pipeline = build_pipeline(&config).await?;

    let cancel_token = CancellationToken::new();
    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling OCR run");
            ctrl_c_token.cancel();
        }
    });

    let result = match pipeline.run_with_cancellation(&image, &cancel_token).await {
        Ok(result) => result,
        Err(OcrError::Cancelled) => anyhow::bail!("OCR cancelled"),
        Err(e) => return Err(e).context("OCR failed"),
    };

    if let Some(out) = &args.annotate {
        annotate_results(&image, &result.regions)
            .save(out)
            .with_context(|| format!("Failed to write annotated image {}", out.display()))?;
        info!("Annotated image written to {}", out.display());
    }

    println!("{}", render_report(&result, args.json)?);
    Ok(())
}

/// Load the model pair and wire it into a pipeline
pub async fn build_pipeline(config: &OcrConfig) -> Result<OcrPipeline> {
    let manager = ModelManager::new(&config.models, config.runtime.intra_threads)?;
    let models = manager.load().await?;
    let decoder = build_decoder(&config.recognition)?;

    info!(
        "Using models from '{}' with a {}-symbol vocabulary",
        models.source,
        decoder.vocabulary().len()
    );

    Ok(OcrPipeline::from_config(
        config,
        Arc::new(models.detector),
        Arc::new(models.recognizer),
        decoder,
    ))
}

pub fn build_decoder(config: &RecognitionConfig) -> Result<SequenceDecoder> {
    let vocabulary = match &config.dictionary_path {
        Some(path) => Vocabulary::from_dictionary_file(path, config.decode_mode)?,
        None => Vocabulary::for_mode(config.decode_mode, DEFAULT_CHARSET),
    };
    Ok(SequenceDecoder::new(vocabulary, config.decode_mode))
}

/// Text or JSON rendering of a finished run
///
/// An empty result is reported as "no text detected", distinct from failure.
pub fn render_report(result: &OcrResult, json: bool) -> Result<String> {
    if json {
        return serde_json::to_string_pretty(result).context("Failed to serialize OCR result");
    }

    if result.no_text_found() {
        return Ok(format!(
            "No text detected ({} candidate regions, {}ms)",
            result.detections_found, result.processing_time_ms
        ));
    }

    let mut report = result.numbered_text();
    report.push_str(&format!(
        "\n{} regions, average confidence {:.1}%, {}ms",
        result.regions.len(),
        result.confidence * 100.0,
        result.processing_time_ms
    ));
    if result.skipped_regions > 0 {
        report.push_str(&format!(" ({} regions skipped)", result.skipped_regions));
    }
    Ok(report)
}
