// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::vision::model_manager::ModelManager;
use crate::vision::ocr::InferenceModel;

/// Arguments for the models command
#[derive(Args, Debug)]
pub struct ModelsArgs {
    /// TOML config file
    #[arg(long, env = "OCR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding text_detector.onnx and text_recognizer.onnx
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// Download missing files and load the first working source
    #[arg(long)]
    pub fetch: bool,
}

pub async fn models(args: ModelsArgs) -> Result<()> {
    let config = super::load_config(args.config.as_deref(), args.model_dir.as_ref())?;
    config.validate()?;

    let manager = ModelManager::new(&config.models, config.runtime.intra_threads)?;

    println!("Model sources (tried in order):");
    for (i, source) in manager.list_sources().iter().enumerate() {
        let status = if source.available { "✅ available" } else { "❌ missing" };
        println!("  {}. {} [{}]", i + 1, source.name, status);
        println!("     detector:   {}", source.detector);
        println!("     recognizer: {}", source.recognizer);
    }

    if args.fetch {
        let loaded = manager.load().await?;
        info!(
            "Detector input '{}', recognizer input '{}'",
            loaded.detector.input_name(),
            loaded.recognizer.input_name(),
        );
        println!("\nLoaded models from source '{}'", loaded.source);
    }

    Ok(())
}
