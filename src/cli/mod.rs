// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod models;
pub mod recognize;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::OcrConfig;

/// Lite OCR CLI
#[derive(Parser, Debug)]
#[command(name = "lite-ocr")]
#[command(version)]
#[command(about = "Detect and recognize text in images with ONNX models", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run OCR on an image file
    Recognize(recognize::RecognizeArgs),

    /// List model sources, optionally downloading and loading them
    Models(models::ModelsArgs),
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Recognize(args) => recognize::recognize(args).await,
        Commands::Models(args) => models::models(args).await,
    }
}

/// Config file (or defaults) + env, then `--model-dir`
pub(crate) fn load_config(path: Option<&Path>, model_dir: Option<&PathBuf>) -> Result<OcrConfig> {
    let mut config = OcrConfig::load(path)?;
    if let Some(dir) = model_dir {
        config.use_model_dir(dir);
    }
    Ok(config)
}
