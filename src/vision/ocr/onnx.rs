// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! ONNX Runtime backed model handle
//!
//! Runs on CPU. The session sits behind a mutex, so concurrent `run` calls on
//! the same handle are serialized; each call executes on tokio's blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ndarray::{Array4, ArrayD};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use tracing::{debug, info};

use super::error::{ModelRole, OcrError};
use super::model::InferenceModel;

/// ONNX model loaded from disk
#[derive(Clone)]
pub struct OnnxModel {
    /// ONNX Runtime session (thread-safe)
    session: Arc<Mutex<Session>>,
    role: ModelRole,
    input_name: String,
    output_name: String,
}

impl std::fmt::Debug for OnnxModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxModel")
            .field("role", &self.role)
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .finish_non_exhaustive()
    }
}

impl OnnxModel {
    /// Load a model file
    ///
    /// # Errors
    /// Returns error if:
    /// - Model file not found
    /// - ONNX Runtime initialization fails
    /// - The model declares no inputs or outputs
    pub async fn new<P: AsRef<Path>>(
        model_path: P,
        role: ModelRole,
        intra_threads: usize,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();

        if !model_path.exists() {
            anyhow::bail!("OCR {} model not found: {}", role, model_path.display());
        }

        info!("Loading OCR {} model from {}", role, model_path.display());

        let session = Session::builder()
            .context("Failed to create session builder")?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .context("Failed to set CPU execution provider")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("Failed to set optimization level")?
            .with_intra_threads(intra_threads.max(1))
            .context("Failed to set intra threads")?
            .commit_from_file(model_path)
            .with_context(|| {
                format!(
                    "Failed to load OCR {} model from {}",
                    role,
                    model_path.display()
                )
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("Model declares no inputs")?;

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .context("Model declares no outputs")?;

        if let Some(input) = session.inputs.first() {
            debug!("{} model input type: {:?}", role, input.input_type);
        }
        debug!(
            "{} model loaded - input: {}, output: {}",
            role, input_name, output_name
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            role,
            input_name,
            output_name,
        })
    }

    pub fn role(&self) -> ModelRole {
        self.role
    }

    /// Read `name` instead of the first declared output
    pub fn with_output_name(mut self, name: &str) -> Result<Self> {
        {
            let session = self
                .session
                .lock()
                .map_err(|_| anyhow::anyhow!("ONNX session lock poisoned"))?;
            if !session.outputs.iter().any(|output| output.name == name) {
                anyhow::bail!("OCR {} model declares no output named '{}'", self.role, name);
            }
        }
        self.output_name = name.to_string();
        Ok(self)
    }
}

#[async_trait]
impl InferenceModel for OnnxModel {
    fn input_name(&self) -> &str {
        &self.input_name
    }

    fn output_name(&self) -> &str {
        &self.output_name
    }

    async fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>, OcrError> {
        let shape = input.shape();
        if shape[0] != 1 || shape[1] != 3 {
            return Err(OcrError::inference(
                self.role,
                format!("invalid input shape {:?}, expected [1, 3, H, W]", shape),
            ));
        }

        let session = Arc::clone(&self.session);
        let input_name = self.input_name.clone();
        let output_name = self.output_name.clone();
        let role = self.role;

        tokio::task::spawn_blocking(move || run_session(&session, &input_name, &output_name, input))
            .await
            .map_err(|e| OcrError::inference(role, format!("inference task failed: {}", e)))?
            .map_err(|e| OcrError::inference(role, format!("{:#}", e)))
    }
}

fn run_session(
    session: &Mutex<Session>,
    input_name: &str,
    output_name: &str,
    input: Array4<f32>,
) -> Result<ArrayD<f32>> {
    let mut session = session
        .lock()
        .map_err(|_| anyhow::anyhow!("ONNX session lock poisoned"))?;

    let input_value = Value::from_array(input).context("Failed to create input tensor")?;

    let outputs = session
        .run(ort::inputs![input_name => input_value])
        .context("Inference failed")?;

    let output_tensor = outputs
        .get(output_name)
        .with_context(|| format!("Model produced no output named '{}'", output_name))?
        .try_extract_array::<f32>()
        .context("Failed to extract output tensor")?;

    debug!("Model output shape: {:?}", output_tensor.shape());

    Ok(output_tensor.to_owned())
}
