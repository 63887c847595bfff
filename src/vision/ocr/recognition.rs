// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Sequence decoding of recognizer output
//!
//! The recognizer emits one distribution over a fixed vocabulary per output
//! position. Decoding is greedy: the most probable symbol wins at every
//! position, independently of its neighbours.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{Array2, ArrayD, ArrayView1};
use serde::{Deserialize, Serialize};

use super::error::OcrError;
use super::tensor::sequence_distribution;

/// Allowed drift of a row sum from 1.0 for output already in probability form
const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

/// Built-in charset: hiragana, digits, ASCII letters and space
pub const DEFAULT_CHARSET: &str = "あいうえおかきくけこさしすせそたちつてとなにぬねのはひふへほまみむめもやゆよらりるれろわをん0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ ";

/// One vocabulary entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// End of sequence: decoding stops here
    End,
    /// CTC blank: separates repeats, never emitted
    Blank,
    /// Padding / begin tokens: skipped, never emitted
    Pad,
    Char(char),
}

/// How per-position argmaxes are turned into text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Autoregressive layout `[E] + charset + [B] + [P]`, stops at `[E]`
    #[default]
    Greedy,
    /// CTC layout `[blank] + charset`, collapses repeats
    Ctc,
}

/// Fixed symbol table matching the recognizer's output dimension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    symbols: Vec<Symbol>,
}

impl Vocabulary {
    /// `[E] + charset + [B] + [P]`
    pub fn autoregressive(charset: &str) -> Self {
        let mut symbols = vec![Symbol::End];
        symbols.extend(charset.chars().map(Symbol::Char));
        symbols.push(Symbol::Pad);
        symbols.push(Symbol::Pad);
        Self { symbols }
    }

    /// `[blank] + charset`
    pub fn ctc(charset: &str) -> Self {
        let mut symbols = vec![Symbol::Blank];
        symbols.extend(charset.chars().map(Symbol::Char));
        Self { symbols }
    }

    pub fn for_mode(mode: DecodeMode, charset: &str) -> Self {
        match mode {
            DecodeMode::Greedy => Self::autoregressive(charset),
            DecodeMode::Ctc => Self::ctc(charset),
        }
    }

    /// Load a charset from a dictionary file
    ///
    /// Each line in the file contains one character. Empty lines are read as a
    /// space.
    pub fn from_dictionary_file<P: AsRef<Path>>(path: P, mode: DecodeMode) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open dictionary: {}", path.display()))?;

        let mut charset = String::new();
        for line in BufReader::new(file).lines() {
            let line = line.context("Failed to read dictionary line")?;
            charset.push(line.chars().next().unwrap_or(' '));
        }

        if charset.is_empty() {
            anyhow::bail!("Dictionary is empty: {}", path.display());
        }

        Ok(Self::for_mode(mode, &charset))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbol(&self, index: usize) -> Option<Symbol> {
        self.symbols.get(index).copied()
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::autoregressive(DEFAULT_CHARSET)
    }
}

/// Decoded text with confidence score
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedText {
    pub text: String,
    /// Mean probability of the consumed positions (0.0-1.0)
    pub confidence: f32,
    /// Per-character probabilities, aligned with `text.chars()`
    pub char_confidences: Vec<f32>,
}

/// Greedy decoder over a fixed vocabulary
#[derive(Debug, Clone)]
pub struct SequenceDecoder {
    vocabulary: Vocabulary,
    mode: DecodeMode,
}

impl Default for SequenceDecoder {
    fn default() -> Self {
        Self::new(Vocabulary::default(), DecodeMode::Greedy)
    }
}

impl SequenceDecoder {
    pub fn new(vocabulary: Vocabulary, mode: DecodeMode) -> Self {
        Self { vocabulary, mode }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn mode(&self) -> DecodeMode {
        self.mode
    }

    /// Decode recognizer output shaped `[L, V]` or `[1, L, V]`
    ///
    /// Fails with `DecodeShapeMismatch` when `V` differs from the vocabulary
    /// size. The whole tensor is read either as probabilities or as logits:
    /// it counts as probabilities only if every row lies in `[0, 1]` and sums
    /// to 1, otherwise every row is softmax-normalized.
    pub fn decode(&self, output: &ArrayD<f32>) -> Result<DecodedText, OcrError> {
        let distribution = to_probabilities(sequence_distribution(output)?);
        let actual = distribution.ncols();
        if actual != self.vocabulary.len() {
            return Err(OcrError::DecodeShapeMismatch {
                expected: self.vocabulary.len(),
                actual,
            });
        }

        let mut text = String::new();
        let mut char_confidences = Vec::new();
        let mut consumed = Vec::new();
        let mut prev_index: Option<usize> = None;

        for row in distribution.rows() {
            let (index, prob) = argmax(row);
            let symbol = self.vocabulary.symbol(index).unwrap_or(Symbol::Pad);

            match (self.mode, symbol) {
                (_, Symbol::End) => {
                    consumed.push(prob);
                    break;
                }
                (DecodeMode::Greedy, Symbol::Char(ch)) => {
                    text.push(ch);
                    char_confidences.push(prob);
                    consumed.push(prob);
                }
                (DecodeMode::Ctc, Symbol::Char(ch)) => {
                    // Collapse repeats unless separated by a blank
                    if prev_index != Some(index) {
                        text.push(ch);
                        char_confidences.push(prob);
                        consumed.push(prob);
                    }
                }
                (_, Symbol::Blank) | (_, Symbol::Pad) => {}
            }

            prev_index = match symbol {
                Symbol::Char(_) => Some(index),
                _ => None,
            };
        }

        let confidence = if consumed.is_empty() {
            0.0
        } else {
            (consumed.iter().sum::<f32>() / consumed.len() as f32).clamp(0.0, 1.0)
        };

        Ok(DecodedText {
            text,
            confidence,
            char_confidences,
        })
    }
}

fn is_probability_matrix(distribution: &Array2<f32>) -> bool {
    distribution.rows().into_iter().all(|row| {
        row.iter().all(|v| (0.0..=1.0).contains(v))
            && (row.sum() - 1.0).abs() <= PROBABILITY_SUM_TOLERANCE
    })
}

/// Softmax every row, unless the matrix already holds probabilities
fn to_probabilities(mut distribution: Array2<f32>) -> Array2<f32> {
    if is_probability_matrix(&distribution) {
        return distribution;
    }

    for mut row in distribution.rows_mut() {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum.is_finite() && sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        } else {
            row.fill(0.0);
        }
    }
    distribution
}

/// Index and probability of the most likely symbol in one position
///
/// Ties go to the lowest index.
fn argmax(row: ArrayView1<f32>) -> (usize, f32) {
    let mut best_index = 0usize;
    let mut best = f32::NEG_INFINITY;
    for (i, &v) in row.iter().enumerate() {
        if v > best {
            best = v;
            best_index = i;
        }
    }
    (best_index, best.max(0.0))
}
