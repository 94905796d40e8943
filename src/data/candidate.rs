//! Candidate relation mentions and their JSONL loaders.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RelError, Result};

/// Inclusive word offsets of a mention inside its sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Span {
    pub word_start: usize,
    pub word_end: usize,
}

impl Span {
    pub fn new(word_start: usize, word_end: usize) -> Self {
        Self {
            word_start,
            word_end,
        }
    }
}

/// A pair of mentions in one tokenised sentence.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Candidate {
    pub id: String,
    pub tokens: Vec<String>,
    pub mentions: [Span; 2],
}

impl Candidate {
    pub fn new(id: impl Into<String>, tokens: &[&str], m1: Span, m2: Span) -> Self {
        Self {
            id: id.into(),
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            mentions: [m1, m2],
        }
    }

    /// Both mention spans must be ordered and fall inside the sentence.
    pub fn validate(&self) -> Result<()> {
        for span in &self.mentions {
            if span.word_start > span.word_end || span.word_end >= self.tokens.len() {
                return Err(RelError::Shape(format!(
                    "candidate {} has span {}..={} over {} tokens",
                    self.id,
                    span.word_start,
                    span.word_end,
                    self.tokens.len()
                )));
            }
        }
        Ok(())
    }
}

/// Gold label attached to a candidate id, used for dev scoring.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GoldLabel {
    pub id: String,
    pub label: i64,
}

/// Load one JSON value per non-empty line.
fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = std::fs::read_to_string(path).map_err(|err| RelError::io(path, err))?;
    let mut rows = Vec::new();
    for (idx, line) in file.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(line).map_err(|err| RelError::Parse {
            path: path.to_path_buf(),
            line: idx + 1,
            reason: err.to_string(),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Load and validate candidates from a JSONL file.
pub fn load_candidates(path: &Path) -> Result<Vec<Candidate>> {
    let candidates: Vec<Candidate> = read_jsonl(path)?;
    for candidate in &candidates {
        candidate.validate()?;
    }
    info!(path = %path.display(), count = candidates.len(), "loaded candidates");
    Ok(candidates)
}

/// Load gold labels and align them with `candidates` by id.
pub fn load_gold_labels(path: &Path, candidates: &[Candidate]) -> Result<Vec<i64>> {
    let labels: Vec<GoldLabel> = read_jsonl(path)?;
    let by_id: HashMap<&str, i64> = labels.iter().map(|l| (l.id.as_str(), l.label)).collect();
    candidates
        .iter()
        .map(|c| {
            by_id
                .get(c.id.as_str())
                .copied()
                .ok_or_else(|| RelError::Shape(format!("no gold label for candidate {}", c.id)))
        })
        .collect()
}
