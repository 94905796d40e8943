//! Runtime configuration utilities for relpca.

use std::{
    collections::BTreeMap,
    env,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RelError, Result};

/// Application configuration resolved from `.env` and defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root folder for candidate, label and embedding inputs.
    pub data_dir: PathBuf,
    /// Root folder for saved models.
    pub checkpoint_dir: PathBuf,
    /// Root folder for marginals and feature dumps.
    pub outputs_dir: PathBuf,
}

impl Settings {
    /// Load configuration from environment with reasonable defaults.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let data_dir = env::var("RELPCA_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let checkpoint_dir = env::var("RELPCA_CHECKPOINT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./checkpoints"));
        let outputs_dir = env::var("RELPCA_OUTPUTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./outputs"));

        std::fs::create_dir_all(&checkpoint_dir).context("creating checkpoint dir")?;
        std::fs::create_dir_all(&outputs_dir).context("creating outputs dir")?;

        Ok(Self {
            data_dir,
            checkpoint_dir,
            outputs_dir,
        })
    }

    /// Convenience helper for derived data path segments; absolute paths pass through.
    pub fn join_data<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.data_dir.join(path)
    }

    /// Convenience helper for derived output path segments.
    pub fn join_output<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.outputs_dir.join(path)
    }
}

/// Hyper-parameters of the principal-component relation model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Append character-level components to every window block.
    pub char: bool,
    /// Include the whole-sentence block.
    pub sent_feat: bool,
    /// Include the block of words between the two mentions.
    pub cont_feat: bool,
    pub word_emb_dim: Option<usize>,
    pub word_emb_path: Option<PathBuf>,
    pub char_emb_dim: Option<usize>,
    pub char_emb_path: Option<PathBuf>,
    pub lr: f64,
    pub n_epochs: usize,
    /// Number of principal components kept per block.
    pub r: usize,
    pub batch_size: usize,
    pub rebalance: bool,
    /// Words kept on each side of a mention.
    pub window_size: usize,
    /// Append a one-hot mention order indicator.
    pub asymmetric: bool,
    pub max_sentence_length: usize,
    pub seed: u64,
    pub cardinality: usize,
    /// Placeholder substitutions applied to words read from embedding files.
    pub replace: BTreeMap<String, String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            char: true,
            sent_feat: true,
            cont_feat: true,
            word_emb_dim: None,
            word_emb_path: None,
            char_emb_dim: None,
            char_emb_path: None,
            lr: 1e-3,
            n_epochs: 100,
            r: 10,
            batch_size: 100,
            rebalance: false,
            window_size: 3,
            asymmetric: false,
            max_sentence_length: 100,
            seed: 1234,
            cardinality: 2,
            replace: BTreeMap::new(),
        }
    }
}

impl ModelConfig {
    /// Read a JSON config file; absent keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| RelError::io(path, err))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Check the options that have no usable default.
    pub fn validate(&self) -> Result<()> {
        if self.word_emb_path.is_none() {
            return Err(RelError::Config("word_emb_path is required".into()));
        }
        if self.word_emb_dim.unwrap_or(0) == 0 {
            return Err(RelError::Config("word_emb_dim must be positive".into()));
        }
        if self.char {
            if self.char_emb_path.is_none() {
                return Err(RelError::Config(
                    "char_emb_path is required when char is enabled".into(),
                ));
            }
            if self.char_emb_dim.unwrap_or(0) == 0 {
                return Err(RelError::Config("char_emb_dim must be positive".into()));
            }
        }
        if self.cardinality < 2 {
            return Err(RelError::Config("cardinality must be at least 2".into()));
        }
        if self.batch_size == 0 {
            return Err(RelError::Config("batch_size must be positive".into()));
        }
        Ok(())
    }

    pub fn word_dim(&self) -> usize {
        self.word_emb_dim.unwrap_or(0)
    }

    /// Character embedding width, zero when char features are off.
    pub fn char_dim(&self) -> usize {
        if self.char {
            self.char_emb_dim.unwrap_or(0)
        } else {
            0
        }
    }

    pub fn log_summary(&self) {
        info!(
            n_epochs = self.n_epochs,
            lr = self.lr,
            r = self.r,
            batch_size = self.batch_size,
            rebalance = self.rebalance,
            window_size = self.window_size,
            sent_feat = self.sent_feat,
            cont_feat = self.cont_feat,
            char = self.char,
            asymmetric = self.asymmetric,
            word_emb_dim = ?self.word_emb_dim,
            char_emb_dim = ?self.char_emb_dim,
            word_emb_path = ?self.word_emb_path,
            char_emb_path = ?self.char_emb_path,
            max_sentence_length = self.max_sentence_length,
            seed = self.seed,
            cardinality = self.cardinality,
            replace = ?self.replace,
            "model configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_takes_defaults() {
        let cfg: ModelConfig =
            serde_json::from_str(r#"{"word_emb_dim": 4, "word_emb_path": "w.txt", "char": false}"#)
                .unwrap();
        assert_eq!(cfg.r, 10);
        assert_eq!(cfg.window_size, 3);
        assert_eq!(cfg.char_dim(), 0);
        cfg.validate().unwrap();
    }

    #[test]
    fn char_requires_path() {
        let cfg = ModelConfig {
            word_emb_dim: Some(4),
            word_emb_path: Some("w.txt".into()),
            ..ModelConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(RelError::Config(_))));
    }

    #[test]
    fn summary_logs_every_hyper_parameter() {
        let cfg = ModelConfig {
            word_emb_dim: Some(4),
            word_emb_path: Some("w.txt".into()),
            ..ModelConfig::default()
        };
        let logged = crate::logging::capture(|| cfg.log_summary());
        for field in [
            "n_epochs=100",
            "max_sentence_length=100",
            "seed=1234",
            "cardinality=2",
            "replace={}",
        ] {
            assert!(logged.contains(field), "{field} missing from {logged}");
        }
    }
}
