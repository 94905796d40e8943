//! On-disk model checkpoints.
//!
//! Layout under `<save_dir>/<model_name>/`:
//!
//! ```text
//! model_config.json   hyper-parameters needed to rebuild the model
//! model_dicts.json    symbol tables and embedding matrices
//! weights.json        linear classifier parameters
//! ```
//!
//! Parameter-only checkpoints (taken during dev-set model selection) write
//! `weights.json` alone.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::error::{RelError, Result};

pub const CONFIG_FILE: &str = "model_config.json";
pub const DICTS_FILE: &str = "model_dicts.json";
pub const WEIGHTS_FILE: &str = "weights.json";

/// Directory holding one named model.
#[derive(Debug, Clone)]
pub struct CheckpointDir {
    dir: PathBuf,
}

impl CheckpointDir {
    pub fn new(save_dir: &Path, model_name: &str) -> Self {
        Self {
            dir: save_dir.join(model_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|err| RelError::io(&self.dir, err))
    }

    pub fn write<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.dir.join(file);
        let json = serde_json::to_vec(value)?;
        fs::write(&path, json).map_err(|err| RelError::io(&path, err))?;
        debug!(path = %path.display(), "wrote checkpoint file");
        Ok(())
    }

    pub fn read<T: DeserializeOwned>(&self, file: &str) -> Result<T> {
        let path = self.dir.join(file);
        let raw = fs::read(&path).map_err(|err| RelError::io(&path, err))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}
