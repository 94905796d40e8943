//! Command-line interface wiring for relpca.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ndarray::Array2;
use tracing::info;

use crate::{config::Settings, data::candidate::Candidate};

pub mod embed;
pub mod marginals;
pub mod train;

/// Top-level CLI definition.
#[derive(Debug, Parser)]
#[command(author, version, about = "Principal-component relation extraction", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Parse CLI arguments from the environment.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Dispatch the selected sub-command.
    pub fn dispatch(self, settings: Settings) -> Result<()> {
        match self.command {
            Commands::Train(args) => train::run(args, settings),
            Commands::Marginals(args) => marginals::run(args, settings),
            Commands::Embed(args) => embed::run(args, settings),
        }
    }
}

/// Supported sub-commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Train a model against probabilistic labels and save it.
    Train(train::Args),
    /// Predict marginals for candidates with a saved model.
    Marginals(marginals::Args),
    /// Dump principal-component feature vectors for candidates.
    Embed(embed::Args),
}

/// Read a header-less CSV of floats, one row per candidate.
pub fn read_matrix_csv(path: &Path) -> Result<Array2<f64>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut values = Vec::new();
    let mut width = None;
    let mut rows = 0usize;
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading {} row {}", path.display(), idx + 1))?;
        match width {
            None => width = Some(record.len()),
            Some(w) if w != record.len() => bail!(
                "{} row {} has {} columns, expected {w}",
                path.display(),
                idx + 1,
                record.len()
            ),
            Some(_) => {}
        }
        for field in record.iter() {
            let value: f64 = field
                .parse()
                .with_context(|| format!("{} row {}: bad value {field:?}", path.display(), idx + 1))?;
            values.push(value);
        }
        rows += 1;
    }
    let matrix = Array2::from_shape_vec((rows, width.unwrap_or(0)), values)?;
    info!(path = %path.display(), rows, cols = matrix.ncols(), "read matrix");
    Ok(matrix)
}

/// Write one row per candidate, keyed by candidate id.
pub fn write_matrix_csv(
    path: &Path,
    prefix: &str,
    candidates: &[Candidate],
    matrix: &Array2<f64>,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut header = vec!["id".to_string()];
    header.extend((0..matrix.ncols()).map(|i| format!("{prefix}{i}")));
    writer.write_record(&header)?;
    for (candidate, row) in candidates.iter().zip(matrix.outer_iter()) {
        let mut record = vec![candidate.id.clone()];
        record.extend(row.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = matrix.nrows(), "wrote csv");
    Ok(())
}
