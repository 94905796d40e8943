//! CLI entry-point for predicting marginals with a saved model.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use crate::{
    cli::write_matrix_csv,
    config::Settings,
    data::candidate::load_candidates,
    nlp::{relclf::MODEL_NAME, PcaRelationModel},
};

/// Args for the `marginals` command.
#[derive(Debug, Clone, ClapArgs)]
pub struct Args {
    /// Candidates to score (JSONL), relative to the data dir.
    #[arg(long)]
    pub candidates: PathBuf,
    /// Saved model name under the checkpoint dir.
    #[arg(long, default_value = MODEL_NAME)]
    pub name: String,
    /// Output CSV, relative to the outputs dir.
    #[arg(long, default_value = "marginals.csv")]
    pub output: PathBuf,
}

#[instrument(skip(settings))]
pub fn run(args: Args, settings: Settings) -> Result<()> {
    let model = PcaRelationModel::load(&settings.checkpoint_dir, &args.name)?;
    let candidates = load_candidates(&settings.join_data(&args.candidates))?;
    let marginals = model.marginals(&candidates)?;
    write_matrix_csv(
        &settings.join_output(&args.output),
        "p",
        &candidates,
        &marginals.targets(),
    )
}
