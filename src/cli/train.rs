//! CLI entry-point for model training.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::{info, instrument};

use crate::{
    cli::read_matrix_csv,
    config::{ModelConfig, Settings},
    data::{
        candidate::{load_candidates, load_gold_labels},
        labels::reshape_marginals,
    },
    nlp::{relclf::MODEL_NAME, DevSet, PcaRelationModel, TrainOptions},
};

/// Args for the `train` command. Relative paths resolve under the data dir.
#[derive(Debug, Clone, ClapArgs)]
pub struct Args {
    /// Training candidates (JSONL).
    #[arg(long)]
    pub candidates: PathBuf,
    /// Training marginals (CSV, one row per candidate).
    #[arg(long)]
    pub marginals: PathBuf,
    /// Model hyper-parameters (JSON).
    #[arg(long)]
    pub config: PathBuf,
    /// Dev candidates (JSONL) for checkpoint selection.
    #[arg(long, requires = "dev_labels")]
    pub dev_candidates: Option<PathBuf>,
    /// Dev gold labels (JSONL of `{id, label}`).
    #[arg(long, requires = "dev_candidates")]
    pub dev_labels: Option<PathBuf>,
    /// Name of the saved model.
    #[arg(long, default_value = MODEL_NAME)]
    pub name: String,
    /// Report every N epochs; 0 disables reports and dev scoring.
    #[arg(long, default_value_t = 5)]
    pub print_freq: usize,
    /// Build vocabularies from candidate text instead of embedding files.
    #[arg(long)]
    pub candidate_dict: bool,
}

#[instrument(skip(settings))]
pub fn run(args: Args, settings: Settings) -> Result<()> {
    let config = ModelConfig::from_file(&settings.join_data(&args.config))
        .context("loading model config")?;
    let candidates = load_candidates(&settings.join_data(&args.candidates))?;
    let marginals = reshape_marginals(read_matrix_csv(&settings.join_data(&args.marginals))?)?;

    let dev = match (&args.dev_candidates, &args.dev_labels) {
        (Some(cands), Some(labels)) => {
            let dev_candidates = load_candidates(&settings.join_data(cands))?;
            let gold = load_gold_labels(&settings.join_data(labels), &dev_candidates)?;
            Some((dev_candidates, gold))
        }
        _ => None,
    };

    let mut model = PcaRelationModel::new(config)?;
    if args.candidate_dict {
        let mut sets = vec![candidates.as_slice()];
        if let Some((dev_candidates, _)) = &dev {
            sets.push(dev_candidates.as_slice());
        }
        model.create_dict(&sets, true, true);
    }

    let opts = TrainOptions {
        print_freq: args.print_freq,
        save_dir: settings.checkpoint_dir.clone(),
        model_name: args.name.clone(),
        ..TrainOptions::default()
    };
    let dev_set = dev.as_ref().map(|(candidates, gold)| DevSet {
        candidates: candidates.as_slice(),
        gold: gold.as_slice(),
    });
    model.train(&candidates, &marginals, dev_set, &opts)?;
    model.save(&settings.checkpoint_dir, &args.name, false)?;

    if let Some(dev) = dev_set {
        let score = model.score(dev.candidates, dev.gold)?;
        info!(metric = score.label(), dev_score = 100.0 * score.value(), "final dev score");
    }
    Ok(())
}
