//! Principal-component relation classifier trained on weak-supervision marginals.

use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use linfa::{
    dataset::DatasetBase,
    traits::{Fit, Predict},
};
use ndarray::Array2;
use rand::{rngs::StdRng, SeedableRng};
use tracing::{info, instrument, warn};

use crate::{
    config::ModelConfig,
    data::{
        candidate::Candidate,
        labels::{categorical_train_idxs, LabelBalancer, Marginals},
    },
    error::{RelError, Result},
    nlp::{
        checkpoint::{CheckpointDir, CONFIG_FILE, DICTS_FILE, WEIGHTS_FILE},
        embeddings::{self, Dictionaries, Embeddings},
        features::FeatureExtractor,
        linear::{self, Head, LinearModel, LinearParams},
    },
};

pub const MODEL_NAME: &str = "PCA";

/// Controls for the training loop around the classifier.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Report every this many epochs; 0 silences per-epoch reports and dev scoring.
    pub print_freq: usize,
    /// Keep the parameters that score best on the dev set.
    pub dev_ckpt: bool,
    /// Fraction of epochs to run before dev checkpoints are taken.
    pub dev_ckpt_delay: f64,
    pub save_dir: PathBuf,
    pub model_name: String,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            print_freq: 5,
            dev_ckpt: true,
            dev_ckpt_delay: 0.75,
            save_dir: PathBuf::from("checkpoints"),
            model_name: MODEL_NAME.to_string(),
        }
    }
}

/// Held-out candidates with gold labels.
#[derive(Debug, Clone, Copy)]
pub struct DevSet<'a> {
    pub candidates: &'a [Candidate],
    pub gold: &'a [i64],
}

/// Evaluation result: F1 family for binary tasks, accuracy otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Score {
    Binary { precision: f64, recall: f64, f1: f64 },
    Categorical { accuracy: f64 },
}

impl Score {
    /// The number used for model selection.
    pub fn value(&self) -> f64 {
        match self {
            Self::Binary { f1, .. } => *f1,
            Self::Categorical { accuracy } => *accuracy,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Binary { .. } => "F1",
            Self::Categorical { .. } => "Acc.",
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Score predicted probabilities against gold labels. Binary gold is positive
/// when equal to 1; categorical gold holds 0-based class ids.
pub fn score_probs(probs: &Array2<f64>, gold: &[i64]) -> Result<Score> {
    if probs.nrows() != gold.len() {
        return Err(RelError::Shape(format!(
            "{} predictions for {} gold labels",
            probs.nrows(),
            gold.len()
        )));
    }
    if probs.ncols() == 1 {
        let (mut tp, mut fp, mut fneg) = (0usize, 0usize, 0usize);
        for (p, &g) in probs.column(0).iter().zip(gold) {
            match (*p > 0.5, g == 1) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, true) => fneg += 1,
                (false, false) => {}
            }
        }
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fneg);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Ok(Score::Binary {
            precision,
            recall,
            f1,
        })
    } else {
        let correct = probs
            .outer_iter()
            .zip(gold)
            .filter(|(row, g)| {
                let argmax = row
                    .iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (idx, &p)| {
                        if p > best.1 {
                            (idx, p)
                        } else {
                            best
                        }
                    })
                    .0;
                argmax as i64 == **g
            })
            .count();
        Ok(Score::Categorical {
            accuracy: ratio(correct, gold.len()),
        })
    }
}

/// Relation classifier over principal-component context features.
#[derive(Debug, Clone)]
pub struct PcaRelationModel {
    config: ModelConfig,
    dicts: Dictionaries,
    embeddings: Option<Embeddings>,
    model: Option<LinearModel>,
}

impl PcaRelationModel {
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        config.log_summary();
        Ok(Self {
            config,
            dicts: Dictionaries::default(),
            embeddings: None,
            model: None,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Restrict the vocabularies to the text of the given candidate sets.
    /// Must run before embeddings are loaded to have any effect.
    pub fn create_dict(&mut self, candidate_sets: &[&[Candidate]], word: bool, char: bool) {
        if self.embeddings.is_some() {
            warn!("embeddings already loaded; candidate dictionaries ignored");
            return;
        }
        self.dicts = embeddings::create_dict(candidate_sets, word, char && self.config.char);
    }

    /// Load the embedding tables once, seeded from the config.
    pub fn load_embeddings(&mut self) -> Result<()> {
        if self.embeddings.is_some() {
            return Ok(());
        }
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let dicts = std::mem::take(&mut self.dicts);
        self.embeddings = Some(Embeddings::load(&self.config, dicts, &mut rng)?);
        info!(model = MODEL_NAME, "done loading embeddings");
        Ok(())
    }

    fn extractor(&self) -> Result<FeatureExtractor<'_>> {
        let embeddings = self.embeddings.as_ref().ok_or(RelError::NotTrained)?;
        Ok(FeatureExtractor::new(&self.config, embeddings))
    }

    /// Feature matrix for `candidates`, one row each.
    pub fn embed(&self, candidates: &[Candidate]) -> Result<Array2<f64>> {
        self.extractor()?.featurise(candidates)
    }

    fn params(&self, print_freq: usize) -> LinearParams {
        LinearParams::new(Head::for_cardinality(self.config.cardinality))
            .lr(self.config.lr)
            .n_epochs(self.config.n_epochs)
            .batch_size(self.config.batch_size)
            .seed(self.config.seed)
            .log_every(print_freq)
    }

    /// Fit the classifier to `marginals`, optionally selecting the best
    /// parameters on a dev set.
    #[instrument(skip_all, fields(model = MODEL_NAME, n = candidates.len()))]
    pub fn train(
        &mut self,
        candidates: &[Candidate],
        marginals: &Marginals,
        dev: Option<DevSet<'_>>,
        opts: &TrainOptions,
    ) -> Result<()> {
        let started = Instant::now();
        self.load_embeddings()?;

        if marginals.len() != candidates.len() {
            return Err(RelError::Shape(format!(
                "{} marginals for {} candidates",
                marginals.len(),
                candidates.len()
            )));
        }
        marginals.check(self.config.cardinality)?;

        let idxs = match marginals {
            Marginals::Binary(p) => {
                LabelBalancer::new(p).train_idxs(self.config.rebalance, self.config.seed)
            }
            Marginals::Categorical(p) => categorical_train_idxs(p),
        };
        if idxs.is_empty() {
            return Err(RelError::EmptyTrainingSet);
        }
        let selected: Vec<Candidate> = idxs.iter().map(|&i| candidates[i].clone()).collect();
        let targets = marginals.select(&idxs).targets();
        info!(n_train = selected.len(), "training set selected");

        let x = self.embed(&selected)?;
        let params = self.params(opts.print_freq);

        match dev {
            Some(dev) if opts.print_freq > 0 => self.fit_with_dev(&params, &x, &targets, dev, opts)?,
            _ => {
                let dataset = DatasetBase::new(x, targets);
                self.model = Some(params.fit(&dataset)?);
            }
        }

        info!(
            elapsed_secs = started.elapsed().as_secs_f64(),
            "training done"
        );
        Ok(())
    }

    fn fit_with_dev(
        &mut self,
        params: &LinearParams,
        x: &Array2<f64>,
        targets: &Array2<f64>,
        dev: DevSet<'_>,
        opts: &TrainOptions,
    ) -> Result<()> {
        let dev_x = self.embed(dev.candidates)?;
        let (mut model, mut adam) = params.init(x.ncols());
        let n_examples = x.nrows() as f64;
        let n_epochs = params.n_epochs;
        let mut best = 0.0;
        let mut saved = false;

        for idx in 0..n_epochs {
            let cost = model.train_epoch(x, targets, params.batch_size, &mut adam)?;
            let epoch = idx + 1;
            if epoch % opts.print_freq != 0 && epoch != n_epochs {
                continue;
            }
            let score = score_probs(&model.predict_proba(&dev_x.view())?, dev.gold)?;
            info!(
                epoch,
                error = cost / n_examples,
                metric = score.label(),
                dev_score = 100.0 * score.value(),
                "training error"
            );
            if opts.dev_ckpt
                && idx as f64 > opts.dev_ckpt_delay * n_epochs as f64
                && score.value() > best
            {
                best = score.value();
                self.model = Some(model.clone());
                self.save(&opts.save_dir, &opts.model_name, true)?;
                saved = true;
            }
        }

        self.model = Some(model);
        if saved {
            self.load_params(&opts.save_dir, &opts.model_name)?;
            info!(dev_score = 100.0 * best, "restored best dev checkpoint");
        }
        Ok(())
    }

    fn probs(&self, candidates: &[Candidate]) -> Result<Array2<f64>> {
        let model = self.model.as_ref().ok_or(RelError::NotTrained)?;
        let x = self.embed(candidates)?;
        if x.ncols() != model.n_features() {
            return Err(RelError::Shape(format!(
                "features have width {}, classifier expects {}",
                x.ncols(),
                model.n_features()
            )));
        }
        Ok(model.predict(&x))
    }

    /// Predicted marginals in the same shape as training marginals.
    pub fn marginals(&self, candidates: &[Candidate]) -> Result<Marginals> {
        let probs = self.probs(candidates)?;
        Ok(match self.config.cardinality {
            2 => Marginals::Binary(linear::column(probs)),
            _ => Marginals::Categorical(probs),
        })
    }

    pub fn score(&self, candidates: &[Candidate], gold: &[i64]) -> Result<Score> {
        score_probs(&self.probs(candidates)?, gold)
    }

    /// Write the model under `save_dir/model_name`. With `only_param` only
    /// the classifier weights are written.
    pub fn save(&self, save_dir: &Path, model_name: &str, only_param: bool) -> Result<()> {
        let model = self.model.as_ref().ok_or(RelError::NotTrained)?;
        let dir = CheckpointDir::new(save_dir, model_name);
        dir.create()?;
        if !only_param {
            let embeddings = self.embeddings.as_ref().ok_or(RelError::NotTrained)?;
            dir.write(CONFIG_FILE, &self.config)?;
            dir.write(DICTS_FILE, embeddings)?;
        }
        dir.write(WEIGHTS_FILE, model)?;
        info!(
            model = MODEL_NAME,
            name = model_name,
            only_param,
            path = %dir.path().display(),
            "model saved"
        );
        Ok(())
    }

    /// Rebuild a model from a full checkpoint.
    pub fn load(save_dir: &Path, model_name: &str) -> Result<Self> {
        let dir = CheckpointDir::new(save_dir, model_name);
        let config: ModelConfig = dir.read(CONFIG_FILE)?;
        let embeddings: Embeddings = dir.read(DICTS_FILE)?;
        let mut model = Self::new(config)?;
        model.embeddings = Some(embeddings);
        model.load_params(save_dir, model_name)?;
        info!(model = MODEL_NAME, name = model_name, "loaded model");
        Ok(model)
    }

    /// Replace the classifier weights with those of a checkpoint.
    pub fn load_params(&mut self, save_dir: &Path, model_name: &str) -> Result<()> {
        let dir = CheckpointDir::new(save_dir, model_name);
        let weights: LinearModel = dir.read(WEIGHTS_FILE)?;
        let expected = self.extractor()?.feature_dim();
        if weights.n_features() != expected {
            return Err(RelError::Shape(format!(
                "checkpoint expects {} features, extractor produces {expected}",
                weights.n_features()
            )));
        }
        self.model = Some(weights);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn binary_score_counts_positives() {
        let probs = array![[0.9], [0.8], [0.2], [0.4]];
        let score = score_probs(&probs, &[1, -1, 1, -1]).unwrap();
        match score {
            Score::Binary {
                precision,
                recall,
                f1,
            } => {
                assert!((precision - 0.5).abs() < 1e-12);
                assert!((recall - 0.5).abs() < 1e-12);
                assert!((f1 - 0.5).abs() < 1e-12);
            }
            other => panic!("unexpected score {other:?}"),
        }
    }

    #[test]
    fn categorical_score_uses_argmax() {
        let probs = array![[0.1, 0.7, 0.2], [0.6, 0.3, 0.1]];
        let score = score_probs(&probs, &[1, 2]).unwrap();
        assert_eq!(score, Score::Categorical { accuracy: 0.5 });
    }

    #[test]
    fn untrained_model_cannot_predict() {
        let config = ModelConfig {
            char: false,
            word_emb_dim: Some(2),
            word_emb_path: Some("unused.txt".into()),
            ..ModelConfig::default()
        };
        let model = PcaRelationModel::new(config).unwrap();
        assert!(matches!(model.marginals(&[]), Err(RelError::NotTrained)));
    }
}
