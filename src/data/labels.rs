//! Marginal label shaping and training-set selection.

use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::{debug, warn};

use crate::error::{RelError, Result};

const UNLABELED_EPS: f64 = 1e-6;
const STOCHASTIC_EPS: f64 = 1e-10;

/// Probabilistic training labels produced by the labeling model.
#[derive(Debug, Clone, PartialEq)]
pub enum Marginals {
    /// Probability of the positive class per example.
    Binary(Array1<f64>),
    /// One row-stochastic distribution per example.
    Categorical(Array2<f64>),
}

impl Marginals {
    pub fn len(&self) -> usize {
        match self {
            Self::Binary(p) => p.len(),
            Self::Categorical(p) => p.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cardinality(&self) -> usize {
        match self {
            Self::Binary(_) => 2,
            Self::Categorical(p) => p.ncols(),
        }
    }

    /// Validate shape and range against the model cardinality.
    pub fn check(&self, cardinality: usize) -> Result<()> {
        if self.cardinality() != cardinality {
            return Err(RelError::Marginals(format!(
                "training marginals cardinality ({}) does not match model cardinality ({cardinality})",
                self.cardinality()
            )));
        }
        match self {
            Self::Binary(p) => {
                if p.iter().any(|&v| !(0.0..=1.0).contains(&v)) {
                    return Err(RelError::Marginals("values must be in [0,1]".into()));
                }
            }
            Self::Categorical(p) => {
                if p.iter().any(|&v| v < 0.0) {
                    return Err(RelError::Marginals("values must be in [0,1]".into()));
                }
                if p.sum_axis(Axis(1))
                    .iter()
                    .any(|s| (s - 1.0).abs() > STOCHASTIC_EPS)
                {
                    return Err(RelError::Marginals(
                        "rows must be row-stochastic (sum to 1)".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Keep only the rows at `idxs`, in that order.
    pub fn select(&self, idxs: &[usize]) -> Self {
        match self {
            Self::Binary(p) => Self::Binary(p.select(Axis(0), idxs)),
            Self::Categorical(p) => Self::Categorical(p.select(Axis(0), idxs)),
        }
    }

    /// Training targets as an `n x outputs` matrix.
    pub fn targets(&self) -> Array2<f64> {
        match self {
            Self::Binary(p) => p.clone().insert_axis(Axis(1)),
            Self::Categorical(p) => p.clone(),
        }
    }
}

/// Normalise a raw marginal table: one column or two columns become binary
/// (positive column is the last), wider tables stay categorical.
pub fn reshape_marginals(raw: Array2<f64>) -> Result<Marginals> {
    match raw.ncols() {
        0 => Err(RelError::Marginals("marginal table has no columns".into())),
        1 => Ok(Marginals::Binary(raw.column(0).to_owned())),
        2 => Ok(Marginals::Binary(raw.column(1).to_owned())),
        _ => Ok(Marginals::Categorical(raw)),
    }
}

/// Drops unlabeled binary examples and optionally equalises class counts.
#[derive(Debug)]
pub struct LabelBalancer<'a> {
    marginals: &'a Array1<f64>,
}

impl<'a> LabelBalancer<'a> {
    pub fn new(marginals: &'a Array1<f64>) -> Self {
        Self { marginals }
    }

    fn positives(&self) -> Vec<usize> {
        self.indices(|p| p > 0.5 + UNLABELED_EPS)
    }

    fn negatives(&self) -> Vec<usize> {
        self.indices(|p| p < 0.5 - UNLABELED_EPS)
    }

    fn indices(&self, keep: impl Fn(f64) -> bool) -> Vec<usize> {
        self.marginals
            .iter()
            .enumerate()
            .filter(|&(_, &p)| keep(p))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Indices of labeled examples, ascending.
    pub fn train_idxs(&self, rebalance: bool, seed: u64) -> Vec<usize> {
        let mut pos = self.positives();
        let mut neg = self.negatives();
        if rebalance {
            if pos.is_empty() || neg.is_empty() {
                warn!(
                    positives = pos.len(),
                    negatives = neg.len(),
                    "cannot rebalance with an empty class"
                );
            } else {
                let mut rng = StdRng::seed_from_u64(seed);
                let target = pos.len().min(neg.len());
                for class in [&mut pos, &mut neg] {
                    class.shuffle(&mut rng);
                    class.truncate(target);
                }
            }
        }
        debug!(positives = pos.len(), negatives = neg.len(), "selected training examples");
        let mut idxs: Vec<usize> = pos.into_iter().chain(neg).collect();
        idxs.sort_unstable();
        idxs
    }
}

/// Keep categorical rows that carry any signal.
pub fn categorical_train_idxs(marginals: &Array2<f64>) -> Vec<usize> {
    marginals
        .outer_iter()
        .enumerate()
        .filter(|(_, row)| {
            let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let min = row.iter().cloned().fold(f64::INFINITY, f64::min);
            max - min > UNLABELED_EPS
        })
        .map(|(idx, _)| idx)
        .collect()
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn two_columns_take_positive_column() {
        let m = reshape_marginals(array![[0.2, 0.8], [0.9, 0.1]]).unwrap();
        assert_eq!(m, Marginals::Binary(array![0.8, 0.1]));
    }

    #[test]
    fn cardinality_mismatch_is_rejected() {
        let m = Marginals::Binary(array![0.3]);
        assert!(m.check(3).is_err());
    }

    #[test]
    fn categorical_rows_must_sum_to_one() {
        let m = Marginals::Categorical(array![[0.5, 0.2, 0.2]]);
        assert!(m.check(3).is_err());
    }

    #[test]
    fn uniform_categorical_rows_are_dropped() {
        let m = array![[1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0], [0.8, 0.1, 0.1]];
        assert_eq!(categorical_train_idxs(&m), vec![1]);
    }

    #[test]
    fn rebalancing_downsamples_the_majority() {
        let p = array![0.9, 0.1, 0.9, 0.5, 0.9, 0.9, 0.2, 0.8, 0.9];
        let balancer = LabelBalancer::new(&p);
        let idxs = balancer.train_idxs(true, 7);

        assert_eq!(idxs.len(), 4);
        let positives = idxs.iter().filter(|&&i| p[i] > 0.5).count();
        assert_eq!(positives, 2);
        assert!(idxs.contains(&1) && idxs.contains(&6));
        assert!(!idxs.contains(&3));
        assert!(idxs.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(balancer.train_idxs(true, 7), idxs);
    }

    #[test]
    fn no_rebalance_keeps_every_labeled_example() {
        let p = array![0.9, 0.5, 0.1, 0.7];
        assert_eq!(LabelBalancer::new(&p).train_idxs(false, 0), vec![0, 2, 3]);
    }

    #[test]
    fn empty_class_skips_rebalancing_with_a_warning() {
        let p = array![0.9, 0.8, 0.5];
        let mut idxs = Vec::new();
        let logged =
            crate::logging::capture(|| idxs = LabelBalancer::new(&p).train_idxs(true, 1));
        assert_eq!(idxs, vec![0, 1]);
        assert!(logged.contains("cannot rebalance with an empty class"));
    }
}

