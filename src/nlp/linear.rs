//! Bias-free linear classifier trained against soft labels with Adam.

use linfa::{
    dataset::DatasetBase,
    traits::{Fit, PredictInplace},
};
use ndarray::{s, Array2, ArrayView2, Axis};
use rand::{distributions::Uniform, rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RelError, Result};

/// Output head of the linear model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Head {
    /// One logit, sigmoid output, soft-margin loss.
    Binary,
    /// One logit per class, softmax output, cross-entropy loss.
    Categorical(usize),
}

impl Head {
    pub fn for_cardinality(cardinality: usize) -> Self {
        if cardinality <= 2 {
            Self::Binary
        } else {
            Self::Categorical(cardinality)
        }
    }

    pub fn outputs(self) -> usize {
        match self {
            Self::Binary => 1,
            Self::Categorical(k) => k,
        }
    }
}

/// Adam state for a single weight matrix.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    t: i32,
    m: Array2<f64>,
    v: Array2<f64>,
}

impl Adam {
    pub fn new(lr: f64, shape: (usize, usize)) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            t: 0,
            m: Array2::zeros(shape),
            v: Array2::zeros(shape),
        }
    }

    pub fn step(&mut self, weights: &mut Array2<f64>, grad: &Array2<f64>) {
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t);
        let bc2 = 1.0 - self.beta2.powi(self.t);
        let (beta1, beta2) = (self.beta1, self.beta2);

        self.m.zip_mut_with(grad, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        self.v
            .zip_mut_with(grad, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

        let (lr, eps) = (self.lr, self.eps);
        ndarray::Zip::from(weights)
            .and(&self.m)
            .and(&self.v)
            .for_each(|w, &m, &v| {
                let m_hat = m / bc1;
                let v_hat = v / bc2;
                *w -= lr * m_hat / (v_hat.sqrt() + eps);
            });
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Row-wise softmax, shifted by the row max.
fn softmax_rows(mut logits: Array2<f64>) -> Array2<f64> {
    for mut row in logits.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|z| (z - max).exp());
        let total = row.sum();
        row.mapv_inplace(|z| z / total);
    }
    logits
}

/// Weights of shape `features x outputs`; no bias term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub head: Head,
    pub weights: Array2<f64>,
}

impl LinearModel {
    /// Uniform in `±1/sqrt(features)`.
    pub fn init<R: Rng>(n_features: usize, head: Head, rng: &mut R) -> Self {
        let bound = 1.0 / (n_features.max(1) as f64).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);
        let weights =
            Array2::from_shape_simple_fn((n_features, head.outputs()), || rng.sample(&dist));
        Self { head, weights }
    }

    pub fn n_features(&self) -> usize {
        self.weights.nrows()
    }

    fn check_width(&self, x: &ArrayView2<'_, f64>) -> Result<()> {
        if x.ncols() != self.n_features() {
            return Err(RelError::Shape(format!(
                "input has {} features, model expects {}",
                x.ncols(),
                self.n_features()
            )));
        }
        Ok(())
    }

    pub fn logits(&self, x: &ArrayView2<'_, f64>) -> Array2<f64> {
        x.dot(&self.weights)
    }

    /// Output probabilities: `n x 1` sigmoid or `n x k` softmax.
    pub fn predict_proba(&self, x: &ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.check_width(x)?;
        let logits = self.logits(x);
        Ok(match self.head {
            Head::Binary => logits.mapv(sigmoid),
            Head::Categorical(_) => softmax_rows(logits),
        })
    }

    /// Summed loss over the batch and its gradient with respect to the weights.
    pub fn loss_and_grad(
        &self,
        x: &ArrayView2<'_, f64>,
        y: &ArrayView2<'_, f64>,
    ) -> Result<(f64, Array2<f64>)> {
        self.check_width(x)?;
        if y.dim() != (x.nrows(), self.head.outputs()) {
            return Err(RelError::Shape(format!(
                "targets have shape {:?}, expected ({}, {})",
                y.dim(),
                x.nrows(),
                self.head.outputs()
            )));
        }
        let logits = self.logits(x);
        let (loss, probs) = match self.head {
            Head::Binary => {
                let loss = ndarray::Zip::from(&logits)
                    .and(y)
                    .fold(0.0, |acc, &z, &t| {
                        acc + z.max(0.0) - t * z + (-z.abs()).exp().ln_1p()
                    });
                (loss, logits.mapv(sigmoid))
            }
            Head::Categorical(_) => {
                let mut loss = 0.0;
                for (row, target) in logits.rows().into_iter().zip(y.rows()) {
                    let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
                    let lse = max + row.mapv(|z| (z - max).exp()).sum().ln();
                    loss += target.sum() * lse - target.dot(&row);
                }
                (loss, softmax_rows(logits))
            }
        };
        let grad = x.t().dot(&(probs - y));
        Ok((loss, grad))
    }

    /// One Adam update on a mini-batch; returns the batch loss.
    pub fn train_batch(
        &mut self,
        x: &ArrayView2<'_, f64>,
        y: &ArrayView2<'_, f64>,
        adam: &mut Adam,
    ) -> Result<f64> {
        let (loss, grad) = self.loss_and_grad(x, y)?;
        adam.step(&mut self.weights, &grad);
        Ok(loss)
    }

    /// Sequential mini-batches over the whole set; returns the summed loss.
    pub fn train_epoch(
        &mut self,
        x: &Array2<f64>,
        y: &Array2<f64>,
        batch_size: usize,
        adam: &mut Adam,
    ) -> Result<f64> {
        let n = x.nrows();
        let batch_size = batch_size.max(1);
        let mut cost = 0.0;
        let mut start = 0;
        while start < n {
            let end = (start + batch_size).min(n);
            cost += self.train_batch(
                &x.slice(s![start..end, ..]),
                &y.slice(s![start..end, ..]),
                adam,
            )?;
            start = end;
        }
        Ok(cost)
    }
}

/// Hyper-parameters for fitting a [`LinearModel`] through `linfa`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearParams {
    pub head: Head,
    pub lr: f64,
    pub n_epochs: usize,
    pub batch_size: usize,
    pub seed: u64,
    /// Log the mean cost every this many epochs; 0 disables it.
    pub log_every: usize,
}

impl LinearParams {
    pub fn new(head: Head) -> Self {
        Self {
            head,
            lr: 1e-3,
            n_epochs: 100,
            batch_size: 100,
            seed: 1234,
            log_every: 0,
        }
    }

    pub fn lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    pub fn n_epochs(mut self, n_epochs: usize) -> Self {
        self.n_epochs = n_epochs;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn log_every(mut self, log_every: usize) -> Self {
        self.log_every = log_every;
        self
    }

    /// Fresh model and optimizer for `n_features` inputs.
    pub fn init(&self, n_features: usize) -> (LinearModel, Adam) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let model = LinearModel::init(n_features, self.head, &mut rng);
        let adam = Adam::new(self.lr, model.weights.dim());
        (model, adam)
    }
}

impl Fit<Array2<f64>, Array2<f64>, RelError> for LinearParams {
    type Object = LinearModel;

    fn fit(&self, dataset: &DatasetBase<Array2<f64>, Array2<f64>>) -> Result<Self::Object> {
        let x = &dataset.records;
        let y = &dataset.targets;
        if x.nrows() == 0 {
            return Err(RelError::EmptyTrainingSet);
        }
        let (mut model, mut adam) = self.init(x.ncols());
        let n = x.nrows() as f64;
        for epoch in 1..=self.n_epochs {
            let cost = model.train_epoch(x, y, self.batch_size, &mut adam)?;
            if self.log_every > 0 && (epoch % self.log_every == 0 || epoch == self.n_epochs) {
                info!(epoch, error = cost / n, "training error");
            } else {
                debug!(epoch, error = cost / n, "training error");
            }
        }
        Ok(model)
    }
}

impl PredictInplace<Array2<f64>, Array2<f64>> for LinearModel {
    fn predict_inplace<'a>(&'a self, x: &'a Array2<f64>, y: &mut Array2<f64>) {
        assert_eq!(
            x.ncols(),
            self.n_features(),
            "number of features must match the fitted model"
        );
        let probs = match self.head {
            Head::Binary => self.logits(&x.view()).mapv(sigmoid),
            Head::Categorical(_) => softmax_rows(self.logits(&x.view())),
        };
        y.assign(&probs);
    }

    fn default_target(&self, x: &Array2<f64>) -> Array2<f64> {
        Array2::zeros((x.nrows(), self.head.outputs()))
    }
}

/// Collapse an `n x 1` probability matrix into a vector.
pub fn column(probs: Array2<f64>) -> ndarray::Array1<f64> {
    probs.index_axis_move(Axis(1), 0)
}

#[cfg(test)]
mod tests {
    use linfa::traits::Predict;
    use ndarray::array;

    use super::*;

    #[test]
    fn binary_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(7);
        let model = LinearModel::init(3, Head::Binary, &mut rng);
        let x = array![[0.5, -1.0, 2.0], [1.5, 0.25, -0.5]];
        let y = array![[0.9], [0.2]];
        let (_, grad) = model.loss_and_grad(&x.view(), &y.view()).unwrap();

        let h = 1e-6;
        for i in 0..3 {
            let mut plus = model.clone();
            plus.weights[[i, 0]] += h;
            let mut minus = model.clone();
            minus.weights[[i, 0]] -= h;
            let (lp, _) = plus.loss_and_grad(&x.view(), &y.view()).unwrap();
            let (lm, _) = minus.loss_and_grad(&x.view(), &y.view()).unwrap();
            let numeric = (lp - lm) / (2.0 * h);
            assert!((numeric - grad[[i, 0]]).abs() < 1e-5);
        }
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let probs = softmax_rows(array![[1.0, 2.0, 3.0], [1000.0, 0.0, -1000.0]]);
        for row in probs.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn fit_separates_a_linear_problem() {
        let x = array![[1.0, 0.0], [0.9, 0.1], [0.0, 1.0], [0.1, 0.9]];
        let y = array![[1.0], [0.9], [0.0], [0.1]];
        let dataset = DatasetBase::new(x.clone(), y);
        let model = LinearParams::new(Head::Binary)
            .lr(0.1)
            .n_epochs(200)
            .batch_size(2)
            .fit(&dataset)
            .unwrap();
        let probs = model.predict(&x);
        assert!(probs[[0, 0]] > 0.5);
        assert!(probs[[2, 0]] < 0.5);
    }

    #[test]
    fn width_mismatch_is_an_error() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = LinearModel::init(2, Head::Categorical(3), &mut rng);
        let x = array![[1.0, 2.0, 3.0]];
        assert!(model.predict_proba(&x.view()).is_err());
    }
}
