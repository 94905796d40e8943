//! Principal-component features over mention context windows.
//!
//! Every window of words is summarised by a fixed block of `r + 1` rows per
//! embedding level: the normalised mean embedding followed by the top `r`
//! right singular vectors of the mean-centred embedding matrix. Blocks for the
//! two mention windows, the sentence and the between-mention span are then
//! concatenated into one flat feature vector.

use linfa_linalg::svd::SVD;
use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use tracing::{debug, warn};

use crate::{
    config::ModelConfig,
    data::candidate::Candidate,
    error::{RelError, Result},
    nlp::embeddings::{EmbeddingTable, Embeddings},
};

/// Singular values at or below this are treated as zero.
const RANK_EPS: f64 = 1e-12;

/// Token windows cut from one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessed<'a> {
    pub sent: &'a [String],
    pub m1: &'a [String],
    pub m2: &'a [String],
    /// Words strictly between the two mentions.
    pub between: &'a [String],
    /// 0 when the first mention's window starts before the second's.
    pub order: u8,
}

/// Cut the mention windows, the full sentence and the between span.
/// Spans must already be validated against the token count.
pub fn preprocess(candidate: &Candidate, window_size: usize) -> Preprocessed<'_> {
    let words = candidate.tokens.as_slice();
    let n = words.len();
    let [a, b] = candidate.mentions;

    let window = |start: usize, end: usize| {
        let lo = start.saturating_sub(window_size);
        let hi = (end + 1 + window_size).min(n);
        (lo, hi.max(lo))
    };
    let (m1_start, m1_end) = window(a.word_start, a.word_end);
    let (m2_start, m2_end) = window(b.word_start, b.word_end);

    let between_start = (a.word_end.min(b.word_end) + 1).min(n);
    let between_end = a.word_start.max(b.word_start).min(n);
    let between = if between_start < between_end {
        &words[between_start..between_end]
    } else {
        &words[0..0]
    };

    Preprocessed {
        sent: words,
        m1: &words[m1_start..m1_end],
        m2: &words[m2_start..m2_end],
        between,
        order: if m1_start < m2_start { 0 } else { 1 },
    }
}

/// Warn about candidates whose mentions reach past the configured length.
pub fn check_max_sentence_length(candidates: &[Candidate], max_len: usize) {
    for (idx, candidate) in candidates.iter().enumerate() {
        let end = candidate
            .mentions
            .iter()
            .map(|m| m.word_end)
            .max()
            .unwrap_or(0);
        if end >= max_len {
            warn!(
                candidate = idx,
                arg_end = end,
                max_len,
                "candidate has argument past max length for model"
            );
        }
    }
}

/// Flip `v` so its largest-magnitude entry is positive.
fn canonical_sign(v: ArrayView1<'_, f64>) -> Array1<f64> {
    let pivot = v
        .iter()
        .cloned()
        .fold(0.0f64, |best, x| if x.abs() > best.abs() { x } else { best });
    if pivot < 0.0 {
        v.mapv(|x| -x)
    } else {
        v.to_owned()
    }
}

/// Mean direction plus top-`r` principal axes of `x`, flattened row-major
/// into `(r + 1) * dim` values. An empty `x` yields zeros.
pub fn principal_components(x: &Array2<f64>, r: usize, dim: usize) -> Result<Array1<f64>> {
    let mut block = Array2::<f64>::zeros((r + 1, dim));
    if x.nrows() == 0 {
        return block.into_shape(((r + 1) * dim,)).map_err(shape_err);
    }
    if x.ncols() != dim {
        return Err(RelError::Shape(format!(
            "embedding rows have width {}, expected {dim}",
            x.ncols()
        )));
    }

    let mu = x
        .mean_axis(Axis(0))
        .ok_or_else(|| RelError::Shape("mean of empty window".into()))?;
    let norm = mu.dot(&mu).sqrt();
    if norm > 0.0 {
        block.row_mut(0).assign(&(&mu / norm));
    }

    let centred = x - &mu;
    if r > 0 && centred.iter().any(|v| v.abs() > RANK_EPS) {
        let (_, sigma, v_t) = centred
            .svd(false, true)
            .map_err(|err| RelError::Svd(err.to_string()))?;
        let v_t = v_t.ok_or_else(|| RelError::Svd("right singular vectors missing".into()))?;

        let mut order: Vec<usize> = (0..sigma.len().min(v_t.nrows())).collect();
        order.sort_by(|&i, &j| sigma[j].total_cmp(&sigma[i]));
        let k = r.min(order.len());
        for (slot, &idx) in order.iter().take(k).enumerate() {
            if sigma[idx] <= RANK_EPS {
                break;
            }
            block
                .row_mut(slot + 1)
                .assign(&canonical_sign(v_t.row(idx)));
        }
    }

    block.into_shape(((r + 1) * dim,)).map_err(shape_err)
}

fn shape_err(err: ndarray::ShapeError) -> RelError {
    RelError::Shape(err.to_string())
}

/// Builds candidate feature vectors from loaded embeddings.
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor<'a> {
    config: &'a ModelConfig,
    embeddings: &'a Embeddings,
}

impl<'a> FeatureExtractor<'a> {
    pub fn new(config: &'a ModelConfig, embeddings: &'a Embeddings) -> Self {
        Self { config, embeddings }
    }

    fn blocks(&self) -> usize {
        2 + usize::from(self.config.sent_feat) + usize::from(self.config.cont_feat)
    }

    fn char_table(&self) -> Option<&'a EmbeddingTable> {
        if self.config.char {
            self.embeddings.char.as_ref()
        } else {
            None
        }
    }

    /// Width of one window block, word and char parts together.
    pub fn window_dim(&self) -> usize {
        let per_row = self.embeddings.word.dim() + self.char_table().map_or(0, EmbeddingTable::dim);
        (self.config.r + 1) * per_row
    }

    pub fn feature_dim(&self) -> usize {
        self.blocks() * self.window_dim() + if self.config.asymmetric { 2 } else { 0 }
    }

    /// Word-level block followed by the char-level block when enabled.
    pub fn window_features(&self, tokens: &[String]) -> Result<Array1<f64>> {
        let r = self.config.r;
        let has_text = tokens.iter().any(|t| !t.is_empty());

        let word = &self.embeddings.word;
        let word_rows = if has_text {
            word.rows(tokens.iter().map(String::as_str))
        } else {
            Array2::zeros((0, word.dim()))
        };
        let mut out = principal_components(&word_rows, r, word.dim())?.to_vec();

        if let Some(chars) = self.char_table() {
            let char_rows = if has_text {
                let text = tokens.join(" ");
                let symbols: Vec<String> = text.chars().map(String::from).collect();
                chars.rows(symbols.iter().map(String::as_str))
            } else {
                Array2::zeros((0, chars.dim()))
            };
            out.extend(principal_components(&char_rows, r, chars.dim())?.iter());
        }
        Ok(Array1::from(out))
    }

    /// Concatenate mention, sentence and between blocks plus the order flag.
    pub fn gen_feature(&self, p: &Preprocessed<'_>) -> Result<Array1<f64>> {
        let mut feature: Vec<f64> = Vec::with_capacity(self.feature_dim());
        feature.extend(self.window_features(p.m1)?.iter());
        feature.extend(self.window_features(p.m2)?.iter());
        if self.config.sent_feat {
            feature.extend(self.window_features(p.sent)?.iter());
        }
        if self.config.cont_feat {
            feature.extend(self.window_features(p.between)?.iter());
        }
        if self.config.asymmetric {
            if p.order == 0 {
                feature.extend([1.0, 0.0]);
            } else {
                feature.extend([0.0, 1.0]);
            }
        }
        Ok(Array1::from(feature))
    }

    /// One feature row per candidate.
    pub fn featurise(&self, candidates: &[Candidate]) -> Result<Array2<f64>> {
        check_max_sentence_length(candidates, self.config.max_sentence_length);
        let dim = self.feature_dim();
        let mut matrix = Array2::<f64>::zeros((candidates.len(), dim));
        for (idx, candidate) in candidates.iter().enumerate() {
            candidate.validate()?;
            let windows = preprocess(candidate, self.config.window_size);
            let feature = self.gen_feature(&windows)?;
            if feature.len() != dim {
                return Err(RelError::Shape(format!(
                    "feature for candidate {} has {} values, expected {dim}",
                    candidate.id,
                    feature.len()
                )));
            }
            matrix.slice_mut(s![idx, ..]).assign(&feature);
        }
        debug!(rows = candidates.len(), dim, "generated features");
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::data::candidate::Span;

    fn candidate(tokens: &[&str], m1: (usize, usize), m2: (usize, usize)) -> Candidate {
        Candidate::new("c", tokens, Span::new(m1.0, m1.1), Span::new(m2.0, m2.1))
    }

    #[test]
    fn windows_are_clamped_to_sentence() {
        let c = candidate(&["a", "b", "c", "d", "e", "f"], (0, 0), (4, 5));
        let p = preprocess(&c, 1);
        assert_eq!(p.m1, &c.tokens[0..2]);
        assert_eq!(p.m2, &c.tokens[3..6]);
        assert_eq!(p.between, &c.tokens[1..4]);
        assert_eq!(p.order, 0);
    }

    #[test]
    fn overlapping_mentions_have_empty_between() {
        let c = candidate(&["a", "b", "c"], (1, 2), (0, 1));
        let p = preprocess(&c, 0);
        assert!(p.between.is_empty());
        assert_eq!(p.order, 1);
    }

    #[test]
    fn mean_row_is_unit_length() {
        let x = array![[1.0, 2.0], [3.0, 2.0]];
        let block = principal_components(&x, 1, 2).unwrap();
        let mean = block.slice(s![0..2]);
        assert!((mean.dot(&mean) - 1.0).abs() < 1e-12);
        // the spread is along the first axis only
        assert!((block[2].abs() - 1.0).abs() < 1e-9);
        assert!(block[3].abs() < 1e-9);
    }

    #[test]
    fn single_row_has_no_principal_axes() {
        let x = array![[0.0, 3.0, 4.0]];
        let block = principal_components(&x, 2, 3).unwrap();
        assert_eq!(block.len(), 9);
        assert!((block[1] - 0.6).abs() < 1e-12);
        assert!(block.slice(s![3..]).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn empty_window_is_all_zero() {
        let x = Array2::<f64>::zeros((0, 4));
        let block = principal_components(&x, 3, 4).unwrap();
        assert_eq!(block.len(), 16);
        assert!(block.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn axes_are_ordered_by_spread_with_positive_pivot() {
        // centred rows spread along [-2, 1, 0] (largest) then [0, 0, 1]
        let x = array![
            [-1.0, 2.0, 1.0],
            [3.0, 0.0, 1.0],
            [1.0, 1.0, 1.5],
            [1.0, 1.0, 0.5],
        ];
        let block = principal_components(&x, 3, 3).unwrap();
        let rows = block.into_shape((4, 3)).unwrap();
        let root5 = 5f64.sqrt();
        let close = |row: usize, want: [f64; 3]| {
            rows.row(row)
                .iter()
                .zip(want)
                .all(|(got, want)| (got - want).abs() < 1e-9)
        };
        let root3 = 3f64.sqrt();
        assert!(close(0, [1.0 / root3, 1.0 / root3, 1.0 / root3]));
        assert!(close(1, [2.0 / root5, -1.0 / root5, 0.0]));
        assert!(close(2, [0.0, 0.0, 1.0]));
        assert!(close(3, [0.0, 0.0, 0.0]));
    }
}

