mod common;

use proptest::prelude::*;
use relpca::{
    data::candidate::{Candidate, Span},
    nlp::{
        embeddings::{Dictionaries, Embeddings},
        features::{preprocess, FeatureExtractor},
    },
};
use rand::{rngs::StdRng, SeedableRng};
use tempfile::tempdir;

#[test]
fn feature_vector_has_expected_shape() {
    let dir = tempdir().unwrap();
    let mut config = common::word_only_config(dir.path());
    config.char = true;
    config.char_emb_dim = Some(2);
    config.char_emb_path = Some(common::write(dir.path(), "c.txt", common::CHAR_VECTORS));
    config.asymmetric = true;

    let mut rng = StdRng::seed_from_u64(0);
    let embeddings = Embeddings::load(&config, Dictionaries::default(), &mut rng).unwrap();
    let extractor = FeatureExtractor::new(&config, &embeddings);

    // four blocks of (r + 1) rows over word and char widths, plus the order flag
    assert_eq!(extractor.feature_dim(), 4 * 2 * (3 + 2) + 2);

    let cands = common::candidates(3);
    let features = extractor.featurise(&cands).unwrap();
    assert_eq!(features.dim(), (3, extractor.feature_dim()));
    let row = features.row(0);
    let n = row.len();
    assert_eq!((row[n - 2], row[n - 1]), (1.0, 0.0));
}

#[test]
fn between_block_reflects_the_verb() {
    let dir = tempdir().unwrap();
    let config = common::word_only_config(dir.path());
    let mut rng = StdRng::seed_from_u64(0);
    let embeddings = Embeddings::load(&config, Dictionaries::default(), &mut rng).unwrap();
    let extractor = FeatureExtractor::new(&config, &embeddings);

    let cands = common::candidates(2);
    let features = extractor.featurise(&cands).unwrap();
    // blocks: m1, m2, sentence, between; each is 2 rows of width 3
    let between = |i: usize| features.row(i).slice(ndarray::s![18..21]).to_vec();
    assert_eq!(between(0), vec![1.0, 0.0, 0.0]);
    assert_eq!(between(1), vec![0.0, 1.0, 0.0]);
}

#[test]
fn adjacent_mentions_have_zero_between_block() {
    let dir = tempdir().unwrap();
    let config = common::word_only_config(dir.path());
    let mut rng = StdRng::seed_from_u64(0);
    let embeddings = Embeddings::load(&config, Dictionaries::default(), &mut rng).unwrap();
    let extractor = FeatureExtractor::new(&config, &embeddings);

    let cand = Candidate::new("adj", &["drug", "event"], Span::new(0, 0), Span::new(1, 1));
    let feature = extractor.gen_feature(&preprocess(&cand, 0)).unwrap();
    assert!(feature.slice(ndarray::s![18..24]).iter().all(|v| *v == 0.0));
}

fn arb_candidate() -> impl Strategy<Value = (Candidate, usize)> {
    (1usize..30, 0usize..6).prop_flat_map(|(n, k)| {
        let span = (0..n).prop_flat_map(move |s| (Just(s), s..n));
        (span.clone(), span, Just(n), Just(k))
            .prop_map(|((s1, e1), (s2, e2), n, k)| {
                let tokens: Vec<String> = (0..n).map(|i| format!("w{i}")).collect();
                let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
                (
                    Candidate::new("p", &refs, Span::new(s1, e1), Span::new(s2, e2)),
                    k,
                )
            })
    })
}

proptest! {
    #[test]
    fn windows_cover_their_mentions((cand, k) in arb_candidate()) {
        let p = preprocess(&cand, k);
        let [a, b] = cand.mentions;
        for (window, span) in [(p.m1, a), (p.m2, b)] {
            for idx in span.word_start..=span.word_end {
                prop_assert!(window.contains(&cand.tokens[idx]));
            }
            prop_assert!(window.len() <= span.word_end - span.word_start + 1 + 2 * k);
        }
        let gap = a.word_start.max(b.word_start) as i64 - a.word_end.min(b.word_end) as i64 - 1;
        prop_assert_eq!(p.between.len() as i64, gap.max(0));
        prop_assert_eq!(p.sent.len(), cand.tokens.len());
    }
}
