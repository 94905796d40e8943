#![allow(dead_code)]

use std::{fs, path::Path};

use relpca::{
    config::ModelConfig,
    data::candidate::{Candidate, Span},
};

pub fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

/// Three-dimensional word vectors where the verb decides the relation.
pub const WORD_VECTORS: &str = "\
drug 0 0 1
event 0.5 0.5 0.5
causes 1 0 0
treats 0 1 0
the 0.2 0.1 0.3
";

pub const CHAR_VECTORS: &str = "  0.1 0.2
a 1 0
b 0 1
c 0.5 0.5
";

pub fn word_only_config(dir: &Path) -> ModelConfig {
    ModelConfig {
        char: false,
        word_emb_dim: Some(3),
        word_emb_path: Some(write(dir, "words.txt", WORD_VECTORS)),
        r: 1,
        window_size: 0,
        n_epochs: 200,
        lr: 0.05,
        batch_size: 2,
        ..ModelConfig::default()
    }
}

/// Alternating positive ("causes") and negative ("treats") candidates.
pub fn candidates(n: usize) -> Vec<Candidate> {
    (0..n)
        .map(|i| {
            let verb = if i % 2 == 0 { "causes" } else { "treats" };
            Candidate::new(
                format!("c{i}"),
                &["the", "drug", verb, "event"],
                Span::new(1, 1),
                Span::new(3, 3),
            )
        })
        .collect()
}

pub fn gold(n: usize) -> Vec<i64> {
    (0..n).map(|i| if i % 2 == 0 { 1 } else { -1 }).collect()
}

pub fn soft_labels(n: usize) -> Vec<f64> {
    (0..n).map(|i| if i % 2 == 0 { 0.9 } else { 0.1 }).collect()
}
