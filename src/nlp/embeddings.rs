//! Pretrained word and character embedding tables.
//!
//! Embedding files use the GloVe text layout: one symbol per line followed by
//! its vector, fields separated by single spaces. A line carrying more than
//! `dim + 1` fields is the entry for the space symbol itself.

use std::{collections::BTreeMap, path::Path};

use ndarray::{s, Array1, Array2};
use rand::{distributions::Uniform, Rng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    config::ModelConfig,
    data::candidate::Candidate,
    error::{RelError, Result},
    nlp::vocab::{SymbolTable, UNKNOWN_SYMBOL},
};

const INIT_SCALE: f64 = 0.01;

/// One parsed embedding line.
#[derive(Debug)]
struct EmbeddingLine {
    word: String,
    values: Vec<f64>,
}

fn apply_replacements(word: &str, replace: &BTreeMap<String, String>) -> String {
    replace
        .iter()
        .fold(word.to_string(), |acc, (from, to)| acc.replace(from.as_str(), to))
}

fn parse_line(
    path: &Path,
    line_no: usize,
    line: &str,
    dim: usize,
    replace: &BTreeMap<String, String>,
) -> Result<EmbeddingLine> {
    // Leading spaces mark the space symbol, trailing ones are padding.
    let fields: Vec<&str> = line.trim_end().split(' ').collect();
    let word = if fields.len() > dim + 1 {
        " ".to_string()
    } else {
        apply_replacements(fields[0], replace)
    };
    if fields.len() < dim {
        return Err(RelError::Parse {
            path: path.to_path_buf(),
            line: line_no,
            reason: format!("expected {dim} values, found {}", fields.len()),
        });
    }
    let values = fields[fields.len() - dim..]
        .iter()
        .map(|v| {
            v.parse::<f64>().map_err(|err| RelError::Parse {
                path: path.to_path_buf(),
                line: line_no,
                reason: format!("bad value {v:?}: {err}"),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(EmbeddingLine { word, values })
}

fn read_lines(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|err| RelError::io(path, err))
}

fn non_empty_lines(raw: &str) -> impl Iterator<Item = (usize, &str)> {
    raw.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.trim().is_empty())
}

/// Symbols named by an embedding file, in file order.
pub fn read_embedding_words(
    path: &Path,
    dim: usize,
    replace: &BTreeMap<String, String>,
) -> Result<Vec<String>> {
    let raw = read_lines(path)?;
    non_empty_lines(&raw)
        .map(|(line_no, line)| parse_line(path, line_no, line, dim, replace).map(|l| l.word))
        .collect()
}

/// A symbol table paired with one embedding row per symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingTable {
    pub dict: SymbolTable,
    pub matrix: Array2<f64>,
}

impl EmbeddingTable {
    /// Dictionary covering every symbol of an embedding file.
    pub fn build_dict(
        path: &Path,
        dim: usize,
        replace: &BTreeMap<String, String>,
    ) -> Result<SymbolTable> {
        let mut dict = SymbolTable::new();
        for word in read_embedding_words(path, dim, replace)? {
            dict.get(&word);
        }
        Ok(dict)
    }

    /// Random-initialise a row per symbol, then overwrite the rows the file
    /// provides vectors for.
    pub fn load<R: Rng>(
        dict: SymbolTable,
        path: &Path,
        dim: usize,
        replace: &BTreeMap<String, String>,
        rng: &mut R,
    ) -> Result<Self> {
        let dist = Uniform::new(-INIT_SCALE, INIT_SCALE);
        let mut matrix = Array2::from_shape_simple_fn((dict.len(), dim), || rng.sample(&dist));

        let raw = read_lines(path)?;
        let mut found = 0usize;
        for (line_no, line) in non_empty_lines(&raw) {
            let entry = parse_line(path, line_no, line, dim, replace)?;
            let id = dict.lookup(&entry.word);
            if id != UNKNOWN_SYMBOL {
                matrix
                    .slice_mut(s![id, ..])
                    .assign(&Array1::from(entry.values));
                found += 1;
            }
        }
        info!(
            path = %path.display(),
            symbols = dict.len(),
            pretrained = found,
            dim,
            "loaded embeddings"
        );
        Ok(Self { dict, matrix })
    }

    pub fn dim(&self) -> usize {
        self.matrix.ncols()
    }

    /// Stack the rows for `symbols`; unknown symbols share the unknown row.
    pub fn rows<'a, I>(&self, symbols: I) -> Array2<f64>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ids: Vec<usize> = symbols.into_iter().map(|s| self.dict.lookup(s)).collect();
        self.matrix.select(ndarray::Axis(0), &ids)
    }
}

/// Word table plus the optional character table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embeddings {
    pub word: EmbeddingTable,
    pub char: Option<EmbeddingTable>,
}

/// Dictionaries built from candidate text rather than embedding files.
#[derive(Debug, Clone, Default)]
pub struct Dictionaries {
    pub word: Option<SymbolTable>,
    pub char: Option<SymbolTable>,
}

/// Build word and/or char tables over the text of candidate sets.
pub fn create_dict(candidate_sets: &[&[Candidate]], word: bool, char: bool) -> Dictionaries {
    let mut words = word.then(SymbolTable::new);
    let mut chars = char.then(SymbolTable::new);
    for candidate in candidate_sets.iter().flat_map(|set| set.iter()) {
        if let Some(table) = words.as_mut() {
            for token in &candidate.tokens {
                table.get(token);
            }
        }
        if let Some(table) = chars.as_mut() {
            let mut buf = [0u8; 4];
            for ch in candidate.tokens.join(" ").chars() {
                table.get(ch.encode_utf8(&mut buf));
            }
        }
    }
    debug!(
        words = ?words.as_ref().map(SymbolTable::len),
        chars = ?chars.as_ref().map(SymbolTable::len),
        "built dictionaries from candidates"
    );
    Dictionaries {
        word: words,
        char: chars,
    }
}

impl Embeddings {
    /// Load every table the config asks for. Dictionaries passed in are used
    /// as-is; missing ones are built from the embedding files.
    pub fn load<R: Rng>(config: &ModelConfig, dicts: Dictionaries, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let word_path = config
            .word_emb_path
            .as_deref()
            .ok_or_else(|| RelError::Config("word_emb_path is required".into()))?;
        let word_dim = config.word_dim();
        let word_dict = match dicts.word {
            Some(dict) => dict,
            None => EmbeddingTable::build_dict(word_path, word_dim, &config.replace)?,
        };
        let word = EmbeddingTable::load(word_dict, word_path, word_dim, &config.replace, rng)?;

        let char = if config.char {
            let char_path = config
                .char_emb_path
                .as_deref()
                .ok_or_else(|| RelError::Config("char_emb_path is required".into()))?;
            let char_dim = config.char_dim();
            let char_dict = match dicts.char {
                Some(dict) => dict,
                None => EmbeddingTable::build_dict(char_path, char_dim, &config.replace)?,
            };
            Some(EmbeddingTable::load(
                char_dict,
                char_path,
                char_dim,
                &config.replace,
                rng,
            )?)
        } else {
            None
        };

        Ok(Self { word, char })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_line_is_the_space_symbol() {
        let line = parse_line(Path::new("e.txt"), 1, "  0.5 0.25", 2, &BTreeMap::new()).unwrap();
        assert_eq!(line.word, " ");
        assert_eq!(line.values, vec![0.5, 0.25]);
    }

    #[test]
    fn replacements_apply_to_words() {
        let mut replace = BTreeMap::new();
        replace.insert("<num>".to_string(), "0".to_string());
        let line = parse_line(Path::new("e.txt"), 1, "<num> 1 2", 2, &replace).unwrap();
        assert_eq!(line.word, "0");
    }

    #[test]
    fn short_line_is_an_error() {
        let err = parse_line(Path::new("e.txt"), 7, "word", 3, &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains(":7:"));
    }

    #[test]
    fn trailing_space_is_ignored() {
        let line = parse_line(Path::new("e.txt"), 1, "drug 1 2 ", 2, &BTreeMap::new()).unwrap();
        assert_eq!(line.word, "drug");
        assert_eq!(line.values, vec![1.0, 2.0]);
    }
}
