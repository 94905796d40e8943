//! Word and character symbol tables.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{RelError, Result};

pub const UNKNOWN_SYMBOL: usize = 1;
const STARTING_SYMBOL: usize = 2;

/// Maps strings to dense ids; ids double as embedding row indices. Id 0 is
/// reserved for padding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: HashMap<String, usize>,
    next: usize,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self {
            symbols: HashMap::new(),
            next: STARTING_SYMBOL,
        }
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `word`, inserting it if needed.
    pub fn get(&mut self, word: &str) -> usize {
        if let Some(&id) = self.symbols.get(word) {
            return id;
        }
        let id = self.next;
        self.symbols.insert(word.to_string(), id);
        self.next += 1;
        id
    }

    /// Id of `word`, or [`UNKNOWN_SYMBOL`].
    pub fn lookup(&self, word: &str) -> usize {
        self.symbols.get(word).copied().unwrap_or(UNKNOWN_SYMBOL)
    }

    pub fn lookup_strict(&self, word: &str) -> Result<usize> {
        self.symbols
            .get(word)
            .copied()
            .ok_or_else(|| RelError::UnknownSymbol(word.to_string()))
    }

    /// Number of embedding rows needed, reserved ids included.
    pub fn len(&self) -> usize {
        self.next
    }

    /// True when no symbol beyond the reserved ids has been added.
    pub fn is_empty(&self) -> bool {
        self.len() == STARTING_SYMBOL
    }
}
