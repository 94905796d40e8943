//! Principal-component relation features and a noise-aware linear classifier.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod nlp;

pub use error::{RelError, Result};
