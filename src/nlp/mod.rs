//! Relation feature extraction and classification layer.

pub mod checkpoint;
pub mod embeddings;
pub mod features;
pub mod linear;
pub mod relclf;
pub mod vocab;

pub use relclf::{DevSet, PcaRelationModel, Score, TrainOptions};
