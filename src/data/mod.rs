//! Candidate inputs and weak-supervision label handling.

pub mod candidate;
pub mod labels;
