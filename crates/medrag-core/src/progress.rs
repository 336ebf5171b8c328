//! Progress events emitted by multi-stage operations.
//!
//! Observers receive events over an optional channel; a missing or closed
//! receiver never changes the operation's outcome.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStage {
    Chunking,
    Embedding,
    Storing,
    Complete,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IngestStage::Chunking => "chunking",
            IngestStage::Embedding => "embedding",
            IngestStage::Storing => "storing",
            IngestStage::Complete => "complete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestProgress {
    pub stage: IngestStage,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

impl IngestProgress {
    pub fn new(stage: IngestStage, current: usize, total: usize, message: impl Into<String>) -> Self {
        Self { stage, current, total, message: message.into() }
    }
}
