use crate::error::{ErrorKind, SegmaskError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A file whose job finished with at least one result image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub source_path: PathBuf,
    /// Result image URLs in the order the service returned them. Never empty.
    pub result_image_urls: Vec<String>,
}

/// A file that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub source_path: PathBuf,
    pub message: String,
    pub kind: ErrorKind,
}

impl ItemFailure {
    pub fn from_error(source_path: PathBuf, error: &SegmaskError) -> Self {
        Self { source_path, message: error.to_string(), kind: error.kind() }
    }
}

/// Per-batch bookkeeping, filled in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub succeeded: Vec<ItemResult>,
    pub failed: Vec<ItemFailure>,
}

impl BatchOutcome {
    pub fn processed(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// "N succeeded / M failed".
    pub fn summary(&self) -> String {
        format!("{} succeeded / {} failed", self.succeeded.len(), self.failed.len())
    }
}
