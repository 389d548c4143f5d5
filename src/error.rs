//! Error classification for the segmentation steps
//!
//! Functions return `crate::Result` (anyhow); failures that a caller needs to
//! tell apart are raised as a [`SegmentError`] and can be recovered with
//! `err.downcast_ref::<SegmentError>()`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SegmentError {
    /// The document store could not be reached or a read failed mid-stream
    #[error("Store connectivity error: {0}")]
    Connectivity(String),

    /// The cluster step was run before the extract step produced its table
    #[error("Missing input: {} not found (run the extract step first)", .path.display())]
    MissingInput { path: PathBuf },

    /// A store export file could not be parsed
    #[error("Snapshot error in {}: {reason}", .path.display())]
    Snapshot { path: PathBuf, reason: String },

    /// The feature table does not have the expected shape
    #[error("Invalid feature table: {0}")]
    InvalidTable(String),
}

impl From<mongodb::error::Error> for SegmentError {
    fn from(err: mongodb::error::Error) -> Self {
        SegmentError::Connectivity(err.to_string())
    }
}
