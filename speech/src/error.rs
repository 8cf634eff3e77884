use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by corpus loading operations.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed sample in {path} line {line}: {reason}")]
    MalformedSample {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}
