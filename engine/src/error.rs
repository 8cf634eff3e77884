use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a whole experiment run.
///
/// Grammar violations are fatal by design: a malformed script would
/// silently skew a large experiment matrix. Missing speakers inside a
/// parsed run are recoverable and only logged.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("script line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("duplicate test identifier '{id}' on line {line}")]
    DuplicateTestId { id: String, line: usize },

    #[error("test '{id}': targets are only supported in recognition")]
    TargetOnVerification { id: String },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Speech(#[from] sprec_speech::SpeechError),

    #[error("report serialization: {0}")]
    Report(#[from] serde_json::Error),
}
