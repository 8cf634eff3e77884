use thiserror::Error;

/// Errors returned by clustering and model training.
#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("cannot cluster an empty sample set")]
    EmptySamples,

    #[error("cluster count must be positive")]
    ZeroClusterCount,

    #[error("cluster count must be a power of two, got {got}")]
    ClusterCountNotPowerOfTwo { got: usize },

    #[error("no training data bound")]
    NoTrainingData,

    #[error("background model required but no background data bound")]
    NoBackgroundData,
}
