//! Speaker recognition models.
//!
//! The pipeline has three layers:
//!
//! 1. [`Lbg`]: split-based vector quantization clustering.
//! 2. [`VqModel`] / [`GmmModel`]: per-speaker statistical models built
//!    on top of the clustering (codebooks, Gaussian mixtures).
//! 3. [`ModelRecognizer`]: the generic train/test/verify core that
//!    owns one model per speaker plus an optional background model and
//!    implements closed-set recognition, open-set verification and
//!    Z/T score normalization once for any [`SpeakerModel`].
//!
//! [`VqRecognizer`] and [`GmmRecognizer`] are the two concrete
//! recognizers the experiment engine drives through the object-safe
//! [`Recognizer`] trait.

mod error;
mod gmm;
mod lbg;
mod recognizer;
mod vq;

pub use error::RecognizerError;
pub use gmm::GmmModel;
pub use lbg::{Clustering, Lbg};
pub use recognizer::{
    GmmRecognizer, ModelRecognizer, RecognitionTally, Recognizer, ScoreNormalization,
    SpeakerModel, VqRecognizer,
};
pub use vq::VqModel;
