//! Per-speaker feature vector corpus.
//!
//! A [`SpeechData`] maps speaker ids to ordered sequences of feature
//! vectors. Corpora are built additively by one or more
//! [`load_text_samples`] calls, optionally normalized, queried during
//! model training and scoring, and dropped at the end of a run.
//!
//! A corpus is *consistent* when every vector across every speaker has
//! the same dimensionality; the dimension count is undefined otherwise.

mod corpus;
mod error;
mod load;

pub use corpus::{NormalizationKind, SpeechData};
pub use error::SpeechError;
pub use load::{load_text_samples, speaker_id};

/// A single feature vector. Arithmetic over samples uses f64
/// intermediates; storage is f32.
pub type Sample = Vec<f32>;
