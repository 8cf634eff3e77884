use std::collections::BTreeMap;

use crate::Sample;

/// Feature-level normalization applied to a corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizationKind {
    /// Leave samples as loaded.
    #[default]
    None,
    /// Subtract the per-speaker mean from every sample (cepstral mean
    /// subtraction). Removes stationary channel effects.
    CepstralMean,
}

/// Feature vectors for multiple speakers, keyed by speaker id.
///
/// Keys are plain strings; map iteration order is the raw string order,
/// which keeps training and scoring deterministic across runs.
#[derive(Debug, Clone, Default)]
pub struct SpeechData {
    samples: BTreeMap<String, Vec<Sample>>,
    normalization: NormalizationKind,
    consistent: bool,
    dimension: usize,
    total_samples: usize,
}

impl SpeechData {
    /// Creates an empty corpus.
    pub fn new() -> Self {
        Self {
            samples: BTreeMap::new(),
            normalization: NormalizationKind::None,
            consistent: true,
            dimension: 0,
            total_samples: 0,
        }
    }

    /// Appends one feature vector to a speaker. Loads are additive;
    /// call [`SpeechData::validate`] after a batch of appends.
    pub fn add_sample(&mut self, key: &str, sample: Sample) {
        self.samples.entry(key.to_string()).or_default().push(sample);
    }

    /// Recomputes the consistency flag, dimension count and total
    /// sample count from the current contents.
    pub fn validate(&mut self) {
        self.consistent = true;
        self.dimension = 0;
        self.total_samples = 0;

        for vectors in self.samples.values() {
            for v in vectors {
                if self.dimension == 0 {
                    self.dimension = v.len();
                } else if v.len() != self.dimension {
                    self.consistent = false;
                }
                self.total_samples += 1;
            }
        }

        if !self.consistent {
            self.dimension = 0;
        }
    }

    /// Removes all loaded data. Normalization mode is kept.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.consistent = true;
        self.dimension = 0;
        self.total_samples = 0;
    }

    /// True when every sample of every speaker has the same
    /// dimensionality. An empty corpus is consistent.
    pub fn is_consistent(&self) -> bool {
        self.consistent
    }

    /// True when both corpora are consistent and share a dimension
    /// count (either may be empty).
    pub fn is_compatible(&self, other: &SpeechData) -> bool {
        if !self.consistent || !other.consistent {
            return false;
        }
        self.dimension == 0 || other.dimension == 0 || self.dimension == other.dimension
    }

    /// Common sample dimensionality. Undefined (0) when inconsistent
    /// or empty.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of loaded speakers.
    pub fn speaker_count(&self) -> usize {
        self.samples.len()
    }

    /// Total number of samples over all speakers.
    pub fn total_sample_count(&self) -> usize {
        self.total_samples
    }

    /// Sets the normalization applied by [`SpeechData::normalize`].
    pub fn set_normalization(&mut self, kind: NormalizationKind) {
        self.normalization = kind;
    }

    /// Current normalization mode.
    pub fn normalization(&self) -> NormalizationKind {
        self.normalization
    }

    /// Applies the configured normalization in place.
    ///
    /// Cepstral mean subtraction computes the per-speaker mean vector
    /// and subtracts it from every sample of that speaker. Requires a
    /// consistent corpus; inconsistent data is left untouched.
    pub fn normalize(&mut self) {
        if self.normalization != NormalizationKind::CepstralMean || !self.consistent {
            return;
        }

        for vectors in self.samples.values_mut() {
            if vectors.is_empty() {
                continue;
            }
            let dim = vectors[0].len();
            let mut mean = vec![0.0f64; dim];
            for v in vectors.iter() {
                for (m, &x) in mean.iter_mut().zip(v.iter()) {
                    *m += x as f64;
                }
            }
            let n = vectors.len() as f64;
            for m in &mut mean {
                *m /= n;
            }
            for v in vectors.iter_mut() {
                for (x, &m) in v.iter_mut().zip(mean.iter()) {
                    *x -= m as f32;
                }
            }
        }
    }

    /// All samples keyed by speaker id.
    pub fn samples(&self) -> &BTreeMap<String, Vec<Sample>> {
        &self.samples
    }

    /// Samples of a single speaker, if loaded.
    pub fn speaker_samples(&self, key: &str) -> Option<&Vec<Sample>> {
        self.samples.get(key)
    }
}
