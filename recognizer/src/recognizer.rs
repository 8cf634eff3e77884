use std::collections::BTreeMap;
use std::sync::Arc;

use sprec_speech::{Sample, SpeechData};
use tracing::{debug, warn};

use crate::RecognizerError;

/// Default model complexity (clusters for VQ, components for GMM).
const DEFAULT_ORDER: usize = 128;

/// A per-speaker statistical model the recognizer core can drive.
///
/// Scores are oriented so that higher is always a better match (VQ
/// returns negated distortion, GMM average log-likelihood).
pub trait SpeakerModel: Default + Clone + std::fmt::Debug {
    /// Builds the model from scratch at the given order.
    fn train(&mut self, samples: &[Sample], order: usize) -> Result<(), RecognizerError>;

    /// Builds the model by adapting the background model toward the
    /// given enrollment samples (MAP-style shrinkage).
    fn adapt(
        &mut self,
        background: &Self,
        samples: &[Sample],
        order: usize,
    ) -> Result<(), RecognizerError>;

    /// Match score of a sample sequence against this model.
    fn score(&self, samples: &[Sample]) -> f64;

    /// Trained model order.
    fn order(&self) -> usize;

    /// True once the model holds trained parameters.
    fn is_trained(&self) -> bool;

    /// Cross-speaker reweighting against sibling models. Only VQ
    /// codebooks implement this; the default is a no-op.
    fn weigh_against(&mut self, _siblings: &[Self]) {}
}

/// Verification score normalization variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ScoreNormalization {
    #[default]
    None,
    /// Z-norm: subtract impostor-population statistics of the claimed
    /// model scored over impostor utterances.
    Zero,
    /// T-norm: subtract statistics of the test utterance scored over
    /// impostor models.
    Test,
    /// Z-norm, then T-norm over z-normalized impostor scores.
    ZeroTest,
    /// T-norm, then Z-norm over t-normalized impostor scores.
    TestZero,
}

/// Aggregated closed-set recognition outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecognitionTally {
    pub correct: usize,
    pub incorrect: usize,
}

/// Object-safe recognizer surface the experiment engine drives.
pub trait Recognizer {
    fn set_order(&mut self, order: usize);
    fn set_background_model_enabled(&mut self, enabled: bool);
    fn set_adaptation_enabled(&mut self, enabled: bool);
    fn set_score_normalization(&mut self, kind: ScoreNormalization);
    fn set_weighting_enabled(&mut self, enabled: bool);

    /// Binds the training corpus. Training is lazy: models are built
    /// on the next train/test/verify call.
    fn set_speaker_data(&mut self, data: Arc<SpeechData>);

    /// Binds the background (UBM) corpus.
    fn set_background_data(&mut self, data: Arc<SpeechData>);

    /// Currently bound training corpus.
    fn speaker_data(&self) -> Option<Arc<SpeechData>>;

    /// Trains one model per speaker in the bound corpus, plus the
    /// background model when enabled.
    fn train(&mut self) -> Result<(), RecognizerError>;

    /// Narrows the active model set for test/verify. Keys without a
    /// trained model are logged and skipped.
    fn select_speaker_models(&mut self, keys: &[String]);

    /// Narrows the impostor model set used for score normalization.
    fn select_impostor_models(&mut self, keys: &[String]);

    /// Closed-set recognition over every labeled sequence in `data`.
    fn test(&mut self, data: &SpeechData) -> RecognitionTally;

    /// Single-utterance form of the recognition decision rule.
    fn is_recognized(&mut self, true_key: &str, samples: &[Sample]) -> bool;

    /// Open-set verification of a claimed identity; one score per
    /// configured normalization output.
    fn verify(&mut self, claimed: &str, data: &SpeechData) -> Vec<f64>;
}

/// Generic recognizer core: owns one trained model per speaker plus an
/// optional shared background model, and implements the recognition,
/// verification and score normalization contracts once for any
/// [`SpeakerModel`].
///
/// Configuration mutators mark the instance dirty; models are rebuilt
/// lazily on the next operation that needs them. Re-binding identical
/// data or configuration does not retrain, which is what makes corpus
/// reuse across sorted experiment batches cheap.
#[derive(Debug, Default)]
pub struct ModelRecognizer<M: SpeakerModel> {
    order: usize,
    background_enabled: bool,
    adaptation_enabled: bool,
    weighting_enabled: bool,
    normalization: ScoreNormalization,

    speaker_data: Option<Arc<SpeechData>>,
    background_data: Option<Arc<SpeechData>>,

    models: BTreeMap<String, M>,
    background: Option<M>,
    selected_speakers: Vec<String>,
    selected_impostors: Vec<String>,

    dirty: bool,
}

/// VQ codebook recognizer.
pub type VqRecognizer = ModelRecognizer<crate::VqModel>;

/// Gaussian mixture recognizer.
pub type GmmRecognizer = ModelRecognizer<crate::GmmModel>;

impl<M: SpeakerModel> ModelRecognizer<M> {
    pub fn new() -> Self {
        Self {
            order: DEFAULT_ORDER,
            dirty: true,
            ..Self::default()
        }
    }

    /// Trained per-speaker models.
    pub fn models(&self) -> &BTreeMap<String, M> {
        &self.models
    }

    /// The trained background model, if any.
    pub fn background(&self) -> Option<&M> {
        self.background.as_ref()
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn ensure_trained(&mut self) -> bool {
        if !self.dirty {
            return true;
        }
        match self.train_models() {
            Ok(()) => true,
            Err(e) => {
                warn!("recognizer not trained: {e}");
                false
            }
        }
    }

    fn train_models(&mut self) -> Result<(), RecognizerError> {
        let data = self
            .speaker_data
            .clone()
            .ok_or(RecognizerError::NoTrainingData)?;

        self.background = None;
        if self.background_enabled {
            match &self.background_data {
                Some(bg_data) if bg_data.total_sample_count() > 0 => {
                    let pooled: Vec<Sample> = bg_data
                        .samples()
                        .values()
                        .flat_map(|v| v.iter().cloned())
                        .collect();
                    let mut bg = M::default();
                    bg.train(&pooled, self.order)?;
                    self.background = Some(bg);
                }
                _ => {
                    // Degenerate but not fatal: scoring proceeds
                    // without background normalization.
                    warn!("background model enabled but no background data available");
                }
            }
        }

        self.models.clear();
        for (key, samples) in data.samples() {
            let mut model = M::default();
            let result = match (&self.background, self.adaptation_enabled) {
                (Some(bg), true) => model.adapt(bg, samples, self.order),
                _ => model.train(samples, self.order),
            };
            match result {
                Ok(()) => {
                    self.models.insert(key.clone(), model);
                }
                Err(e) => {
                    // Tolerate bad speakers inside a long batch.
                    warn!("skipping speaker '{key}': {e}");
                }
            }
        }

        if self.weighting_enabled {
            let snapshot: Vec<(String, M)> = self
                .models
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            if let Some(bg) = &mut self.background {
                let all: Vec<M> = snapshot.iter().map(|(_, m)| m.clone()).collect();
                bg.weigh_against(&all);
            }
            for (key, model) in &mut self.models {
                let siblings: Vec<M> = snapshot
                    .iter()
                    .filter(|(k, _)| k != key)
                    .map(|(_, m)| m.clone())
                    .collect();
                model.weigh_against(&siblings);
            }
        }

        // A fresh training selects everything; the engine narrows the
        // sets afterwards.
        self.selected_speakers = self.models.keys().cloned().collect();
        self.selected_impostors.clear();
        self.dirty = false;

        debug!(
            "trained {} speaker models (order {}, background: {})",
            self.models.len(),
            self.order,
            self.background.is_some()
        );
        Ok(())
    }

    /// Model score with background compensation when enabled.
    fn relative_score(&self, model: &M, samples: &[Sample]) -> f64 {
        let raw = model.score(samples);
        match &self.background {
            Some(bg) => raw - bg.score(samples),
            None => raw,
        }
    }

    /// Arg-best selected speaker for a sample sequence.
    fn best_match(&self, samples: &[Sample]) -> Option<&str> {
        let mut best: Option<(&str, f64)> = None;
        for key in &self.selected_speakers {
            let Some(model) = self.models.get(key) else {
                continue;
            };
            let score = self.relative_score(model, samples);
            match best {
                Some((_, s)) if s >= score => {}
                _ => best = Some((key, score)),
            }
        }
        best.map(|(k, _)| k)
    }

    /// Impostor keys usable against the given claimed key.
    fn impostors_for<'a>(&'a self, claimed: &str) -> Vec<&'a str> {
        self.selected_impostors
            .iter()
            .filter(|k| k.as_str() != claimed && self.models.contains_key(k.as_str()))
            .map(|k| k.as_str())
            .collect()
    }

    /// Z-norm population: the key's model scored over each impostor's
    /// training utterances.
    fn zero_population(&self, key: &str) -> Vec<f64> {
        let Some(model) = self.models.get(key) else {
            return Vec::new();
        };
        let Some(data) = &self.speaker_data else {
            return Vec::new();
        };
        self.impostors_for(key)
            .iter()
            .filter_map(|ik| data.speaker_samples(ik))
            .map(|utterances| self.relative_score(model, utterances))
            .collect()
    }

    /// T-norm population: the utterance scored over each impostor
    /// model.
    fn test_population(&self, claimed: &str, samples: &[Sample]) -> Vec<f64> {
        self.impostors_for(claimed)
            .iter()
            .filter_map(|ik| self.models.get(*ik))
            .map(|model| self.relative_score(model, samples))
            .collect()
    }

    fn zero_normalize(&self, key: &str, score: f64) -> f64 {
        normalize(score, &self.zero_population(key), "zero")
    }

    fn test_normalize(&self, claimed: &str, samples: &[Sample], score: f64) -> f64 {
        normalize(score, &self.test_population(claimed, samples), "test")
    }

    fn verify_score(&self, claimed: &str, samples: &[Sample]) -> Option<f64> {
        let model = self.models.get(claimed)?;
        let raw = self.relative_score(model, samples);

        let score = match self.normalization {
            ScoreNormalization::None => raw,
            ScoreNormalization::Zero => self.zero_normalize(claimed, raw),
            ScoreNormalization::Test => self.test_normalize(claimed, samples, raw),
            ScoreNormalization::ZeroTest => {
                // Z first, then T over per-model z-normalized impostor
                // scores so the stages do not collapse into one affine
                // map.
                let z = self.zero_normalize(claimed, raw);
                let population: Vec<f64> = self
                    .impostors_for(claimed)
                    .iter()
                    .filter_map(|ik| {
                        let m = self.models.get(*ik)?;
                        Some(self.zero_normalize(ik, self.relative_score(m, samples)))
                    })
                    .collect();
                normalize(z, &population, "zero-test")
            }
            ScoreNormalization::TestZero => {
                let t = self.test_normalize(claimed, samples, raw);
                let data = self.speaker_data.as_ref();
                let population: Vec<f64> = self
                    .impostors_for(claimed)
                    .iter()
                    .filter_map(|ik| {
                        let utterances = data?.speaker_samples(ik)?;
                        let s = self.relative_score(model, utterances);
                        Some(self.test_normalize(claimed, utterances, s))
                    })
                    .collect();
                normalize(t, &population, "test-zero")
            }
        };
        Some(score)
    }
}

impl<M: SpeakerModel> Recognizer for ModelRecognizer<M> {
    fn set_order(&mut self, order: usize) {
        if self.order != order {
            self.order = order;
            self.mark_dirty();
        }
    }

    fn set_background_model_enabled(&mut self, enabled: bool) {
        if self.background_enabled != enabled {
            self.background_enabled = enabled;
            self.mark_dirty();
        }
    }

    fn set_adaptation_enabled(&mut self, enabled: bool) {
        if self.adaptation_enabled != enabled {
            self.adaptation_enabled = enabled;
            self.mark_dirty();
        }
    }

    fn set_score_normalization(&mut self, kind: ScoreNormalization) {
        // Normalization affects scoring only; no retrain needed.
        self.normalization = kind;
    }

    fn set_weighting_enabled(&mut self, enabled: bool) {
        if self.weighting_enabled != enabled {
            self.weighting_enabled = enabled;
            self.mark_dirty();
        }
    }

    fn set_speaker_data(&mut self, data: Arc<SpeechData>) {
        let unchanged = self
            .speaker_data
            .as_ref()
            .is_some_and(|d| Arc::ptr_eq(d, &data));
        if !unchanged {
            self.speaker_data = Some(data);
            self.mark_dirty();
        }
    }

    fn set_background_data(&mut self, data: Arc<SpeechData>) {
        let unchanged = self
            .background_data
            .as_ref()
            .is_some_and(|d| Arc::ptr_eq(d, &data));
        if !unchanged {
            self.background_data = Some(data);
            self.mark_dirty();
        }
    }

    fn speaker_data(&self) -> Option<Arc<SpeechData>> {
        self.speaker_data.clone()
    }

    fn train(&mut self) -> Result<(), RecognizerError> {
        self.train_models()
    }

    fn select_speaker_models(&mut self, keys: &[String]) {
        if self.ensure_trained() {
            self.selected_speakers = keys
                .iter()
                .filter(|k| {
                    let known = self.models.contains_key(*k);
                    if !known {
                        warn!("no trained model for speaker '{k}', skipping");
                    }
                    known
                })
                .cloned()
                .collect();
        } else {
            self.selected_speakers = keys.to_vec();
        }
    }

    fn select_impostor_models(&mut self, keys: &[String]) {
        if self.ensure_trained() {
            self.selected_impostors = keys
                .iter()
                .filter(|k| {
                    let known = self.models.contains_key(*k);
                    if !known {
                        warn!("no trained model for impostor '{k}', skipping");
                    }
                    known
                })
                .cloned()
                .collect();
        } else {
            self.selected_impostors = keys.to_vec();
        }
    }

    fn test(&mut self, data: &SpeechData) -> RecognitionTally {
        let mut tally = RecognitionTally::default();
        if !self.ensure_trained() {
            return tally;
        }

        for (key, samples) in data.samples() {
            match self.best_match(samples) {
                Some(predicted) if predicted == key => tally.correct += 1,
                Some(_) => tally.incorrect += 1,
                None => {}
            }
        }
        tally
    }

    fn is_recognized(&mut self, true_key: &str, samples: &[Sample]) -> bool {
        if !self.ensure_trained() {
            return false;
        }
        self.best_match(samples) == Some(true_key)
    }

    fn verify(&mut self, claimed: &str, data: &SpeechData) -> Vec<f64> {
        if !self.ensure_trained() {
            return Vec::new();
        }

        let samples: Vec<Sample> = data
            .samples()
            .values()
            .flat_map(|v| v.iter().cloned())
            .collect();
        if samples.is_empty() {
            warn!("verification against an empty corpus");
            return Vec::new();
        }

        match self.verify_score(claimed, &samples) {
            Some(score) => vec![score],
            None => {
                warn!("no trained model for claimed speaker '{claimed}'");
                Vec::new()
            }
        }
    }
}

/// Affine normalization against a population; falls back to the raw
/// score when the population is too small for meaningful statistics.
fn normalize(score: f64, population: &[f64], stage: &str) -> f64 {
    if population.len() < 2 {
        warn!("{stage}-normalization skipped: {} impostor scores", population.len());
        return score;
    }
    let n = population.len() as f64;
    let mean: f64 = population.iter().sum::<f64>() / n;
    let var: f64 = population.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n;
    let std = var.sqrt().max(1e-9);
    (score - mean) / std
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VqModel;

    fn blob(center: &[f32], n: usize, spread: f32, seed: u64) -> Vec<Sample> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                center
                    .iter()
                    .map(|&c| {
                        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                        let r = ((state >> 33) as f32) / (u32::MAX as f32) - 0.5;
                        c + r * spread
                    })
                    .collect()
            })
            .collect()
    }

    fn corpus(speakers: &[(&str, &[f32])]) -> Arc<SpeechData> {
        let mut data = SpeechData::new();
        for (i, (key, center)) in speakers.iter().enumerate() {
            for s in blob(center, 12, 0.4, 1000 + i as u64) {
                data.add_sample(key, s);
            }
        }
        data.validate();
        Arc::new(data)
    }

    fn trained_vq() -> VqRecognizer {
        let mut rec = VqRecognizer::new();
        rec.set_order(2);
        rec.set_speaker_data(corpus(&[
            ("001", &[0.0, 0.0]),
            ("002", &[10.0, 0.0]),
            ("003", &[0.0, 10.0]),
        ]));
        rec
    }

    #[test]
    fn recognizes_own_speakers() {
        let mut rec = trained_vq();
        let keys = vec!["001".to_string(), "002".to_string(), "003".to_string()];
        rec.select_speaker_models(&keys);

        let probe = blob(&[0.0, 0.0], 5, 0.4, 77);
        assert!(rec.is_recognized("001", &probe));
        assert!(!rec.is_recognized("002", &probe));
    }

    #[test]
    fn test_tallies_all_speakers() {
        let mut rec = trained_vq();
        let keys = vec!["001".to_string(), "002".to_string(), "003".to_string()];
        rec.select_speaker_models(&keys);

        let probes = corpus(&[
            ("001", &[0.0, 0.0]),
            ("002", &[10.0, 0.0]),
            ("003", &[0.0, 10.0]),
        ]);
        let tally = rec.test(&probes);
        assert_eq!(tally.correct + tally.incorrect, 3);
        assert_eq!(tally.correct, 3);
    }

    #[test]
    fn empty_selection_yields_no_decisions() {
        let mut rec = trained_vq();
        rec.select_speaker_models(&[]);

        let probes = corpus(&[("001", &[0.0, 0.0])]);
        let tally = rec.test(&probes);
        assert_eq!(tally, RecognitionTally::default());
        assert!(!rec.is_recognized("001", &blob(&[0.0, 0.0], 3, 0.4, 5)));
    }

    #[test]
    fn unknown_selection_keys_are_skipped() {
        let mut rec = trained_vq();
        rec.select_speaker_models(&[
            "001".to_string(),
            "999".to_string(),
        ]);

        let probe = blob(&[0.0, 0.0], 5, 0.4, 78);
        assert!(rec.is_recognized("001", &probe));
    }

    #[test]
    fn untrained_operations_are_defensive() {
        let mut rec = VqRecognizer::new();
        // No speaker data bound at all.
        let probes = SpeechData::new();
        assert_eq!(rec.test(&probes), RecognitionTally::default());
        assert!(rec.verify("001", &probes).is_empty());
        assert!(!rec.is_recognized("001", &[vec![0.0]]));
    }

    #[test]
    fn verify_returns_single_raw_score() {
        let mut rec = trained_vq();
        let mut genuine = SpeechData::new();
        for s in blob(&[0.0, 0.0], 4, 0.4, 9) {
            genuine.add_sample("001", s);
        }
        genuine.validate();

        let scores = rec.verify("001", &genuine);
        assert_eq!(scores.len(), 1);
        assert!(scores[0].is_finite());
    }

    #[test]
    fn genuine_scores_above_impostor() {
        let mut rec = trained_vq();
        let keys = vec!["001".to_string(), "002".to_string(), "003".to_string()];
        rec.select_speaker_models(&keys);

        let mut genuine = SpeechData::new();
        for s in blob(&[0.0, 0.0], 6, 0.4, 31) {
            genuine.add_sample("001", s);
        }
        genuine.validate();

        let mut impostor = SpeechData::new();
        for s in blob(&[10.0, 0.0], 6, 0.4, 32) {
            impostor.add_sample("002", s);
        }
        impostor.validate();

        let g = rec.verify("001", &genuine)[0];
        let i = rec.verify("001", &impostor)[0];
        assert!(g > i, "genuine {g} should beat impostor {i}");
    }

    #[test]
    fn zero_normalization_uses_impostor_population() {
        let mut rec = trained_vq();
        rec.set_score_normalization(ScoreNormalization::Zero);
        let keys = vec!["001".to_string(), "002".to_string(), "003".to_string()];
        rec.select_speaker_models(&keys);
        rec.select_impostor_models(&["002".to_string(), "003".to_string()]);

        let mut genuine = SpeechData::new();
        for s in blob(&[0.0, 0.0], 6, 0.4, 41) {
            genuine.add_sample("001", s);
        }
        genuine.validate();

        let scores = rec.verify("001", &genuine);
        assert_eq!(scores.len(), 1);
        // Genuine trial z-scores well above the impostor mean.
        assert!(scores[0] > 1.0, "z-normalized genuine score {}", scores[0]);
    }

    #[test]
    fn chained_normalizations_stay_finite() {
        for kind in [
            ScoreNormalization::Test,
            ScoreNormalization::ZeroTest,
            ScoreNormalization::TestZero,
        ] {
            let mut rec = trained_vq();
            rec.set_score_normalization(kind);
            let keys = vec!["001".to_string(), "002".to_string(), "003".to_string()];
            rec.select_speaker_models(&keys);
            rec.select_impostor_models(&["002".to_string(), "003".to_string()]);

            let mut trial = SpeechData::new();
            for s in blob(&[0.0, 0.0], 6, 0.4, 51) {
                trial.add_sample("001", s);
            }
            trial.validate();

            let scores = rec.verify("001", &trial);
            assert_eq!(scores.len(), 1, "normalization {kind:?}");
            assert!(scores[0].is_finite(), "normalization {kind:?}");
        }
    }

    #[test]
    fn missing_background_data_degrades_gracefully() {
        let mut rec = trained_vq();
        rec.set_background_model_enabled(true);
        // No background corpus bound; train still succeeds.
        rec.train().unwrap();
        assert!(rec.background().is_none());
        assert_eq!(rec.models().len(), 3);
    }

    #[test]
    fn background_model_is_trained_from_pool() {
        let mut rec = trained_vq();
        rec.set_background_model_enabled(true);
        rec.set_background_data(corpus(&[
            ("900", &[5.0, 5.0]),
            ("901", &[-5.0, 5.0]),
        ]));
        rec.train().unwrap();
        assert!(rec.background().is_some());
    }

    #[test]
    fn adaptation_builds_models_from_background() {
        let mut rec = trained_vq();
        rec.set_background_model_enabled(true);
        rec.set_adaptation_enabled(true);
        rec.set_background_data(corpus(&[
            ("900", &[3.0, 3.0]),
            ("901", &[-3.0, 3.0]),
        ]));
        rec.train().unwrap();

        // All adapted models share the background codebook size.
        let bg_len = rec.background().unwrap().centroids().len();
        for model in rec.models().values() {
            assert_eq!(model.centroids().len(), bg_len);
        }
    }

    #[test]
    fn rebinding_same_data_does_not_retrain() {
        let mut rec = VqRecognizer::new();
        rec.set_order(2);
        let data = corpus(&[("001", &[0.0, 0.0])]);
        rec.set_speaker_data(data.clone());
        rec.train().unwrap();
        assert!(!rec.dirty);

        rec.set_speaker_data(data);
        rec.set_order(2);
        assert!(!rec.dirty, "identical rebinding must not mark dirty");
    }

    #[test]
    fn weighting_pass_runs_on_train() {
        let mut rec = trained_vq();
        rec.set_weighting_enabled(true);
        rec.train().unwrap();

        let weighted = rec
            .models()
            .values()
            .any(|m| m.weights().iter().any(|&w| (w - 1.0).abs() > 1e-9));
        assert!(weighted, "at least one cluster weight should move off 1.0");
    }
}
