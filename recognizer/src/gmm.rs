use sprec_speech::Sample;

use crate::lbg::Lbg;
use crate::recognizer::SpeakerModel;
use crate::RecognizerError;

const LOG_2PI: f64 = 1.837877066409345;

/// Variance floor applied after every update.
const VAR_FLOOR: f64 = 1e-3;

/// Maximum EM passes after the LBG initialization.
const MAX_EM_ITERATIONS: usize = 10;

/// Relative log-likelihood improvement below which EM stops.
const EM_TOLERANCE: f64 = 1e-4;

/// MAP relevance factor for means-only background adaptation.
const RELEVANCE_FACTOR: f64 = 16.0;

/// Diagonal-covariance Gaussian mixture speaker model.
///
/// Training initializes the mixture from an LBG clustering (means from
/// centroids, weights from cluster sizes, per-dimension variances from
/// cluster members) and refines it with expectation-maximization.
/// Scores are average per-frame log-likelihoods.
#[derive(Debug, Clone, Default)]
pub struct GmmModel {
    means: Vec<Sample>,
    variances: Vec<Vec<f32>>,
    weights: Vec<f64>,
    order: usize,
}

impl GmmModel {
    /// Component means.
    pub fn means(&self) -> &[Sample] {
        &self.means
    }

    /// Mixture weights, summing to one.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Log-density of one frame under the mixture (log-sum-exp over
    /// components).
    fn log_likelihood(&self, sample: &[f32]) -> f64 {
        let mut terms = Vec::with_capacity(self.means.len());
        for k in 0..self.means.len() {
            terms.push(self.weights[k].max(1e-30).ln() + self.log_component(k, sample));
        }
        log_sum_exp(&terms)
    }

    fn log_component(&self, k: usize, sample: &[f32]) -> f64 {
        let mean = &self.means[k];
        let var = &self.variances[k];
        let mut acc = 0.0f64;
        for d in 0..sample.len() {
            let v = var[d] as f64;
            let diff = sample[d] as f64 - mean[d] as f64;
            acc += LOG_2PI + v.ln() + diff * diff / v;
        }
        -0.5 * acc
    }

    /// Per-frame responsibilities of every component for every sample.
    fn responsibilities(&self, samples: &[Sample]) -> Vec<Vec<f64>> {
        samples
            .iter()
            .map(|s| {
                let terms: Vec<f64> = (0..self.means.len())
                    .map(|k| self.weights[k].max(1e-30).ln() + self.log_component(k, s))
                    .collect();
                let total = log_sum_exp(&terms);
                terms.iter().map(|&t| (t - total).exp()).collect()
            })
            .collect()
    }

    fn init_from_clustering(&mut self, samples: &[Sample], order: usize) -> Result<(), RecognizerError> {
        let clustering = Lbg::new(order, 0.001).cluster(samples)?;
        let count = clustering.centroids.len();
        let dim = samples[0].len();
        let n = samples.len() as f64;

        let mut variances = vec![vec![0.0f64; dim]; count];
        for (i, s) in samples.iter().enumerate() {
            let c = clustering.indices[i];
            for d in 0..dim {
                let diff = s[d] as f64 - clustering.centroids[c][d] as f64;
                variances[c][d] += diff * diff;
            }
        }

        self.means = clustering.centroids;
        self.variances = variances
            .into_iter()
            .enumerate()
            .map(|(c, var)| {
                let size = clustering.sizes[c].max(1) as f64;
                var.into_iter()
                    .map(|v| (v / size).max(VAR_FLOOR) as f32)
                    .collect()
            })
            .collect();
        self.weights = clustering
            .sizes
            .iter()
            .map(|&s| (s as f64 / n).max(1e-6))
            .collect();
        let total: f64 = self.weights.iter().sum();
        for w in &mut self.weights {
            *w /= total;
        }
        Ok(())
    }

    fn em_step(&mut self, samples: &[Sample]) {
        let resp = self.responsibilities(samples);
        let dim = samples[0].len();
        let n = samples.len() as f64;

        for k in 0..self.means.len() {
            let nk: f64 = resp.iter().map(|r| r[k]).sum();
            if nk < 1e-10 {
                continue;
            }

            let mut mean = vec![0.0f64; dim];
            let mut sq = vec![0.0f64; dim];
            for (i, s) in samples.iter().enumerate() {
                let r = resp[i][k];
                for d in 0..dim {
                    let x = s[d] as f64;
                    mean[d] += r * x;
                    sq[d] += r * x * x;
                }
            }

            self.weights[k] = nk / n;
            for d in 0..dim {
                let m = mean[d] / nk;
                self.means[k][d] = m as f32;
                self.variances[k][d] = (sq[d] / nk - m * m).max(VAR_FLOOR) as f32;
            }
        }
    }
}

impl SpeakerModel for GmmModel {
    fn train(&mut self, samples: &[Sample], order: usize) -> Result<(), RecognizerError> {
        if samples.is_empty() {
            return Err(RecognizerError::EmptySamples);
        }
        self.init_from_clustering(samples, order)?;
        self.order = order;

        let mut previous = f64::NEG_INFINITY;
        for _ in 0..MAX_EM_ITERATIONS {
            self.em_step(samples);
            let ll = self.score(samples);
            if previous.is_finite() && (ll - previous).abs() < EM_TOLERANCE * previous.abs() {
                break;
            }
            previous = ll;
        }
        Ok(())
    }

    fn adapt(
        &mut self,
        background: &Self,
        samples: &[Sample],
        order: usize,
    ) -> Result<(), RecognizerError> {
        if background.means.is_empty() {
            return self.train(samples, order);
        }
        if samples.is_empty() {
            return Err(RecognizerError::EmptySamples);
        }

        // Means-only MAP: weights and variances stay at the background
        // values, means shrink toward the background by data count.
        let resp = background.responsibilities(samples);
        let dim = samples[0].len();

        self.order = order;
        self.weights = background.weights.clone();
        self.variances = background.variances.clone();
        self.means = Vec::with_capacity(background.means.len());

        for k in 0..background.means.len() {
            let nk: f64 = resp.iter().map(|r| r[k]).sum();
            if nk < 1e-10 {
                self.means.push(background.means[k].clone());
                continue;
            }
            let alpha = nk / (nk + RELEVANCE_FACTOR);
            let mut mean = vec![0.0f64; dim];
            for (i, s) in samples.iter().enumerate() {
                let r = resp[i][k];
                for d in 0..dim {
                    mean[d] += r * s[d] as f64;
                }
            }
            let adapted: Sample = (0..dim)
                .map(|d| {
                    let em = mean[d] / nk;
                    (alpha * em + (1.0 - alpha) * background.means[k][d] as f64) as f32
                })
                .collect();
            self.means.push(adapted);
        }
        Ok(())
    }

    fn score(&self, samples: &[Sample]) -> f64 {
        if self.means.is_empty() || samples.is_empty() {
            return f64::NEG_INFINITY;
        }
        let total: f64 = samples.iter().map(|s| self.log_likelihood(s)).sum();
        total / samples.len() as f64
    }

    fn order(&self) -> usize {
        self.order
    }

    fn is_trained(&self) -> bool {
        !self.means.is_empty()
    }
}

fn log_sum_exp(terms: &[f64]) -> f64 {
    let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = terms.iter().map(|&t| (t - max).exp()).sum();
    max + sum.ln()
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn train_produces_normalized_mixture() {
        let mut samples = blob(&[0.0, 0.0], 30, 0.5, 11);
        samples.extend(blob(&[5.0, 5.0], 30, 0.5, 22));

        let mut model = GmmModel::default();
        model.train(&samples, 2).unwrap();

        assert_eq!(model.means().len(), 2);
        let total: f64 = model.weights().iter().sum();
        assert!((total - 1.0).abs() < 1e-9, "weights should sum to 1, got {total}");
        assert!(model.is_trained());
    }

    #[test]
    fn own_data_gets_higher_likelihood() {
        let a = blob(&[0.0, 0.0], 40, 0.5, 3);
        let b = blob(&[10.0, 10.0], 40, 0.5, 4);

        let mut model = GmmModel::default();
        model.train(&a, 2).unwrap();

        assert!(model.score(&a) > model.score(&b));
    }

    #[test]
    fn empty_training_set_errors() {
        let mut model = GmmModel::default();
        assert!(matches!(
            model.train(&[], 2),
            Err(RecognizerError::EmptySamples)
        ));
    }

    #[test]
    fn untrained_score_is_worst() {
        let model = GmmModel::default();
        assert_eq!(model.score(&[vec![0.0]]), f64::NEG_INFINITY);
    }

    #[test]
    fn adaptation_moves_means_partially() {
        let mut background = GmmModel::default();
        background
            .train(&blob(&[0.0, 0.0], 50, 2.0, 7), 2)
            .unwrap();

        let frames = blob(&[1.5, 1.5], 6, 0.1, 8);
        let mut adapted = GmmModel::default();
        adapted.adapt(&background, &frames, 2).unwrap();

        assert_eq!(adapted.means().len(), background.means().len());
        assert_eq!(adapted.weights(), background.weights());

        // Adapted likelihood of the enrollment frames improves over
        // the raw background.
        assert!(adapted.score(&frames) > background.score(&frames));
    }

    #[test]
    fn log_sum_exp_handles_small_terms() {
        let terms = [-1000.0, -1000.0];
        let r = log_sum_exp(&terms);
        assert!((r - (-1000.0 + 2.0f64.ln())).abs() < 1e-9);
    }
}
