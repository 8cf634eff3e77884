use sprec_speech::Sample;
use tracing::warn;

use crate::lbg::{dist2, Lbg};
use crate::recognizer::SpeakerModel;
use crate::RecognizerError;

/// MAP relevance factor: how many frames a cluster needs before the
/// adapted centroid is pulled halfway from the background centroid.
const RELEVANCE_FACTOR: f64 = 16.0;

/// Vector quantization speaker model: a codebook of cluster centroids
/// with parallel membership counts and discriminability weights.
///
/// Centroids, sizes and weights always have the same length. The
/// length equals the trained order (a power of two) unless the
/// training set has fewer samples.
#[derive(Debug, Clone, Default)]
pub struct VqModel {
    centroids: Vec<Sample>,
    sizes: Vec<usize>,
    weights: Vec<f64>,
    order: usize,
    eta: f32,
}

impl VqModel {
    /// Codebook centroids.
    pub fn centroids(&self) -> &[Sample] {
        &self.centroids
    }

    /// Training sample count per cluster.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Discriminability weight per cluster (1.0 before weighting).
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Mean weighted nearest-centroid squared distance of `samples`
    /// against this codebook. Lower is a better match; a more
    /// discriminative cluster (higher weight) pulls its distance down
    /// and so attracts samples more strongly.
    pub fn distortion(&self, samples: &[Sample]) -> f64 {
        if self.centroids.is_empty() || samples.is_empty() {
            return f64::INFINITY;
        }

        let mut total = 0.0f64;
        for s in samples {
            let mut best = f64::INFINITY;
            for (c, centroid) in self.centroids.iter().enumerate() {
                let d = dist2(s, centroid) / self.weights[c];
                if d < best {
                    best = d;
                }
            }
            total += best;
        }
        total / samples.len() as f64
    }

    /// Reweights each cluster by how far it sits from the other
    /// speakers' codebooks. A centroid far from every sibling codebook
    /// separates this speaker well and receives a weight above 1; a
    /// centroid every sibling shares receives a weight below 1.
    /// Weights are normalized to mean 1 so unweighted and weighted
    /// distortions stay comparable.
    pub fn weigh<'a, I>(&mut self, siblings: I)
    where
        I: IntoIterator<Item = &'a VqModel>,
    {
        let siblings: Vec<&VqModel> = siblings
            .into_iter()
            .filter(|m| !m.centroids.is_empty())
            .collect();
        if siblings.is_empty() || self.centroids.is_empty() {
            return;
        }

        let mut separations = Vec::with_capacity(self.centroids.len());
        for centroid in &self.centroids {
            let mut total = 0.0f64;
            for other in &siblings {
                let mut nearest = f64::INFINITY;
                for oc in &other.centroids {
                    let d = dist2(centroid, oc);
                    if d < nearest {
                        nearest = d;
                    }
                }
                total += nearest;
            }
            separations.push(total / siblings.len() as f64);
        }

        let mean: f64 = separations.iter().sum::<f64>() / separations.len() as f64;
        if mean <= 0.0 {
            warn!("degenerate codebook separation, keeping uniform weights");
            self.weights = vec![1.0; self.centroids.len()];
            return;
        }

        self.weights = separations.iter().map(|&s| s / mean).collect();
        // Guard against zero weights on fully shared centroids.
        for w in &mut self.weights {
            if *w < 1e-6 {
                *w = 1e-6;
            }
        }
    }
}

impl SpeakerModel for VqModel {
    fn train(&mut self, samples: &[Sample], order: usize) -> Result<(), RecognizerError> {
        let lbg = Lbg::new(order, if self.eta > 0.0 { self.eta } else { 0.001 });
        let clustering = lbg.cluster(samples)?;

        self.order = order;
        self.weights = vec![1.0; clustering.centroids.len()];
        self.centroids = clustering.centroids;
        self.sizes = clustering.sizes;
        Ok(())
    }

    fn adapt(
        &mut self,
        background: &Self,
        samples: &[Sample],
        order: usize,
    ) -> Result<(), RecognizerError> {
        if background.centroids.is_empty() {
            // No background to adapt from; plain training.
            return self.train(samples, order);
        }
        if samples.is_empty() {
            return Err(RecognizerError::EmptySamples);
        }

        // Assign speaker frames to background centroids, then shrink
        // each centroid toward the frame mean by its data count.
        let count = background.centroids.len();
        let dim = background.centroids[0].len();
        let mut sums = vec![vec![0.0f64; dim]; count];
        let mut counts = vec![0usize; count];

        for s in samples {
            let c = crate::lbg::nearest(s, &background.centroids);
            counts[c] += 1;
            for (acc, &x) in sums[c].iter_mut().zip(s.iter()) {
                *acc += x as f64;
            }
        }

        self.order = order;
        self.centroids = Vec::with_capacity(count);
        for c in 0..count {
            if counts[c] == 0 {
                self.centroids.push(background.centroids[c].clone());
                continue;
            }
            let n = counts[c] as f64;
            let alpha = n / (n + RELEVANCE_FACTOR);
            let adapted: Sample = background.centroids[c]
                .iter()
                .zip(sums[c].iter())
                .map(|(&bg, &sum)| (alpha * (sum / n) + (1.0 - alpha) * bg as f64) as f32)
                .collect();
            self.centroids.push(adapted);
        }
        self.sizes = counts;
        self.weights = vec![1.0; count];
        Ok(())
    }

    fn score(&self, samples: &[Sample]) -> f64 {
        // Negated distortion so that higher is always a better match.
        -self.distortion(samples)
    }

    fn order(&self) -> usize {
        self.order
    }

    fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    fn weigh_against(&mut self, siblings: &[Self]) {
        self.weigh(siblings.iter());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(center: &[f32], n: usize, spread: f32) -> Vec<Sample> {
        let mut state = 0x2545f4914f6cdd1du64 ^ (n as u64);
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
    fn train_builds_parallel_codebook() {
        let mut samples = blob(&[0.0, 0.0], 20, 0.2);
        samples.extend(blob(&[10.0, 10.0], 20, 0.2));

        let mut model = VqModel::default();
        model.train(&samples, 2).unwrap();

        assert_eq!(model.centroids().len(), 2);
        assert_eq!(model.sizes().len(), 2);
        assert_eq!(model.weights().len(), 2);
        assert!(model.weights().iter().all(|&w| w == 1.0));
        assert!(model.is_trained());
        assert_eq!(model.order(), 2);
    }

    #[test]
    fn own_data_scores_better_than_foreign() {
        let a = blob(&[0.0, 0.0], 30, 0.3);
        let b = blob(&[20.0, 20.0], 30, 0.3);

        let mut model = VqModel::default();
        model.train(&a, 4).unwrap();

        assert!(model.score(&a) > model.score(&b));
    }

    #[test]
    fn untrained_model_scores_worst() {
        let model = VqModel::default();
        assert_eq!(model.score(&[vec![1.0, 2.0]]), f64::NEG_INFINITY);
        assert!(!model.is_trained());
    }

    #[test]
    fn weighting_favors_separating_clusters() {
        // Model A has one cluster shared with B and one far away.
        let mut shared = blob(&[0.0, 0.0], 20, 0.1);
        shared.extend(blob(&[50.0, 0.0], 20, 0.1));

        let mut a = VqModel::default();
        a.train(&shared, 2).unwrap();

        let mut b = VqModel::default();
        b.train(&blob(&[0.0, 0.0], 20, 0.1), 1).unwrap();

        a.weigh([&b]);

        // Find the cluster near the origin; it is shared with B and
        // must carry the lower weight.
        let near_origin = a
            .centroids()
            .iter()
            .position(|c| c[0].abs() < 1.0)
            .unwrap();
        let far = 1 - near_origin;
        assert!(a.weights()[near_origin] < a.weights()[far]);

        // Normalized to mean one (up to the zero-weight floor).
        let mean: f64 = a.weights().iter().sum::<f64>() / 2.0;
        assert!((mean - 1.0).abs() < 1e-5);
    }

    #[test]
    fn adaptation_shrinks_toward_background() {
        let mut background = VqModel::default();
        background.train(&blob(&[0.0, 0.0], 40, 4.0), 2).unwrap();

        // A few frames offset from the background.
        let frames = blob(&[2.0, 2.0], 4, 0.1);

        let mut adapted = VqModel::default();
        adapted.adapt(&background, &frames, 2).unwrap();

        assert_eq!(adapted.centroids().len(), background.centroids().len());

        // With 4 frames and relevance 16, alpha = 0.2: the adapted
        // centroid moves toward the frames but stays dominated by the
        // background.
        let c = crate::lbg::nearest(&frames[0], background.centroids());
        let bg = &background.centroids()[c];
        let ad = &adapted.centroids()[c];
        let moved = dist2(ad, bg);
        let full = dist2(&frames[0], bg);
        assert!(moved > 0.0);
        assert!(moved < full);
    }

    #[test]
    fn adapt_without_background_falls_back_to_training() {
        let background = VqModel::default();
        let mut model = VqModel::default();
        model
            .adapt(&background, &blob(&[1.0, 1.0], 10, 0.2), 2)
            .unwrap();
        assert!(model.is_trained());
    }
}
