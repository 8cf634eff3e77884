use sprec_speech::Sample;
use tracing::debug;

use crate::RecognizerError;

/// Upper bound on Lloyd refinement passes per split level.
const MAX_REFINE_ITERATIONS: usize = 100;

/// Upper bound on empty-cluster re-seed rounds per split level.
const MAX_RESEED_ROUNDS: usize = 4;

/// Squared Euclidean distance with f64 accumulation.
pub(crate) fn dist2(a: &[f32], b: &[f32]) -> f64 {
    let mut sum = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let d = x as f64 - y as f64;
        sum += d * d;
    }
    sum
}

/// Result of one clustering run.
#[derive(Debug, Clone)]
pub struct Clustering {
    /// Cluster id of each input sample, in input order.
    pub indices: Vec<usize>,
    /// Final cluster means.
    pub centroids: Vec<Sample>,
    /// Membership count per cluster. Sums to the sample count.
    pub sizes: Vec<usize>,
}

/// Linde-Buzo-Gray split-based clustering.
///
/// Starts from the global mean, then repeatedly splits every centroid
/// `c` into `c*(1+eta)` and `c*(1-eta)` and refines the doubled set
/// with Lloyd iterations until the target cluster count is reached.
///
/// A split half that attracts no samples is re-seeded at the
/// farthest-assigned sample of the most populous cluster; zero-size
/// clusters survive only when the sample set cannot fill the
/// requested count.
#[derive(Debug, Clone)]
pub struct Lbg {
    cluster_count: usize,
    eta: f32,
}

impl Default for Lbg {
    fn default() -> Self {
        Self::new(128, 0.001)
    }
}

impl Lbg {
    /// Creates a clusterer. `cluster_count` must be a power of two,
    /// `eta` is the small positive split constant.
    pub fn new(cluster_count: usize, eta: f32) -> Self {
        Self { cluster_count, eta }
    }

    /// Target number of clusters.
    pub fn cluster_count(&self) -> usize {
        self.cluster_count
    }

    /// Sets the target number of clusters.
    pub fn set_cluster_count(&mut self, cluster_count: usize) {
        self.cluster_count = cluster_count;
    }

    /// Clusters `samples` into at most `cluster_count` clusters.
    ///
    /// Splitting stops early once no cluster has more than one member.
    /// With fewer samples than the target count every sample becomes
    /// its own cluster.
    pub fn cluster(&self, samples: &[Sample]) -> Result<Clustering, RecognizerError> {
        if samples.is_empty() {
            return Err(RecognizerError::EmptySamples);
        }
        if self.cluster_count == 0 {
            return Err(RecognizerError::ZeroClusterCount);
        }
        if !self.cluster_count.is_power_of_two() {
            return Err(RecognizerError::ClusterCountNotPowerOfTwo {
                got: self.cluster_count,
            });
        }

        // Already at or below the target count: every sample is its
        // own cluster and the input is returned unchanged.
        if samples.len() <= self.cluster_count {
            return Ok(Clustering {
                indices: (0..samples.len()).collect(),
                centroids: samples.to_vec(),
                sizes: vec![1; samples.len()],
            });
        }

        let dim = samples[0].len();

        let mut mean = vec![0.0f64; dim];
        for s in samples {
            for (m, &x) in mean.iter_mut().zip(s.iter()) {
                *m += x as f64;
            }
        }
        let n = samples.len() as f64;
        let mut centroids: Vec<Sample> =
            vec![mean.iter().map(|&m| (m / n) as f32).collect()];

        let mut indices = vec![0usize; samples.len()];
        let mut sizes = vec![samples.len()];

        while centroids.len() < self.cluster_count {
            // A cluster with one member or less cannot be split.
            if sizes.iter().all(|&s| s <= 1) {
                debug!(
                    "stopping early at {} clusters: nothing left to split",
                    centroids.len()
                );
                break;
            }

            centroids = split(&centroids, self.eta);
            (indices, sizes) = refine(samples, &mut centroids);

            let mut rounds = 0;
            while sizes.contains(&0) && rounds < MAX_RESEED_ROUNDS {
                reseed_empty(samples, &mut centroids, &indices, &sizes);
                (indices, sizes) = refine(samples, &mut centroids);
                rounds += 1;
            }
        }

        Ok(Clustering {
            indices,
            centroids,
            sizes,
        })
    }
}

/// Doubles the centroid set by moving each centroid apart into
/// `c*(1+eta)` and `c*(1-eta)`.
fn split(centroids: &[Sample], eta: f32) -> Vec<Sample> {
    let mut out = Vec::with_capacity(centroids.len() * 2);
    for c in centroids {
        out.push(c.iter().map(|&x| x * (1.0 + eta)).collect());
        out.push(c.iter().map(|&x| x * (1.0 - eta)).collect());
    }
    out
}

/// Lloyd refinement: alternate nearest-centroid assignment (lowest
/// centroid index wins ties) and centroid re-estimation until the
/// assignment is stable or the iteration cap is hit. Empty clusters
/// keep their previous centroid.
fn refine(samples: &[Sample], centroids: &mut [Sample]) -> (Vec<usize>, Vec<usize>) {
    let dim = samples[0].len();
    let mut indices = vec![usize::MAX; samples.len()];
    let mut sizes = vec![0usize; centroids.len()];

    for _ in 0..MAX_REFINE_ITERATIONS {
        let mut changed = false;

        for (i, s) in samples.iter().enumerate() {
            let best = nearest(s, centroids);
            if indices[i] != best {
                indices[i] = best;
                changed = true;
            }
        }

        sizes = vec![0usize; centroids.len()];
        let mut sums = vec![vec![0.0f64; dim]; centroids.len()];
        for (i, s) in samples.iter().enumerate() {
            let c = indices[i];
            sizes[c] += 1;
            for (acc, &x) in sums[c].iter_mut().zip(s.iter()) {
                *acc += x as f64;
            }
        }
        for (c, centroid) in centroids.iter_mut().enumerate() {
            if sizes[c] == 0 {
                continue;
            }
            let n = sizes[c] as f64;
            for (x, &acc) in centroid.iter_mut().zip(sums[c].iter()) {
                *x = (acc / n) as f32;
            }
        }

        if !changed {
            break;
        }
    }

    (indices, sizes)
}

/// Moves every empty centroid onto the farthest-assigned sample of the
/// most populous cluster.
fn reseed_empty(
    samples: &[Sample],
    centroids: &mut [Sample],
    indices: &[usize],
    sizes: &[usize],
) {
    for c in 0..centroids.len() {
        if sizes[c] != 0 {
            continue;
        }

        let largest = match (0..sizes.len()).max_by_key(|&k| sizes[k]) {
            Some(k) if sizes[k] > 1 => k,
            _ => return,
        };

        let mut far_idx = None;
        let mut far_dist = -1.0f64;
        for (i, s) in samples.iter().enumerate() {
            if indices[i] != largest {
                continue;
            }
            let d = dist2(s, &centroids[largest]);
            if d > far_dist {
                far_dist = d;
                far_idx = Some(i);
            }
        }

        if let Some(i) = far_idx {
            debug!("re-seeding empty cluster {c} from cluster {largest}");
            centroids[c] = samples[i].clone();
        }
    }
}

/// Index of the nearest centroid; the lowest index wins ties.
pub(crate) fn nearest(sample: &[f32], centroids: &[Sample]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (c, centroid) in centroids.iter().enumerate() {
        let d = dist2(sample, centroid);
        if d < best_dist {
            best_dist = d;
            best = c;
        }
    }
    best
}
