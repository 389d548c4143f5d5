//! K-Means clustering model implementation

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use tracing::warn;

/// K-Means settings
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterParams {
    /// Upper bound on the number of clusters
    pub max_clusters: usize,
    /// Seed for centroid initialisation
    pub seed: u64,
    /// Independent restarts; the lowest-inertia run wins
    pub n_runs: usize,
    pub max_iters: u64,
    pub tolerance: f64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            max_clusters: 5,
            seed: 42,
            n_runs: 10,
            max_iters: 300,
            tolerance: 1e-4,
        }
    }
}

/// Fitted clustering of the training rows
#[derive(Debug, Clone)]
pub struct KMeansModel {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignments for training data
    pub labels: Array1<usize>,
    /// Cluster centroids in standardized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares (inertia)
    pub inertia: f64,
}

impl KMeansModel {
    /// Get cluster sizes
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Mean silhouette coefficient over at most `sample_size` rows
    ///
    /// Rows are picked at an even stride across the matrix so the sample
    /// is not biased towards the head of the (user id ordered) table. A row
    /// that is alone in its cluster within the sample scores 0.
    pub fn compute_silhouette_sample(&self, features: &Array2<f64>, sample_size: usize) -> f64 {
        let rows = spread_sample(features.nrows(), sample_size);
        if rows.len() < 2 || self.n_clusters < 2 {
            return 0.0;
        }

        let total: f64 = rows
            .iter()
            .map(|&row| self.silhouette_of(row, &rows, features))
            .sum();
        total / rows.len() as f64
    }

    fn silhouette_of(&self, row: usize, rows: &[usize], features: &Array2<f64>) -> f64 {
        let own = self.labels[row];
        if own >= self.n_clusters {
            return 0.0;
        }

        let point = features.row(row);
        let mut sums = vec![0.0; self.n_clusters];
        let mut counts = vec![0usize; self.n_clusters];
        for &other in rows.iter().filter(|&&other| other != row) {
            let cluster = self.labels[other];
            if cluster < self.n_clusters {
                sums[cluster] += squared_distance(point, features.row(other)).sqrt();
                counts[cluster] += 1;
            }
        }

        let mean = |cluster: usize| (counts[cluster] > 0).then(|| sums[cluster] / counts[cluster] as f64);
        let Some(cohesion) = mean(own) else {
            return 0.0;
        };
        let separation = (0..self.n_clusters)
            .filter(|&cluster| cluster != own)
            .filter_map(mean)
            .fold(f64::INFINITY, f64::min);

        let scale = cohesion.max(separation);
        if separation.is_infinite() || scale == 0.0 {
            0.0
        } else {
            (separation - cohesion) / scale
        }
    }
}

/// Up to `size` row indices spread evenly over `0..n`, in ascending order
fn spread_sample(n: usize, size: usize) -> Vec<usize> {
    let take = n.min(size);
    (0..take).map(|i| i * n / take).collect()
}

/// Number of clusters to request for `n_users` rows
pub fn choose_cluster_count(n_users: usize, max_clusters: usize) -> usize {
    max_clusters.min(n_users)
}

/// Fit K-Means on standardized features
///
/// `k` is `min(max_clusters, rows)`, further capped at the number of
/// distinct rows. A single cluster is assigned directly without running
/// K-Means.
pub fn fit_kmeans(features: &Array2<f64>, params: &ClusterParams) -> crate::Result<KMeansModel> {
    if params.max_clusters == 0 {
        anyhow::bail!("Number of clusters must be at least 1");
    }

    let n_samples = features.nrows();
    if n_samples == 0 {
        anyhow::bail!("Cannot cluster an empty feature matrix");
    }

    let requested = choose_cluster_count(n_samples, params.max_clusters);
    let distinct = count_distinct_rows(features);
    let n_clusters = requested.min(distinct).max(1);
    if n_clusters < requested {
        warn!(
            "Only {} distinct feature rows; using {} clusters instead of {}",
            distinct, n_clusters, requested
        );
    }

    if n_clusters == 1 {
        let labels = Array1::zeros(n_samples);
        let centroids = features
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(features.ncols()))
            .insert_axis(Axis(0));
        let inertia = compute_inertia(features, &labels, &centroids);
        return Ok(KMeansModel {
            n_clusters,
            labels,
            centroids,
            inertia,
        });
    }

    // Dummy targets for unsupervised learning
    let targets: Array1<usize> = Array1::zeros(n_samples);
    let dataset = Dataset::new(features.clone(), targets);

    let rng = StdRng::seed_from_u64(params.seed);
    let model = KMeans::params_with(n_clusters, rng, L2Dist)
        .n_runs(params.n_runs)
        .max_n_iterations(params.max_iters)
        .tolerance(params.tolerance)
        .fit(&dataset)?;

    let labels = model.predict(features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    Ok(KMeansModel {
        n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Number of rows with pairwise distinct values
fn count_distinct_rows(features: &Array2<f64>) -> usize {
    features
        .outer_iter()
        .map(|row| row.iter().map(|v| v.to_bits()).collect::<Vec<u64>>())
        .collect::<HashSet<_>>()
        .len()
}

/// Within-cluster sum of squared distances to the assigned centroid
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    features
        .outer_iter()
        .zip(labels.iter())
        .filter(|(_, &cluster)| cluster < centroids.nrows())
        .map(|(row, &cluster)| squared_distance(row, centroids.row(cluster)))
        .sum()
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    (&a - &b).mapv(|d| d * d).sum()
}
