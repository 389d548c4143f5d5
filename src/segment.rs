//! Clustering step: standardize the feature table, fit K-Means and describe
//! each cluster as a persona

use crate::artifacts::{write_json, ArtifactPaths};
use crate::data::{load_feature_matrix, FeatureMatrix, StandardScaler};
use crate::labeling::{boost_categories, derive_label, relative_deviations, LabelingConfig};
use crate::model::{fit_kmeans, ClusterParams, KMeansModel};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Rows used for the silhouette diagnostic
const SILHOUETTE_SAMPLE: usize = 100;

/// Description of one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDefinition {
    #[serde(skip)]
    pub id: usize,
    /// Persona label, e.g. "Fruit Lover & Large Basket"
    pub name: String,
    pub boost_categories: Vec<String>,
    /// Centroid in raw feature units
    pub stats: BTreeMap<String, f64>,
}

impl ClusterDefinition {
    pub fn describe(
        id: usize,
        feature_names: &[String],
        centroid: ArrayView1<f64>,
        global_means: ArrayView1<f64>,
        config: &LabelingConfig,
    ) -> Self {
        let deviations = relative_deviations(centroid, global_means, config.epsilon);
        Self {
            id,
            name: derive_label(feature_names, &deviations, config),
            boost_categories: boost_categories(feature_names, centroid, config),
            stats: feature_names
                .iter()
                .cloned()
                .zip(centroid.iter().copied())
                .collect(),
        }
    }
}

/// Combined artifact consumed by the recommendation engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterOutput {
    pub user_clusters: BTreeMap<String, usize>,
    pub cluster_definitions: BTreeMap<usize, ClusterDefinition>,
}

impl ClusterOutput {
    /// Read a previously written cluster file
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut output: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        for (id, definition) in output.cluster_definitions.iter_mut() {
            definition.id = *id;
        }
        Ok(output)
    }
}

/// Diagnostics reported by the clustering step
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringSummary {
    pub users: usize,
    pub n_clusters: usize,
    pub inertia: f64,
    pub silhouette: f64,
    pub cluster_sizes: Vec<usize>,
    /// Label per cluster id
    pub labels: Vec<String>,
}

/// Mean raw feature vector of each cluster's members
///
/// Clusters without members get `fallback` (normally the global means).
pub fn raw_centroids(
    raw: &Array2<f64>,
    labels: &Array1<usize>,
    n_clusters: usize,
    fallback: ArrayView1<f64>,
) -> Array2<f64> {
    let mut sums = Array2::<f64>::zeros((n_clusters, raw.ncols()));
    let mut counts = vec![0usize; n_clusters];

    for (row, &cluster) in raw.outer_iter().zip(labels.iter()) {
        if cluster < n_clusters {
            let mut sum = sums.row_mut(cluster);
            sum += &row;
            counts[cluster] += 1;
        }
    }

    for (mut sum, &count) in sums.outer_iter_mut().zip(counts.iter()) {
        if count == 0 {
            sum.assign(&fallback);
        } else {
            sum.mapv_inplace(|v| v / count as f64);
        }
    }

    sums
}

/// Result of clustering a feature matrix
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub output: ClusterOutput,
    pub model: KMeansModel,
    /// Sampled silhouette score in standardized space
    pub silhouette: f64,
}

/// Cluster users and describe the clusters
pub fn segment_users(
    matrix: &FeatureMatrix,
    params: &ClusterParams,
    labeling: &LabelingConfig,
) -> crate::Result<Segmentation> {
    let (_, scaled) = StandardScaler::fit_transform(&matrix.raw);
    let model = fit_kmeans(&scaled, params)?;
    let silhouette = model.compute_silhouette_sample(&scaled, SILHOUETTE_SAMPLE);

    let global_means = matrix.global_means();
    let centroids = raw_centroids(
        &matrix.raw,
        &model.labels,
        model.n_clusters,
        global_means.view(),
    );

    let cluster_definitions = centroids
        .outer_iter()
        .enumerate()
        .map(|(id, centroid)| {
            let definition = ClusterDefinition::describe(
                id,
                &matrix.feature_names,
                centroid,
                global_means.view(),
                labeling,
            );
            debug!("Cluster {}: {} {:?}", id, definition.name, definition.boost_categories);
            (id, definition)
        })
        .collect();

    let user_clusters = matrix
        .user_ids
        .iter()
        .cloned()
        .zip(model.labels.iter().copied())
        .collect();

    Ok(Segmentation {
        output: ClusterOutput {
            user_clusters,
            cluster_definitions,
        },
        model,
        silhouette,
    })
}

/// Run the clustering step on the extraction output
///
/// Returns `Ok(None)` without writing anything when the feature table has no
/// rows.
pub fn cluster_features(
    paths: &ArtifactPaths,
    params: &ClusterParams,
    labeling: &LabelingConfig,
) -> crate::Result<Option<ClusteringSummary>> {
    let matrix = load_feature_matrix(&paths.features)?;
    info!("Loaded {} users", matrix.n_users());

    if matrix.is_empty() {
        warn!("Feature table has no users; nothing to cluster");
        return Ok(None);
    }
    if matrix.n_users() < params.max_clusters {
        warn!(
            "Only {} users; clustering into at most {} segments",
            matrix.n_users(),
            matrix.n_users()
        );
    }

    let Segmentation {
        output,
        model,
        silhouette,
    } = segment_users(&matrix, params, labeling)?;

    for (id, definition) in &output.cluster_definitions {
        info!("Cluster {}: {}", id, definition.name);
    }

    write_json(&paths.clusters, &output, true)?;
    info!("Cluster data saved to {}", paths.clusters.display());

    Ok(Some(ClusteringSummary {
        users: matrix.n_users(),
        n_clusters: model.n_clusters,
        inertia: model.inertia,
        silhouette,
        cluster_sizes: model.cluster_sizes(),
        labels: output
            .cluster_definitions
            .values()
            .map(|definition| definition.name.clone())
            .collect(),
    }))
}
