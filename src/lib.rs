//! SegmentForge: batch user segmentation for product recommendations
//!
//! Two offline steps share one data model. The extraction step turns
//! orders into per-user purchase features (order counts, basket sizes and
//! per-category quantity shares). The clustering step standardizes those
//! features, groups users with K-Means and labels every cluster as a persona
//! with categories to boost.

pub mod artifacts;
pub mod cli;
pub mod data;
pub mod error;
pub mod extract;
pub mod labeling;
pub mod model;
pub mod segment;
pub mod store;

// Re-export public items for easier access
pub use artifacts::ArtifactPaths;
pub use cli::Args;
pub use data::{load_feature_matrix, FeatureMatrix, FeatureTable, StandardScaler};
pub use error::SegmentError;
pub use extract::{extract_features, ExtractionSummary, ProductCategoryMap};
pub use labeling::LabelingConfig;
pub use model::{fit_kmeans, ClusterParams, KMeansModel};
pub use segment::{
    cluster_features, segment_users, ClusterDefinition, ClusterOutput, ClusteringSummary, Segmentation,
};
pub use store::{DocumentStore, MemoryStore, MongoStore, SnapshotStore};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
