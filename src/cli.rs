//! Command-line interface definitions and argument parsing

use crate::labeling::LabelingConfig;
use crate::model::ClusterParams;
use crate::store::{DocumentStore, MongoStore, SnapshotStore, DEFAULT_MONGO_URI};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

/// Batch user segmentation: purchase features and K-Means personas
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the category map, feature table and cluster output
    #[arg(short, long, default_value = ".", global = true)]
    pub output_dir: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the category map and per-user feature table from the store
    Extract(StoreArgs),
    /// Cluster the feature table and label each cluster
    Cluster(ClusterArgs),
    /// Extract, then cluster
    Run {
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        cluster: ClusterArgs,
    },
}

/// Where orders and products are read from
#[derive(clap::Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// MongoDB connection string, including the database name
    /// [fallback: mongodb://localhost:27017/chocair]
    #[arg(long, env = "MONGO_URI", hide_env_values = true)]
    pub mongo_uri: Option<String>,

    /// Read a mongoexport dump (products.json, orders.json) instead of connecting
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
}

impl StoreArgs {
    /// Configured connection string, or the local development default
    pub fn connection_uri(&self) -> String {
        match self.mongo_uri.as_deref().filter(|uri| !uri.trim().is_empty()) {
            Some(uri) => uri.to_string(),
            None => {
                warn!("MONGO_URI not set; using fallback {}", DEFAULT_MONGO_URI);
                DEFAULT_MONGO_URI.to_string()
            }
        }
    }

    /// Open the configured store; the connection lives as long as the box
    pub fn open_store(&self) -> crate::Result<Box<dyn DocumentStore>> {
        if let Some(dir) = &self.snapshot {
            info!("Reading store snapshot from {}", dir.display());
            return Ok(Box::new(SnapshotStore::open(dir)?));
        }

        info!("Connecting to MongoDB...");
        Ok(Box::new(MongoStore::connect(&self.connection_uri())?))
    }
}

/// K-Means and labeling settings
#[derive(clap::Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Maximum number of clusters (capped at the number of users)
    #[arg(short = 'k', long, default_value = "5")]
    pub clusters: usize,

    /// Random seed for centroid initialisation
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Number of K-Means restarts
    #[arg(long, default_value = "10")]
    pub n_runs: usize,

    /// Maximum iterations for K-Means algorithm
    #[arg(long, default_value = "300")]
    pub max_iters: u64,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,

    /// Relative deviation above the global mean that makes a feature name a cluster
    #[arg(long, default_value = "0.2")]
    pub significance_threshold: f64,

    /// Centroid category share above which the category is boosted
    #[arg(long, default_value = "0.3")]
    pub boost_threshold: f64,
}

impl ClusterArgs {
    /// Reject settings K-Means cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        if self.clusters == 0 {
            anyhow::bail!("Number of clusters must be at least 1");
        }
        if self.n_runs == 0 {
            anyhow::bail!("Number of K-Means runs must be at least 1");
        }
        if self.tolerance.is_nan() || self.tolerance <= 0.0 {
            anyhow::bail!("Tolerance must be positive, got {}", self.tolerance);
        }
        Ok(())
    }

    pub fn cluster_params(&self) -> ClusterParams {
        ClusterParams {
            max_clusters: self.clusters,
            seed: self.seed,
            n_runs: self.n_runs,
            max_iters: self.max_iters,
            tolerance: self.tolerance,
        }
    }

    pub fn labeling_config(&self) -> LabelingConfig {
        LabelingConfig {
            significance_threshold: self.significance_threshold,
            boost_threshold: self.boost_threshold,
            ..LabelingConfig::default()
        }
    }
}
