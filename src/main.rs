//! SegmentForge: user segmentation batch job
//!
//! Runs the extraction step, the clustering step, or both in sequence.

use anyhow::Result;
use clap::Parser;
use segmentforge::cli::{ClusterArgs, Command, StoreArgs};
use segmentforge::{cluster_features, extract_features, ArtifactPaths, Args};
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    init_logging(args.verbose);

    let paths = ArtifactPaths::in_dir(&args.output_dir);
    debug!("Artifacts: {:?}", paths);

    match &args.command {
        Command::Extract(store) => run_extraction(store, &paths)?,
        Command::Cluster(cluster) => run_clustering(cluster, &paths)?,
        Command::Run { store, cluster } => {
            // Fail on bad cluster settings before touching the store
            cluster.validate()?;
            run_extraction(store, &paths)?;
            run_clustering(cluster, &paths)?;
        }
    }

    Ok(())
}

/// Logs go to stderr; `RUST_LOG` overrides the default level
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("segmentforge={},warn", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Run the feature extraction step
fn run_extraction(store_args: &StoreArgs, paths: &ArtifactPaths) -> Result<()> {
    println!("=== Feature Extraction ===\n");
    let start_time = Instant::now();

    // The store connection is released when `store` drops at the end of the step
    let store = store_args.open_store()?;
    let summary = extract_features(store.as_ref(), paths)?;
    drop(store);

    println!("✓ Products loaded: {}", summary.products);
    println!(
        "✓ Orders processed: {} ({} without a customer phone)",
        summary.orders_processed, summary.orders_skipped
    );
    println!("✓ Users profiled: {}", summary.users);
    println!("  Categories: {}", summary.categories.join(", "));
    println!("  Category map saved to: {}", paths.categories.display());
    println!("  Feature table saved to: {}", paths.features.display());
    println!(
        "  Processing time: {:.2}s\n",
        start_time.elapsed().as_secs_f64()
    );

    Ok(())
}

/// Run the clustering and labeling step
fn run_clustering(cluster_args: &ClusterArgs, paths: &ArtifactPaths) -> Result<()> {
    cluster_args.validate()?;

    println!("=== User Clustering ===\n");
    let start_time = Instant::now();

    let summary = cluster_features(
        paths,
        &cluster_args.cluster_params(),
        &cluster_args.labeling_config(),
    )?;

    let Some(summary) = summary else {
        println!("No users to cluster; nothing written.");
        return Ok(());
    };

    println!(
        "✓ Clustered {} users into {} segments",
        summary.users, summary.n_clusters
    );

    println!("\n=== Cluster Statistics ===");
    for (i, (&size, label)) in summary
        .cluster_sizes
        .iter()
        .zip(summary.labels.iter())
        .enumerate()
    {
        let percentage = (size as f64 / summary.users as f64) * 100.0;
        println!("Cluster {}: {} ({} users, {:.1}%)", i, label, size, percentage);
    }

    println!("\nSilhouette score (sample): {:.3}", summary.silhouette);
    println!("Within-cluster sum of squares: {:.2}", summary.inertia);

    println!("\n=== Pipeline Complete ===");
    println!(
        "Total processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    println!("Cluster data saved to: {}", paths.clusters.display());

    Ok(())
}
