//! Integration tests for SegmentForge

use segmentforge::{
    cluster_features, extract_features, load_feature_matrix, ArtifactPaths, ClusterOutput,
    ClusterParams, LabelingConfig, ProductCategoryMap, SegmentError, SnapshotStore,
};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

/// Write a mongoexport-style dump: products as a JSON array, orders as NDJSON
fn create_test_snapshot() -> TempDir {
    let dir = tempfile::tempdir().unwrap();

    fs::write(
        dir.path().join(SnapshotStore::PRODUCTS_FILE),
        r#"[
            {"_id": {"$oid": "65a1b2c3d4e5f60718293a01"}, "category": "Fruit"},
            {"_id": {"$oid": "65a1b2c3d4e5f60718293a02"}, "category": "Drinks"},
            {"_id": {"$oid": "65a1b2c3d4e5f60718293a03"}, "category": "Dried Nuts"},
            {"_id": {"$oid": "65a1b2c3d4e5f60718293a04"}}
        ]"#,
    )
    .unwrap();

    let mut orders = fs::File::create(dir.path().join(SnapshotStore::ORDERS_FILE)).unwrap();
    let mut order = |phone: Option<&str>, items: &[(&str, i64)]| {
        let items: Vec<String> = items
            .iter()
            .map(|(product, qty)| {
                format!(
                    r#"{{"product": {{"$oid": "65a1b2c3d4e5f60718293a{}"}}, "qty": {}}}"#,
                    product, qty
                )
            })
            .collect();
        let customer = match phone {
            Some(phone) => format!(r#""customerInfo": {{"phone": "{}"}}, "#, phone),
            None => String::new(),
        };
        writeln!(orders, r#"{{{}"orderItems": [{}]}}"#, customer, items.join(", ")).unwrap();
    };

    // Fruit buyers
    order(Some("0550000001"), &[("01", 4), ("02", 1)]);
    order(Some("0550000001"), &[("01", 3)]);
    order(Some("0550000002"), &[("01", 5)]);
    order(Some("0550000003"), &[("01", 2), ("01", 2)]);
    // Drink buyers
    order(Some("0550000004"), &[("02", 6)]);
    order(Some("0550000005"), &[("02", 3), ("04", 1)]);
    // Nut bulk buyer
    order(Some("0550000006"), &[("03", 12)]);
    order(Some("0550000006"), &[("03", 10)]);
    // Guest checkout without a phone
    order(None, &[("02", 50)]);

    dir
}

fn read_csv_header(path: &Path) -> String {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .next()
        .unwrap()
        .to_string()
}

#[test]
fn test_end_to_end_pipeline() {
    let snapshot = create_test_snapshot();
    let out = tempfile::tempdir().unwrap();
    let paths = ArtifactPaths::in_dir(out.path());

    // Extraction
    let store = SnapshotStore::open(snapshot.path()).unwrap();
    let summary = extract_features(&store, &paths).unwrap();

    assert_eq!(summary.products, 4);
    assert_eq!(summary.orders_processed, 9);
    assert_eq!(summary.orders_skipped, 1);
    assert_eq!(summary.users, 6);
    assert_eq!(summary.categories, vec!["Dried Nuts", "Drinks", "Fruit", "Unknown"]);

    let categories: ProductCategoryMap =
        serde_json::from_str(&fs::read_to_string(&paths.categories).unwrap()).unwrap();
    assert_eq!(categories.len(), 4);
    assert_eq!(categories.category_of(Some("65a1b2c3d4e5f60718293a04")), "Unknown");

    assert_eq!(
        read_csv_header(&paths.features),
        "user_id,total_orders,avg_items_per_order,avg_quantity_per_item,\
         ratio_DriedNuts,ratio_Drinks,ratio_Fruit,ratio_Unknown"
    );

    // Ratios form a distribution per user and leading zeros survive
    let matrix = load_feature_matrix(&paths.features).unwrap();
    assert_eq!(matrix.n_users(), 6);
    assert_eq!(matrix.user_ids[0], "0550000001");
    for row in matrix.raw.outer_iter() {
        let ratio_sum: f64 = row.iter().skip(3).sum();
        assert!((ratio_sum - 1.0).abs() < 1e-9);
    }
    // 0550000001: 2 orders, 3 lines, 8 units, 7 of them fruit
    let first = matrix.raw.row(0);
    assert_eq!(first[0], 2.0);
    assert!((first[1] - 1.5).abs() < 1e-9);
    assert!((first[2] - 8.0 / 3.0).abs() < 1e-9);
    assert!((first[5] - 7.0 / 8.0).abs() < 1e-9);

    // Clustering
    let summary = cluster_features(&paths, &ClusterParams::default(), &LabelingConfig::default())
        .unwrap()
        .expect("six users produce clusters");

    assert_eq!(summary.users, 6);
    assert_eq!(summary.n_clusters, 5);
    assert_eq!(summary.cluster_sizes.iter().sum::<usize>(), 6);
    assert!(summary.inertia >= 0.0 && summary.inertia.is_finite());

    let output = ClusterOutput::load(&paths.clusters).unwrap();
    assert_eq!(output.user_clusters.len(), 6);
    assert_eq!(output.cluster_definitions.len(), 5);
    assert!(output.user_clusters.values().all(|&id| id < 5));
    assert!(!output.user_clusters.contains_key(""));

    // The nut buyer stands out on its own
    let nut_cluster = &output.cluster_definitions[&output.user_clusters["0550000006"]];
    assert!(nut_cluster.name.contains("DriedNuts Lover"), "{}", nut_cluster.name);
    assert_eq!(nut_cluster.boost_categories, vec!["DriedNuts"]);
}

#[test]
fn test_clustering_is_deterministic() {
    let snapshot = create_test_snapshot();
    let out = tempfile::tempdir().unwrap();
    let paths = ArtifactPaths::in_dir(out.path());

    let store = SnapshotStore::open(snapshot.path()).unwrap();
    extract_features(&store, &paths).unwrap();

    let params = ClusterParams {
        max_clusters: 3,
        ..ClusterParams::default()
    };
    cluster_features(&paths, &params, &LabelingConfig::default()).unwrap();
    let first = fs::read_to_string(&paths.clusters).unwrap();

    cluster_features(&paths, &params, &LabelingConfig::default()).unwrap();
    let second = fs::read_to_string(&paths.clusters).unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_cluster_before_extract_reports_missing_input() {
    let out = tempfile::tempdir().unwrap();
    let paths = ArtifactPaths::in_dir(out.path());

    let err = cluster_features(&paths, &ClusterParams::default(), &LabelingConfig::default())
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SegmentError>(),
        Some(SegmentError::MissingInput { .. })
    ));
    assert!(err.to_string().contains("user_features.csv"));
}

#[test]
fn test_store_without_keyed_orders_is_a_noop_for_clustering() {
    let snapshot = tempfile::tempdir().unwrap();
    fs::write(snapshot.path().join(SnapshotStore::PRODUCTS_FILE), "[]").unwrap();
    fs::write(
        snapshot.path().join(SnapshotStore::ORDERS_FILE),
        r#"{"orderItems": [{"product": "x", "qty": 1}]}"#,
    )
    .unwrap();
    let out = tempfile::tempdir().unwrap();
    let paths = ArtifactPaths::in_dir(out.path());

    let store = SnapshotStore::open(snapshot.path()).unwrap();
    let summary = extract_features(&store, &paths).unwrap();
    assert_eq!(summary.users, 0);
    assert_eq!(summary.orders_skipped, 1);

    let clustered =
        cluster_features(&paths, &ClusterParams::default(), &LabelingConfig::default()).unwrap();
    assert!(clustered.is_none());
    assert!(!paths.clusters.exists());
}

#[test]
fn test_two_users_get_two_clusters() {
    let snapshot = tempfile::tempdir().unwrap();
    fs::write(
        snapshot.path().join(SnapshotStore::PRODUCTS_FILE),
        r#"[{"_id": "p1", "category": "Fruit"}, {"_id": "p2", "category": "Drinks"}]"#,
    )
    .unwrap();
    fs::write(
        snapshot.path().join(SnapshotStore::ORDERS_FILE),
        concat!(
            r#"{"customerInfo": {"phone": "A"}, "orderItems": [{"product": "p1", "qty": 3}]}"#,
            "\n",
            r#"{"customerInfo": {"phone": "B"}, "orderItems": [{"product": "p2", "qty": 1}]}"#,
            "\n"
        ),
    )
    .unwrap();
    let out = tempfile::tempdir().unwrap();
    let paths = ArtifactPaths::in_dir(out.path());

    let store = SnapshotStore::open(snapshot.path()).unwrap();
    extract_features(&store, &paths).unwrap();

    let matrix = load_feature_matrix(&paths.features).unwrap();
    assert_eq!(
        matrix.feature_names[3..],
        ["ratio_Drinks".to_string(), "ratio_Fruit".to_string()]
    );
    assert_eq!(matrix.raw.row(0).to_vec()[3..], [0.0, 1.0]);
    assert_eq!(matrix.raw.row(1).to_vec()[3..], [1.0, 0.0]);

    let summary = cluster_features(&paths, &ClusterParams::default(), &LabelingConfig::default())
        .unwrap()
        .unwrap();
    assert_eq!(summary.n_clusters, 2);

    let output = ClusterOutput::load(&paths.clusters).unwrap();
    assert_ne!(output.user_clusters["A"], output.user_clusters["B"]);
    let a = &output.cluster_definitions[&output.user_clusters["A"]];
    assert_eq!(a.name, "Fruit Lover & Bulk Item Buyer");
    assert_eq!(a.boost_categories, vec!["Fruit"]);
}
