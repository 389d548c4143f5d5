//! Feature extraction: aggregate orders into per-user purchase profiles

use crate::artifacts::{write_json, ArtifactPaths};
use crate::data::{FeatureTable, UserFeatureVector, RATIO_PREFIX};
use crate::store::{DocumentStore, OrderRecord, ProductRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Category assigned to products without one, and to unknown product ids
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Product id -> category lookup, built once per run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductCategoryMap(BTreeMap<String, String>);

impl ProductCategoryMap {
    pub fn from_products(products: &[ProductRecord]) -> Self {
        let map = products
            .iter()
            .map(|p| {
                let category = p.category.as_deref().unwrap_or(UNKNOWN_CATEGORY);
                (p.id.clone(), category.to_string())
            })
            .collect();
        Self(map)
    }

    /// Category of `product`, or [`UNKNOWN_CATEGORY`]
    pub fn category_of(&self, product: Option<&str>) -> &str {
        product
            .and_then(|id| self.0.get(id))
            .map(String::as_str)
            .unwrap_or(UNKNOWN_CATEGORY)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn write_json(&self, path: &Path) -> crate::Result<()> {
        write_json(path, self, false)
    }
}

/// Running totals for one user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserAggregate {
    pub total_orders: u64,
    /// Number of line items, not quantity
    pub total_items: u64,
    pub total_quantity: u64,
    /// Quantity bought per category; sums to `total_quantity`
    pub categories: BTreeMap<String, u64>,
}

impl UserAggregate {
    pub fn add_order(&mut self, order: &OrderRecord, category_map: &ProductCategoryMap) {
        self.total_orders += 1;
        for item in &order.items {
            self.total_items += 1;
            self.total_quantity += item.qty;
            let category = category_map.category_of(item.product.as_deref());
            *self.categories.entry(category.to_string()).or_insert(0) += item.qty;
        }
    }

    pub fn avg_items_per_order(&self) -> f64 {
        ratio(self.total_items, self.total_orders)
    }

    pub fn avg_quantity_per_item(&self) -> f64 {
        ratio(self.total_quantity, self.total_items)
    }

    /// Share of quantity bought in `category`
    pub fn category_ratio(&self, category: &str) -> f64 {
        ratio(
            self.categories.get(category).copied().unwrap_or(0),
            self.total_quantity,
        )
    }

    pub fn to_feature_vector(&self, user_id: &str, columns: &[RatioColumn]) -> UserFeatureVector {
        UserFeatureVector {
            user_id: user_id.to_string(),
            total_orders: self.total_orders,
            avg_items_per_order: self.avg_items_per_order(),
            avg_quantity_per_item: self.avg_quantity_per_item(),
            ratios: columns
                .iter()
                .map(|column| {
                    column
                        .categories
                        .iter()
                        .map(|category| self.category_ratio(category))
                        .sum()
                })
                .collect(),
        }
    }
}

/// `num / den`, or 0 when the denominator is 0
fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Result of folding an order stream into per-user aggregates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub users: BTreeMap<String, UserAggregate>,
    /// Every order read, including skipped ones
    pub orders_processed: usize,
    /// Orders without a user key
    pub orders_skipped: usize,
}

impl Aggregation {
    /// Distinct categories across all users, sorted
    pub fn categories(&self) -> BTreeSet<&str> {
        self.users
            .values()
            .flat_map(|user| user.categories.keys().map(String::as_str))
            .collect()
    }
}

/// Fold `orders` into per-user aggregates; the first `Err` aborts
pub fn aggregate_orders<I>(orders: I, category_map: &ProductCategoryMap) -> crate::Result<Aggregation>
where
    I: IntoIterator<Item = crate::Result<OrderRecord>>,
{
    let mut aggregation = Aggregation::default();

    for order in orders {
        let order = order?;
        aggregation.orders_processed += 1;

        let Some(user_id) = order.customer_phone.as_deref() else {
            aggregation.orders_skipped += 1;
            continue;
        };

        aggregation
            .users
            .entry(user_id.to_string())
            .or_default()
            .add_order(&order, category_map);
    }

    Ok(aggregation)
}

/// Keep only the alphanumeric characters of a category name
pub fn sanitize_category(category: &str) -> String {
    category.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// One `ratio_` column and the raw categories that feed it
#[derive(Debug, Clone, PartialEq)]
pub struct RatioColumn {
    pub name: String,
    /// More than one entry only when distinct names sanitize identically
    pub categories: Vec<String>,
}

/// Build the ratio columns for the sorted category set
///
/// Categories whose sanitized names collide share one column and their
/// ratios are summed.
pub fn ratio_columns<'a, I>(categories: I) -> Vec<RatioColumn>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut columns: Vec<RatioColumn> = Vec::new();

    for category in categories {
        let name = format!("{}{}", RATIO_PREFIX, sanitize_category(category));
        match columns.iter_mut().find(|column| column.name == name) {
            Some(column) => {
                warn!(
                    "Categories {:?} and {:?} both map to column {}; merging",
                    column.categories, category, name
                );
                column.categories.push(category.to_string());
            }
            None => columns.push(RatioColumn {
                name,
                categories: vec![category.to_string()],
            }),
        }
    }

    columns
}

/// Turn aggregates into the feature table, one row per user
pub fn build_feature_table(aggregation: &Aggregation) -> FeatureTable {
    let columns = ratio_columns(aggregation.categories());
    let rows = aggregation
        .users
        .iter()
        .map(|(user_id, user)| user.to_feature_vector(user_id, &columns))
        .collect();

    FeatureTable {
        ratio_columns: columns.into_iter().map(|column| column.name).collect(),
        rows,
    }
}

/// Counts reported by the extraction step
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSummary {
    pub products: usize,
    pub orders_processed: usize,
    pub orders_skipped: usize,
    pub users: usize,
    /// Sorted categories observed in orders
    pub categories: Vec<String>,
}

/// Run the extraction step against `store`
///
/// The category map is written before orders are read. The feature table is
/// only written after the whole order stream has been consumed, so a store
/// failure mid-stream leaves no table behind.
pub fn extract_features(
    store: &dyn DocumentStore,
    paths: &ArtifactPaths,
) -> crate::Result<ExtractionSummary> {
    info!("Fetching products...");
    let products = store.products()?;
    let category_map = ProductCategoryMap::from_products(&products);
    info!("Loaded {} products", category_map.len());

    category_map.write_json(&paths.categories)?;
    info!("Product categories saved to {}", paths.categories.display());

    info!("Fetching orders...");
    let aggregation = aggregate_orders(store.orders()?, &category_map)?;
    info!(
        "Processed {} orders for {} users",
        aggregation.orders_processed,
        aggregation.users.len()
    );
    if aggregation.orders_skipped > 0 {
        debug!(
            "Skipped {} orders without a customer phone",
            aggregation.orders_skipped
        );
    }

    let categories: Vec<String> = aggregation
        .categories()
        .into_iter()
        .map(str::to_owned)
        .collect();
    info!("Categories found: {:?}", categories);

    let table = build_feature_table(&aggregation);
    table.write_csv(&paths.features)?;
    info!("Features saved to {}", paths.features.display());

    Ok(ExtractionSummary {
        products: products.len(),
        orders_processed: aggregation.orders_processed,
        orders_skipped: aggregation.orders_skipped,
        users: aggregation.users.len(),
        categories,
    })
}
