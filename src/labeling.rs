//! Persona labels and boost categories derived from cluster centroids
//!
//! A cluster is described by the features on which its centroid sits
//! furthest above the global mean, measured relative to that mean. Feature
//! names map to phrases through [`LABEL_RULES`].

use crate::data::{AVG_ITEMS_PER_ORDER, AVG_QUANTITY_PER_ITEM, RATIO_PREFIX, TOTAL_ORDERS};
use ndarray::{Array1, ArrayView1};

/// Label used when no feature stands out
pub const STANDARD_LABEL: &str = "Standard User";

/// Separator between label phrases
pub const LABEL_SEPARATOR: &str = " & ";

/// Tunable thresholds of the labeling heuristic
#[derive(Debug, Clone, PartialEq)]
pub struct LabelingConfig {
    /// Minimum relative deviation for a feature to name the cluster
    pub significance_threshold: f64,
    /// Minimum centroid share for a category to be boosted
    pub boost_threshold: f64,
    /// Added to the global mean in the deviation denominator
    pub epsilon: f64,
    /// How many of the most deviating features are considered
    pub top_features: usize,
    /// How many phrases make up a label
    pub max_label_parts: usize,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            significance_threshold: 0.2,
            boost_threshold: 0.3,
            epsilon: 0.001,
            top_features: 3,
            max_label_parts: 2,
        }
    }
}

/// How a feature name turns into a label phrase
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LabelRule {
    /// `<prefix><rest>` becomes `<rest><suffix>`
    Prefix {
        prefix: &'static str,
        suffix: &'static str,
    },
    /// The exact feature becomes a fixed phrase
    Exact {
        feature: &'static str,
        phrase: &'static str,
    },
}

impl LabelRule {
    pub fn phrase(&self, feature: &str) -> Option<String> {
        match *self {
            LabelRule::Prefix { prefix, suffix } => feature
                .strip_prefix(prefix)
                .map(|rest| format!("{}{}", rest, suffix)),
            LabelRule::Exact {
                feature: name,
                phrase,
            } => (feature == name).then(|| phrase.to_string()),
        }
    }
}

pub const LABEL_RULES: &[LabelRule] = &[
    LabelRule::Prefix {
        prefix: RATIO_PREFIX,
        suffix: " Lover",
    },
    LabelRule::Exact {
        feature: TOTAL_ORDERS,
        phrase: "Frequent Buyer",
    },
    LabelRule::Exact {
        feature: AVG_ITEMS_PER_ORDER,
        phrase: "Large Basket",
    },
    LabelRule::Exact {
        feature: AVG_QUANTITY_PER_ITEM,
        phrase: "Bulk Item Buyer",
    },
];

/// Phrase for `feature` from the first matching rule
pub fn phrase_for(feature: &str) -> Option<String> {
    LABEL_RULES.iter().find_map(|rule| rule.phrase(feature))
}

/// `(centroid - mean) / (mean + epsilon)` per feature
pub fn relative_deviations(
    centroid: ArrayView1<f64>,
    global_means: ArrayView1<f64>,
    epsilon: f64,
) -> Array1<f64> {
    (&centroid - &global_means) / global_means.mapv(|m| m + epsilon)
}

/// The `n` largest deviations, highest first; ties keep column order
pub fn top_deviations<'a>(
    feature_names: &'a [String],
    deviations: &Array1<f64>,
    n: usize,
) -> Vec<(&'a str, f64)> {
    let mut ranked: Vec<(&str, f64)> = feature_names
        .iter()
        .map(String::as_str)
        .zip(deviations.iter().copied())
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(n);
    ranked
}

/// Label from the most deviating features, e.g. `"Fruit Lover & Large Basket"`
pub fn derive_label(
    feature_names: &[String],
    deviations: &Array1<f64>,
    config: &LabelingConfig,
) -> String {
    let parts: Vec<String> = top_deviations(feature_names, deviations, config.top_features)
        .into_iter()
        .filter(|(_, score)| *score > config.significance_threshold)
        .filter_map(|(feature, _)| phrase_for(feature))
        .take(config.max_label_parts)
        .collect();

    if parts.is_empty() {
        STANDARD_LABEL.to_string()
    } else {
        parts.join(LABEL_SEPARATOR)
    }
}

/// Categories whose centroid share exceeds the boost threshold
pub fn boost_categories(
    feature_names: &[String],
    centroid: ArrayView1<f64>,
    config: &LabelingConfig,
) -> Vec<String> {
    feature_names
        .iter()
        .zip(centroid.iter())
        .filter(|(_, &value)| value > config.boost_threshold)
        .filter_map(|(feature, _)| feature.strip_prefix(RATIO_PREFIX))
        .map(str::to_owned)
        .collect()
}
