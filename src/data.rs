//! Feature table persistence using Polars, and feature standardization

use crate::artifacts::write_atomically;
use crate::error::SegmentError;
use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use std::path::Path;

pub const USER_ID_COLUMN: &str = "user_id";
pub const TOTAL_ORDERS: &str = "total_orders";
pub const AVG_ITEMS_PER_ORDER: &str = "avg_items_per_order";
pub const AVG_QUANTITY_PER_ITEM: &str = "avg_quantity_per_item";
pub const RATIO_PREFIX: &str = "ratio_";

/// Columns present in every feature table, before the category ratios
pub const BASE_FEATURES: [&str; 3] = [TOTAL_ORDERS, AVG_ITEMS_PER_ORDER, AVG_QUANTITY_PER_ITEM];

/// One row of the feature table
#[derive(Debug, Clone, PartialEq)]
pub struct UserFeatureVector {
    pub user_id: String,
    pub total_orders: u64,
    pub avg_items_per_order: f64,
    pub avg_quantity_per_item: f64,
    /// Share of the user's quantity per category, aligned with
    /// [`FeatureTable::ratio_columns`]
    pub ratios: Vec<f64>,
}

/// Per-user feature table as produced by the extraction step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    /// `ratio_<category>` column names in output order
    pub ratio_columns: Vec<String>,
    pub rows: Vec<UserFeatureVector>,
}

impl FeatureTable {
    /// Feature column names (everything except `user_id`)
    pub fn feature_names(&self) -> Vec<String> {
        BASE_FEATURES
            .iter()
            .map(|name| name.to_string())
            .chain(self.ratio_columns.iter().cloned())
            .collect()
    }

    pub fn to_dataframe(&self) -> crate::Result<DataFrame> {
        let mut columns = Vec::with_capacity(1 + BASE_FEATURES.len() + self.ratio_columns.len());

        columns.push(Series::new(
            USER_ID_COLUMN,
            self.rows.iter().map(|r| r.user_id.as_str()).collect::<Vec<_>>(),
        ));
        columns.push(Series::new(
            TOTAL_ORDERS,
            self.rows.iter().map(|r| r.total_orders).collect::<Vec<u64>>(),
        ));
        columns.push(Series::new(
            AVG_ITEMS_PER_ORDER,
            self.rows.iter().map(|r| r.avg_items_per_order).collect::<Vec<f64>>(),
        ));
        columns.push(Series::new(
            AVG_QUANTITY_PER_ITEM,
            self.rows.iter().map(|r| r.avg_quantity_per_item).collect::<Vec<f64>>(),
        ));

        for (idx, name) in self.ratio_columns.iter().enumerate() {
            let values: Vec<f64> = self
                .rows
                .iter()
                .map(|r| r.ratios.get(idx).copied().unwrap_or(0.0))
                .collect();
            columns.push(Series::new(name, values));
        }

        Ok(DataFrame::new(columns)?)
    }

    /// Persist as CSV with a header row
    pub fn write_csv(&self, path: &Path) -> crate::Result<()> {
        let mut df = self.to_dataframe()?;
        write_atomically(path, |file| {
            CsvWriter::new(file).finish(&mut df)?;
            Ok(())
        })
    }
}

/// Feature table loaded back for clustering
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub user_ids: Vec<String>,
    pub feature_names: Vec<String>,
    /// Raw (unscaled) values, one row per user
    pub raw: Array2<f64>,
}

impl FeatureMatrix {
    pub fn n_users(&self) -> usize {
        self.user_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }

    /// Column means over all users
    pub fn global_means(&self) -> Array1<f64> {
        self.raw
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.feature_names.len()))
    }
}

/// Load the feature table written by the extraction step
///
/// Every column except `user_id` is treated as a numeric feature; values
/// that are missing or unparsable count as 0. User ids are read verbatim so
/// phone numbers keep leading zeros.
pub fn load_feature_matrix(path: &Path) -> crate::Result<FeatureMatrix> {
    if !path.exists() {
        return Err(SegmentError::MissingInput {
            path: path.to_path_buf(),
        }
        .into());
    }

    let read = CsvReader::from_path(path)?
        .has_header(true)
        .infer_schema(Some(0))
        .finish();
    let df = match read {
        Ok(df) => df,
        Err(PolarsError::NoData(_)) => {
            return Ok(FeatureMatrix {
                user_ids: Vec::new(),
                feature_names: Vec::new(),
                raw: Array2::zeros((0, 0)),
            })
        }
        Err(e) => return Err(e.into()),
    };

    let column_names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    if !column_names.iter().any(|name| name == USER_ID_COLUMN) {
        return Err(SegmentError::InvalidTable(format!(
            "{} has no '{}' column",
            path.display(),
            USER_ID_COLUMN
        ))
        .into());
    }

    let user_ids: Vec<String> = df
        .column(USER_ID_COLUMN)?
        .cast(&DataType::String)?
        .str()?
        .into_iter()
        .map(|id| id.unwrap_or_default().to_string())
        .collect();

    let feature_names: Vec<String> = column_names
        .into_iter()
        .filter(|name| name != USER_ID_COLUMN)
        .collect();

    let mut raw = Array2::zeros((df.height(), feature_names.len()));
    for (col_idx, name) in feature_names.iter().enumerate() {
        let values = df.column(name)?.cast(&DataType::Float64)?;
        for (row_idx, value) in values.f64()?.into_iter().enumerate() {
            raw[[row_idx, col_idx]] = value.filter(|v| v.is_finite()).unwrap_or(0.0);
        }
    }

    Ok(FeatureMatrix {
        user_ids,
        feature_names,
        raw,
    })
}

/// Per-column standardization to zero mean and unit (population) variance
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl StandardScaler {
    /// Below this a column is considered constant
    const MIN_STD: f64 = 1e-12;

    pub fn fit(data: &Array2<f64>) -> Self {
        let mean = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(data.ncols()));
        let std = if data.nrows() == 0 {
            Array1::zeros(data.ncols())
        } else {
            data.std_axis(Axis(0), 0.0)
        };
        Self { mean, std }
    }

    /// Scale `data`; constant columns become 0 everywhere
    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut scaled = data - &self.mean;
        for (mut column, &std) in scaled.axis_iter_mut(Axis(1)).zip(self.std.iter()) {
            if std > Self::MIN_STD {
                column.mapv_inplace(|v| v / std);
            } else {
                column.fill(0.0);
            }
        }
        scaled
    }

    pub fn fit_transform(data: &Array2<f64>) -> (Self, Array2<f64>) {
        let scaler = Self::fit(data);
        let scaled = scaler.transform(data);
        (scaler, scaled)
    }
}
