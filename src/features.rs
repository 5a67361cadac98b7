//! Per-customer RFM feature computation and normalization.

use ndarray::{Array2, Axis};
use polars::prelude::*;
use tracing::{debug, info};

use crate::data::{
    float_column, invoice_timestamps, require_columns, COUNTRY, CUSTOMER_ID, INVOICE,
    INVOICE_DATE, PRICE,
};
use crate::error::{PipelineError, Stage};
use crate::scaler::StandardScaler;

pub const RECENCY: &str = "Recency";
pub const FREQUENCY: &str = "Frequency";
pub const MONETARY: &str = "Monetary";
pub const TOTAL_ORDERS: &str = "Total Orders";
pub const AVERAGE_PRICE: &str = "Average Price";

/// The five clustering features, in matrix column order.
pub const FEATURE_COLUMNS: [&str; 5] = [RECENCY, FREQUENCY, MONETARY, TOTAL_ORDERS, AVERAGE_PRICE];

const REQUIRED_COLUMNS: [&str; 5] = [CUSTOMER_ID, INVOICE, PRICE, INVOICE_DATE, COUNTRY];

const INVOICE_TS: &str = "__invoice_ts";
const LAST_INVOICE_TS: &str = "__last_invoice_ts";
const SECONDS_PER_DAY: i64 = 86_400;

/// A normalized feature table together with the normalizer fit on it.
///
/// Keeping the two in one value means the clustering stage can always be
/// handed the transform that matches its input.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    /// `Customer ID` followed by the five normalized feature columns, one row per customer
    pub table: DataFrame,
    pub normalizer: StandardScaler,
}

impl FeatureSet {
    pub fn n_customers(&self) -> usize {
        self.table.height()
    }

    pub fn customer_ids(&self) -> crate::Result<Vec<i64>> {
        customer_ids(&self.table)
    }
}

/// Build the normalized per-customer feature table from cleaned transactions.
///
/// # Arguments
/// * `clean_rows` - Output of [`crate::clean::clean`]
/// * `market` - Country kept; every other row is excluded
///
/// # Returns
/// * `FeatureSet` with rows ordered by customer id and the fitted normalizer
pub fn build_features(clean_rows: &DataFrame, market: &str) -> crate::Result<FeatureSet> {
    require_columns(clean_rows, &REQUIRED_COLUMNS, Stage::Features)?;

    let mut market_rows = clean_rows
        .clone()
        .lazy()
        .filter(col(COUNTRY).eq(lit(market)))
        .collect()?;
    debug!(market, rows = market_rows.height(), "filtered to market");

    if market_rows.height() == 0 {
        return Err(PipelineError::EmptyTable {
            stage: Stage::Features,
            reason: format!("no transactions for market '{market}'"),
        });
    }

    // fail on ids that cannot become integers before they are grouped
    customer_ids(&market_rows)?;

    let timestamps = invoice_timestamps(&market_rows)?;
    let Some(latest) = timestamps.iter().flatten().copied().max() else {
        return Err(PipelineError::EmptyTable {
            stage: Stage::Features,
            reason: "no usable invoice dates".to_string(),
        });
    };
    market_rows.with_column(Series::new(INVOICE_TS.into(), timestamps))?;

    let raw = compute_rfm_features(market_rows, latest)?;
    let ids = customer_ids(&raw)?;
    let raw_features = feature_matrix(&raw)?;

    let normalizer =
        StandardScaler::fit(&raw_features).with_fingerprint(StandardScaler::fingerprint_of(&ids));
    let normalized = normalizer.transform(&raw_features)?;

    let table = feature_table(ids, &normalized)?;
    info!(customers = table.height(), "built customer features");

    Ok(FeatureSet { table, normalizer })
}

/// Aggregate transactions to one raw (unnormalized) feature row per customer.
///
/// `latest` is the most recent invoice timestamp of the whole table; recency
/// is measured from it in whole days. Lines without a date still count toward
/// the other features, but a customer with no dated line has no recency.
fn compute_rfm_features(df: DataFrame, latest: i64) -> crate::Result<DataFrame> {
    let rfm = df
        .lazy()
        .group_by([col(CUSTOMER_ID)])
        .agg([
            col(INVOICE_TS).max().alias(LAST_INVOICE_TS),
            col(INVOICE).len().alias(FREQUENCY),
            col(PRICE).sum().alias(MONETARY),
            len().alias(TOTAL_ORDERS),
            col(PRICE).mean().alias(AVERAGE_PRICE),
        ])
        .with_column(col(CUSTOMER_ID).cast(DataType::Int64))
        .sort([CUSTOMER_ID], SortMultipleOptions::default())
        .collect()?;

    let ids = rfm.column(CUSTOMER_ID)?.i64()?;
    let recency = rfm
        .column(LAST_INVOICE_TS)?
        .i64()?
        .into_iter()
        .zip(ids.into_iter())
        .map(|(last, id)| match last {
            Some(last) => Ok((latest - last).div_euclid(SECONDS_PER_DAY)),
            None => Err(PipelineError::InvalidTimestamp {
                value: format!("no invoice date for customer {}", id.unwrap_or_default()),
            }),
        })
        .collect::<crate::Result<Vec<i64>>>()?;

    let mut rfm = rfm.drop(LAST_INVOICE_TS)?;
    rfm.with_column(Series::new(RECENCY.into(), recency))?;
    Ok(rfm)
}

/// Read the five feature columns of `df` into an `(n_customers, 5)` matrix.
pub fn feature_matrix(df: &DataFrame) -> crate::Result<Array2<f64>> {
    let mut matrix = Array2::zeros((df.height(), FEATURE_COLUMNS.len()));
    for (j, name) in FEATURE_COLUMNS.iter().enumerate() {
        let values = float_column(df, name)?;
        for (cell, value) in matrix.column_mut(j).iter_mut().zip(values) {
            *cell = value;
        }
    }
    Ok(matrix)
}

/// Customer ids of a table, coerced to integers.
///
/// Fails on the first id that is null or does not convert.
pub fn customer_ids(df: &DataFrame) -> crate::Result<Vec<i64>> {
    let column = df.column(CUSTOMER_ID)?;
    let cast = column.cast(&DataType::Int64)?;

    cast.i64()?
        .into_iter()
        .enumerate()
        .map(|(i, id)| {
            id.ok_or_else(|| PipelineError::InvalidCustomerId {
                value: column
                    .get(i)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|_| "null".to_string()),
            })
        })
        .collect()
}

fn feature_table(ids: Vec<i64>, features: &Array2<f64>) -> crate::Result<DataFrame> {
    let column = |j: usize| features.index_axis(Axis(1), j).to_vec();

    let table = df!(
        CUSTOMER_ID => ids,
        RECENCY => column(0),
        FREQUENCY => column(1),
        MONETARY => column(2),
        TOTAL_ORDERS => column(3),
        AVERAGE_PRICE => column(4),
    )?;
    Ok(table)
}
