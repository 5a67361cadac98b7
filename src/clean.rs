//! Transaction cleaning: nulls, non-positive lines, quantity/price outliers, duplicates.

use polars::prelude::*;
use tracing::{debug, info};

use crate::data::{float_column, require_columns, CUSTOMER_ID, DESCRIPTION, PRICE, QUANTITY};
use crate::error::Stage;

/// Columns the cleaner reads; every other column is carried through untouched.
const CLEAN_COLUMNS: [&str; 4] = [CUSTOMER_ID, DESCRIPTION, QUANTITY, PRICE];

/// Clean a raw transaction table.
///
/// Steps, in order:
/// 1. drop rows without a customer id or description
/// 2. drop rows with quantity <= 0 or price <= 0
/// 3. drop rows whose quantity or price is at or above the `quantile`
///    threshold, both thresholds computed on the output of step 2
/// 4. drop exact duplicate rows, keeping the first occurrence
///
/// Only a missing column is an error. An input that filters down to nothing
/// yields an empty table.
pub fn clean(raw: &DataFrame, quantile: f64) -> crate::Result<DataFrame> {
    require_columns(raw, &CLEAN_COLUMNS, Stage::Clean)?;
    let input_rows = raw.height();

    let valid = raw
        .clone()
        .lazy()
        .filter(
            col(CUSTOMER_ID)
                .is_not_null()
                .and(col(DESCRIPTION).is_not_null()),
        )
        .filter(col(QUANTITY).gt(lit(0)).and(col(PRICE).gt(lit(0.0))))
        .collect()?;
    debug!(
        before = input_rows,
        after = valid.height(),
        "dropped incomplete and non-positive lines"
    );

    let quantity_limit = quantile_of(&float_column(&valid, QUANTITY)?, quantile);
    let price_limit = quantile_of(&float_column(&valid, PRICE)?, quantile);

    let mut outlier_free = valid.lazy();
    if let (Some(q_limit), Some(p_limit)) = (quantity_limit, price_limit) {
        debug!(quantile, q_limit, p_limit, "outlier thresholds");
        outlier_free = outlier_free
            .filter(col(QUANTITY).lt(lit(q_limit)).and(col(PRICE).lt(lit(p_limit))));
    }

    let cleaned = outlier_free
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()?;

    info!(
        input_rows,
        output_rows = cleaned.height(),
        "cleaned transactions"
    );
    Ok(cleaned)
}

/// Quantile of `values` with linear interpolation between order statistics.
///
/// NaNs are ignored. Returns `None` when nothing is left to rank.
pub fn quantile_of(values: &[f64], q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let position = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    fn raw_table() -> DataFrame {
        let quantities: Vec<i64> = (1..=20).collect();
        let prices: Vec<f64> = (1..=20).map(|p| p as f64 * 0.5).collect();
        let customers: Vec<Option<f64>> = (0..20).map(|i| Some(100.0 + i as f64)).collect();
        let descriptions: Vec<Option<String>> =
            (0..20).map(|i| Some(format!("ITEM {i}"))).collect();

        df!(
            "Invoice" => (0..20).map(|i| format!("5000{i}")).collect::<Vec<_>>(),
            CUSTOMER_ID => customers,
            DESCRIPTION => descriptions,
            QUANTITY => quantities,
            PRICE => prices,
            "InvoiceDate" => vec!["2010-12-01 08:26:00"; 20],
            "Country" => vec!["United Kingdom"; 20],
        )
        .unwrap()
    }

    #[test]
    fn test_quantile_linear() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_of(&values, 0.0), Some(1.0));
        assert_eq!(quantile_of(&values, 1.0), Some(4.0));
        assert_eq!(quantile_of(&values, 0.5), Some(2.5));
        let q95 = quantile_of(&values, 0.95).unwrap();
        assert!((q95 - 3.85).abs() < 1e-12);
        assert_eq!(quantile_of(&[], 0.95), None);
        assert_eq!(quantile_of(&[7.0], 0.95), Some(7.0));
    }

    #[test]
    fn test_clean_drops_nulls_and_non_positive() {
        let df = df!(
            "Invoice" => ["1", "2", "3", "4", "5", "6", "7"],
            CUSTOMER_ID => [Some(1.0), Some(2.0), Some(3.0), None, Some(5.0), Some(6.0), Some(7.0)],
            DESCRIPTION => [Some("A"), Some("B"), Some("C"), Some("D"), None, Some("F"), Some("G")],
            QUANTITY => [1i64, 1, 5, 1, 1, -2, 1],
            PRICE => [1.0, 1.0, 5.0, 1.0, 1.0, 1.0, 0.0],
        )
        .unwrap();

        let cleaned = clean(&df, 0.95).unwrap();

        // rows 4-7 fail the null/non-positive checks; row 3 sits above the
        // 95th percentile (4.6) of the three survivors
        assert_eq!(cleaned.height(), 2);
        let customers = float_column(&cleaned, CUSTOMER_ID).unwrap();
        assert_eq!(customers, vec![1.0, 2.0]);
    }

    #[test]
    fn test_clean_outlier_threshold_after_filters() {
        let df = raw_table();
        let cleaned = clean(&df, 0.95).unwrap();

        let q_limit = quantile_of(&float_column(&df, QUANTITY).unwrap(), 0.95).unwrap();
        let p_limit = quantile_of(&float_column(&df, PRICE).unwrap(), 0.95).unwrap();

        let quantities = float_column(&cleaned, QUANTITY).unwrap();
        let prices = float_column(&cleaned, PRICE).unwrap();
        assert!(quantities.iter().all(|&q| q > 0.0 && q < q_limit));
        assert!(prices.iter().all(|&p| p > 0.0 && p < p_limit));
        // 1..=20 with linear interpolation puts the 95th percentile at 19.05
        assert_eq!(cleaned.height(), 19);
    }

    #[test]
    fn test_thresholds_ignore_rejected_rows() {
        let mut df = raw_table();
        // a huge negative return line must not move the thresholds
        let extra = df!(
            "Invoice" => ["C9999"],
            CUSTOMER_ID => [Some(999.0)],
            DESCRIPTION => [Some("RETURN")],
            QUANTITY => [-10_000i64],
            PRICE => [10_000.0],
            "InvoiceDate" => ["2010-12-01 08:26:00"],
            "Country" => ["United Kingdom"],
        )
        .unwrap();
        df.vstack_mut(&extra).unwrap();

        let cleaned = clean(&df, 0.95).unwrap();
        assert_eq!(cleaned.height(), 19);
    }

    #[test]
    fn test_clean_removes_duplicates() {
        let mut df = raw_table();
        let first_row = df.slice(0, 1);
        df.vstack_mut(&first_row).unwrap();
        assert_eq!(df.height(), 21);

        let cleaned = clean(&df, 0.95).unwrap();
        assert_eq!(cleaned.height(), 18);
        let deduped = cleaned
            .clone()
            .lazy()
            .unique_stable(None, UniqueKeepStrategy::First)
            .collect()
            .unwrap();
        assert_eq!(cleaned.height(), deduped.height());
    }

    #[test]
    fn test_clean_is_stable_with_fixed_threshold() {
        let cleaned = clean(&raw_table(), 0.95).unwrap();

        // re-applying the same limits removes nothing
        let q_limit = quantile_of(&float_column(&raw_table(), QUANTITY).unwrap(), 0.95).unwrap();
        let p_limit = quantile_of(&float_column(&raw_table(), PRICE).unwrap(), 0.95).unwrap();
        let again = cleaned
            .clone()
            .lazy()
            .filter(col(QUANTITY).lt(lit(q_limit)).and(col(PRICE).lt(lit(p_limit))))
            .collect()
            .unwrap();
        assert!(again.equals(&cleaned));

        // re-computing thresholds on the shrunken table trims again
        let twice = clean(&cleaned, 0.95).unwrap();
        assert!(twice.height() < cleaned.height());
    }

    #[test]
    fn test_clean_missing_column() {
        let df = raw_table().drop(DESCRIPTION).unwrap();
        let err = clean(&df, 0.95).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingColumn { stage: Stage::Clean, ref column } if column == DESCRIPTION
        ));
    }
}
