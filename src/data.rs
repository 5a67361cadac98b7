//! Transaction table I/O and column helpers shared by the pipeline stages.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use tracing::debug;

use crate::error::{PipelineError, Stage};

pub const INVOICE: &str = "Invoice";
pub const CUSTOMER_ID: &str = "Customer ID";
pub const DESCRIPTION: &str = "Description";
pub const QUANTITY: &str = "Quantity";
pub const PRICE: &str = "Price";
pub const INVOICE_DATE: &str = "InvoiceDate";
pub const COUNTRY: &str = "Country";

/// Columns every raw transaction table must expose.
pub const TRANSACTION_COLUMNS: [&str; 7] = [
    INVOICE,
    CUSTOMER_ID,
    DESCRIPTION,
    QUANTITY,
    PRICE,
    INVOICE_DATE,
    COUNTRY,
];

/// Header names used by the older Online Retail export, mapped to the current ones.
const HEADER_ALIASES: [(&str, &str); 3] = [
    ("InvoiceNo", INVOICE),
    ("UnitPrice", PRICE),
    ("CustomerID", CUSTOMER_ID),
];

const DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Load a transaction CSV into a DataFrame.
///
/// Legacy headers (`InvoiceNo`, `UnitPrice`, `CustomerID`) are renamed to their
/// current names. `InvoiceDate` is left as read; stages decode it with
/// [`invoice_timestamps`].
pub fn load_transactions(path: &Path) -> crate::Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let df = apply_header_aliases(df)?;
    require_columns(&df, &TRANSACTION_COLUMNS, Stage::Load)?;

    debug!(rows = df.height(), path = %path.display(), "loaded transactions");
    Ok(df)
}

/// Write a table as CSV with a header row. Parent directories are created.
pub fn write_table(df: &mut DataFrame, path: &Path) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;

    debug!(rows = df.height(), path = %path.display(), "wrote table");
    Ok(())
}

/// Rename legacy header names.
///
/// The frame is rebuilt from its columns afterwards so lazy plans built on it
/// resolve the new names.
pub fn apply_header_aliases(mut df: DataFrame) -> crate::Result<DataFrame> {
    let mut renamed = false;
    for (legacy, current) in HEADER_ALIASES {
        if has_column(&df, legacy) && !has_column(&df, current) {
            df.rename(legacy, current.into())?;
            renamed = true;
        }
    }

    if !renamed {
        return Ok(df);
    }
    Ok(DataFrame::new(df.take_columns())?)
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_index(name).is_some()
}

/// Fail with a schema error naming the first absent column.
pub fn require_columns(df: &DataFrame, columns: &[&str], stage: Stage) -> crate::Result<()> {
    match columns.iter().find(|name| !has_column(df, name)) {
        Some(missing) => Err(PipelineError::missing_column(stage, missing)),
        None => Ok(()),
    }
}

/// Extract a numeric column as `f64`; nulls become NaN.
pub fn float_column(df: &DataFrame, name: &str) -> crate::Result<Vec<f64>> {
    let values = df
        .column(name)?
        .cast(&DataType::Float64)?
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect();
    Ok(values)
}

/// Decode the `InvoiceDate` column into Unix timestamps (seconds).
///
/// Accepts string columns in the common export formats as well as native
/// Date/Datetime columns. Null dates stay null.
pub fn invoice_timestamps(df: &DataFrame) -> crate::Result<Vec<Option<i64>>> {
    let column = df.column(INVOICE_DATE)?;

    match column.dtype() {
        DataType::String => column
            .str()?
            .into_iter()
            .map(|value| value.map(parse_invoice_date).transpose())
            .collect(),
        DataType::Datetime(unit, _) => {
            let per_second = match unit {
                TimeUnit::Nanoseconds => 1_000_000_000,
                TimeUnit::Microseconds => 1_000_000,
                TimeUnit::Milliseconds => 1_000,
            };
            let physical = column.cast(&DataType::Int64)?;
            let values = physical
                .i64()?
                .into_iter()
                .map(|v| v.map(|ts| ts.div_euclid(per_second)))
                .collect();
            Ok(values)
        }
        DataType::Date => {
            let physical = column.cast(&DataType::Int32)?;
            let values = physical
                .i32()?
                .into_iter()
                .map(|v| v.map(|days| i64::from(days) * 86_400))
                .collect();
            Ok(values)
        }
        other => Err(PipelineError::InvalidTimestamp {
            value: format!("{INVOICE_DATE} column has unsupported type {other}"),
        }),
    }
}

/// Parse one invoice date string into a Unix timestamp (seconds).
pub fn parse_invoice_date(value: &str) -> crate::Result<i64> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp());
    }
    for format in DATE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt.and_utc().timestamp());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp());
        }
    }

    Err(PipelineError::InvalidTimestamp {
        value: value.to_string(),
    })
}
