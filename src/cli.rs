//! Command-line interface definitions and argument parsing

use clap::Parser;
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::features::FEATURE_COLUMNS;

/// Customer segmentation: clean transactions, build RFM features, cluster with K-Means
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the raw transaction CSV file
    #[arg(short, long, default_value = "data.csv")]
    pub input: PathBuf,

    /// Optional TOML configuration file; flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of clusters for K-Means
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Output path for the clustered customer table (CSV)
    #[arg(short, long, default_value = "clusters.csv")]
    pub output: PathBuf,

    /// Quantile at or above which quantity/price lines are dropped as outliers
    #[arg(long)]
    pub quantile: Option<f64>,

    /// Country to segment
    #[arg(long)]
    pub market: Option<String>,

    /// Where to store the fitted normalizer
    #[arg(long)]
    pub scaler: Option<PathBuf>,

    /// Random seed for K-Means initialisation
    #[arg(long)]
    pub seed: Option<u64>,

    /// Maximum iterations for K-Means algorithm
    #[arg(long)]
    pub max_iters: Option<u64>,

    /// Tolerance for K-Means convergence
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Also write the cleaned transactions to this CSV
    #[arg(long)]
    pub clean_output: Option<PathBuf>,

    /// Also write the normalized feature table to this CSV
    #[arg(long)]
    pub features_output: Option<PathBuf>,

    /// Prediction mode: raw feature values as a comma-separated string
    /// Example: --predict "30,10,500.0,10,4.5" for Recency, Frequency, Monetary, Total Orders, Average Price
    #[arg(short, long)]
    pub predict: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Build the run configuration: config file (or defaults) with flag overrides applied.
    pub fn pipeline_config(&self) -> crate::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(k) = self.clusters {
            config.n_clusters = k;
        }
        if let Some(q) = self.quantile {
            config.outlier_quantile = q;
        }
        if let Some(market) = &self.market {
            config.market = market.clone();
        }
        if let Some(path) = &self.scaler {
            config.normalizer_path = path.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(max_iters) = self.max_iters {
            config.max_iters = max_iters;
        }
        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse raw feature values from the predict string
    /// Expected format: "recency,frequency,monetary,total_orders,average_price"
    pub fn parse_feature_values(&self) -> crate::Result<Option<Vec<f64>>> {
        let Some(predict_str) = &self.predict else {
            return Ok(None);
        };

        let parts: Vec<&str> = predict_str.split(',').collect();
        if parts.len() != FEATURE_COLUMNS.len() {
            return Err(PipelineError::InvalidConfig(format!(
                "predict values must be {} comma-separated numbers ({})",
                FEATURE_COLUMNS.len(),
                FEATURE_COLUMNS.join(", ")
            )));
        }

        parts
            .iter()
            .zip(FEATURE_COLUMNS)
            .map(|(part, name)| {
                part.trim().parse::<f64>().map_err(|_| {
                    PipelineError::InvalidConfig(format!("invalid {name} value: {part}"))
                })
            })
            .collect::<crate::Result<Vec<f64>>>()
            .map(Some)
    }
}
