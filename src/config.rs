//! Pipeline configuration.
//!
//! Every stage receives its settings at call time; nothing here is global.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::model::ClusterParams;

/// Settings for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of K-Means clusters
    pub n_clusters: usize,

    /// Quantile at or above which quantity/price rows are dropped as outliers
    pub outlier_quantile: f64,

    /// Country kept by the feature builder
    pub market: String,

    /// Where the fitted normalizer is stored between feature building and clustering
    pub normalizer_path: PathBuf,

    /// Seed for K-Means initialisation
    pub seed: u64,

    pub max_iters: u64,

    pub tolerance: f64,

    /// Number of K-Means restarts; the lowest-inertia run wins
    pub n_runs: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            n_clusters: 4,
            outlier_quantile: 0.95,
            market: "United Kingdom".to_string(),
            normalizer_path: PathBuf::from("scalers/standard_scaler.json"),
            seed: 42,
            max_iters: 300,
            tolerance: 1e-4,
            n_runs: 10,
        }
    }
}

impl PipelineConfig {
    /// Load a TOML configuration file. Missing keys fall back to the defaults.
    ///
    /// Values are not validated here, so callers can still override them;
    /// call [`PipelineConfig::validate`] on the final configuration.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.n_clusters == 0 {
            return Err(PipelineError::InvalidConfig(
                "n_clusters must be a positive integer".to_string(),
            ));
        }
        if !(self.outlier_quantile > 0.0 && self.outlier_quantile <= 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "outlier_quantile must be in (0, 1], got {}",
                self.outlier_quantile
            )));
        }
        if self.market.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "market must not be empty".to_string(),
            ));
        }
        if self.tolerance <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.max_iters == 0 || self.n_runs == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_iters and n_runs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// K-Means parameters derived from this configuration.
    pub fn cluster_params(&self) -> ClusterParams {
        ClusterParams {
            n_clusters: self.n_clusters,
            seed: self.seed,
            max_iters: self.max_iters,
            tolerance: self.tolerance,
            n_runs: self.n_runs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.n_clusters, 4);
        assert_eq!(config.outlier_quantile, 0.95);
        assert_eq!(config.market, "United Kingdom");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "n_clusters = 3").unwrap();
        writeln!(file, "market = \"France\"").unwrap();
        writeln!(file, "normalizer_path = \"/tmp/scaler.json\"").unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.n_clusters, 3);
        assert_eq!(config.market, "France");
        assert_eq!(config.normalizer_path, PathBuf::from("/tmp/scaler.json"));
        // untouched keys keep their defaults
        assert_eq!(config.outlier_quantile, 0.95);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = PipelineConfig {
            n_clusters: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            outlier_quantile: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            market: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cluster_params() {
        let config = PipelineConfig {
            n_clusters: 5,
            seed: 7,
            ..Default::default()
        };
        let params = config.cluster_params();
        assert_eq!(params.n_clusters, 5);
        assert_eq!(params.seed, 7);
        assert_eq!(params.max_iters, 300);
    }
}
