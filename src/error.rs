//! Error types for the segmentation pipeline.

use std::fmt;

use thiserror::Error;

/// Pipeline stage a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Clean,
    Features,
    Cluster,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Clean => "clean",
            Stage::Features => "feature building",
            Stage::Cluster => "cluster assignment",
            Stage::Persist => "persistence",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while running the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A column the stage depends on is absent from its input table.
    #[error("{stage}: required column '{column}' absent")]
    MissingColumn { stage: Stage, column: String },

    /// Clustering was invoked without a fitted normalizer.
    #[error("cluster assignment: normalizer missing")]
    MissingNormalizer,

    #[error("cluster assignment: number of clusters must be at least 1, got {0}")]
    InvalidClusterCount(usize),

    #[error(
        "cluster assignment: {clusters} clusters requested but only {customers} customers available"
    )]
    InsufficientCustomers { customers: usize, clusters: usize },

    /// Filtering left nothing to aggregate.
    #[error("{stage}: no rows left ({reason})")]
    EmptyTable { stage: Stage, reason: String },

    /// The normalizer was fit on a different set of customers than the table it is applied to.
    #[error("normalizer was fit on customers {expected}, table holds {found}")]
    NormalizerMismatch { expected: String, found: String },

    #[error("expected {expected} feature columns, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("unparseable invoice timestamp: {value}")]
    InvalidTimestamp { value: String },

    /// A customer id that is null or does not convert to an integer.
    #[error("invalid customer id: {value}")]
    InvalidCustomerId { value: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("k-means fit failed: {0}")]
    Clustering(String),

    /// Wraps the failure of a whole stage as reported by the orchestrator.
    #[error("stage '{stage}' failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("dataframe error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl PipelineError {
    /// Attach the stage that produced this error. Already-tagged errors are left as they are.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            PipelineError::StageFailed { .. } => self,
            other => PipelineError::StageFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn missing_column(stage: Stage, column: &str) -> Self {
        PipelineError::MissingColumn {
            stage,
            column: column.to_string(),
        }
    }
}
