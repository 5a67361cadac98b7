//! SegmentForge: customer segmentation from retail transactions
//!
//! Raw invoice lines are cleaned, aggregated into per-customer RFM features
//! (Recency, Frequency, Monetary, Total Orders, Average Price), normalized,
//! and grouped with K-Means. The fitted normalizer is persisted so clustered
//! output can be reported in original units.

pub mod clean;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod scaler;

// Re-export public items for easier access
pub use clean::clean;
pub use cli::Args;
pub use config::PipelineConfig;
pub use data::{load_transactions, write_table};
pub use error::{PipelineError, Stage};
pub use features::{build_features, FeatureSet, FEATURE_COLUMNS};
pub use model::{assign_clusters, assign_feature_set, ClusterAssignment, ClusterParams};
pub use pipeline::{run_from_path, run_pipeline, PipelineOutput};
pub use scaler::StandardScaler;

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, PipelineError>;
