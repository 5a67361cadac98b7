//! Orchestration of the three stages: clean, build features, assign clusters.
//!
//! Each stage consumes the complete output of the previous one. A failing stage
//! aborts the run and is reported with its name; no sub-step is retried.

use polars::prelude::DataFrame;
use std::path::Path;
use std::time::Instant;
use tracing::info;

use crate::clean::clean;
use crate::config::PipelineConfig;
use crate::data::load_transactions;
use crate::error::Stage;
use crate::features::{build_features, FeatureSet};
use crate::model::{assign_clusters, ClusterAssignment};
use crate::scaler::StandardScaler;

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub cleaned: DataFrame,
    pub features: FeatureSet,
    pub clusters: ClusterAssignment,
}

/// Load a transaction CSV and run the pipeline on it.
pub fn run_from_path(input: &Path, config: &PipelineConfig) -> crate::Result<PipelineOutput> {
    info!(input = %input.display(), "starting segmentation pipeline");
    let raw = load_transactions(input).map_err(|e| e.in_stage(Stage::Load))?;
    run_pipeline(&raw, config)
}

/// Run clean → features → clusters on an in-memory transaction table.
///
/// The fitted normalizer is written to `config.normalizer_path` and the
/// clustering stage denormalizes with the copy loaded back from there.
pub fn run_pipeline(raw: &DataFrame, config: &PipelineConfig) -> crate::Result<PipelineOutput> {
    config.validate()?;
    let start = Instant::now();

    info!(rows = raw.height(), "stage 1: cleaning");
    let cleaned = clean(raw, config.outlier_quantile).map_err(|e| e.in_stage(Stage::Clean))?;

    info!(rows = cleaned.height(), market = %config.market, "stage 2: building features");
    let features =
        build_features(&cleaned, &config.market).map_err(|e| e.in_stage(Stage::Features))?;

    let normalizer = persist_normalizer(&features.normalizer, &config.normalizer_path)
        .map_err(|e| e.in_stage(Stage::Persist))?;

    info!(
        customers = features.n_customers(),
        n_clusters = config.n_clusters,
        "stage 3: assigning clusters"
    );
    let clusters = assign_clusters(&features.table, Some(&normalizer), &config.cluster_params())
        .map_err(|e| e.in_stage(Stage::Cluster))?;

    info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        "pipeline complete"
    );
    Ok(PipelineOutput {
        cleaned,
        features,
        clusters,
    })
}

fn persist_normalizer(normalizer: &StandardScaler, path: &Path) -> crate::Result<StandardScaler> {
    normalizer.save(path)?;
    info!(path = %path.display(), "normalizer saved");
    StandardScaler::load(path)
}
