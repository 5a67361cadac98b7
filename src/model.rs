//! K-Means cluster assignment over normalized customer features

use linfa::prelude::{DatasetBase, Fit};
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::data::{has_column, require_columns, CUSTOMER_ID};
use crate::error::{PipelineError, Stage};
use crate::features::{customer_ids, feature_matrix, FeatureSet, FEATURE_COLUMNS};
use crate::scaler::StandardScaler;

/// Name of the label column added to the output table.
pub const CLUSTER: &str = "Cluster";

/// K-Means settings
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterParams {
    pub n_clusters: usize,
    /// Seed for centroid initialisation; identical input and seed give identical labels
    pub seed: u64,
    pub max_iters: u64,
    pub tolerance: f64,
    pub n_runs: usize,
}

impl ClusterParams {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            ..Default::default()
        }
    }
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            n_clusters: 4,
            seed: 42,
            max_iters: 300,
            tolerance: 1e-4,
            n_runs: 10,
        }
    }
}

/// Result of clustering a feature table
#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    /// Input table with feature columns restored to original units and a `Cluster` column
    pub table: DataFrame,
    pub n_clusters: usize,
    /// Cluster index per row of `table`
    pub labels: Array1<usize>,
    /// Cluster centroids in normalized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares in normalized space
    pub inertia: f64,
    /// Mean raw feature values per cluster, `(n_clusters, 5)`
    pub profiles: Array2<f64>,
}

impl ClusterAssignment {
    /// Get cluster sizes
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Assign a new customer, given in original units, to the nearest centroid.
    ///
    /// `normalizer` must be the one the clustered table was normalized with.
    pub fn predict(
        &self,
        raw_features: &[f64],
        normalizer: &StandardScaler,
    ) -> crate::Result<usize> {
        if raw_features.len() != FEATURE_COLUMNS.len() {
            return Err(PipelineError::DimensionMismatch {
                expected: FEATURE_COLUMNS.len(),
                found: raw_features.len(),
            });
        }

        let scaled = normalizer.transform_row(ArrayView1::from(raw_features))?;
        Ok(nearest_centroid(scaled.view(), &self.centroids))
    }
}

/// Convenience wrapper over [`assign_clusters`] for a freshly built feature set.
pub fn assign_feature_set(
    features: &FeatureSet,
    params: &ClusterParams,
) -> crate::Result<ClusterAssignment> {
    assign_clusters(&features.table, Some(&features.normalizer), params)
}

/// Fit K-Means on a normalized feature table and label every customer.
///
/// # Arguments
/// * `feature_table` - Table holding the five normalized feature columns; other columns pass through
/// * `normalizer` - The normalizer the table was produced with, used to restore original units
/// * `params` - Cluster count, seed and convergence settings
///
/// # Returns
/// * `ClusterAssignment` whose table carries raw-unit features plus a `Cluster` column
pub fn assign_clusters(
    feature_table: &DataFrame,
    normalizer: Option<&StandardScaler>,
    params: &ClusterParams,
) -> crate::Result<ClusterAssignment> {
    let normalizer = normalizer.ok_or(PipelineError::MissingNormalizer)?;
    let n_clusters = params.n_clusters;
    if n_clusters < 1 {
        return Err(PipelineError::InvalidClusterCount(n_clusters));
    }
    require_columns(feature_table, &FEATURE_COLUMNS, Stage::Cluster)?;

    let n_customers = feature_table.height();
    if n_customers < n_clusters {
        return Err(PipelineError::InsufficientCustomers {
            customers: n_customers,
            clusters: n_clusters,
        });
    }

    if has_column(feature_table, CUSTOMER_ID) {
        normalizer.verify_fingerprint(&customer_ids(feature_table)?)?;
    } else {
        warn!("feature table has no '{CUSTOMER_ID}' column; normalizer pairing not checked");
    }

    let features = feature_matrix(feature_table)?;
    let (labels, centroids) = fit_kmeans(&features, params)?;
    let inertia = compute_inertia(&features, &labels, &centroids);
    debug!(n_clusters, inertia, "k-means converged");

    let raw = normalizer.inverse_transform(&features)?;
    let profiles = cluster_profiles(&raw, &labels, n_clusters);

    let mut table = feature_table.clone();
    for (j, name) in FEATURE_COLUMNS.iter().enumerate() {
        table.with_column(Series::new((*name).into(), raw.column(j).to_vec()))?;
    }
    let label_values: Vec<u32> = labels.iter().map(|&l| l as u32).collect();
    table.with_column(Series::new(CLUSTER.into(), label_values))?;

    info!(customers = n_customers, n_clusters, "assigned clusters");

    Ok(ClusterAssignment {
        table,
        n_clusters,
        labels,
        centroids,
        inertia,
        profiles,
    })
}

fn fit_kmeans(
    features: &Array2<f64>,
    params: &ClusterParams,
) -> crate::Result<(Array1<usize>, Array2<f64>)> {
    let dataset = DatasetBase::from(features.clone());
    let rng = StdRng::seed_from_u64(params.seed);

    let model: KMeans<f64, L2Dist> = KMeans::params_with(params.n_clusters, rng, L2Dist)
        .n_runs(params.n_runs)
        .max_n_iterations(params.max_iters)
        .tolerance(params.tolerance)
        .fit(&dataset)
        .map_err(|e| PipelineError::Clustering(e.to_string()))?;

    let centroids = model.centroids().clone();
    // nearest-centroid labels, so a row always lands on its closest centroid
    let labels = features
        .outer_iter()
        .map(|row| nearest_centroid(row, &centroids))
        .collect();

    Ok((labels, centroids))
}

fn nearest_centroid(point: ArrayView1<f64>, centroids: &Array2<f64>) -> usize {
    let mut min_distance = f64::INFINITY;
    let mut closest_cluster = 0;

    for (cluster_idx, centroid) in centroids.outer_iter().enumerate() {
        let distance = squared_distance(point, centroid);
        if distance < min_distance {
            min_distance = distance;
            closest_cluster = cluster_idx;
        }
    }

    closest_cluster
}

/// Compute within-cluster sum of squares (inertia)
fn compute_inertia(
    features: &Array2<f64>,
    labels: &Array1<usize>,
    centroids: &Array2<f64>,
) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|(_, &cluster)| cluster < centroids.nrows())
        .map(|(i, &cluster)| squared_distance(features.row(i), centroids.row(cluster)))
        .sum()
}

fn cluster_profiles(raw: &Array2<f64>, labels: &Array1<usize>, n_clusters: usize) -> Array2<f64> {
    let mut sums = Array2::<f64>::zeros((n_clusters, raw.ncols()));
    let mut counts = vec![0usize; n_clusters];

    for (row, &label) in raw.outer_iter().zip(labels.iter()) {
        let mut target = sums.row_mut(label);
        target += &row;
        counts[label] += 1;
    }
    for (mut row, &count) in sums.outer_iter_mut().zip(counts.iter()) {
        if count > 0 {
            row /= count as f64;
        }
    }
    sums
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}
