//! Z-score normalizer over the customer feature columns, with JSON persistence.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::debug;

use crate::error::PipelineError;

/// Per-column mean/standard-deviation transform.
///
/// Columns with zero variance get a unit scale, so they are only centred.
/// `fitted_on` records which customers the transform was learned from; see
/// [`StandardScaler::verify_fingerprint`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    /// Population standard deviation (ddof = 0), zero entries replaced by 1.0
    pub scale: Array1<f64>,
    pub n_samples_seen: usize,
    #[serde(default)]
    pub fitted_on: Option<String>,
}

impl StandardScaler {
    /// Learn column means and standard deviations from `records` (rows = samples).
    pub fn fit(records: &Array2<f64>) -> Self {
        let n_features = records.ncols();
        let mean = records
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_features));
        let scale = records
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s == 0.0 || !s.is_finite() { 1.0 } else { s });

        Self {
            mean,
            scale,
            n_samples_seen: records.nrows(),
            fitted_on: None,
        }
    }

    /// Tag the scaler with the fingerprint of the customers it was fit on.
    pub fn with_fingerprint(mut self, fingerprint: String) -> Self {
        self.fitted_on = Some(fingerprint);
        self
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, records: &Array2<f64>) -> crate::Result<Array2<f64>> {
        self.check_width(records.ncols())?;
        Ok((records - &self.mean) / &self.scale)
    }

    /// Map normalized values back to original units.
    pub fn inverse_transform(&self, records: &Array2<f64>) -> crate::Result<Array2<f64>> {
        self.check_width(records.ncols())?;
        Ok(records * &self.scale + &self.mean)
    }

    /// Normalize a single sample.
    pub fn transform_row(&self, row: ArrayView1<f64>) -> crate::Result<Array1<f64>> {
        self.check_width(row.len())?;
        Ok((&row - &self.mean) / &self.scale)
    }

    fn check_width(&self, found: usize) -> crate::Result<()> {
        if found != self.n_features() {
            return Err(PipelineError::DimensionMismatch {
                expected: self.n_features(),
                found,
            });
        }
        Ok(())
    }

    /// Fingerprint of a set of customer ids, independent of row order.
    pub fn fingerprint_of(customer_ids: &[i64]) -> String {
        let mut ids = customer_ids.to_vec();
        ids.sort_unstable();

        let mut bytes = Vec::with_capacity(ids.len() * 8);
        for id in ids {
            bytes.extend_from_slice(&id.to_le_bytes());
        }
        format!("{:x}", md5::compute(&bytes))
    }

    /// Check that this scaler was fit on exactly `customer_ids`.
    ///
    /// Scalers without a recorded fingerprint are accepted as-is.
    pub fn verify_fingerprint(&self, customer_ids: &[i64]) -> crate::Result<()> {
        let Some(expected) = &self.fitted_on else {
            return Ok(());
        };

        let found = Self::fingerprint_of(customer_ids);
        if *expected != found {
            return Err(PipelineError::NormalizerMismatch {
                expected: expected.clone(),
                found,
            });
        }
        Ok(())
    }

    /// Persist as JSON. Floats are written in shortest round-trip form.
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;

        debug!(path = %path.display(), "saved normalizer");
        Ok(())
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let scaler: StandardScaler = serde_json::from_reader(reader)?;

        if scaler.mean.len() != scaler.scale.len() {
            return Err(PipelineError::DimensionMismatch {
                expected: scaler.mean.len(),
                found: scaler.scale.len(),
            });
        }
        Ok(scaler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample_features() -> Array2<f64> {
        array![
            [1.0, 1.0, 100.0, 1.0, 2.55],
            [30.0, 10.0, 1000.0, 10.0, 3.39],
            [10.0, 5.0, 500.0, 5.0, 1.85],
            [20.0, 3.0, 750.0, 3.0, 0.1 + 0.2],
        ]
    }

    #[test]
    fn test_fit_centres_and_scales() {
        let x = sample_features();
        let scaler = StandardScaler::fit(&x);
        let z = scaler.transform(&x).unwrap();

        for column in z.columns() {
            let mean = column.mean().unwrap();
            let std = column.std(0.0);
            assert!(mean.abs() < 1e-12);
            assert!((std - 1.0).abs() < 1e-12);
        }
        assert_eq!(scaler.n_samples_seen, 4);
    }

    #[test]
    fn test_inverse_round_trip() {
        let x = sample_features();
        let scaler = StandardScaler::fit(&x);
        let restored = scaler
            .inverse_transform(&scaler.transform(&x).unwrap())
            .unwrap();

        for (a, b) in x.iter().zip(restored.iter()) {
            assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0), "{a} != {b}");
        }
    }

    #[test]
    fn test_constant_column_uses_unit_scale() {
        let x = array![[5.0, 1.0], [5.0, 3.0]];
        let scaler = StandardScaler::fit(&x);

        assert_eq!(scaler.scale[0], 1.0);
        let z = scaler.transform(&x).unwrap();
        assert_eq!(z[[0, 0]], 0.0);
        assert_eq!(z[[1, 0]], 0.0);
    }

    #[test]
    fn test_width_mismatch() {
        let scaler = StandardScaler::fit(&sample_features());
        let narrow = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            scaler.transform(&narrow),
            Err(PipelineError::DimensionMismatch { expected: 5, found: 3 })
        ));
    }

    #[test]
    fn test_save_load_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scalers").join("standard_scaler.json");

        let scaler = StandardScaler::fit(&sample_features())
            .with_fingerprint(StandardScaler::fingerprint_of(&[1, 2, 3, 4]));
        scaler.save(&path).unwrap();
        let loaded = StandardScaler::load(&path).unwrap();

        for (a, b) in scaler.mean.iter().zip(loaded.mean.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        for (a, b) in scaler.scale.iter().zip(loaded.scale.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(loaded, scaler);
    }

    #[test]
    fn test_fingerprint_order_independent() {
        let scaler = StandardScaler::fit(&sample_features())
            .with_fingerprint(StandardScaler::fingerprint_of(&[12, 7, 30]));

        assert!(scaler.verify_fingerprint(&[7, 12, 30]).is_ok());
        assert!(matches!(
            scaler.verify_fingerprint(&[7, 12, 31]),
            Err(PipelineError::NormalizerMismatch { .. })
        ));
    }

    #[test]
    fn test_untagged_scaler_skips_fingerprint() {
        let scaler = StandardScaler::fit(&sample_features());
        assert!(scaler.verify_fingerprint(&[1]).is_ok());
    }
}
