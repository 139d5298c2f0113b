//! Feature engineering for sensor batches
//!
//! Derives rate-of-change, trailing means, and the pH/ammonia trailing
//! correlation. Derived columns are appended in a fixed order (per sensor:
//! rate then mean, in sensor order, then the correlation) so the feature
//! matrix layout is deterministic. No row is ever removed.

use crate::models::{Batch, SENSOR_COLUMNS};
use tracing::debug;

/// Trailing window for means and correlation
pub const ROLLING_WINDOW: usize = 5;

/// Name of the pH/ammonia correlation column
pub const PH_AMMONIA_CORR: &str = "pH_ammonia_corr";

/// Derives rolling and differenced features from raw sensor columns
#[derive(Debug, Clone)]
pub struct FeatureEngineer {
    window: usize,
}

impl Default for FeatureEngineer {
    fn default() -> Self {
        Self {
            window: ROLLING_WINDOW,
        }
    }
}

impl FeatureEngineer {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Append derived columns for every recognized sensor present.
    ///
    /// Missing sensors are skipped, never an error.
    pub fn engineer(&self, batch: &Batch) -> Batch {
        let mut engineered = batch.clone();

        for sensor in SENSOR_COLUMNS {
            let Some(column) = batch.column(sensor) else {
                continue;
            };
            let values = column.values();
            engineered.set_numeric(&format!("{}_rate", sensor), first_difference(&values));
            engineered.set_numeric(
                &format!("{}_ma{}", sensor, self.window),
                rolling_mean(&values, self.window),
            );
        }

        if let (Some(ph), Some(ammonia)) = (batch.column("pH"), batch.column("ammonia")) {
            engineered.set_numeric(
                PH_AMMONIA_CORR,
                rolling_correlation(&ph.values(), &ammonia.values(), self.window),
            );
        }

        debug!(
            rows = engineered.num_rows(),
            derived = engineered.num_columns() - batch.num_columns(),
            "Engineered features"
        );
        engineered
    }
}

/// Row-wise first difference; the first row is undefined
pub fn first_difference(values: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    out.push(f64::NAN);
    out.extend(values.windows(2).map(|w| w[1] - w[0]));
    out
}

/// Trailing mean over `window` rows.
///
/// Undefined until a full window is available, or when the window holds an
/// undefined value.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return f64::NAN;
            }
            let slice = &values[i + 1 - window..=i];
            if slice.iter().any(|v| !v.is_finite()) {
                return f64::NAN;
            }
            slice.iter().sum::<f64>() / window as f64
        })
        .collect()
}

/// Trailing Pearson correlation of two equally long series.
///
/// Undefined until a full window is available and whenever either window has
/// zero variance.
pub fn rolling_correlation(x: &[f64], y: &[f64], window: usize) -> Vec<f64> {
    let len = x.len().min(y.len());
    (0..len)
        .map(|i| {
            if i + 1 < window {
                return f64::NAN;
            }
            pearson(&x[i + 1 - window..=i], &y[i + 1 - window..=i])
        })
        .collect()
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return f64::NAN;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom < f64::EPSILON {
        return f64::NAN;
    }
    cov / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cell, Column};

    fn assert_nan_prefix(values: &[f64], count: usize) {
        assert!(values[..count].iter().all(|v| v.is_nan()));
        assert!(values[count..].iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_first_difference() {
        let diff = first_difference(&[1.0, 3.0, 6.0]);
        assert!(diff[0].is_nan());
        assert_eq!(&diff[1..], &[2.0, 3.0]);
        assert!(first_difference(&[]).is_empty());
    }

    #[test]
    fn test_rolling_mean_has_no_partial_windows() {
        let mean = rolling_mean(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 5);
        assert_nan_prefix(&mean, 4);
        assert_eq!(&mean[4..], &[3.0, 4.0]);
    }

    #[test]
    fn test_rolling_mean_shorter_than_window() {
        let mean = rolling_mean(&[1.0, 2.0], 5);
        assert_eq!(mean.len(), 2);
        assert!(mean.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_rolling_correlation() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = [2.0, 4.0, 6.0, 8.0, 10.0, 12.0];
        let corr = rolling_correlation(&x, &y, 5);
        assert_nan_prefix(&corr, 4);
        assert!((corr[4] - 1.0).abs() < 1e-12);

        let inverse: Vec<f64> = y.iter().map(|v| -v).collect();
        let corr = rolling_correlation(&x, &inverse, 5);
        assert!((corr[5] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rolling_correlation_zero_variance_is_undefined() {
        let corr = rolling_correlation(&[1.0, 2.0, 3.0, 4.0, 5.0], &[7.0; 5], 5);
        assert!(corr.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_engineer_appends_in_fixed_order() {
        let batch = Batch::from_columns(vec![
            Column::numeric("ammonia", &[0.1, 0.2, 0.3, 0.2, 0.1, 0.3]),
            Column::numeric("pH", &[7.0, 7.1, 7.3, 7.2, 7.0, 7.4]),
            Column::numeric("DO", &[6.0, 6.1, 6.2, 6.3, 6.4, 6.5]),
        ])
        .unwrap();

        let engineered = FeatureEngineer::default().engineer(&batch);
        let names: Vec<&str> = engineered.column_names().collect();
        assert_eq!(
            names,
            vec![
                "ammonia",
                "pH",
                "DO",
                "DO_rate",
                "DO_ma5",
                "pH_rate",
                "pH_ma5",
                "ammonia_rate",
                "ammonia_ma5",
                "pH_ammonia_corr",
            ]
        );
        assert_eq!(engineered.num_rows(), batch.num_rows());
    }

    #[test]
    fn test_engineer_without_sensors_is_identity() {
        let batch = Batch::from_columns(vec![Column::new(
            "timestamp",
            vec![Cell::Text("2024-01-01".into())],
        )])
        .unwrap();
        assert_eq!(FeatureEngineer::default().engineer(&batch), batch);
    }

    #[test]
    fn test_engineer_single_row() {
        let batch = Batch::from_columns(vec![Column::numeric("DO", &[6.0])]).unwrap();
        let engineered = FeatureEngineer::default().engineer(&batch);
        assert_eq!(engineered.num_rows(), 1);
        assert_eq!(engineered.column("DO_ma5").unwrap().cells, vec![Cell::Missing]);
        assert_eq!(engineered.column("DO_rate").unwrap().cells, vec![Cell::Missing]);
    }

    #[test]
    fn test_engineer_skips_correlation_without_ammonia() {
        let batch = Batch::from_columns(vec![Column::numeric("pH", &[7.0; 6])]).unwrap();
        let engineered = FeatureEngineer::default().engineer(&batch);
        assert!(!engineered.has_column(PH_AMMONIA_CORR));
        assert!(engineered.has_column("pH_ma5"));
    }
}
