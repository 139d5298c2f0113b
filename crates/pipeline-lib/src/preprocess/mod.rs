//! Batch preparation shared by training-time and serving-time paths
//!
//! Both the offline runner and the HTTP handler call exactly these
//! transforms, so a batch is prepared identically in either mode.

mod cleaner;
mod features;

pub use cleaner::{mean_std, Cleaner, CleaningReport, OUTLIER_SIGMA};
pub use features::{
    first_difference, rolling_correlation, rolling_mean, FeatureEngineer, PH_AMMONIA_CORR,
    ROLLING_WINDOW,
};

use crate::models::Batch;

/// Clean then engineer with default settings
pub fn prepare(batch: &Batch) -> (Batch, CleaningReport) {
    let (cleaned, report) = Cleaner::default().clean_with_report(batch);
    (FeatureEngineer::default().engineer(&cleaned), report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Column;

    #[test]
    fn test_prepare_matches_cleaner_then_engineer() {
        let batch = Batch::from_columns(vec![
            Column::numeric("DO", &[6.0, 6.2, f64::NAN, 6.1, 6.3, 6.4, 6.2]),
            Column::numeric("ammonia", &[0.1, 0.2, 0.2, 0.1, 0.3, 0.2, 0.1]),
        ])
        .unwrap();

        let (prepared, report) = prepare(&batch);
        assert_eq!(report.undefined_rows, 1);
        assert_eq!(prepared.num_rows(), 6);
        assert_eq!(
            prepared,
            FeatureEngineer::default().engineer(&Cleaner::default().clean(&batch))
        );
        assert!(prepared.has_column("ammonia_ma5"));
    }

    #[test]
    fn test_prepare_twice_removes_no_further_outliers() {
        // Periodic readings: stationary, no 3-sigma spikes
        let rows = 40;
        let do_values: Vec<f64> = (0..rows).map(|i| 6.0 + 0.1 * (i % 4) as f64).collect();
        let ph_values: Vec<f64> = (0..rows).map(|i| 7.0 + 0.1 * (i % 3) as f64).collect();
        let batch = Batch::from_columns(vec![
            Column::numeric("DO", &do_values),
            Column::numeric("pH", &ph_values),
        ])
        .unwrap();

        let (once, first) = prepare(&batch);
        assert!(first.outlier_rows.is_empty());
        assert_eq!(once.num_rows(), rows);

        let (twice, second) = prepare(&once);
        assert!(second.outlier_rows.is_empty(), "{:?}", second.outlier_rows);
        // Only the rolling-window warm-up rows go
        assert_eq!(second.undefined_rows, ROLLING_WINDOW - 1);
        assert_eq!(twice.num_rows(), rows - (ROLLING_WINDOW - 1));
    }
}
