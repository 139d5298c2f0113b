//! Row filtering for raw sensor batches
//!
//! Drops rows holding missing or non-finite values, then removes 3-sigma
//! outliers column by column. Rows are only ever removed, never reordered.

use crate::models::Batch;
use serde::Serialize;
use tracing::debug;

/// Number of standard deviations beyond which a value is a sensor spike
pub const OUTLIER_SIGMA: f64 = 3.0;

/// What a cleaning pass removed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleaningReport {
    pub input_rows: usize,
    /// Rows dropped for a missing or non-finite cell
    pub undefined_rows: usize,
    /// Rows dropped per column by the outlier test, in test order
    pub outlier_rows: Vec<(String, usize)>,
    pub output_rows: usize,
}

impl CleaningReport {
    pub fn dropped(&self) -> usize {
        self.input_rows - self.output_rows
    }
}

/// Removes undefined values and statistical outliers
#[derive(Debug, Clone)]
pub struct Cleaner {
    sigma: f64,
}

impl Default for Cleaner {
    fn default() -> Self {
        Self {
            sigma: OUTLIER_SIGMA,
        }
    }
}

impl Cleaner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clean(&self, batch: &Batch) -> Batch {
        self.clean_with_report(batch).0
    }

    /// Clean a batch and report how many rows each step removed
    pub fn clean_with_report(&self, batch: &Batch) -> (Batch, CleaningReport) {
        let mut report = CleaningReport {
            input_rows: batch.num_rows(),
            ..Default::default()
        };

        // Infinite values count as undefined, so one pass drops both.
        let defined: Vec<bool> = (0..batch.num_rows())
            .map(|row| batch.columns().iter().all(|c| c.cells[row].is_defined()))
            .collect();
        let mut cleaned = batch.select_rows(&defined);
        report.undefined_rows = batch.num_rows() - cleaned.num_rows();

        // Numeric columns are fixed before filtering, in column-definition order.
        let numeric: Vec<String> = cleaned
            .columns()
            .iter()
            .filter(|c| c.is_numeric())
            .map(|c| c.name.clone())
            .collect();

        for name in numeric {
            let Some(column) = cleaned.column(&name) else {
                continue;
            };
            let values = column.values();
            let Some((mean, std_dev)) = mean_std(&values) else {
                continue;
            };

            // Zero or undefined spread: the test passes for every row.
            if std_dev.is_nan() || std_dev <= 0.0 {
                continue;
            }

            let limit = self.sigma * std_dev;
            let keep: Vec<bool> = values.iter().map(|v| (v - mean).abs() <= limit).collect();
            let removed = keep.iter().filter(|k| !**k).count();
            if removed == 0 {
                continue;
            }

            debug!(
                column = %name,
                removed = removed,
                mean = mean,
                std_dev = std_dev,
                "Removed outlier rows"
            );
            report.outlier_rows.push((name, removed));
            cleaned = cleaned.select_rows(&keep);
        }

        report.output_rows = cleaned.num_rows();
        (cleaned, report)
    }
}

/// Mean and sample standard deviation (n - 1 denominator).
///
/// Returns `None` for an empty slice; the deviation is NaN for a single value.
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return Some((mean, f64::NAN));
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some((mean, (sum_sq / (n - 1.0)).sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cell, Column};

    fn batch(columns: Vec<Column>) -> Batch {
        Batch::from_columns(columns).unwrap()
    }

    /// 20 values around 10 with one spike at index 19
    fn spiked_series() -> Vec<f64> {
        let mut values: Vec<f64> = (0..19).map(|i| 10.0 + (i % 3) as f64 * 0.1).collect();
        values.push(100.0);
        values
    }

    #[test]
    fn test_drops_missing_and_infinite_rows() {
        let input = batch(vec![
            Column::numeric("DO", &[1.0, f64::NAN, 3.0, 4.0]),
            Column::numeric("pH", &[7.0, 7.0, f64::INFINITY, 7.0]),
        ]);
        let (cleaned, report) = Cleaner::new().clean_with_report(&input);
        assert_eq!(cleaned.column("DO").unwrap().values(), vec![1.0, 4.0]);
        assert_eq!(report.undefined_rows, 2);
        assert_eq!(report.dropped(), 2);
    }

    #[test]
    fn test_missing_text_cell_drops_row() {
        let input = batch(vec![
            Column::new(
                "timestamp",
                vec![Cell::Text("a".into()), Cell::Missing, Cell::Text("c".into())],
            ),
            Column::numeric("DO", &[1.0, 2.0, 3.0]),
        ]);
        let cleaned = Cleaner::new().clean(&input);
        assert_eq!(cleaned.num_rows(), 2);
    }

    #[test]
    fn test_removes_three_sigma_spike() {
        let input = batch(vec![Column::numeric("turbidity", &spiked_series())]);
        let (cleaned, report) = Cleaner::new().clean_with_report(&input);
        assert_eq!(cleaned.num_rows(), 19);
        assert!(cleaned.column("turbidity").unwrap().values().iter().all(|v| *v < 11.0));
        assert_eq!(report.outlier_rows, vec![("turbidity".to_string(), 1)]);
    }

    #[test]
    fn test_zero_variance_column_removes_nothing() {
        let input = batch(vec![Column::numeric("pH", &[7.0; 8])]);
        let cleaned = Cleaner::new().clean(&input);
        assert_eq!(cleaned.num_rows(), 8);
    }

    #[test]
    fn test_single_row_is_retained() {
        let input = batch(vec![
            Column::numeric("DO", &[6.5]),
            Column::numeric("pH", &[7.2]),
        ]);
        let cleaned = Cleaner::new().clean(&input);
        assert_eq!(cleaned.num_rows(), 1);
    }

    #[test]
    fn test_output_is_subsequence_of_input() {
        let mut tds: Vec<f64> = (0..20).map(|i| 300.0 + i as f64).collect();
        tds[4] = 5000.0;
        let input = batch(vec![
            Column::numeric("row", &(0..20).map(|i| i as f64).collect::<Vec<_>>()),
            Column::numeric("TDS", &tds),
        ]);
        let cleaned = Cleaner::new().clean(&input);
        let rows = cleaned.column("row").unwrap().values();
        assert!(rows.len() <= 20);
        assert!(rows.windows(2).all(|w| w[0] < w[1]));
        assert!(!rows.contains(&4.0));
    }

    #[test]
    fn test_outlier_filter_is_sequential() {
        // The spike in `a` shares a row with the spike in `b`; once `a` drops
        // it, `b` has no outlier left to remove.
        let a = spiked_series();
        let mut b: Vec<f64> = (0..20).map(|i| 5.0 + (i % 2) as f64 * 0.1).collect();
        b[19] = 80.0;
        let input = batch(vec![Column::numeric("a", &a), Column::numeric("b", &b)]);
        let (cleaned, report) = Cleaner::new().clean_with_report(&input);
        assert_eq!(cleaned.num_rows(), 19);
        assert_eq!(report.outlier_rows, vec![("a".to_string(), 1)]);
    }

    #[test]
    fn test_text_columns_skip_outlier_test() {
        let input = batch(vec![
            Column::new("site", (0..4).map(|i| Cell::Text(format!("s{}", i))).collect()),
            Column::numeric("DO", &[1.0, 2.0, 3.0, 4.0]),
        ]);
        assert_eq!(Cleaner::new().clean(&input).num_rows(), 4);
    }

    #[test]
    fn test_second_pass_removes_nothing_more() {
        let input = batch(vec![Column::numeric("ORP", &spiked_series())]);
        let once = Cleaner::new().clean(&input);
        let twice = Cleaner::new().clean(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_batch() {
        let cleaned = Cleaner::new().clean(&Batch::new());
        assert!(cleaned.is_empty());
        assert!(mean_std(&[]).is_none());
        assert!(mean_std(&[1.0]).unwrap().1.is_nan());
    }
}
