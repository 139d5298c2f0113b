//! Min-max scaling and fixed-length sequence windowing for the forecaster
//!
//! The scaler is fit on the series being windowed, on every call. Forecaster
//! inputs and outputs are therefore relative to the batch, not to a fixed
//! physical range. Scaler state is never persisted or shared across batches.

use serde::{Deserialize, Serialize};

/// Default number of past values fed to the forecaster
pub const DEFAULT_SEQUENCE_LENGTH: usize = 10;

/// Affine map of a series onto [0, 1], invertible from its stored bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: f64,
    pub max: f64,
}

impl MinMaxScaler {
    /// Fit on the finite values of a series; `None` when there are none
    pub fn fit(series: &[f64]) -> Option<Self> {
        let mut finite = series.iter().copied().filter(|v| v.is_finite());
        let first = finite.next()?;
        let (min, max) = finite.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
        Some(Self { min, max })
    }

    /// Spread used as divisor; a constant series maps onto 0
    fn range(&self) -> f64 {
        let range = self.max - self.min;
        if range.abs() < f64::EPSILON {
            1.0
        } else {
            range
        }
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.min) / self.range()
    }

    pub fn inverse_transform(&self, scaled: f64) -> f64 {
        scaled * self.range() + self.min
    }

    pub fn transform_all(&self, series: &[f64]) -> Vec<f64> {
        series.iter().map(|v| self.transform(*v)).collect()
    }
}

/// One contiguous slice of a scaled series
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceWindow(Vec<f64>);

impl SequenceWindow {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Scaled windows ready for inference
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledWindows {
    /// `None` only for an empty series
    pub scaler: Option<MinMaxScaler>,
    pub windows: Vec<SequenceWindow>,
}

/// Scaled windows paired 1:1 with the value that follows each one
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSequences {
    pub scaler: Option<MinMaxScaler>,
    pub windows: Vec<SequenceWindow>,
    pub targets: Vec<f64>,
}

/// Turns a 1-D series into overlapping fixed-length windows
#[derive(Debug, Clone, Copy)]
pub struct SequenceWindower {
    length: usize,
}

impl Default for SequenceWindower {
    fn default() -> Self {
        Self {
            length: DEFAULT_SEQUENCE_LENGTH,
        }
    }
}

impl SequenceWindower {
    /// A zero length is clamped to 1; user-facing settings reject it first.
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(1),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Number of windows a series of `len` values yields: `max(0, len - length)`
    pub fn window_count(&self, len: usize) -> usize {
        len.saturating_sub(self.length)
    }

    /// Fit a scaler on `series` and cut `len - length` windows.
    ///
    /// The last window ends one value before the end of the series, so every
    /// window has a successor. A series no longer than the window length
    /// yields no windows.
    pub fn scale_and_window(&self, series: &[f64]) -> ScaledWindows {
        let scaler = MinMaxScaler::fit(series);
        let windows = match scaler {
            Some(scaler) => self.cut(&scaler.transform_all(series)),
            None => Vec::new(),
        };
        ScaledWindows { scaler, windows }
    }

    /// Training variant: each window is paired with the scaled value after it
    pub fn scale_and_window_with_targets(&self, series: &[f64]) -> TrainingSequences {
        let scaler = MinMaxScaler::fit(series);
        let Some(fitted) = scaler else {
            return TrainingSequences {
                scaler,
                windows: Vec::new(),
                targets: Vec::new(),
            };
        };
        let scaled = fitted.transform_all(series);
        let windows = self.cut(&scaled);
        let targets = (0..windows.len()).map(|i| scaled[i + self.length]).collect();
        TrainingSequences {
            scaler,
            windows,
            targets,
        }
    }

    fn cut(&self, scaled: &[f64]) -> Vec<SequenceWindow> {
        (0..self.window_count(scaled.len()))
            .map(|i| SequenceWindow::new(scaled[i..i + self.length].to_vec()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f64> {
        (1..=len).map(|v| v as f64).collect()
    }

    #[test]
    fn test_scaler_maps_to_unit_interval() {
        let scaler = MinMaxScaler::fit(&[2.0, 4.0, 6.0]).unwrap();
        assert_eq!(scaler.transform_all(&[2.0, 4.0, 6.0]), vec![0.0, 0.5, 1.0]);
        assert_eq!(scaler.inverse_transform(0.5), 4.0);
    }

    #[test]
    fn test_scaler_constant_series() {
        let scaler = MinMaxScaler::fit(&[3.0, 3.0]).unwrap();
        assert_eq!(scaler.transform(3.0), 0.0);
        assert_eq!(scaler.inverse_transform(0.0), 3.0);
    }

    #[test]
    fn test_scaler_empty_series() {
        assert!(MinMaxScaler::fit(&[]).is_none());
        assert!(MinMaxScaler::fit(&[f64::NAN]).is_none());
    }

    #[test]
    fn test_window_count() {
        let windower = SequenceWindower::default();
        assert_eq!(windower.scale_and_window(&ramp(15)).windows.len(), 5);
        assert_eq!(windower.scale_and_window(&ramp(12)).windows.len(), 2);
        assert!(windower.scale_and_window(&ramp(10)).windows.is_empty());
        assert!(windower.scale_and_window(&ramp(3)).windows.is_empty());
        assert!(windower.scale_and_window(&[]).windows.is_empty());
    }

    #[test]
    fn test_windows_are_contiguous_scaled_slices() {
        let windower = SequenceWindower::new(3);
        let result = windower.scale_and_window(&[0.0, 1.0, 2.0, 3.0, 4.0]);
        let scaler = result.scaler.unwrap();
        assert_eq!(scaler.min, 0.0);
        assert_eq!(scaler.max, 4.0);
        assert_eq!(result.windows.len(), 2);
        assert_eq!(result.windows[0].values(), &[0.0, 0.25, 0.5]);
        assert_eq!(result.windows[1].values(), &[0.25, 0.5, 0.75]);
    }

    #[test]
    fn test_training_targets_follow_windows() {
        let windower = SequenceWindower::new(3);
        let sequences = windower.scale_and_window_with_targets(&[0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(sequences.windows.len(), sequences.targets.len());
        assert_eq!(sequences.targets, vec![0.75, 1.0]);
    }

    #[test]
    fn test_scaler_refit_per_call() {
        let windower = SequenceWindower::new(2);
        let low = windower.scale_and_window(&[0.0, 1.0, 2.0]);
        let high = windower.scale_and_window(&[10.0, 11.0, 12.0]);
        assert_eq!(low.windows, high.windows);
        assert_ne!(low.scaler, high.scaler);
    }
}
