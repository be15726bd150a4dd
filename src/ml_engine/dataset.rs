//! Dataset - fixed-length sequence windows for the recurrent model

use ndarray::{s, Array1, Array2, Array3, ArrayView2};
use tracing::debug;

use crate::error::{ForecastError, Result};
use crate::ml_engine::features::FeatureVector;

/// Chronologically ordered windows and their next-step targets
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDataset {
    /// [samples, sequence_length, features]
    pub windows: Array3<f64>,
    /// Primary feature at the step right after each window
    pub targets: Array1<f64>,
}

impl SequenceDataset {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn sequence_length(&self) -> usize {
        self.windows.shape()[1]
    }

    pub fn n_features(&self) -> usize {
        self.windows.shape()[2]
    }

    pub fn window(&self, i: usize) -> ArrayView2<'_, f64> {
        self.windows.slice(s![i, .., ..])
    }

    /// Split for validation without crossing the time boundary: the earliest
    /// `1 - validation_fraction` windows train, the most recent ones validate.
    /// Too few windows to hold out either side means training on all of them
    /// with an empty validation set.
    pub fn temporal_split(&self, validation_fraction: f64) -> Result<(SequenceDataset, SequenceDataset)> {
        if !(0.0..1.0).contains(&validation_fraction) {
            return Err(ForecastError::ComputationError(format!(
                "validation fraction {} outside [0, 1)",
                validation_fraction
            )));
        }

        let split_idx = (self.len() as f64 * (1.0 - validation_fraction)) as usize;
        if split_idx == 0 || split_idx >= self.len() {
            debug!(
                "{} windows too few for a {:.0}% validation split, training on all of them",
                self.len(),
                validation_fraction * 100.0
            );
            return Ok((self.clone(), self.slice(self.len(), self.len())));
        }

        Ok((self.slice(0, split_idx), self.slice(split_idx, self.len())))
    }

    fn slice(&self, start: usize, end: usize) -> SequenceDataset {
        SequenceDataset {
            windows: self.windows.slice(s![start..end, .., ..]).to_owned(),
            targets: self.targets.slice(s![start..end]).to_owned(),
        }
    }
}

/// Slice a normalized matrix into overlapping windows.
///
/// Window i covers rows `[i, i + L)`, target i is the primary column at row
/// `i + L`. Yields exactly `N - L` samples.
pub fn make_windows(matrix: ArrayView2<'_, f64>, sequence_length: usize) -> Result<SequenceDataset> {
    let n_rows = matrix.nrows();
    if sequence_length == 0 || n_rows <= sequence_length {
        return Err(ForecastError::InsufficientHistory {
            required: sequence_length + 1,
            available: n_rows,
        });
    }

    let n_samples = n_rows - sequence_length;
    let n_features = matrix.ncols();
    let mut windows = Array3::zeros((n_samples, sequence_length, n_features));
    let mut targets = Array1::zeros(n_samples);

    for i in 0..n_samples {
        windows
            .slice_mut(s![i, .., ..])
            .assign(&matrix.slice(s![i..i + sequence_length, ..]));
        targets[i] = matrix[[i + sequence_length, FeatureVector::PRIMARY_INDEX]];
    }

    Ok(SequenceDataset { windows, targets })
}

/// The most recent `sequence_length` rows, the input for a next-step forecast
pub fn last_window(matrix: ArrayView2<'_, f64>, sequence_length: usize) -> Result<Array2<f64>> {
    let n_rows = matrix.nrows();
    if sequence_length == 0 || n_rows < sequence_length {
        return Err(ForecastError::InsufficientHistory {
            required: sequence_length,
            available: n_rows,
        });
    }
    Ok(matrix.slice(s![n_rows - sequence_length.., ..]).to_owned())
}
