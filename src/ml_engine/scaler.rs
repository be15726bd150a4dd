//! Min-max scaler with explicit fitted state
//!
//! `ScalerState` is the serializable half of a model artifact; `MinMaxScaler`
//! is the stateful wrapper that refuses to transform before `fit`.

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::ml_engine::features::FeatureMatrix;

/// Per-feature (min, max) pairs fitted on one feature matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub feature_names: Vec<String>,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl ScalerState {
    pub fn fit(matrix: &FeatureMatrix) -> Result<Self> {
        let names = matrix
            .feature_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self::fit_array(names, matrix.data().view())
    }

    pub fn fit_array(feature_names: Vec<String>, data: ArrayView2<'_, f64>) -> Result<Self> {
        if data.nrows() == 0 {
            return Err(ForecastError::InsufficientHistory {
                required: 1,
                available: 0,
            });
        }
        if feature_names.len() != data.ncols() {
            return Err(ForecastError::ArtifactMismatch(format!(
                "{} feature names for {} columns",
                feature_names.len(),
                data.ncols()
            )));
        }

        let min = data
            .axis_iter(Axis(1))
            .map(|col| col.fold(f64::INFINITY, |a, &b| a.min(b)))
            .collect();
        let max = data
            .axis_iter(Axis(1))
            .map(|col| col.fold(f64::NEG_INFINITY, |a, &b| a.max(b)))
            .collect();

        Ok(Self {
            feature_names,
            min,
            max,
        })
    }

    pub fn width(&self) -> usize {
        self.min.len()
    }

    /// Column has no spread and maps to a constant
    pub fn is_degenerate(&self, col: usize) -> bool {
        self.max[col] == self.min[col]
    }

    pub fn transform_value(&self, col: usize, value: f64) -> f64 {
        let range = self.max[col] - self.min[col];
        if range == 0.0 {
            0.0
        } else {
            (value - self.min[col]) / range
        }
    }

    pub fn inverse_transform_value(&self, col: usize, scaled: f64) -> f64 {
        let range = self.max[col] - self.min[col];
        scaled * range + self.min[col]
    }

    pub fn transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.check_width(data.ncols())?;
        let mut out = data.to_owned();
        for (j, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
            col.mapv_inplace(|v| self.transform_value(j, v));
        }
        Ok(out)
    }

    pub fn inverse_transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.check_width(data.ncols())?;
        let mut out = data.to_owned();
        for (j, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
            col.mapv_inplace(|v| self.inverse_transform_value(j, v));
        }
        Ok(out)
    }

    /// Scale a whole feature matrix, checking the column names match the fit
    pub fn transform_matrix(&self, matrix: &FeatureMatrix) -> Result<Array2<f64>> {
        let names: Vec<&str> = self.feature_names.iter().map(String::as_str).collect();
        if names.as_slice() != matrix.feature_names() {
            return Err(ForecastError::ArtifactMismatch(format!(
                "scaler fitted on {:?}, data has {:?}",
                names,
                matrix.feature_names()
            )));
        }
        self.transform(matrix.data().view())
    }

    fn check_width(&self, ncols: usize) -> Result<()> {
        if ncols != self.width() {
            return Err(ForecastError::ArtifactMismatch(format!(
                "scaler fitted on {} features, got {}",
                self.width(),
                ncols
            )));
        }
        Ok(())
    }
}

/// Stateful scaler: `fit` once per training cycle, then transform
#[derive(Debug, Clone, Default)]
pub struct MinMaxScaler {
    state: Option<ScalerState>,
}

impl MinMaxScaler {
    pub fn new() -> Self {
        Self { state: None }
    }

    pub fn from_state(state: ScalerState) -> Self {
        Self { state: Some(state) }
    }

    /// Fit on `matrix`, overwriting any previous state
    pub fn fit(&mut self, matrix: &FeatureMatrix) -> Result<&ScalerState> {
        let state = ScalerState::fit(matrix)?;
        Ok(&*self.state.insert(state))
    }

    pub fn fit_transform(&mut self, matrix: &FeatureMatrix) -> Result<Array2<f64>> {
        self.fit(matrix)?;
        self.state()?.transform_matrix(matrix)
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Result<&ScalerState> {
        self.state.as_ref().ok_or(ForecastError::ScalerNotFitted)
    }

    pub fn into_state(self) -> Result<ScalerState> {
        self.state.ok_or(ForecastError::ScalerNotFitted)
    }

    pub fn transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.state()?.transform(data)
    }

    pub fn inverse_transform(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.state()?.inverse_transform(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml_engine::features::FeatureSet;
    use ndarray::array;

    fn matrix(data: Array2<f64>) -> FeatureMatrix {
        FeatureMatrix::new(FeatureSet::Engineered, data).unwrap()
    }

    fn sample() -> Array2<f64> {
        array![
            [100.0, 0.01, 0.02, 99.0, 98.0],
            [110.0, -0.02, 0.03, 101.0, 99.0],
            [105.0, 0.00, 0.01, 103.0, 100.0],
        ]
    }

    #[test]
    fn test_unfitted_scaler_fails_fast() {
        let scaler = MinMaxScaler::new();
        assert_eq!(
            scaler.transform(sample().view()).unwrap_err(),
            ForecastError::ScalerNotFitted
        );
        assert_eq!(
            scaler.inverse_transform(sample().view()).unwrap_err(),
            ForecastError::ScalerNotFitted
        );
    }

    #[test]
    fn test_fit_transform_bounds() {
        let mut scaler = MinMaxScaler::new();
        let scaled = scaler.fit_transform(&matrix(sample())).unwrap();
        assert!(scaled.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(scaled[[0, 0]], 0.0);
        assert_eq!(scaled[[1, 0]], 1.0);
        assert!((scaled[[2, 0]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_round_trip_within_range() {
        let mut scaler = MinMaxScaler::new();
        let data = sample();
        let scaled = scaler.fit_transform(&matrix(data.clone())).unwrap();
        let restored = scaler.inverse_transform(scaled.view()).unwrap();
        for (a, b) in data.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_degenerate_column_maps_to_zero() {
        let data = array![[5.0], [5.0], [5.0]];
        let state = ScalerState::fit_array(vec!["price".into()], data.view()).unwrap();
        assert!(state.is_degenerate(0));
        let scaled = state.transform(data.view()).unwrap();
        assert!(scaled.iter().all(|&v| v == 0.0));
        assert_eq!(state.inverse_transform_value(0, 0.0), 5.0);
    }

    #[test]
    fn test_out_of_range_extrapolates_linearly() {
        let state = ScalerState::fit_array(vec!["price".into()], array![[10.0], [20.0]].view())
            .unwrap();
        assert_eq!(state.transform_value(0, 30.0), 2.0);
        assert_eq!(state.transform_value(0, 0.0), -1.0);
        assert_eq!(state.inverse_transform_value(0, 2.0), 30.0);
    }

    #[test]
    fn test_refit_overwrites_state() {
        let mut scaler = MinMaxScaler::new();
        scaler.fit(&matrix(sample())).unwrap();
        let shifted = sample().mapv(|v| v * 2.0);
        scaler.fit(&matrix(shifted)).unwrap();
        assert_eq!(scaler.state().unwrap().max[0], 220.0);
    }

    #[test]
    fn test_width_mismatch_is_artifact_error() {
        let state = ScalerState::fit_array(vec!["price".into()], array![[1.0], [2.0]].view())
            .unwrap();
        let err = state.transform(sample().view()).unwrap_err();
        assert!(matches!(err, ForecastError::ArtifactMismatch(_)));
    }
}
