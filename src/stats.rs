//! Small numeric helpers shared by feature engineering and portfolio stats

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator), `None` below two values
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Simple period-over-period returns `x[t] / x[t-1] - 1`.
///
/// Returns `None` when a previous level is zero.
pub fn simple_returns(levels: &[f64]) -> Option<Vec<f64>> {
    levels
        .windows(2)
        .map(|w| if w[0] == 0.0 { None } else { Some(w[1] / w[0] - 1.0) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&v), Some(5.0));
        let s = sample_std(&v).unwrap();
        assert!((s - 2.138_089_935).abs() < 1e-6);
        assert_eq!(mean(&[]), None);
        assert_eq!(sample_std(&[1.0]), None);
    }

    #[test]
    fn test_simple_returns() {
        let r = simple_returns(&[100.0, 110.0, 99.0]).unwrap();
        assert!((r[0] - 0.1).abs() < 1e-12);
        assert!((r[1] + 0.1).abs() < 1e-12);
        assert!(simple_returns(&[0.0, 1.0]).is_none());
        assert!(simple_returns(&[1.0]).unwrap().is_empty());
    }
}
