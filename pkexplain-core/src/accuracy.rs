//! Accuracy reporting over a held-out evaluation sample.

use crate::error::{AccuracyError, PipelineError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tolerance bands for the hit-rate metrics. A band is only reported when configured.
///
/// In config files and environment variables a band is switched off with `false`,
/// e.g. `relative_tolerance = false`. A missing relative band falls back to 20%.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    /// Hit when `|predicted - true| <= absolute_tolerance`.
    #[serde(default, deserialize_with = "band::deserialize")]
    pub absolute_tolerance: Option<f64>,
    /// Hit when `|predicted - true| <= relative_tolerance * |true|`.
    #[serde(
        default = "default_relative_tolerance",
        serialize_with = "band::serialize",
        deserialize_with = "band::deserialize"
    )]
    pub relative_tolerance: Option<f64>,
}

/// Serde glue for optional bands. TOML has no null, so `false` stands for "off".
mod band {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Band {
        Value(f64),
        Switch(bool),
    }

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_f64(*v),
            None => serializer.serialize_bool(false),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        match Option::<Band>::deserialize(deserializer)? {
            None | Some(Band::Switch(false)) => Ok(None),
            Some(Band::Value(v)) => Ok(Some(v)),
            Some(Band::Switch(true)) => Err(D::Error::custom(
                "a tolerance band is a number, or false to switch it off",
            )),
        }
    }
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            absolute_tolerance: None,
            relative_tolerance: default_relative_tolerance(),
        }
    }
}

fn default_relative_tolerance() -> Option<f64> {
    Some(0.2)
}

impl Tolerances {
    pub fn none() -> Self {
        Self {
            absolute_tolerance: None,
            relative_tolerance: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), AccuracyError> {
        for (name, value) in [
            ("absolute_tolerance", self.absolute_tolerance),
            ("relative_tolerance", self.relative_tolerance),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(AccuracyError::DegenerateInput {
                        reason: format!("{name} must be a non-negative number, got {v}"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Standard regression error metrics plus tolerance-band hit rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub n: usize,
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub r_squared: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within_absolute: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within_relative: Option<f64>,
}

/// Paired true and predicted values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSample {
    pub true_values: Vec<f64>,
    pub predicted_values: Vec<f64>,
}

impl EvaluationSample {
    pub fn new(true_values: Vec<f64>, predicted_values: Vec<f64>) -> Self {
        Self {
            true_values,
            predicted_values,
        }
    }

    /// Load from a JSON file of the form `{"true_values": [...], "predicted_values": [...]}`.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn report(&self, tolerances: &Tolerances) -> Result<AccuracyReport, AccuracyError> {
        report(&self.true_values, &self.predicted_values, tolerances)
    }
}

/// Compute the accuracy report.
///
/// Fails with [`AccuracyError::ShapeMismatch`] on unequal or empty sequences and with
/// [`AccuracyError::DegenerateInput`] when R² is undefined (no measurable variance in the
/// true values) or any input or resulting metric is non-finite.
pub fn report(
    true_values: &[f64],
    predicted_values: &[f64],
    tolerances: &Tolerances,
) -> Result<AccuracyReport, AccuracyError> {
    if true_values.len() != predicted_values.len() || true_values.is_empty() {
        return Err(AccuracyError::ShapeMismatch {
            true_len: true_values.len(),
            predicted_len: predicted_values.len(),
        });
    }
    if true_values
        .iter()
        .chain(predicted_values.iter())
        .any(|v| !v.is_finite())
    {
        return Err(AccuracyError::DegenerateInput {
            reason: "evaluation sample contains non-finite values".to_string(),
        });
    }
    let first = true_values[0];
    if true_values.iter().all(|t| *t == first) {
        return Err(AccuracyError::DegenerateInput {
            reason: "all true values are identical, R² is undefined".to_string(),
        });
    }
    tolerances.validate()?;

    let n = true_values.len() as f64;
    let pairs = || true_values.iter().zip(predicted_values.iter());

    let mae = pairs().map(|(t, p)| (p - t).abs()).sum::<f64>() / n;
    let ss_res: f64 = pairs().map(|(t, p)| (p - t).powi(2)).sum();
    let mse = ss_res / n;

    let mean = true_values.iter().sum::<f64>() / n;
    let ss_tot: f64 = true_values.iter().map(|t| (t - mean).powi(2)).sum();
    if !(ss_tot.is_finite() && ss_tot > 0.0) {
        return Err(AccuracyError::DegenerateInput {
            reason: format!("total sum of squares is {ss_tot}, R² is undefined"),
        });
    }
    let r_squared = 1.0 - ss_res / ss_tot;
    if !(mae.is_finite() && mse.is_finite() && r_squared.is_finite()) {
        return Err(AccuracyError::DegenerateInput {
            reason: "evaluation sample overflows the error metrics".to_string(),
        });
    }

    let hit_rate = |hit: &dyn Fn(f64, f64) -> bool| {
        pairs().filter(|(t, p)| hit(**t, **p)).count() as f64 / n
    };
    let within_absolute = tolerances
        .absolute_tolerance
        .map(|tol| hit_rate(&|t: f64, p: f64| (p - t).abs() <= tol));
    let within_relative = tolerances
        .relative_tolerance
        .map(|tol| hit_rate(&|t: f64, p: f64| (p - t).abs() <= tol * t.abs()));

    let report = AccuracyReport {
        n: true_values.len(),
        mae,
        mse,
        rmse: mse.sqrt(),
        r_squared,
        within_absolute,
        within_relative,
    };
    tracing::debug!(n = report.n, mae, mse, r_squared, "Computed accuracy report");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRUE: [f64; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];
    const PRED: [f64; 5] = [1.1, 2.1, 2.9, 4.1, 5.1];

    #[test]
    fn test_reference_scenario() {
        let report = report(&TRUE, &PRED, &Tolerances::none()).unwrap();
        // residuals are all ±0.1: MAE 0.1, MSE 0.01, SS_res 0.05 over SS_tot 10.0
        assert_eq!(report.n, 5);
        assert!((report.mae - 0.10).abs() < 1e-12);
        assert!((report.mse - 0.01).abs() < 1e-12);
        assert!((report.rmse - 0.1).abs() < 1e-12);
        assert!((report.r_squared - 0.995).abs() < 1e-12);
        assert_eq!(report.within_absolute, None);
        assert_eq!(report.within_relative, None);
    }

    #[test]
    fn test_tolerance_bands() {
        let tolerances = Tolerances {
            absolute_tolerance: Some(0.1 + 1e-9),
            relative_tolerance: Some(0.06),
        };
        let report = report(&TRUE, &PRED, &tolerances).unwrap();
        assert_eq!(report.within_absolute, Some(1.0));
        // 0.1 <= 0.06 * t only for t >= 2
        assert_eq!(report.within_relative, Some(0.8));
    }

    #[test]
    fn test_relative_band_with_zero_truth() {
        let tolerances = Tolerances {
            absolute_tolerance: None,
            relative_tolerance: Some(0.5),
        };
        let report = report(&[0.0, 2.0], &[0.1, 2.0], &tolerances).unwrap();
        assert_eq!(report.within_relative, Some(0.5));
    }

    #[test]
    fn test_zero_variance_is_degenerate() {
        let err = report(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0], &Tolerances::default()).unwrap_err();
        assert!(matches!(err, AccuracyError::DegenerateInput { .. }));
    }

    #[test]
    fn test_underflowing_variance_is_degenerate() {
        // (t - mean)^2 underflows to zero even though the true values differ
        let err = report(&[0.0, 1e-200], &[1.0, 1.0], &Tolerances::none()).unwrap_err();
        assert!(matches!(err, AccuracyError::DegenerateInput { .. }));
    }

    #[test]
    fn test_overflowing_sums_are_degenerate() {
        let err = report(&[1e308, 1e308, -1e308], &[1.0; 3], &Tolerances::none()).unwrap_err();
        assert!(matches!(err, AccuracyError::DegenerateInput { .. }));
    }

    #[test]
    fn test_large_residuals_are_degenerate() {
        // finite variance, but the squared residuals overflow
        let err = report(&[0.0, 1.0], &[1e200, -1e200], &Tolerances::none()).unwrap_err();
        assert!(matches!(err, AccuracyError::DegenerateInput { .. }));
    }

    #[test]
    fn test_band_switched_off_with_false() {
        let tolerances: Tolerances =
            toml::from_str("absolute_tolerance = 0.5\nrelative_tolerance = false").unwrap();
        assert_eq!(tolerances.absolute_tolerance, Some(0.5));
        assert_eq!(tolerances.relative_tolerance, None);

        let missing: Tolerances = toml::from_str("absolute_tolerance = 0.5").unwrap();
        assert_eq!(missing.relative_tolerance, Some(0.2));

        let rejected = toml::from_str::<Tolerances>("relative_tolerance = true");
        assert!(rejected.is_err());
    }

    #[test]
    fn test_disabled_band_survives_toml_roundtrip() {
        let text = toml::to_string(&Tolerances::none()).unwrap();
        assert!(text.contains("relative_tolerance = false"));
        let parsed: Tolerances = toml::from_str(&text).unwrap();
        assert_eq!(parsed, Tolerances::none());
    }

    #[test]
    fn test_shape_mismatch() {
        let err = report(&[1.0, 2.0, 3.0], &[1.0, 2.0], &Tolerances::default()).unwrap_err();
        assert_eq!(
            err,
            AccuracyError::ShapeMismatch {
                true_len: 3,
                predicted_len: 2
            }
        );
    }

    #[test]
    fn test_empty_sample_rejected() {
        let err = report(&[], &[], &Tolerances::default()).unwrap_err();
        assert!(matches!(err, AccuracyError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_non_finite_rejected() {
        let err = report(&[1.0, 2.0], &[1.0, f64::NAN], &Tolerances::default()).unwrap_err();
        assert!(matches!(err, AccuracyError::DegenerateInput { .. }));
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let tolerances = Tolerances {
            absolute_tolerance: Some(-1.0),
            relative_tolerance: None,
        };
        assert!(report(&TRUE, &PRED, &tolerances).is_err());
    }

    #[test]
    fn test_evaluation_sample_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval.json");
        std::fs::write(
            &path,
            r#"{"true_values": [1.0, 2.0, 3.0], "predicted_values": [1.0, 2.5, 3.5]}"#,
        )
        .unwrap();
        let sample = EvaluationSample::load(&path).unwrap();
        let report = sample.report(&Tolerances::default()).unwrap();
        assert_eq!(report.n, 3);
        assert_eq!(report.within_relative, Some(2.0 / 3.0));
    }
}
