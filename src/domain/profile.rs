// Battery profile domain model - the persisted calibration result
use crate::domain::curve::VoltageCurve;
use crate::domain::error::ProfileValidationError;
use crate::domain::quality::QualityGrade;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPERATURE_COEFFICIENT: f64 = -0.003;
pub const DEFAULT_REFERENCE_TEMPERATURE: f64 = 25.0;
pub const DEFAULT_PEUKERT_EXPONENT: f64 = 1.05;

fn default_temperature_coefficient() -> f64 {
    DEFAULT_TEMPERATURE_COEFFICIENT
}

fn default_reference_temperature() -> f64 {
    DEFAULT_REFERENCE_TEMPERATURE
}

fn default_peukert_exponent() -> f64 {
    DEFAULT_PEUKERT_EXPONENT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatteryProfile {
    pub chemistry: String,
    pub nominal_voltage: f64,
    pub full_voltage: f64,
    pub empty_voltage: f64,
    pub capacity_mah: u32,
    pub series_cells: u32,
    pub parallel_groups: u32,
    #[serde(default = "default_peukert_exponent")]
    pub peukert_exponent: f64,
    #[serde(default = "default_temperature_coefficient")]
    pub temperature_coefficient: f64,
    #[serde(default = "default_reference_temperature")]
    pub reference_temperature: f64,
    pub safety_limits: SafetyLimits,
    pub calibration_metadata: CalibrationMetadata,
    // Last so TOML emits the scalar fields before this table
    pub voltage_curve: VoltageCurve,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SafetyLimits {
    pub max_voltage: f64,
    pub min_voltage: f64,
    pub max_current: f64,
    pub max_temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationMetadata {
    pub date: DateTime<Utc>,
    pub grade: QualityGrade,
    pub r_squared: f64,
    pub rmse: f64,
    pub sample_count: usize,
}

impl BatteryProfile {
    /// Field presence and curve shape check, run before a profile is persisted or activated
    pub fn validate(&self, tolerance: f64) -> Result<(), ProfileValidationError> {
        let mut missing = Vec::new();

        if self.chemistry.trim().is_empty() {
            missing.push("chemistry".to_string());
        }
        if !(self.nominal_voltage.is_finite() && self.nominal_voltage > 0.0) {
            missing.push("nominal_voltage".to_string());
        }
        if self.capacity_mah == 0 {
            missing.push("capacity_mah".to_string());
        }
        if self.series_cells == 0 {
            missing.push("series_cells".to_string());
        }
        if self.parallel_groups == 0 {
            missing.push("parallel_groups".to_string());
        }
        if (self.full_voltage - self.voltage_curve.full_voltage()).abs() > 1e-9 {
            missing.push("full_voltage".to_string());
        }
        if (self.empty_voltage - self.voltage_curve.empty_voltage()).abs() > 1e-9 {
            missing.push("empty_voltage".to_string());
        }
        if !(self.peukert_exponent.is_finite() && self.peukert_exponent >= 1.0) {
            missing.push("peukert_exponent".to_string());
        }
        if !self.temperature_coefficient.is_finite() {
            missing.push("temperature_coefficient".to_string());
        }
        if !self.reference_temperature.is_finite() {
            missing.push("reference_temperature".to_string());
        }

        let limits = &self.safety_limits;
        if !(limits.max_voltage > limits.min_voltage) {
            missing.push("safety_limits.max_voltage".to_string());
        }
        if !(limits.max_current > 0.0) {
            missing.push("safety_limits.max_current".to_string());
        }
        if !limits.max_temperature.is_finite() {
            missing.push("safety_limits.max_temperature".to_string());
        }

        let (_, violations) = self.voltage_curve.validate_monotonic(tolerance);

        if missing.is_empty() && violations.is_empty() {
            Ok(())
        } else {
            Err(ProfileValidationError { missing, violations })
        }
    }

    pub fn grade(&self) -> QualityGrade {
        self.calibration_metadata.grade
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::curve::DEFAULT_MONOTONICITY_TOLERANCE;
    use chrono::TimeZone;

    pub(crate) fn sample_profile() -> BatteryProfile {
        let curve = VoltageCurve::from_fn(|p| 3.0 + f64::from(p) * 0.012).unwrap();
        BatteryProfile {
            chemistry: "li-ion".to_string(),
            nominal_voltage: 3.7,
            full_voltage: curve.full_voltage(),
            empty_voltage: curve.empty_voltage(),
            capacity_mah: 2500,
            series_cells: 1,
            parallel_groups: 1,
            peukert_exponent: 1.1,
            temperature_coefficient: -0.003,
            reference_temperature: 25.0,
            safety_limits: SafetyLimits {
                max_voltage: curve.full_voltage() + 0.05,
                min_voltage: curve.empty_voltage() - 0.2,
                max_current: 3000.0,
                max_temperature: 60.0,
            },
            calibration_metadata: CalibrationMetadata {
                date: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
                grade: QualityGrade::Good,
                r_squared: 0.97,
                rmse: 0.02,
                sample_count: 120,
            },
            voltage_curve: curve,
        }
    }

    #[test]
    fn test_valid_profile_passes() {
        assert!(sample_profile().validate(DEFAULT_MONOTONICITY_TOLERANCE).is_ok());
    }

    #[test]
    fn test_validation_lists_missing_fields() {
        let mut profile = sample_profile();
        profile.chemistry = "  ".to_string();
        profile.capacity_mah = 0;
        let err = profile.validate(DEFAULT_MONOTONICITY_TOLERANCE).unwrap_err();
        assert_eq!(err.missing, vec!["chemistry".to_string(), "capacity_mah".to_string()]);
        assert!(err.violations.is_empty());
    }

    #[test]
    fn test_validation_reports_curve_violations() {
        let mut profile = sample_profile();
        profile.voltage_curve = VoltageCurve::from_fn(|p| if p == 30 { 3.9 } else { 3.0 + f64::from(p) * 0.012 }).unwrap();
        let err = profile.validate(DEFAULT_MONOTONICITY_TOLERANCE).unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert_eq!(err.violations[0].p_low, 30);
    }

    #[test]
    fn test_inverted_curve_with_small_steps_rejected() {
        let mut profile = sample_profile();
        profile.voltage_curve = VoltageCurve::from_fn(|p| 3.6 + 0.004 * f64::from(100 - p)).unwrap();
        profile.full_voltage = profile.voltage_curve.full_voltage();
        profile.empty_voltage = profile.voltage_curve.empty_voltage();
        profile.safety_limits.max_voltage = 4.5;
        let err = profile.validate(DEFAULT_MONOTONICITY_TOLERANCE).unwrap_err();
        assert!(err.missing.is_empty());
        assert!(!err.violations.is_empty());
    }

    #[test]
    fn test_optional_parameters_default_on_load() {
        let profile = sample_profile();
        let mut value = serde_json::to_value(&profile).unwrap();
        let object = value.as_object_mut().unwrap();
        object.remove("peukert_exponent");
        object.remove("temperature_coefficient");
        let loaded: BatteryProfile = serde_json::from_value(value).unwrap();
        assert_eq!(loaded.peukert_exponent, DEFAULT_PEUKERT_EXPONENT);
        assert_eq!(loaded.temperature_coefficient, DEFAULT_TEMPERATURE_COEFFICIENT);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let mut value = serde_json::to_value(sample_profile()).unwrap();
        value.as_object_mut().unwrap().insert("colour".into(), "blue".into());
        assert!(serde_json::from_value::<BatteryProfile>(value).is_err());
    }
}
