// Profile generator - assembles a validated battery profile from a fitted curve
use crate::application::curve_fitter::fit_linear;
use crate::domain::curve::{MonotonicityViolation, VoltageCurve};
use crate::domain::error::{CalibrationError, ProfileValidationError};
use crate::domain::profile::{BatteryProfile, CalibrationMetadata, SafetyLimits};
use crate::domain::quality::{QualityGrade, QualityReport};
use crate::infrastructure::config::{ChemistrySettings, SafetyMargins};
use chrono::{DateTime, Utc};

/// Per-cell Li-ion (percentage, voltage) breakpoints used when no calibrated profile exists
const LI_ION_CELL_BREAKPOINTS: [(f64, f64); 6] = [
    (100.0, 4.10),
    (80.0, 3.90),
    (40.0, 3.70),
    (20.0, 3.50),
    (5.0, 3.30),
    (0.0, 3.30),
];

#[derive(Debug, Clone)]
pub struct GeneratedProfile {
    pub profile: BatteryProfile,
    /// Violations found in the fitted curve and clamped away
    pub repaired: Vec<MonotonicityViolation>,
}

#[derive(Debug, Clone)]
pub struct ProfileGenerator {
    chemistry: ChemistrySettings,
    margins: SafetyMargins,
    tolerance: f64,
}

impl ProfileGenerator {
    pub fn new(chemistry: ChemistrySettings, margins: SafetyMargins, tolerance: f64) -> Self {
        Self {
            chemistry,
            margins,
            tolerance,
        }
    }

    pub fn generate(
        &self,
        chemistry: &str,
        series_cells: u32,
        parallel_groups: u32,
        curve: &VoltageCurve,
        report: &QualityReport,
        calibrated_at: DateTime<Utc>,
    ) -> Result<GeneratedProfile, ProfileValidationError> {
        let (curve, repaired) = curve.repair_monotonic(self.tolerance);
        for v in &repaired {
            tracing::warn!(
                "Monotonicity violation at {}%->{}% ({:.3}V -> {:.3}V, +{:.3}V), clamped",
                v.p_high, v.p_low, v.v_high, v.v_low, v.delta
            );
        }

        let profile = self.compose(
            chemistry,
            series_cells,
            parallel_groups,
            curve,
            CalibrationMetadata {
                date: calibrated_at,
                grade: report.grade,
                r_squared: report.r_squared,
                rmse: report.rmse,
                sample_count: report.sample_count,
            },
        );

        profile.validate(self.tolerance)?;
        Ok(GeneratedProfile { profile, repaired })
    }

    /// Built-in profile served until a calibrated one has been loaded; always graded POOR
    pub fn fallback_profile(&self) -> Result<BatteryProfile, CalibrationError> {
        let cells = f64::from(self.chemistry.series_cells.max(1));
        let points: Vec<(f64, f64)> = LI_ION_CELL_BREAKPOINTS
            .iter()
            .map(|&(p, v)| (p, v * cells))
            .collect();
        let curve = fit_linear(&points)?;

        let profile = self.compose(
            &self.chemistry.name,
            self.chemistry.series_cells,
            self.chemistry.parallel_groups,
            curve,
            CalibrationMetadata {
                date: Utc::now(),
                grade: QualityGrade::Poor,
                r_squared: 0.0,
                rmse: 0.0,
                sample_count: 0,
            },
        );
        profile.validate(self.tolerance)?;
        Ok(profile)
    }

    fn compose(
        &self,
        chemistry: &str,
        series_cells: u32,
        parallel_groups: u32,
        curve: VoltageCurve,
        metadata: CalibrationMetadata,
    ) -> BatteryProfile {
        let full_voltage = curve.full_voltage();
        let empty_voltage = curve.empty_voltage();
        let safety_limits = SafetyLimits {
            max_voltage: self
                .chemistry
                .max_voltage
                .unwrap_or(full_voltage + self.margins.full_voltage_margin),
            min_voltage: self
                .chemistry
                .min_voltage
                .unwrap_or((empty_voltage - self.margins.empty_voltage_margin).max(0.0)),
            max_current: self.chemistry.max_current,
            max_temperature: self.chemistry.max_temperature,
        };

        BatteryProfile {
            chemistry: chemistry.to_string(),
            nominal_voltage: self.chemistry.nominal_voltage,
            full_voltage,
            empty_voltage,
            capacity_mah: self.chemistry.capacity_mah,
            series_cells,
            parallel_groups,
            peukert_exponent: self.chemistry.peukert_exponent,
            temperature_coefficient: self.chemistry.temperature_coefficient,
            reference_temperature: self.chemistry.reference_temperature,
            safety_limits,
            calibration_metadata: metadata,
            voltage_curve: curve,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::curve::DEFAULT_MONOTONICITY_TOLERANCE;

    fn report(grade: QualityGrade) -> QualityReport {
        QualityReport {
            r_squared: 0.98,
            rmse: 0.015,
            coverage_score: 1.0,
            temperature_stability: 0.9,
            composite_score: 0.93,
            grade,
            sample_count: 200,
            outliers_removed: 3,
        }
    }

    fn generator(chemistry: ChemistrySettings) -> ProfileGenerator {
        ProfileGenerator::new(chemistry, SafetyMargins::default(), DEFAULT_MONOTONICITY_TOLERANCE)
    }

    #[test]
    fn test_generate_derives_voltages_and_limits() {
        let curve = VoltageCurve::from_fn(|p| 3.0 + f64::from(p) * 0.012).unwrap();
        let generated = generator(ChemistrySettings::default())
            .generate("li-ion", 1, 1, &curve, &report(QualityGrade::Excellent), Utc::now())
            .unwrap();
        let profile = generated.profile;
        assert_eq!(profile.full_voltage, curve.get(100));
        assert_eq!(profile.empty_voltage, curve.get(0));
        assert!((profile.safety_limits.max_voltage - (curve.get(100) + 0.05)).abs() < 1e-12);
        assert!((profile.safety_limits.min_voltage - 2.8).abs() < 1e-12);
        assert_eq!(profile.calibration_metadata.grade, QualityGrade::Excellent);
        assert_eq!(profile.calibration_metadata.sample_count, 200);
        assert!(generated.repaired.is_empty());
    }

    #[test]
    fn test_explicit_chemistry_limits_win() {
        let chemistry = ChemistrySettings {
            max_voltage: Some(4.25),
            min_voltage: Some(2.75),
            ..ChemistrySettings::default()
        };
        let curve = VoltageCurve::from_fn(|p| 3.0 + f64::from(p) * 0.012).unwrap();
        let profile = generator(chemistry)
            .generate("li-ion", 1, 1, &curve, &report(QualityGrade::Good), Utc::now())
            .unwrap()
            .profile;
        assert_eq!(profile.safety_limits.max_voltage, 4.25);
        assert_eq!(profile.safety_limits.min_voltage, 2.75);
    }

    #[test]
    fn test_violations_are_repaired_before_validation() {
        let curve = VoltageCurve::from_fn(|p| match p {
            41..=50 => 3.70,
            40 => 3.75,
            p if p > 50 => 3.70 + f64::from(p - 50) * 0.01,
            p => 3.30 + f64::from(p) * 0.01,
        })
        .unwrap();
        let generated = generator(ChemistrySettings::default())
            .generate("li-ion", 1, 1, &curve, &report(QualityGrade::Good), Utc::now())
            .unwrap();
        assert_eq!(generated.repaired.len(), 1);
        assert!(generated.profile.voltage_curve.get(40) <= 3.70);
    }

    #[test]
    fn test_invalid_chemistry_is_rejected() {
        let chemistry = ChemistrySettings {
            capacity_mah: 0,
            ..ChemistrySettings::default()
        };
        let curve = VoltageCurve::from_fn(|p| 3.0 + f64::from(p) * 0.012).unwrap();
        let err = generator(chemistry)
            .generate("", 0, 1, &curve, &report(QualityGrade::Good), Utc::now())
            .unwrap_err();
        assert!(err.missing.contains(&"chemistry".to_string()));
        assert!(err.missing.contains(&"capacity_mah".to_string()));
        assert!(err.missing.contains(&"series_cells".to_string()));
    }

    #[test]
    fn test_fallback_profile_scales_with_series_cells() {
        let chemistry = ChemistrySettings {
            series_cells: 2,
            nominal_voltage: 7.4,
            ..ChemistrySettings::default()
        };
        let profile = generator(chemistry).fallback_profile().unwrap();
        assert_eq!(profile.grade(), QualityGrade::Poor);
        assert_eq!(profile.full_voltage, 8.2);
        assert_eq!(profile.empty_voltage, 6.6);
        assert_eq!(profile.voltage_curve.get(80), 7.8);
        assert_eq!(profile.voltage_curve.get(60), 7.6);
    }
}
