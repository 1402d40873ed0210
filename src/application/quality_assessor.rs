// Quality assessor - scores a fitted curve against the samples it was fitted to
use crate::application::charge_labeler::distinct_percentages;
use crate::domain::curve::VoltageCurve;
use crate::domain::quality::{QualityGrade, QualityReport};
use crate::domain::sample::LabelledSample;

const COVERAGE_FULL_AT: f64 = 10.0;
const TEMPERATURE_SPAN_LIMIT: f64 = 20.0;
const RMSE_SCALE: f64 = 0.5;

/// Composite multiplier for best-effort profiles built from aborted sessions
pub const ABORTED_SESSION_PENALTY: f64 = 0.75;

pub fn assess(samples: &[LabelledSample], curve: &VoltageCurve, outliers_removed: usize) -> QualityReport {
    let (r_squared, rmse) = goodness_of_fit(samples, curve);

    let points: Vec<(f64, f64)> = samples.iter().map(|s| (s.percentage, s.sample.voltage)).collect();
    let coverage_score = (distinct_percentages(&points) as f64 / COVERAGE_FULL_AT).min(1.0);

    let temperature_stability = temperature_stability(samples);

    let composite_score = composite(r_squared, rmse, coverage_score, temperature_stability);

    QualityReport {
        r_squared,
        rmse,
        coverage_score,
        temperature_stability,
        composite_score,
        grade: QualityGrade::from_score(composite_score),
        sample_count: samples.len(),
        outliers_removed,
    }
}

/// Scales the composite score and re-grades
pub fn penalise(report: QualityReport, factor: f64) -> QualityReport {
    let composite_score = (report.composite_score * factor).clamp(0.0, 1.0);
    QualityReport {
        composite_score,
        grade: QualityGrade::from_score(composite_score),
        ..report
    }
}

fn goodness_of_fit(samples: &[LabelledSample], curve: &VoltageCurve) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|s| s.sample.voltage).sum::<f64>() / n;

    let (ss_res, ss_tot) = samples.iter().fold((0.0, 0.0), |(res, tot), s| {
        let actual = s.sample.voltage;
        let predicted = curve.voltage_at(s.percentage);
        (res + (actual - predicted).powi(2), tot + (actual - mean).powi(2))
    });

    let r_squared = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };
    (r_squared, (ss_res / n).sqrt())
}

fn temperature_stability(samples: &[LabelledSample]) -> f64 {
    let (min, max) = samples
        .iter()
        .map(|s| s.sample.temperature)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), t| (lo.min(t), hi.max(t)));
    if !min.is_finite() || !max.is_finite() {
        return 0.0;
    }
    (1.0 - (max - min) / TEMPERATURE_SPAN_LIMIT).max(0.0)
}

pub fn composite(r_squared: f64, rmse: f64, coverage: f64, temperature_stability: f64) -> f64 {
    let score = 0.4 * r_squared + 0.3 * (1.0 - rmse / RMSE_SCALE) + 0.2 * coverage + 0.1 * temperature_stability;
    if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sample::Sample;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn labelled(points: &[(f64, f64, f64)]) -> Vec<LabelledSample> {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        points
            .iter()
            .map(|&(percentage, voltage, temperature)| LabelledSample {
                sample: Sample {
                    timestamp: t0,
                    voltage,
                    current: 1000.0,
                    temperature,
                    elapsed_seconds: 0.0,
                },
                percentage,
            })
            .collect()
    }

    fn linear_curve() -> VoltageCurve {
        VoltageCurve::from_fn(|p| 3.0 + f64::from(p) * 0.012).unwrap()
    }

    #[test]
    fn test_perfect_fit_is_excellent() {
        let points: Vec<(f64, f64, f64)> = (0..=10)
            .map(|i| {
                let p = f64::from(i * 10);
                (p, 3.0 + p * 0.012, 25.0)
            })
            .collect();
        let report = assess(&labelled(&points), &linear_curve(), 0);
        assert!((report.r_squared - 1.0).abs() < 1e-9);
        assert!(report.rmse < 1e-9);
        assert_eq!(report.coverage_score, 1.0);
        assert_eq!(report.temperature_stability, 1.0);
        assert!((report.composite_score - 1.0).abs() < 1e-9);
        assert_eq!(report.grade, QualityGrade::Excellent);
        assert_eq!(report.sample_count, 11);
    }

    #[test]
    fn test_coverage_and_temperature_components() {
        let points = [(100.0, 4.2, 10.0), (50.0, 3.6, 20.0), (0.0, 3.0, 25.0)];
        let report = assess(&labelled(&points), &linear_curve(), 2);
        assert!((report.coverage_score - 0.3).abs() < 1e-12);
        assert!((report.temperature_stability - 0.25).abs() < 1e-12);
        assert_eq!(report.outliers_removed, 2);
    }

    #[test]
    fn test_wide_temperature_span_floors_at_zero() {
        let points = [(100.0, 4.2, -5.0), (0.0, 3.0, 40.0)];
        let report = assess(&labelled(&points), &linear_curve(), 0);
        assert_eq!(report.temperature_stability, 0.0);
    }

    #[test]
    fn test_constant_voltage_r_squared() {
        let flat = VoltageCurve::from_fn(|_| 3.7).unwrap();
        let points = [(100.0, 3.7, 25.0), (50.0, 3.7, 25.0)];
        assert_eq!(assess(&labelled(&points), &flat, 0).r_squared, 1.0);
        let points = [(100.0, 3.8, 25.0), (50.0, 3.8, 25.0)];
        assert_eq!(assess(&labelled(&points), &flat, 0).r_squared, 0.0);
    }

    #[test]
    fn test_penalty_regrades() {
        let points: Vec<(f64, f64, f64)> = (0..=10)
            .map(|i| {
                let p = f64::from(i * 10);
                (p, 3.0 + p * 0.012, 25.0)
            })
            .collect();
        let report = penalise(assess(&labelled(&points), &linear_curve(), 0), ABORTED_SESSION_PENALTY);
        assert!((report.composite_score - 0.75).abs() < 1e-9);
        assert_eq!(report.grade, QualityGrade::Acceptable);
    }

    proptest! {
        #[test]
        fn prop_composite_within_unit_interval(
            r2 in -50.0f64..1.0,
            rmse in 0.0f64..10.0,
            coverage in 0.0f64..=1.0,
            stability in 0.0f64..=1.0,
        ) {
            let score = composite(r2, rmse, coverage, stability);
            prop_assert!((0.0..=1.0).contains(&score));
        }

        #[test]
        fn prop_assessed_score_within_unit_interval(
            voltages in prop::collection::vec(2.5f64..4.5, 1..40),
        ) {
            let points: Vec<(f64, f64, f64)> = voltages
                .iter()
                .enumerate()
                .map(|(i, &v)| ((i * 7 % 101) as f64, v, 20.0 + i as f64))
                .collect();
            let report = assess(&labelled(&points), &linear_curve(), 0);
            prop_assert!((0.0..=1.0).contains(&report.composite_score));
        }
    }
}
