// Voltage curve domain model - state of charge to terminal voltage
use crate::domain::error::CurvePointError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

pub const CURVE_POINTS: usize = 101;

/// Allowed rise (V) when stepping down one percentage point before it counts as a violation
pub const DEFAULT_MONOTONICITY_TOLERANCE: f64 = 0.005;

/// Voltage for every integer percentage 0..=100.
/// Construction rejects negative or non-finite voltages.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageCurve {
    voltages: [f64; CURVE_POINTS],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonotonicityViolation {
    pub p_high: u8,
    pub p_low: u8,
    pub v_high: f64,
    pub v_low: f64,
    pub delta: f64,
}

impl VoltageCurve {
    pub fn new(voltages: [f64; CURVE_POINTS]) -> Result<Self, CurvePointError> {
        if let Some((percentage, &voltage)) = voltages
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(CurvePointError { percentage, voltage });
        }
        Ok(Self { voltages })
    }

    pub fn from_fn(mut f: impl FnMut(u8) -> f64) -> Result<Self, CurvePointError> {
        let mut voltages = [0.0; CURVE_POINTS];
        for (p, slot) in voltages.iter_mut().enumerate() {
            *slot = f(p as u8);
        }
        Self::new(voltages)
    }

    pub fn get(&self, percentage: u8) -> f64 {
        self.voltages[usize::from(percentage.min(100))]
    }

    pub fn voltages(&self) -> &[f64; CURVE_POINTS] {
        &self.voltages
    }

    pub fn full_voltage(&self) -> f64 {
        self.voltages[100]
    }

    pub fn empty_voltage(&self) -> f64 {
        self.voltages[0]
    }

    /// Expected voltage at a fractional percentage, interpolating between integer points
    pub fn voltage_at(&self, percentage: f64) -> f64 {
        let p = percentage.clamp(0.0, 100.0);
        let lower = p.floor() as usize;
        if lower >= 100 {
            return self.voltages[100];
        }
        let frac = p - lower as f64;
        self.voltages[lower] + (self.voltages[lower + 1] - self.voltages[lower]) * frac
    }

    /// Inverse lookup: state of charge for a (compensated) voltage
    pub fn percentage_for(&self, voltage: f64) -> f64 {
        if voltage >= self.full_voltage() {
            return 100.0;
        }
        if voltage <= self.empty_voltage() {
            return 0.0;
        }
        match self.bracket(voltage) {
            Some(high) => {
                let v_high = self.voltages[high];
                let v_low = self.voltages[high - 1];
                let span = v_high - v_low;
                if span.abs() < f64::EPSILON {
                    high as f64
                } else {
                    (high - 1) as f64 + (voltage - v_low) / span
                }
            }
            None => self.nearest_percentage(voltage),
        }
    }

    /// Walks down from 100% and returns the upper index of the first pair enclosing `voltage`
    fn bracket(&self, voltage: f64) -> Option<usize> {
        (1..CURVE_POINTS).rev().find(|&p| {
            let v_high = self.voltages[p];
            let v_low = self.voltages[p - 1];
            v_low <= voltage && voltage <= v_high
        })
    }

    fn nearest_percentage(&self, voltage: f64) -> f64 {
        self.voltages
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (*a - voltage).abs().total_cmp(&(*b - voltage).abs()))
            .map(|(p, _)| p as f64)
            .unwrap_or(0.0)
    }

    /// Checks that voltage never rises more than `tolerance` above the lowest voltage
    /// seen at any higher percentage, so small per-step rises cannot accumulate
    pub fn validate_monotonic(&self, tolerance: f64) -> (bool, Vec<MonotonicityViolation>) {
        let (_, violations) = scan_monotonic(self.voltages, tolerance, false);
        (violations.is_empty(), violations)
    }

    /// Clamps every violating point to the running floor from above.
    /// Returns the repaired curve and the violations found along the way.
    pub fn repair_monotonic(&self, tolerance: f64) -> (VoltageCurve, Vec<MonotonicityViolation>) {
        let (voltages, violations) = scan_monotonic(self.voltages, tolerance, true);
        (VoltageCurve { voltages }, violations)
    }
}

/// Walks 100 -> 0 tracking the minimum voltage (and where it sits) at higher percentages
fn scan_monotonic(
    mut voltages: [f64; CURVE_POINTS],
    tolerance: f64,
    repair: bool,
) -> ([f64; CURVE_POINTS], Vec<MonotonicityViolation>) {
    let mut violations = Vec::new();
    let mut floor = (CURVE_POINTS - 1, voltages[CURVE_POINTS - 1]);
    for p_low in (0..CURVE_POINTS - 1).rev() {
        let v_low = voltages[p_low];
        let (p_high, v_high) = floor;
        let delta = v_low - v_high;
        if delta > tolerance {
            violations.push(MonotonicityViolation {
                p_high: p_high as u8,
                p_low: p_low as u8,
                v_high,
                v_low,
                delta,
            });
            if repair {
                voltages[p_low] = v_high;
            }
        } else if v_low <= v_high {
            floor = (p_low, v_low);
        }
    }
    (voltages, violations)
}

pub fn round_voltage(voltage: f64) -> f64 {
    (voltage * 1000.0).round() / 1000.0
}

impl Serialize for VoltageCurve {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Keys are emitted in numeric order, not lexical
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(CURVE_POINTS))?;
        for (p, v) in self.voltages.iter().enumerate() {
            map.serialize_entry(&p.to_string(), v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for VoltageCurve {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, f64>::deserialize(deserializer)?;
        let mut voltages = [f64::NAN; CURVE_POINTS];
        for (key, value) in &raw {
            let p: usize = key
                .parse()
                .map_err(|_| D::Error::custom(format!("invalid curve key {key:?}")))?;
            if p >= CURVE_POINTS {
                return Err(D::Error::custom(format!("curve key {p} is outside 0..=100")));
            }
            voltages[p] = *value;
        }
        if raw.len() != CURVE_POINTS {
            let missing: Vec<String> = voltages
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_nan())
                .map(|(p, _)| p.to_string())
                .collect();
            return Err(D::Error::custom(format!(
                "voltage curve must contain all 101 keys, missing [{}]",
                missing.join(", ")
            )));
        }
        VoltageCurve::new(voltages).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn linear_curve() -> VoltageCurve {
        VoltageCurve::from_fn(|p| 3.0 + f64::from(p) * 0.012).unwrap()
    }

    #[test]
    fn test_rejects_negative_voltage() {
        let err = VoltageCurve::from_fn(|p| if p == 7 { -0.1 } else { 3.7 }).unwrap_err();
        assert_eq!(err.percentage, 7);
    }

    #[test]
    fn test_voltage_at_interpolates() {
        let curve = linear_curve();
        assert!((curve.voltage_at(50.5) - 3.606).abs() < 1e-9);
        assert_eq!(curve.voltage_at(150.0), curve.full_voltage());
        assert_eq!(curve.voltage_at(-3.0), curve.empty_voltage());
    }

    #[test]
    fn test_percentage_lookup() {
        let curve = linear_curve();
        assert_eq!(curve.percentage_for(4.5), 100.0);
        assert_eq!(curve.percentage_for(2.0), 0.0);
        assert!((curve.percentage_for(3.6) - 50.0).abs() < 1e-9);
        assert!((curve.percentage_for(3.606) - 50.5).abs() < 1e-6);
    }

    #[test]
    fn test_percentage_lookup_on_flat_segment() {
        let curve = VoltageCurve::from_fn(|p| if p >= 40 { 3.8 } else { 3.4 + f64::from(p) * 0.01 }).unwrap();
        let pct = curve.percentage_for(3.8);
        assert_eq!(pct, 100.0);
        // 3.75 is reached at 35% on the sloped part below the plateau
        let pct = curve.percentage_for(3.75);
        assert!((pct - 35.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_violation_reported_and_repaired() {
        // 50..41 flat at 3.70, 40 bumps up to 3.75
        let curve = VoltageCurve::from_fn(|p| match p {
            41..=50 => 3.70,
            40 => 3.75,
            p if p > 50 => 3.70 + f64::from(p - 50) * 0.01,
            p => 3.30 + f64::from(p) * 0.01,
        })
        .unwrap();

        let (valid, violations) = curve.validate_monotonic(DEFAULT_MONOTONICITY_TOLERANCE);
        assert!(!valid);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].p_high, 41);
        assert_eq!(violations[0].p_low, 40);
        assert!((violations[0].delta - 0.05).abs() < 1e-9);

        let (repaired, found) = curve.repair_monotonic(DEFAULT_MONOTONICITY_TOLERANCE);
        assert_eq!(found.len(), 1);
        assert!(repaired.get(40) <= 3.70);
        assert!(repaired.validate_monotonic(DEFAULT_MONOTONICITY_TOLERANCE).0);
    }

    #[test]
    fn test_slow_drift_cannot_accumulate() {
        // Rises 4mV per step as charge falls; each step is inside tolerance
        let curve = VoltageCurve::from_fn(|p| 3.6 + 0.004 * f64::from(100 - p)).unwrap();
        let (valid, violations) = curve.validate_monotonic(DEFAULT_MONOTONICITY_TOLERANCE);
        assert!(!valid);
        assert_eq!(violations[0].p_high, 100);
        assert_eq!(violations[0].p_low, 98);

        let (repaired, _) = curve.repair_monotonic(DEFAULT_MONOTONICITY_TOLERANCE);
        assert!(repaired.validate_monotonic(DEFAULT_MONOTONICITY_TOLERANCE).0);
        assert!(repaired.empty_voltage() <= repaired.full_voltage() + DEFAULT_MONOTONICITY_TOLERANCE);
    }

    #[test]
    fn test_tolerance_allows_small_rise() {
        let curve = VoltageCurve::from_fn(|p| if p == 20 { 3.504 } else { 3.5 }).unwrap();
        assert!(curve.validate_monotonic(0.005).0);
        assert!(!curve.validate_monotonic(0.001).0);
    }

    #[test]
    fn test_round_voltage() {
        assert_eq!(round_voltage(3.14159), 3.142);
        assert_eq!(round_voltage(3.0004), 3.0);
    }

    #[test]
    fn test_serde_requires_all_keys() {
        let curve = linear_curve();
        let json = serde_json::to_string(&curve).unwrap();
        let back: VoltageCurve = serde_json::from_str(&json).unwrap();
        assert_eq!(back, curve);

        let mut map: BTreeMap<String, f64> = serde_json::from_str(&json).unwrap();
        map.remove("42");
        let partial = serde_json::to_string(&map).unwrap();
        let err = serde_json::from_str::<VoltageCurve>(&partial).unwrap_err();
        assert!(err.to_string().contains("42"));
    }

    fn drifting_curve(steps: &[f64]) -> VoltageCurve {
        let mut voltages = [3.0; CURVE_POINTS];
        for (p, step) in steps.iter().enumerate() {
            voltages[p + 1] = voltages[p] + step;
        }
        VoltageCurve::new(voltages).unwrap()
    }

    fn within_endpoints(curve: &VoltageCurve, tolerance: f64) -> bool {
        curve.voltages().iter().all(|&v| {
            v <= curve.full_voltage() + tolerance + 1e-12 && v >= curve.empty_voltage() - tolerance - 1e-12
        })
    }

    proptest! {
        #[test]
        fn prop_valid_curves_stay_between_endpoints(
            steps in prop::collection::vec(-0.006f64..0.02, CURVE_POINTS - 1),
        ) {
            let curve = drifting_curve(&steps);
            if curve.validate_monotonic(DEFAULT_MONOTONICITY_TOLERANCE).0 {
                prop_assert!(within_endpoints(&curve, DEFAULT_MONOTONICITY_TOLERANCE));
            }
        }

        #[test]
        fn prop_repaired_curves_are_valid_and_bounded(
            steps in prop::collection::vec(-0.02f64..0.02, CURVE_POINTS - 1),
        ) {
            let (repaired, _) = drifting_curve(&steps).repair_monotonic(DEFAULT_MONOTONICITY_TOLERANCE);
            prop_assert!(repaired.validate_monotonic(DEFAULT_MONOTONICITY_TOLERANCE).0);
            prop_assert!(within_endpoints(&repaired, DEFAULT_MONOTONICITY_TOLERANCE));
        }
    }
}
