// Runtime estimator - Peukert projection of remaining operating time
use crate::domain::profile::BatteryProfile;
use crate::infrastructure::config::EstimatorSettings;

/// (temperature C, capacity multiplier), ascending by temperature
const TEMPERATURE_DERATING: [(f64, f64); 5] = [(0.0, 0.80), (10.0, 0.90), (25.0, 1.00), (40.0, 0.95), (60.0, 0.85)];

pub fn temperature_derating(temperature: f64) -> f64 {
    let first = TEMPERATURE_DERATING[0];
    let last = TEMPERATURE_DERATING[TEMPERATURE_DERATING.len() - 1];
    if temperature <= first.0 {
        return first.1;
    }
    if temperature >= last.0 {
        return last.1;
    }
    TEMPERATURE_DERATING
        .windows(2)
        .find(|pair| pair[0].0 <= temperature && temperature <= pair[1].0)
        .map(|pair| {
            let (t0, f0) = pair[0];
            let (t1, f1) = pair[1];
            f0 + (f1 - f0) * (temperature - t0) / (t1 - t0)
        })
        .unwrap_or(last.1)
}

/// Whether the derating table covers `temperature` without clamping
pub fn within_derating_range(temperature: f64) -> bool {
    let first = TEMPERATURE_DERATING[0].0;
    let last = TEMPERATURE_DERATING[TEMPERATURE_DERATING.len() - 1].0;
    (first..=last).contains(&temperature)
}

pub fn load_efficiency_factor(load_current_ma: f64) -> f64 {
    let amps = load_current_ma / 1000.0;
    if amps < 0.5 {
        1.05
    } else if amps <= 1.5 {
        1.00
    } else {
        0.95
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeEstimator {
    settings: EstimatorSettings,
}

impl RuntimeEstimator {
    pub fn new(settings: EstimatorSettings) -> Self {
        Self { settings }
    }

    /// Remaining minutes at `load_current_ma`; `None` when the load is not a discharge
    pub fn estimate_minutes(
        &self,
        profile: &BatteryProfile,
        percentage: f64,
        load_current_ma: f64,
        temperature: f64,
    ) -> Option<f64> {
        if !(load_current_ma > 0.0) || profile.capacity_mah == 0 {
            return None;
        }

        let capacity_effective = f64::from(profile.capacity_mah)
            * temperature_derating(temperature)
            * load_efficiency_factor(load_current_ma);

        let remaining = capacity_effective * percentage.clamp(0.0, 100.0) / 100.0;
        let usable = (remaining - self.settings.cutoff_margin * capacity_effective).max(0.0);
        if usable <= 0.0 {
            return Some(0.0);
        }

        // Peukert: t = H * (C / (I * H))^k, scaled to the usable share of capacity
        let rated_hours = self.settings.rated_discharge_hours.max(f64::MIN_POSITIVE);
        let k = profile.peukert_exponent.max(1.0);
        let full_hours = rated_hours * (capacity_effective / (load_current_ma * rated_hours)).powf(k);
        let hours = full_hours * (usable / capacity_effective) * self.settings.efficiency;

        let minutes = hours * 60.0;
        Some(if minutes.is_finite() { minutes.max(0.0) } else { 0.0 })
    }
}
