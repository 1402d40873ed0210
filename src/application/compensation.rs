// Read-time corrections applied to raw sensor values
use crate::domain::profile::BatteryProfile;
use crate::infrastructure::config::SensorSettings;

/// compensated = raw - coefficient * (temperature - reference)
pub fn compensate_voltage(raw_voltage: f64, temperature: f64, coefficient: f64, reference_temperature: f64) -> f64 {
    raw_voltage - coefficient * (temperature - reference_temperature)
}

pub fn compensate_for_profile(raw_voltage: f64, temperature: f64, profile: &BatteryProfile) -> f64 {
    compensate_voltage(
        raw_voltage,
        temperature,
        profile.temperature_coefficient,
        profile.reference_temperature,
    )
}

/// Per-device gain/offset correction of the sensor front end
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorCorrection {
    voltage_offset: f64,
    voltage_gain: f64,
    current_offset: f64,
    current_gain: f64,
}

impl SensorCorrection {
    pub fn voltage(&self, raw: f64) -> f64 {
        raw * self.voltage_gain + self.voltage_offset
    }

    pub fn current(&self, raw: f64) -> f64 {
        raw * self.current_gain + self.current_offset
    }
}

impl Default for SensorCorrection {
    fn default() -> Self {
        SensorCorrection::from(&SensorSettings::default())
    }
}

impl From<&SensorSettings> for SensorCorrection {
    fn from(settings: &SensorSettings) -> Self {
        Self {
            voltage_offset: settings.voltage_offset,
            voltage_gain: settings.voltage_gain,
            current_offset: settings.current_offset,
            current_gain: settings.current_gain,
        }
    }
}
