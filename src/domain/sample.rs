// Calibration sample domain models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current (mA) inside which the battery is considered neither charging nor discharging
pub const IDLE_CURRENT_BAND_MA: f64 = 100.0;

/// One reading as delivered by the sensor collaborator.
/// Current is signed: positive means discharge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorReading {
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
}

impl SensorReading {
    pub fn new(timestamp: DateTime<Utc>, voltage: f64, current: f64, temperature: f64) -> Self {
        Self {
            timestamp,
            voltage,
            current,
            temperature,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
    pub elapsed_seconds: f64,
}

impl Sample {
    pub fn from_reading(reading: SensorReading, session_start: DateTime<Utc>) -> Self {
        let elapsed_ms = (reading.timestamp - session_start).num_milliseconds();
        Self {
            timestamp: reading.timestamp,
            voltage: reading.voltage,
            current: reading.current,
            temperature: reading.temperature,
            elapsed_seconds: elapsed_ms as f64 / 1000.0,
        }
    }
}

/// A sample paired with its estimated state of charge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelledSample {
    pub sample: Sample,
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    Charging,
    Discharging,
    Idle,
}

impl PowerState {
    pub fn from_current(current_ma: f64) -> Self {
        if current_ma > IDLE_CURRENT_BAND_MA {
            PowerState::Discharging
        } else if current_ma < -IDLE_CURRENT_BAND_MA {
            PowerState::Charging
        } else {
            PowerState::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_elapsed_seconds_from_session_start() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let reading = SensorReading::new(start + chrono::Duration::milliseconds(90_500), 3.9, 800.0, 24.0);
        let sample = Sample::from_reading(reading, start);
        assert_eq!(sample.elapsed_seconds, 90.5);
        assert_eq!(sample.voltage, 3.9);
    }

    #[test]
    fn test_power_state_dead_band() {
        assert_eq!(PowerState::from_current(850.0), PowerState::Discharging);
        assert_eq!(PowerState::from_current(-450.0), PowerState::Charging);
        assert_eq!(PowerState::from_current(60.0), PowerState::Idle);
        assert_eq!(PowerState::from_current(-100.0), PowerState::Idle);
    }

    #[test]
    fn test_reading_rejects_unknown_fields() {
        let json = r#"{"timestamp":"2024-05-01T12:00:00Z","voltage":4.1,"current":500.0,"temperature":22.0,"extra":1}"#;
        assert!(serde_json::from_str::<SensorReading>(json).is_err());

        let json = r#"{"timestamp":"2024-05-01T12:00:00Z","voltage":4.1,"current":500.0,"temperature":22.0}"#;
        let reading: SensorReading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.current, 500.0);
    }
}
