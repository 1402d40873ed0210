use crate::application::curve_fitter::FitStrategy;
use crate::application::outlier_filter::OutlierMethod;
use crate::domain::curve::DEFAULT_MONOTONICITY_TOLERANCE;
use crate::domain::profile::{
    DEFAULT_PEUKERT_EXPONENT, DEFAULT_REFERENCE_TEMPERATURE, DEFAULT_TEMPERATURE_COEFFICIENT,
};
use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "config/profiler";
const ENV_PREFIX: &str = "PROFILER";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub calibration: CalibrationSettings,
    pub chemistry: ChemistrySettings,
    pub safety: SafetyMargins,
    pub estimator: EstimatorSettings,
    pub sensor: SensorSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    pub profiles_dir: PathBuf,
    pub calibrations_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            profiles_dir: PathBuf::from("data/profiles"),
            calibrations_dir: PathBuf::from("data/calibrations"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CalibrationSettings {
    pub profile_name: String,
    pub fit_strategy: FitStrategy,
    pub polynomial_degree: usize,
    pub outlier_method: OutlierMethod,
    pub sampling_interval_seconds: f64,
    pub monotonicity_tolerance: f64,
    pub max_fit_evaluations: usize,
    /// Session length after which further samples are refused; 0 disables the limit
    pub session_timeout_seconds: u64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            profile_name: "default".to_string(),
            fit_strategy: FitStrategy::BestFit,
            polynomial_degree: 3,
            outlier_method: OutlierMethod::Iqr,
            sampling_interval_seconds: 30.0,
            monotonicity_tolerance: DEFAULT_MONOTONICITY_TOLERANCE,
            max_fit_evaluations: 1000,
            session_timeout_seconds: 12 * 3600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChemistrySettings {
    pub name: String,
    /// Pack nominal voltage
    pub nominal_voltage: f64,
    pub capacity_mah: u32,
    pub series_cells: u32,
    pub parallel_groups: u32,
    pub temperature_coefficient: f64,
    pub reference_temperature: f64,
    pub peukert_exponent: f64,
    pub max_current: f64,
    pub max_temperature: f64,
    /// Explicit limits override the margin-derived defaults
    pub max_voltage: Option<f64>,
    pub min_voltage: Option<f64>,
}

impl Default for ChemistrySettings {
    fn default() -> Self {
        Self {
            name: "li-ion".to_string(),
            nominal_voltage: 3.7,
            capacity_mah: 2500,
            series_cells: 1,
            parallel_groups: 1,
            temperature_coefficient: DEFAULT_TEMPERATURE_COEFFICIENT,
            reference_temperature: DEFAULT_REFERENCE_TEMPERATURE,
            peukert_exponent: DEFAULT_PEUKERT_EXPONENT,
            max_current: 3000.0,
            max_temperature: 60.0,
            max_voltage: None,
            min_voltage: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SafetyMargins {
    pub full_voltage_margin: f64,
    pub empty_voltage_margin: f64,
}

impl Default for SafetyMargins {
    fn default() -> Self {
        Self {
            full_voltage_margin: 0.05,
            empty_voltage_margin: 0.2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EstimatorSettings {
    /// Fraction of effective capacity held back as a safety buffer
    pub cutoff_margin: f64,
    /// Discharge time at which the rated capacity is specified (C/20 -> 20h)
    pub rated_discharge_hours: f64,
    pub efficiency: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            cutoff_margin: 0.10,
            rated_discharge_hours: 20.0,
            efficiency: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorSettings {
    pub voltage_offset: f64,
    pub voltage_gain: f64,
    pub current_offset: f64,
    pub current_gain: f64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            voltage_offset: 0.0,
            voltage_gain: 1.0,
            current_offset: 0.0,
            current_gain: 1.0,
        }
    }
}

pub fn load_app_config() -> anyhow::Result<AppConfig> {
    load_app_config_from(DEFAULT_CONFIG_PATH)
}

/// Layers the optional file at `path` (any format the config crate knows) under `PROFILER__*` env vars
pub fn load_app_config_from(path: &str) -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_app_config_from("does/not/exist/profiler").unwrap();
        assert_eq!(config.calibration.fit_strategy, FitStrategy::BestFit);
        assert_eq!(config.calibration.polynomial_degree, 3);
        assert_eq!(config.safety.full_voltage_margin, 0.05);
        assert_eq!(config.estimator.cutoff_margin, 0.10);
        assert_eq!(config.sensor.voltage_gain, 1.0);
    }

    #[test]
    fn test_file_overrides_selected_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiler.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[calibration]
profile_name = "x1201-2s"
fit_strategy = "polynomial"
outlier_method = "z_score"

[chemistry]
name = "li-ion"
capacity_mah = 5000
series_cells = 2
max_voltage = 8.45
"#
        )
        .unwrap();

        let base = path.with_extension("");
        let config = load_app_config_from(base.to_str().unwrap()).unwrap();
        assert_eq!(config.calibration.profile_name, "x1201-2s");
        assert_eq!(config.calibration.fit_strategy, FitStrategy::Polynomial);
        assert_eq!(config.calibration.outlier_method, OutlierMethod::ZScore);
        assert_eq!(config.chemistry.capacity_mah, 5000);
        assert_eq!(config.chemistry.series_cells, 2);
        assert_eq!(config.chemistry.max_voltage, Some(8.45));
        assert_eq!(config.chemistry.min_voltage, None);
        // Untouched sections keep their defaults
        assert_eq!(config.estimator.rated_discharge_hours, 20.0);
    }
}
