// Estimation service - Use case for runtime queries against the active profile
use crate::application::compensation::{compensate_for_profile, SensorCorrection};
use crate::application::profile_generator::ProfileGenerator;
use crate::application::profile_repository::{ProfileRepository, StoredProfile};
use crate::application::runtime_estimator::{within_derating_range, RuntimeEstimator};
use crate::domain::error::CalibrationError;
use crate::domain::estimate::RuntimeEstimate;
use crate::domain::profile::BatteryProfile;
use crate::domain::sample::PowerState;
use crate::infrastructure::config::AppConfig;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Everything a query needs, swapped as one unit
#[derive(Debug, Clone, Serialize)]
pub struct ProfileContext {
    pub profile_name: String,
    /// `None` for the built-in fallback
    pub record_name: Option<String>,
    pub profile: BatteryProfile,
    pub loaded_at: DateTime<Utc>,
}

impl ProfileContext {
    pub fn is_fallback(&self) -> bool {
        self.record_name.is_none()
    }
}

#[derive(Clone)]
pub struct EstimationService {
    repository: Arc<dyn ProfileRepository>,
    active: Arc<ArcSwap<ProfileContext>>,
    estimator: RuntimeEstimator,
    correction: SensorCorrection,
    tolerance: f64,
}

impl EstimationService {
    /// Starts out serving the built-in fallback profile
    pub fn new(repository: Arc<dyn ProfileRepository>, config: &AppConfig) -> Result<Self, CalibrationError> {
        let tolerance = config.calibration.monotonicity_tolerance;
        let fallback = ProfileGenerator::new(config.chemistry.clone(), config.safety.clone(), tolerance)
            .fallback_profile()?;
        let context = ProfileContext {
            profile_name: config.chemistry.name.clone(),
            record_name: None,
            profile: fallback,
            loaded_at: Utc::now(),
        };

        Ok(Self {
            repository,
            active: Arc::new(ArcSwap::from_pointee(context)),
            estimator: RuntimeEstimator::new(config.estimator.clone()),
            correction: SensorCorrection::from(&config.sensor),
            tolerance,
        })
    }

    pub fn active(&self) -> Arc<ProfileContext> {
        self.active.load_full()
    }

    /// Swaps in the newest record stored under `profile_name`
    pub fn reload(&self, profile_name: &str) -> Result<Arc<ProfileContext>, CalibrationError> {
        let result = self.repository.load_latest(profile_name).map_err(CalibrationError::from);
        self.install(profile_name, result)
    }

    /// Swaps in one specific record
    pub fn activate(&self, record_name: &str) -> Result<Arc<ProfileContext>, CalibrationError> {
        let profile_name = record_name
            .rsplit_once('_')
            .map(|(name, _)| name)
            .unwrap_or(record_name)
            .to_string();
        let result = self.repository.load(record_name).map_err(CalibrationError::from);
        self.install(&profile_name, result)
    }

    fn install(
        &self,
        profile_name: &str,
        loaded: Result<StoredProfile, CalibrationError>,
    ) -> Result<Arc<ProfileContext>, CalibrationError> {
        let stored = loaded
            .and_then(|stored| {
                stored.profile.validate(self.tolerance)?;
                Ok(stored)
            })
            .inspect_err(|e| {
                tracing::warn!(
                    "Profile reload for {} failed, keeping {}: {}",
                    profile_name,
                    self.active.load().profile_name,
                    e
                )
            })?;

        let context = Arc::new(ProfileContext {
            profile_name: profile_name.to_string(),
            record_name: Some(stored.record_name),
            profile: stored.profile,
            loaded_at: Utc::now(),
        });
        self.active.store(context.clone());
        tracing::info!(
            "Active profile is now {} (grade {})",
            context.record_name.as_deref().unwrap_or(profile_name),
            context.profile.grade()
        );
        Ok(context)
    }

    /// Corrects and compensates the reading, looks up state of charge on the
    /// active curve, then projects runtime only when the power state is discharging
    pub fn estimate(&self, raw_voltage: f64, raw_current: f64, raw_temperature: f64) -> RuntimeEstimate {
        let context = self.active.load();
        let profile = &context.profile;

        let voltage = self.correction.voltage(raw_voltage);
        let current = self.correction.current(raw_current);
        let compensated = compensate_for_profile(voltage, raw_temperature, profile);
        let percentage = profile.voltage_curve.percentage_for(compensated);

        let power_state = PowerState::from_current(current);
        let estimated_minutes = match power_state {
            PowerState::Discharging => self
                .estimator
                .estimate_minutes(profile, percentage, current, raw_temperature),
            PowerState::Charging | PowerState::Idle => None,
        };

        let mut confidence_grade = profile.grade();
        if !within_derating_range(raw_temperature) {
            confidence_grade = confidence_grade.downgrade();
        }

        tracing::debug!(
            "Estimate: {:.3}V -> {:.3}V compensated -> {:.1}% at {:.0}mA",
            raw_voltage,
            compensated,
            percentage,
            current
        );

        RuntimeEstimate {
            percentage,
            estimated_minutes,
            confidence_grade,
            power_state,
        }
    }
}
