// Repository trait for battery profile persistence
use crate::application::curve_fitter::FitMethod;
use crate::domain::curve::VoltageCurve;
use crate::domain::error::StoreError;
use crate::domain::profile::BatteryProfile;
use crate::domain::quality::QualityReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A profile together with the immutable record name it was stored under
#[derive(Debug, Clone, PartialEq)]
pub struct StoredProfile {
    pub record_name: String,
    pub profile: BatteryProfile,
}

/// Audit trail written next to every persisted profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub profile_name: String,
    pub record_name: String,
    pub calibration_date: DateTime<Utc>,
    pub sample_count: usize,
    pub quality_metrics: QualityReport,
    pub voltage_curve: VoltageCurve,
    pub chemistry: String,
    pub capacity_mah: u32,
    pub fit_method: FitMethod,
    pub sampling_interval_seconds: f64,
    pub duration_seconds: f64,
    pub outliers_removed: usize,
    pub repaired_violations: usize,
    pub aborted: bool,
}

pub trait ProfileRepository: Send + Sync {
    /// Persists a new immutable record and returns its name
    fn save(&self, profile_name: &str, profile: &BatteryProfile) -> Result<String, StoreError>;

    /// Record names, oldest first
    fn list(&self) -> Result<Vec<String>, StoreError>;

    fn load(&self, record_name: &str) -> Result<StoredProfile, StoreError>;

    /// Most recent record saved under `profile_name`
    fn load_latest(&self, profile_name: &str) -> Result<StoredProfile, StoreError>;

    /// Every readable record; corrupt ones are skipped
    fn load_all(&self) -> Result<Vec<StoredProfile>, StoreError>;

    fn save_calibration_record(&self, record: &CalibrationRecord) -> Result<(), StoreError>;
}
