// Runtime estimate returned to CLI/LED collaborators
use crate::domain::quality::QualityGrade;
use crate::domain::sample::PowerState;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeEstimate {
    pub percentage: f64,
    /// `None` unless `power_state` is `Discharging`
    pub estimated_minutes: Option<f64>,
    pub confidence_grade: QualityGrade,
    pub power_state: PowerState,
}
