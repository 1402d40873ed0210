// Error taxonomy for calibration, validation and profile storage
use crate::domain::curve::MonotonicityViolation;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("insufficient data: {distinct} distinct percentage groups, at least {required} required")]
    DataInsufficient { distinct: usize, required: usize },

    #[error("fit did not converge: {0}")]
    FitConvergence(String),

    #[error("every fit strategy failed: {}", format_failures(.0))]
    AllStrategiesFailed(Vec<StrategyFailure>),

    #[error("calibration session is closed ({0})")]
    SessionClosed(String),

    #[error("sample at {received} is older than the previous sample at {previous}")]
    OutOfOrderSample { previous: String, received: String },

    #[error(transparent)]
    ProfileValidation(#[from] ProfileValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One failed attempt inside the fit fallback chain
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyFailure {
    pub strategy: String,
    pub reason: String,
}

fn format_failures(failures: &[StrategyFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.strategy, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("profile validation failed (missing: [{}], violations: {})", .missing.join(", "), .violations.len())]
pub struct ProfileValidationError {
    pub missing: Vec<String>,
    pub violations: Vec<MonotonicityViolation>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("profile {name} is corrupt: {reason}")]
    ProfileCorrupt { name: String, reason: String },

    #[error("profile store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("curve voltage at {percentage}% must be finite and non-negative, got {voltage}")]
pub struct CurvePointError {
    pub percentage: usize,
    pub voltage: f64,
}
