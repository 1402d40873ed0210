// Domain layer - Battery calibration models and invariants
pub mod curve;
pub mod error;
pub mod estimate;
pub mod profile;
pub mod quality;
pub mod sample;
