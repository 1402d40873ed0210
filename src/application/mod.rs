// Application layer - Calibration and estimation use cases
pub mod calibration_service;
pub mod charge_labeler;
pub mod compensation;
pub mod curve_fitter;
pub mod estimation_service;
pub mod outlier_filter;
pub mod profile_generator;
pub mod profile_repository;
pub mod quality_assessor;
pub mod runtime_estimator;
pub mod session;
