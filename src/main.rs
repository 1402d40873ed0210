// Main entry point - Dependency injection and server setup
use std::{net::SocketAddr, sync::Arc};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use battery_profiler::application::calibration_service::CalibrationService;
use battery_profiler::application::estimation_service::EstimationService;
use battery_profiler::application::profile_repository::ProfileRepository;
use battery_profiler::infrastructure::config::load_app_config;
use battery_profiler::infrastructure::file_repository::FileProfileRepository;
use battery_profiler::presentation::app_state::AppState;
use battery_profiler::presentation::handlers::{
    abort_calibration, activate_profile, active_profile, add_samples, complete_calibration, estimate, get_profile,
    health_check, list_profiles, start_calibration,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = load_app_config()?;

    // Create repository (infrastructure layer)
    let repository: Arc<dyn ProfileRepository> = Arc::new(FileProfileRepository::new(
        config.storage.profiles_dir.clone(),
        config.storage.calibrations_dir.clone(),
    )?);

    // Create services (application layer)
    let calibration_service = CalibrationService::new(repository.clone(), &config);
    let estimation_service = EstimationService::new(repository.clone(), &config)?;

    // The built-in fallback keeps serving if nothing has been calibrated yet
    if estimation_service.reload(&config.calibration.profile_name).is_err() {
        tracing::info!("No stored profile for {}, serving fallback", config.calibration.profile_name);
    }

    // Create application state
    let state = Arc::new(AppState::new(repository, calibration_service, estimation_service));

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/profiles", get(list_profiles))
        .route("/profiles/active", get(active_profile))
        .route("/profiles/:name", get(get_profile))
        .route("/profiles/:name/activate", post(activate_profile))
        .route("/estimate", post(estimate))
        .route("/calibration/start", post(start_calibration))
        .route("/calibration/samples", post(add_samples))
        .route("/calibration/complete", post(complete_calibration))
        .route("/calibration/abort", post(abort_calibration))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config.server.bind_addr.parse()?;
    tracing::info!("Starting battery-profiler service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
