// Application state for HTTP handlers
use crate::application::calibration_service::CalibrationService;
use crate::application::estimation_service::EstimationService;
use crate::application::profile_repository::ProfileRepository;
use crate::application::session::CalibrationSession;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct AppState {
    pub calibration_service: CalibrationService,
    pub estimation_service: EstimationService,
    pub repository: Arc<dyn ProfileRepository>,
    /// At most one open calibration session
    pub session: Mutex<Option<CalibrationSession>>,
}

impl AppState {
    pub fn new(
        repository: Arc<dyn ProfileRepository>,
        calibration_service: CalibrationService,
        estimation_service: EstimationService,
    ) -> Self {
        Self {
            calibration_service,
            estimation_service,
            repository,
            session: Mutex::new(None),
        }
    }
}
