// HTTP request handlers
use crate::application::calibration_service::CalibrationReport;
use crate::application::estimation_service::ProfileContext;
use crate::application::session::{CalibrationSession, SessionState};
use crate::domain::error::{CalibrationError, StoreError};
use crate::domain::estimate::RuntimeEstimate;
use crate::domain::profile::BatteryProfile;
use crate::domain::quality::QualityGrade;
use crate::domain::sample::SensorReading;
use crate::presentation::app_state::AppState;
use crate::presentation::error::ApiError;
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct EstimateRequest {
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub series_cells: Option<u32>,
    pub parallel_groups: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SamplesRequest {
    pub samples: Vec<SensorReading>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FinishRequest {
    pub profile_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub chemistry: String,
    pub series_cells: u32,
    pub parallel_groups: u32,
    pub sample_count: usize,
    pub duration_seconds: f64,
}

impl From<&CalibrationSession> for SessionStatus {
    fn from(session: &CalibrationSession) -> Self {
        Self {
            state: session.state(),
            chemistry: session.chemistry().to_string(),
            series_cells: session.series_cells(),
            parallel_groups: session.parallel_groups(),
            sample_count: session.len(),
            duration_seconds: session.duration_seconds(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ActiveProfileSummary {
    pub profile_name: String,
    pub record_name: Option<String>,
    pub fallback: bool,
    pub chemistry: String,
    pub capacity_mah: u32,
    pub series_cells: u32,
    pub grade: QualityGrade,
    pub calibrated_at: DateTime<Utc>,
    pub loaded_at: DateTime<Utc>,
}

impl From<&ProfileContext> for ActiveProfileSummary {
    fn from(context: &ProfileContext) -> Self {
        Self {
            profile_name: context.profile_name.clone(),
            record_name: context.record_name.clone(),
            fallback: context.is_fallback(),
            chemistry: context.profile.chemistry.clone(),
            capacity_mah: context.profile.capacity_mah,
            series_cells: context.profile.series_cells,
            grade: context.profile.grade(),
            calibrated_at: context.profile.calibration_metadata.date,
            loaded_at: context.loaded_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AbortResponse {
    pub state: SessionState,
    pub discarded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<CalibrationReport>,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Stored record names, oldest first
pub async fn list_profiles(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.repository.list()?))
}

/// A record by exact name, or the newest record under a profile name
pub async fn get_profile(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<BatteryProfile>, ApiError> {
    let stored = match state.repository.load(&name) {
        Err(StoreError::ProfileNotFound(_)) => state.repository.load_latest(&name)?,
        other => other?,
    };
    Ok(Json(stored.profile))
}

pub async fn activate_profile(
    Path(name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ActiveProfileSummary>, ApiError> {
    let is_record = state.repository.list()?.contains(&name);
    let context = if is_record {
        state.estimation_service.activate(&name)?
    } else {
        state.estimation_service.reload(&name)?
    };
    Ok(Json(ActiveProfileSummary::from(context.as_ref())))
}

pub async fn active_profile(State(state): State<Arc<AppState>>) -> Json<ActiveProfileSummary> {
    let context = state.estimation_service.active();
    Json(ActiveProfileSummary::from(context.as_ref()))
}

pub async fn estimate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EstimateRequest>,
) -> Result<Json<RuntimeEstimate>, ApiError> {
    if ![request.voltage, request.current, request.temperature]
        .iter()
        .all(|v| v.is_finite())
    {
        return Err(ApiError::BadRequest("voltage, current and temperature must be finite".to_string()));
    }
    Ok(Json(state.estimation_service.estimate(
        request.voltage,
        request.current,
        request.temperature,
    )))
}

/// Opens a new session; refused while another one is still collecting
pub async fn start_calibration(
    State(state): State<Arc<AppState>>,
    body: Option<Json<StartRequest>>,
) -> Result<Json<SessionStatus>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let mut slot = state.session.lock().await;
    if slot.as_ref().is_some_and(|s| s.state() == SessionState::Collecting) {
        return Err(ApiError::SessionInProgress);
    }

    let session = state
        .calibration_service
        .start_session(request.series_cells, request.parallel_groups);
    let status = SessionStatus::from(&session);
    *slot = Some(session);
    tracing::info!(
        "Calibration session started for {} ({}S{}P)",
        status.chemistry,
        status.series_cells,
        status.parallel_groups
    );
    Ok(Json(status))
}

/// Appends readings in order; stops at the first rejected reading
pub async fn add_samples(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SamplesRequest>,
) -> Result<Json<SessionStatus>, ApiError> {
    let mut slot = state.session.lock().await;
    let session = slot.as_mut().ok_or(ApiError::NoSession)?;
    for reading in request.samples {
        session.ingest(reading)?;
    }
    Ok(Json(SessionStatus::from(&*session)))
}

pub async fn complete_calibration(
    State(state): State<Arc<AppState>>,
    body: Option<Json<FinishRequest>>,
) -> Result<Json<CalibrationReport>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let mut slot = state.session.lock().await;
    let mut session = slot.take().ok_or(ApiError::NoSession)?;
    if session.state() == SessionState::Collecting {
        session.complete()?;
    }
    let report = finalize(&state, &mut slot, session, request.profile_name).await?;
    Ok(Json(report))
}

/// Keeps a penalised best-effort profile when enough data was collected, otherwise discards the session
pub async fn abort_calibration(
    State(state): State<Arc<AppState>>,
    body: Option<Json<FinishRequest>>,
) -> Result<Json<AbortResponse>, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let mut slot = state.session.lock().await;
    let mut session = slot.take().ok_or(ApiError::NoSession)?;
    if session.state() == SessionState::Collecting {
        session.abort()?;
    }
    let closed_state = session.state();

    match finalize(&state, &mut slot, session, request.profile_name).await {
        Ok(report) => Ok(Json(AbortResponse {
            state: closed_state,
            discarded: false,
            reason: None,
            report: Some(report),
        })),
        Err(ApiError::Calibration(e @ CalibrationError::DataInsufficient { .. })) => Ok(Json(AbortResponse {
            state: closed_state,
            discarded: true,
            reason: Some(e.to_string()),
            report: None,
        })),
        Err(e) => Err(e),
    }
}

/// Fitting is CPU bound, so the pipeline runs off the async workers; the new profile is activated on success.
/// On any failure other than insufficient data the closed session goes back into `slot` for a retry.
async fn finalize(
    state: &AppState,
    slot: &mut Option<CalibrationSession>,
    session: CalibrationSession,
    profile_name: Option<String>,
) -> Result<CalibrationReport, ApiError> {
    let service = state.calibration_service.clone();
    let profile_name = profile_name.unwrap_or_else(|| service.default_profile_name().to_string());
    let (session, result) = tokio::task::spawn_blocking(move || {
        let result = service.finalize(&session, &profile_name);
        (session, result)
    })
    .await?;

    match result {
        Ok(report) => {
            // A failed activation is logged and leaves the previous profile serving
            let _ = state.estimation_service.activate(&report.record_name);
            Ok(report)
        }
        Err(e @ CalibrationError::DataInsufficient { .. }) => Err(e.into()),
        Err(e) => {
            tracing::warn!(
                "Keeping {} calibration session with {} samples after failure: {}",
                session.state(),
                session.len(),
                e
            );
            *slot = Some(session);
            Err(e.into())
        }
    }
}
