// HTTP error mapping
use crate::domain::error::{CalibrationError, StoreError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    Calibration(CalibrationError),
    NoSession,
    SessionInProgress,
    BadRequest(String),
    Internal(anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Calibration(e) => match e {
                CalibrationError::DataInsufficient { .. }
                | CalibrationError::FitConvergence(_)
                | CalibrationError::AllStrategiesFailed(_)
                | CalibrationError::ProfileValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                CalibrationError::SessionClosed(_) => StatusCode::CONFLICT,
                CalibrationError::OutOfOrderSample { .. } => StatusCode::BAD_REQUEST,
                CalibrationError::Store(StoreError::ProfileNotFound(_)) => StatusCode::NOT_FOUND,
                CalibrationError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::NoSession => StatusCode::NOT_FOUND,
            ApiError::SessionInProgress => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Calibration(e) => e.to_string(),
            ApiError::NoSession => "no calibration session is open".to_string(),
            ApiError::SessionInProgress => "a calibration session is already collecting samples".to_string(),
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Internal(e) => e.to_string(),
        }
    }
}

impl From<CalibrationError> for ApiError {
    fn from(e: CalibrationError) -> Self {
        ApiError::Calibration(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Calibration(CalibrationError::Store(e))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.message());
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found: ApiError = StoreError::ProfileNotFound("x".into()).into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let closed: ApiError = CalibrationError::SessionClosed("completed".into()).into();
        assert_eq!(closed.status(), StatusCode::CONFLICT);

        let insufficient: ApiError = CalibrationError::DataInsufficient { distinct: 1, required: 3 }.into();
        assert_eq!(insufficient.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let corrupt: ApiError = StoreError::ProfileCorrupt {
            name: "x".into(),
            reason: "bad".into(),
        }
        .into();
        assert_eq!(corrupt.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
