// Calibration service - Use case turning a closed session into a stored profile
use crate::application::charge_labeler::{label_samples, LabelBasis};
use crate::application::curve_fitter::{CurveFitter, FitMethod};
use crate::application::outlier_filter::OutlierFilter;
use crate::application::profile_generator::ProfileGenerator;
use crate::application::profile_repository::{CalibrationRecord, ProfileRepository};
use crate::application::quality_assessor::{assess, penalise, ABORTED_SESSION_PENALTY};
use crate::application::session::{CalibrationSession, SessionState};
use crate::domain::error::CalibrationError;
use crate::domain::quality::{QualityGrade, QualityReport};
use crate::infrastructure::config::{AppConfig, CalibrationSettings, ChemistrySettings};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Outcome returned to the operator once a profile has been persisted
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub profile_name: String,
    pub record_name: String,
    pub fit_method: FitMethod,
    pub grade: QualityGrade,
    pub quality: QualityReport,
    pub repaired_violations: usize,
    pub aborted: bool,
}

#[derive(Clone)]
pub struct CalibrationService {
    repository: Arc<dyn ProfileRepository>,
    settings: CalibrationSettings,
    chemistry: ChemistrySettings,
    fitter: CurveFitter,
    filter: OutlierFilter,
    generator: ProfileGenerator,
}

impl CalibrationService {
    pub fn new(repository: Arc<dyn ProfileRepository>, config: &AppConfig) -> Self {
        let settings = config.calibration.clone();
        Self {
            repository,
            fitter: CurveFitter::new(settings.polynomial_degree, settings.max_fit_evaluations),
            filter: OutlierFilter::new(settings.outlier_method),
            generator: ProfileGenerator::new(
                config.chemistry.clone(),
                config.safety.clone(),
                settings.monotonicity_tolerance,
            ),
            chemistry: config.chemistry.clone(),
            settings,
        }
    }

    pub fn default_profile_name(&self) -> &str {
        &self.settings.profile_name
    }

    /// Opens a session for the configured pack, honouring the configured timeout
    pub fn start_session(&self, series_cells: Option<u32>, parallel_groups: Option<u32>) -> CalibrationSession {
        let session = CalibrationSession::new(
            self.chemistry.name.clone(),
            series_cells.unwrap_or(self.chemistry.series_cells),
            parallel_groups.unwrap_or(self.chemistry.parallel_groups),
        );
        let timeout = i64::try_from(self.settings.session_timeout_seconds)
            .ok()
            .filter(|&secs| secs > 0)
            .and_then(Duration::try_seconds);
        match timeout {
            Some(timeout) => session.with_timeout(timeout),
            None => session,
        }
    }

    /// Runs the offline pipeline over a closed session and persists the result.
    /// Completed sessions are labelled as a full discharge; aborted and timed-out
    /// sessions produce a penalised best-effort profile against rated capacity.
    pub fn finalize(
        &self,
        session: &CalibrationSession,
        profile_name: &str,
    ) -> Result<CalibrationReport, CalibrationError> {
        let state = session.state();
        if state == SessionState::Collecting {
            return Err(CalibrationError::SessionClosed(
                "session must be completed or aborted before finalizing".to_string(),
            ));
        }
        let aborted = state != SessionState::Completed;

        let snapshot = session.snapshot();
        let basis = if aborted {
            LabelBasis::RatedCapacity(self.chemistry.capacity_mah)
        } else {
            LabelBasis::FullDischarge
        };
        let labelled = label_samples(snapshot.as_slice(), basis);
        tracing::debug!("Labelled {} samples ({:?})", labelled.len(), basis);

        let filtered = self.filter.filter(&labelled);
        tracing::debug!("Outlier filter removed {} of {} samples", filtered.removed, labelled.len());

        let points: Vec<(f64, f64)> = filtered
            .kept
            .iter()
            .map(|s| (s.percentage, s.sample.voltage))
            .collect();

        let fitted = match self.fitter.fit(&points, self.settings.fit_strategy) {
            Ok(fitted) => fitted,
            Err(e) => {
                if aborted {
                    tracing::warn!("Discarding {} calibration session: {}", state, e);
                }
                return Err(e);
            }
        };

        let mut quality = assess(&filtered.kept, &fitted.curve, filtered.removed);
        if aborted {
            quality = penalise(quality, ABORTED_SESSION_PENALTY);
        }

        let generated = self.generator.generate(
            session.chemistry(),
            session.series_cells(),
            session.parallel_groups(),
            &fitted.curve,
            &quality,
            Utc::now(),
        )?;

        let record_name = self.repository.save(profile_name, &generated.profile)?;

        let record = CalibrationRecord {
            profile_name: profile_name.to_string(),
            record_name: record_name.clone(),
            calibration_date: generated.profile.calibration_metadata.date,
            sample_count: snapshot.len(),
            quality_metrics: quality.clone(),
            voltage_curve: generated.profile.voltage_curve.clone(),
            chemistry: generated.profile.chemistry.clone(),
            capacity_mah: generated.profile.capacity_mah,
            fit_method: fitted.method,
            sampling_interval_seconds: self.settings.sampling_interval_seconds,
            duration_seconds: session.duration_seconds(),
            outliers_removed: filtered.removed,
            repaired_violations: generated.repaired.len(),
            aborted,
        };
        self.repository.save_calibration_record(&record)?;

        if quality.grade == QualityGrade::Poor {
            tracing::warn!(
                "Profile {} graded POOR (composite {:.3}); recalibration recommended",
                record_name,
                quality.composite_score
            );
        }
        tracing::info!(
            "Calibrated {} with {} from {} samples: grade {} (composite {:.3})",
            record_name,
            fitted.method,
            snapshot.len(),
            quality.grade,
            quality.composite_score
        );

        Ok(CalibrationReport {
            profile_name: profile_name.to_string(),
            record_name,
            fit_method: fitted.method,
            grade: quality.grade,
            quality,
            repaired_violations: generated.repaired.len(),
            aborted,
        })
    }
}
