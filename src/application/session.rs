// Calibration session - the sample store for one calibration run
use crate::domain::error::CalibrationError;
use crate::domain::sample::{Sample, SensorReading};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Collecting,
    Completed,
    Aborted,
    TimedOut,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Collecting => "collecting",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
            SessionState::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct CalibrationSession {
    chemistry: String,
    series_cells: u32,
    parallel_groups: u32,
    samples: Vec<Sample>,
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    timeout: Option<Duration>,
}

impl CalibrationSession {
    pub fn new(chemistry: impl Into<String>, series_cells: u32, parallel_groups: u32) -> Self {
        Self {
            chemistry: chemistry.into(),
            series_cells,
            parallel_groups,
            samples: Vec::new(),
            state: SessionState::Collecting,
            started_at: None,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn chemistry(&self) -> &str {
        &self.chemistry
    }

    pub fn series_cells(&self) -> u32 {
        self.series_cells
    }

    pub fn parallel_groups(&self) -> u32 {
        self.parallel_groups
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Seconds between the first and last stored sample
    pub fn duration_seconds(&self) -> f64 {
        self.samples.last().map(|s| s.elapsed_seconds).unwrap_or(0.0)
    }

    pub fn ingest(&mut self, reading: SensorReading) -> Result<&Sample, CalibrationError> {
        if self.state != SessionState::Collecting {
            return Err(CalibrationError::SessionClosed(self.state.to_string()));
        }

        let started_at = *self.started_at.get_or_insert(reading.timestamp);

        if let Some(timeout) = self.timeout {
            if reading.timestamp - started_at > timeout {
                tracing::warn!(
                    "Calibration session exceeded its {}s timeout after {} samples",
                    timeout.num_seconds(),
                    self.samples.len()
                );
                self.state = SessionState::TimedOut;
                return Err(CalibrationError::SessionClosed(self.state.to_string()));
            }
        }

        if let Some(previous) = self.samples.last() {
            if reading.timestamp < previous.timestamp {
                return Err(CalibrationError::OutOfOrderSample {
                    previous: previous.timestamp.to_rfc3339(),
                    received: reading.timestamp.to_rfc3339(),
                });
            }
        }

        self.samples.push(Sample::from_reading(reading, started_at));
        Ok(&self.samples[self.samples.len() - 1])
    }

    pub fn complete(&mut self) -> Result<(), CalibrationError> {
        self.close(SessionState::Completed)
    }

    pub fn abort(&mut self) -> Result<(), CalibrationError> {
        self.close(SessionState::Aborted)
    }

    fn close(&mut self, next: SessionState) -> Result<(), CalibrationError> {
        if self.state != SessionState::Collecting {
            return Err(CalibrationError::SessionClosed(self.state.to_string()));
        }
        self.state = next;
        Ok(())
    }

    /// Read-only view of the samples stored so far, unaffected by later ingestion
    pub fn snapshot(&self) -> SampleSnapshot {
        SampleSnapshot {
            samples: Arc::from(self.samples.as_slice()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleSnapshot {
    samples: Arc<[Sample]>,
}

impl SampleSnapshot {
    /// Every call starts a fresh pass over the snapshot
    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }
}

impl<'a> IntoIterator for &'a SampleSnapshot {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
