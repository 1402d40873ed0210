// Fit quality domain models
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityGrade {
    Poor,
    Acceptable,
    Good,
    Excellent,
}

impl QualityGrade {
    /// Thresholds are inclusive: a score of exactly 0.90 is EXCELLENT
    pub fn from_score(score: f64) -> Self {
        if score >= 0.90 {
            QualityGrade::Excellent
        } else if score >= 0.80 {
            QualityGrade::Good
        } else if score >= 0.70 {
            QualityGrade::Acceptable
        } else {
            QualityGrade::Poor
        }
    }

    pub fn downgrade(self) -> Self {
        match self {
            QualityGrade::Excellent => QualityGrade::Good,
            QualityGrade::Good => QualityGrade::Acceptable,
            QualityGrade::Acceptable | QualityGrade::Poor => QualityGrade::Poor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityGrade::Excellent => "EXCELLENT",
            QualityGrade::Good => "GOOD",
            QualityGrade::Acceptable => "ACCEPTABLE",
            QualityGrade::Poor => "POOR",
        }
    }
}

impl fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityGrade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EXCELLENT" => Ok(QualityGrade::Excellent),
            "GOOD" => Ok(QualityGrade::Good),
            "ACCEPTABLE" => Ok(QualityGrade::Acceptable),
            "POOR" => Ok(QualityGrade::Poor),
            other => Err(format!("unknown quality grade {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub r_squared: f64,
    pub rmse: f64,
    pub coverage_score: f64,
    pub temperature_stability: f64,
    pub composite_score: f64,
    pub grade: QualityGrade,
    pub sample_count: usize,
    #[serde(default)]
    pub outliers_removed: usize,
}
