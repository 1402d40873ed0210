// Outlier filter - statistical rejection of anomalous voltage samples before fitting
use crate::domain::sample::LabelledSample;
use serde::Deserialize;

const IQR_FENCE: f64 = 1.5;
const Z_SCORE_LIMIT: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    Iqr,
    ZScore,
    None,
}

#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub kept: Vec<LabelledSample>,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct OutlierFilter {
    method: OutlierMethod,
}

impl OutlierFilter {
    pub fn new(method: OutlierMethod) -> Self {
        Self { method }
    }

    /// Never returns an empty set for non-empty input: if every sample would be
    /// rejected the input is returned untouched.
    pub fn filter(&self, samples: &[LabelledSample]) -> FilterOutcome {
        if samples.is_empty() {
            return FilterOutcome {
                kept: Vec::new(),
                removed: 0,
            };
        }

        let voltages: Vec<f64> = samples.iter().map(|s| s.sample.voltage).collect();
        let keep: Box<dyn Fn(f64) -> bool> = match self.method {
            OutlierMethod::Iqr => {
                let (low, high) = iqr_fences(&voltages);
                Box::new(move |v| v >= low && v <= high)
            }
            OutlierMethod::ZScore => {
                let (mean, std_dev) = mean_and_std_dev(&voltages);
                if std_dev > 0.0 {
                    Box::new(move |v| ((v - mean) / std_dev).abs() < Z_SCORE_LIMIT)
                } else {
                    Box::new(|_| true)
                }
            }
            OutlierMethod::None => Box::new(|_| true),
        };

        let kept: Vec<LabelledSample> = samples
            .iter()
            .filter(|s| keep(s.sample.voltage))
            .copied()
            .collect();

        if kept.is_empty() {
            tracing::warn!(
                "Outlier filter would reject all {} samples, keeping the original set",
                samples.len()
            );
            return FilterOutcome {
                kept: samples.to_vec(),
                removed: 0,
            };
        }

        let removed = samples.len() - kept.len();
        if removed > 0 {
            tracing::debug!("Outlier filter ({:?}) removed {} of {} samples", self.method, removed, samples.len());
        }
        FilterOutcome { kept, removed }
    }
}

fn iqr_fences(values: &[f64]) -> (f64, f64) {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    (q1 - IQR_FENCE * iqr, q3 + IQR_FENCE * iqr)
}

/// Linear interpolation between closest ranks; `sorted` must be ascending and non-empty
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let rank = q * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
}

fn mean_and_std_dev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
