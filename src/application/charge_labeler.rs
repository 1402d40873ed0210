// Charge labeler - assigns a state-of-charge percentage to every calibration sample
use crate::domain::sample::{LabelledSample, Sample};

/// Minimum charge (mAh) drawn over a session before coulomb counting is trusted
const MIN_COUNTED_CHARGE_MAH: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelBasis {
    /// Session ran full to empty; charge drawn is normalised by the total drawn
    FullDischarge,
    /// Session stopped early; charge drawn is normalised by rated capacity, assuming a full start
    RatedCapacity(u32),
}

/// Labels samples by coulomb counting (trapezoidal integration of discharge current),
/// falling back to elapsed-time fraction when no meaningful current was recorded.
/// Percentages are rounded to whole numbers.
pub fn label_samples(samples: &[Sample], basis: LabelBasis) -> Vec<LabelledSample> {
    if samples.is_empty() {
        return Vec::new();
    }

    let drawn = cumulative_charge_mah(samples);
    let total = drawn.last().copied().unwrap_or(0.0);

    let denominator = match basis {
        LabelBasis::FullDischarge => total,
        LabelBasis::RatedCapacity(capacity) => f64::from(capacity),
    };

    if total >= MIN_COUNTED_CHARGE_MAH && denominator > 0.0 {
        samples
            .iter()
            .zip(drawn)
            .map(|(sample, q)| LabelledSample {
                sample: *sample,
                percentage: (100.0 * (1.0 - q / denominator)).clamp(0.0, 100.0).round(),
            })
            .collect()
    } else {
        tracing::debug!("No usable discharge current recorded, labelling samples by elapsed time");
        label_by_elapsed_time(samples)
    }
}

fn cumulative_charge_mah(samples: &[Sample]) -> Vec<f64> {
    let mut drawn = Vec::with_capacity(samples.len());
    let mut total = 0.0;
    drawn.push(0.0);
    for pair in samples.windows(2) {
        let dt_hours = (pair[1].elapsed_seconds - pair[0].elapsed_seconds) / 3600.0;
        // Charging intervals do not give charge back to the count
        let mean_current = ((pair[0].current + pair[1].current) / 2.0).max(0.0);
        total += mean_current * dt_hours;
        drawn.push(total);
    }
    drawn
}

fn label_by_elapsed_time(samples: &[Sample]) -> Vec<LabelledSample> {
    let span = samples.last().map(|s| s.elapsed_seconds).unwrap_or(0.0);
    let count = samples.len();
    samples
        .iter()
        .enumerate()
        .map(|(i, sample)| {
            let fraction = if span > 0.0 {
                sample.elapsed_seconds / span
            } else if count > 1 {
                i as f64 / (count - 1) as f64
            } else {
                0.0
            };
            LabelledSample {
                sample: *sample,
                percentage: (100.0 * (1.0 - fraction)).clamp(0.0, 100.0).round(),
            }
        })
        .collect()
}

/// Number of distinct whole percentages among labelled points
pub fn distinct_percentages(points: &[(f64, f64)]) -> usize {
    let mut seen = [false; 101];
    for (p, _) in points {
        seen[p.round().clamp(0.0, 100.0) as usize] = true;
    }
    seen.iter().filter(|s| **s).count()
}
