// Curve fitter - percentage -> voltage fitting with ordered strategy fallback
use crate::application::charge_labeler::distinct_percentages;
use crate::domain::curve::{round_voltage, VoltageCurve};
use crate::domain::error::{CalibrationError, StrategyFailure};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_DISTINCT_PERCENTAGES: usize = 3;

/// Initial guess for (a, b, c, d) in V = a*exp(-b*x) + c*x + d, x = 100 - p
const EXPONENTIAL_INITIAL_GUESS: [f64; 4] = [0.5, 0.01, -0.01, 3.5];
const LM_INITIAL_DAMPING: f64 = 1e-3;
const LM_MAX_DAMPING: f64 = 1e12;
const LM_RELATIVE_TOLERANCE: f64 = 1e-10;
const SINGULAR_PIVOT: f64 = 1e-12;

/// Strategy preference supplied by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStrategy {
    BestFit,
    Exponential,
    Polynomial,
    Linear,
}

/// Concrete method that produced a curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    ExponentialDecay,
    Polynomial,
    LinearInterpolation,
}

impl FitMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FitMethod::ExponentialDecay => "exponential_decay",
            FitMethod::Polynomial => "polynomial",
            FitMethod::LinearInterpolation => "linear_interpolation",
        }
    }
}

impl fmt::Display for FitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FitStrategy {
    pub fn methods(&self) -> &'static [FitMethod] {
        match self {
            FitStrategy::BestFit => &[
                FitMethod::ExponentialDecay,
                FitMethod::Polynomial,
                FitMethod::LinearInterpolation,
            ],
            FitStrategy::Exponential => &[FitMethod::ExponentialDecay],
            FitStrategy::Polynomial => &[FitMethod::Polynomial],
            FitStrategy::Linear => &[FitMethod::LinearInterpolation],
        }
    }
}

#[derive(Debug, Clone)]
pub struct FittedCurve {
    pub method: FitMethod,
    pub curve: VoltageCurve,
    /// measured - predicted, in input order
    pub residuals: Vec<f64>,
}

#[derive(Debug, Clone)]
pub enum FitOutcome {
    Success(FittedCurve),
    Failure { method: FitMethod, reason: String },
}

#[derive(Debug, Clone)]
pub struct CurveFitter {
    polynomial_degree: usize,
    max_evaluations: usize,
}

impl CurveFitter {
    pub fn new(polynomial_degree: usize, max_evaluations: usize) -> Self {
        Self {
            polynomial_degree: polynomial_degree.max(1),
            max_evaluations: max_evaluations.max(1),
        }
    }

    /// `points` are (percentage, voltage) pairs
    pub fn fit(&self, points: &[(f64, f64)], strategy: FitStrategy) -> Result<FittedCurve, CalibrationError> {
        let distinct = distinct_percentages(points);
        if distinct < MIN_DISTINCT_PERCENTAGES {
            return Err(CalibrationError::DataInsufficient {
                distinct,
                required: MIN_DISTINCT_PERCENTAGES,
            });
        }

        let mut failures = Vec::new();
        for &method in strategy.methods() {
            match self.attempt(method, points) {
                FitOutcome::Success(fitted) => {
                    tracing::debug!("Curve fit succeeded with {} after {} failed attempts", method, failures.len());
                    return Ok(fitted);
                }
                FitOutcome::Failure { method, reason } => {
                    tracing::debug!("Curve fit with {} failed: {}", method, reason);
                    failures.push(StrategyFailure {
                        strategy: method.to_string(),
                        reason,
                    });
                }
            }
        }

        Err(CalibrationError::AllStrategiesFailed(failures))
    }

    pub fn attempt(&self, method: FitMethod, points: &[(f64, f64)]) -> FitOutcome {
        let result = match method {
            FitMethod::ExponentialDecay => self.fit_exponential(points),
            FitMethod::Polynomial => self.fit_polynomial(points),
            FitMethod::LinearInterpolation => fit_linear(points),
        };
        match result {
            Ok(curve) => FitOutcome::Success(FittedCurve {
                method,
                residuals: residuals(&curve, points),
                curve,
            }),
            Err(reason) => FitOutcome::Failure {
                method,
                reason: reason.to_string(),
            },
        }
    }

    fn fit_polynomial(&self, points: &[(f64, f64)]) -> Result<VoltageCurve, CalibrationError> {
        let degree = self.polynomial_degree;
        let distinct = distinct_percentages(points);
        if distinct <= degree {
            return Err(CalibrationError::FitConvergence(format!(
                "degree {degree} polynomial needs more than {degree} distinct points, got {distinct}"
            )));
        }

        // Normalised abscissa keeps the normal equations well conditioned
        let terms = degree + 1;
        let mut ata = vec![vec![0.0; terms]; terms];
        let mut atb = vec![0.0; terms];
        for &(p, v) in points {
            let x = depth_of_discharge(p) / 100.0;
            let powers: Vec<f64> = (0..terms).map(|k| x.powi(k as i32)).collect();
            for i in 0..terms {
                atb[i] += powers[i] * v;
                for j in 0..terms {
                    ata[i][j] += powers[i] * powers[j];
                }
            }
        }

        let coefficients = solve_linear_system(ata, atb)
            .ok_or_else(|| CalibrationError::FitConvergence("polynomial normal equations are singular".to_string()))?;

        build_curve(|p| {
            let x = depth_of_discharge(f64::from(p)) / 100.0;
            let v: f64 = coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c);
            v.max(0.0)
        })
    }

    /// Levenberg-Marquardt on V(x) = a*exp(-b*x) + c*x + d, bounded by `max_evaluations`
    fn fit_exponential(&self, points: &[(f64, f64)]) -> Result<VoltageCurve, CalibrationError> {
        let distinct = distinct_percentages(points);
        if distinct < EXPONENTIAL_INITIAL_GUESS.len() {
            return Err(CalibrationError::FitConvergence(format!(
                "exponential model needs at least 4 distinct points, got {distinct}"
            )));
        }

        let xs: Vec<f64> = points.iter().map(|&(p, _)| depth_of_discharge(p)).collect();
        let ys: Vec<f64> = points.iter().map(|&(_, v)| v).collect();

        let mut params = EXPONENTIAL_INITIAL_GUESS;
        let mut evaluations = 1;
        let mut sse = exponential_sse(&params, &xs, &ys);
        if !sse.is_finite() {
            return Err(CalibrationError::FitConvergence("initial guess produced non-finite residuals".to_string()));
        }
        let mut damping = LM_INITIAL_DAMPING;

        loop {
            if evaluations >= self.max_evaluations {
                return Err(CalibrationError::FitConvergence(format!(
                    "no convergence within {} function evaluations",
                    self.max_evaluations
                )));
            }

            let (jtj, jtr) = exponential_normal_equations(&params, &xs, &ys);
            evaluations += 1;

            let mut damped = jtj.clone();
            for i in 0..4 {
                damped[i][i] += damping * jtj[i][i].max(SINGULAR_PIVOT);
            }

            let Some(step) = solve_linear_system(damped, jtr.to_vec()) else {
                damping *= 10.0;
                if damping > LM_MAX_DAMPING {
                    return Err(CalibrationError::FitConvergence("normal equations are singular".to_string()));
                }
                continue;
            };

            let mut trial = params;
            for (t, s) in trial.iter_mut().zip(&step) {
                *t += s;
            }
            let trial_sse = exponential_sse(&trial, &xs, &ys);
            evaluations += 1;

            let step_norm = step.iter().map(|s| s * s).sum::<f64>().sqrt();
            let param_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();
            let small_step = step_norm <= LM_RELATIVE_TOLERANCE * (param_norm + LM_RELATIVE_TOLERANCE);

            if trial_sse.is_finite() && trial_sse < sse {
                let reduction = (sse - trial_sse) / sse.max(f64::MIN_POSITIVE);
                params = trial;
                sse = trial_sse;
                damping = (damping / 10.0).max(1e-12);
                if reduction < LM_RELATIVE_TOLERANCE || small_step || sse < 1e-18 {
                    break;
                }
            } else {
                damping *= 10.0;
                // No downhill step left at any damping: current parameters are a local minimum
                if damping > LM_MAX_DAMPING || small_step {
                    break;
                }
            }
        }

        if params.iter().any(|p| !p.is_finite()) {
            return Err(CalibrationError::FitConvergence("fit produced non-finite parameters".to_string()));
        }

        tracing::debug!(
            "Exponential fit converged after {} evaluations: a={:.4} b={:.5} c={:.5} d={:.4}",
            evaluations, params[0], params[1], params[2], params[3]
        );

        let curve_values: Vec<f64> = (0..=100u8)
            .map(|p| exponential_model(&params, depth_of_discharge(f64::from(p))))
            .collect();
        if let Some((p, v)) = curve_values.iter().enumerate().find(|(_, v)| !v.is_finite() || **v < 0.0) {
            return Err(CalibrationError::FitConvergence(format!(
                "fitted model gives invalid voltage {v} at {p}%"
            )));
        }
        build_curve(|p| curve_values[usize::from(p)])
    }
}

/// Flat-extrapolating linear interpolation over measured points
pub fn fit_linear(points: &[(f64, f64)]) -> Result<VoltageCurve, CalibrationError> {
    let measured = averaged_by_percentage(points);
    if measured.len() < 2 {
        return Err(CalibrationError::DataInsufficient {
            distinct: measured.len(),
            required: 2,
        });
    }

    let highest = measured[0];
    let lowest = measured[measured.len() - 1];

    build_curve(|p| {
        let p = f64::from(p);
        match find_bracket(&measured, p) {
            Some((high, low)) => {
                if (high.0 - low.0).abs() < f64::EPSILON {
                    high.1
                } else {
                    low.1 + (high.1 - low.1) * (p - low.0) / (high.0 - low.0)
                }
            }
            None if p > highest.0 => highest.1,
            None => lowest.1,
        }
    })
}

/// `measured` is sorted by percentage descending; returns the enclosing (high, low) pair
fn find_bracket(measured: &[(f64, f64)], p: f64) -> Option<((f64, f64), (f64, f64))> {
    if let Some(&exact) = measured.iter().find(|(mp, _)| *mp == p) {
        return Some((exact, exact));
    }
    measured
        .windows(2)
        .find(|pair| pair[0].0 >= p && p >= pair[1].0)
        .map(|pair| (pair[0], pair[1]))
}

/// Groups points by whole percentage, averages their voltages, sorts descending
fn averaged_by_percentage(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut sums = [(0.0f64, 0usize); 101];
    for &(p, v) in points {
        let slot = &mut sums[p.round().clamp(0.0, 100.0) as usize];
        slot.0 += v;
        slot.1 += 1;
    }
    sums.iter()
        .enumerate()
        .rev()
        .filter(|(_, (_, n))| *n > 0)
        .map(|(p, (sum, n))| (p as f64, sum / *n as f64))
        .collect()
}

fn build_curve(f: impl Fn(u8) -> f64) -> Result<VoltageCurve, CalibrationError> {
    VoltageCurve::from_fn(|p| round_voltage(f(p)))
        .map_err(|e| CalibrationError::FitConvergence(e.to_string()))
}

fn residuals(curve: &VoltageCurve, points: &[(f64, f64)]) -> Vec<f64> {
    points.iter().map(|&(p, v)| v - curve.voltage_at(p)).collect()
}

fn depth_of_discharge(percentage: f64) -> f64 {
    100.0 - percentage
}

fn exponential_model(params: &[f64; 4], x: f64) -> f64 {
    let [a, b, c, d] = *params;
    a * (-b * x).exp() + c * x + d
}

fn exponential_sse(params: &[f64; 4], xs: &[f64], ys: &[f64]) -> f64 {
    xs.iter()
        .zip(ys)
        .map(|(&x, &y)| (y - exponential_model(params, x)).powi(2))
        .sum()
}

/// J^T J and J^T r for the exponential model's analytic Jacobian
fn exponential_normal_equations(params: &[f64; 4], xs: &[f64], ys: &[f64]) -> (Vec<Vec<f64>>, [f64; 4]) {
    let [a, b, _, _] = *params;
    let mut jtj = vec![vec![0.0; 4]; 4];
    let mut jtr = [0.0; 4];
    for (&x, &y) in xs.iter().zip(ys) {
        let e = (-b * x).exp();
        let row = [e, -a * x * e, x, 1.0];
        let r = y - exponential_model(params, x);
        for i in 0..4 {
            jtr[i] += row[i] * r;
            for j in 0..4 {
                jtj[i][j] += row[i] * row[j];
            }
        }
    }
    (jtj, jtr)
}

/// Gaussian elimination with partial pivoting; `None` when the system is singular
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if !a[pivot][col].is_finite() || a[pivot][col].abs() < SINGULAR_PIVOT {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}
