//! Risk-parity weight optimization.
//!
//! Minimises the dispersion of risk contributions
//! `RC_i = w_i (Σw)_i / wᵀΣw` over long-only, fully-invested weights, subject
//! to optional class constraints.
//!
//! The solve has two stages. Cyclic coordinate descent on the convex program
//! `min ½ yᵀΣy − (1/N) Σ ln y_i` gives the unconstrained equal-risk point,
//! which is strictly positive for any positive definite Σ. That point, projected
//! onto the constraint set, seeds a damped Gauss–Newton SQP: every iteration
//! linearises `RC − 1/N` and solves the resulting QP over the linearised
//! feasible region with a primal active-set method.
//!
//! A singular covariance matrix, an empty feasible region or a failure to
//! converge all fall back to inverse-volatility weights. The fallback is
//! logged and recorded in [`WeightMethod`].

use crate::domain::error::OptimizerError;
use crate::domain::metrics::TRADING_DAYS_PER_YEAR;
use crate::domain::universe::{AssetUniverse, LinearConstraint};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use tracing::{debug, info, warn};

/// Weights below this are reported as a numerical problem before clipping.
pub const NEGATIVE_WEIGHT_TOLERANCE: f64 = 1e-8;
/// Allowed deviation of the weight sum from 1.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

const EIGENVALUE_FLOOR: f64 = 1e-12;
const VOLATILITY_FLOOR: f64 = 1e-10;
const DAMPING_START: f64 = 1e-10;
const DAMPING_FLOOR: f64 = 1e-12;
const DAMPING_CEILING: f64 = 1e8;
const DAMPING_FOR_STALL_TEST: f64 = 1e-6;
const STEP_EPS: f64 = 1e-13;
const MULTIPLIER_EPS: f64 = 1e-12;
const FEASIBILITY_TOLERANCE: f64 = 1e-9;
const PROJECTION_SWEEPS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerSettings {
    pub max_iterations: usize,
    /// Stopping tolerance on the dispersion objective.
    pub tolerance: f64,
    /// Dispersion at or below which parity counts as achieved.
    pub parity_tolerance: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        OptimizerSettings {
            max_iterations: 200,
            tolerance: 1e-10,
            parity_tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WeightMethod {
    RiskParity,
    InverseVolatilityFallback { reason: OptimizerError },
}

impl WeightMethod {
    pub fn is_fallback(&self) -> bool {
        matches!(self, WeightMethod::InverseVolatilityFallback { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            WeightMethod::RiskParity => "risk_parity",
            WeightMethod::InverseVolatilityFallback { .. } => "inverse_volatility",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskParityDiagnostics {
    pub risk_contributions: Vec<f64>,
    /// Population standard deviation of the risk contributions.
    pub dispersion: f64,
    /// Largest `|RC_i − 1/N|`.
    pub max_deviation: f64,
    pub iterations: usize,
    pub converged: bool,
    pub parity_achieved: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedWeights {
    pub weights: Vec<f64>,
    pub method: WeightMethod,
    pub diagnostics: RiskParityDiagnostics,
}

/// Output of a successful solve, before diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub weights: Vec<f64>,
    pub iterations: usize,
}

#[derive(Debug, Clone)]
pub struct RiskParityOptimizer {
    settings: OptimizerSettings,
    constraints: Vec<LinearConstraint>,
}

impl RiskParityOptimizer {
    pub fn new(settings: OptimizerSettings, constraints: Vec<LinearConstraint>) -> Self {
        Self {
            settings,
            constraints,
        }
    }

    pub fn unconstrained(settings: OptimizerSettings) -> Self {
        Self::new(settings, Vec::new())
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    /// Target weights for `cov`, falling back to inverse volatility when the
    /// risk-parity solve fails.
    pub fn optimize(&self, cov: &DMatrix<f64>) -> OptimizedWeights {
        match self.solve(cov) {
            Ok(solution) => {
                let weights = clip_and_normalize(&solution.weights);
                let diagnostics = self.diagnose(&weights, cov, solution.iterations, true);
                if !diagnostics.parity_achieved && !self.constraints.is_empty() {
                    info!(
                        dispersion = diagnostics.dispersion,
                        max_deviation = diagnostics.max_deviation,
                        "equal risk contribution unreachable under allocation constraints"
                    );
                }
                OptimizedWeights {
                    weights,
                    method: WeightMethod::RiskParity,
                    diagnostics,
                }
            }
            Err(reason) => {
                warn!(%reason, "risk parity failed, using inverse-volatility weights");
                let iterations = match reason {
                    OptimizerError::NotConverged { iterations, .. } => iterations,
                    _ => 0,
                };
                let weights = clip_and_normalize(&inverse_volatility_weights(cov));
                let diagnostics = self.diagnose(&weights, cov, iterations, false);
                OptimizedWeights {
                    weights,
                    method: WeightMethod::InverseVolatilityFallback { reason },
                    diagnostics,
                }
            }
        }
    }

    /// Run the SQP solve without any fallback.
    pub fn solve(&self, cov: &DMatrix<f64>) -> Result<Solution, OptimizerError> {
        let n = cov.nrows();
        check_covariance(cov)?;

        let mut inequalities: Vec<LinearConstraint> = (0..n)
            .map(|i| {
                let mut coefficients = vec![0.0; n];
                coefficients[i] = 1.0;
                LinearConstraint {
                    coefficients,
                    bound: 0.0,
                }
            })
            .collect();
        inequalities.extend(self.constraints.iter().cloned());

        if n == 1 {
            return Ok(Solution {
                weights: vec![1.0],
                iterations: 0,
            });
        }

        let handoff = (self.settings.parity_tolerance * 1e-2).max(self.settings.tolerance);
        let (start, sweeps) = equal_risk_start(cov, self.settings.max_iterations, handoff);
        let mut w = feasible_start(start, &self.constraints)?;

        let mut f = objective(&w, cov);
        let mut dispersion = (f / n as f64).sqrt();
        let mut damping = DAMPING_START;

        for iteration in (sweeps + 1)..=self.settings.max_iterations {
            if dispersion <= self.settings.tolerance {
                return Ok(Solution {
                    weights: w,
                    iterations: iteration - 1,
                });
            }

            let (residuals, jacobian) = residuals_and_jacobian(&w, cov);
            let jt = jacobian.transpose();
            let gram = &jt * &jacobian;
            let gradient = &jt * &residuals;

            let accepted = loop {
                let h = &gram + DMatrix::identity(n, n) * damping;
                let Some(step) = solve_qp_step(&h, &gradient, &w, &inequalities) else {
                    return Err(OptimizerError::NotConverged {
                        iterations: iteration,
                        dispersion,
                    });
                };

                if step.iter().all(|d| d.abs() <= STEP_EPS) {
                    break None;
                }

                let candidate: Vec<f64> = w
                    .iter()
                    .zip(&step)
                    .map(|(x, d)| (x + d).max(0.0))
                    .collect();
                let f_candidate = objective(&candidate, cov);

                if f_candidate.is_finite() && f_candidate < f {
                    damping = (damping / 10.0).max(DAMPING_FLOOR);
                    break Some((candidate, f_candidate));
                }

                damping *= 10.0;
                if damping > DAMPING_CEILING {
                    break None;
                }
            };

            let Some((candidate, f_candidate)) = accepted else {
                debug!(iteration, dispersion, "risk parity stationary point reached");
                return self.accept(w, iteration, dispersion);
            };

            let next_dispersion = (f_candidate / n as f64).sqrt();
            let improvement = dispersion - next_dispersion;
            w = candidate;
            f = f_candidate;
            dispersion = next_dispersion;

            if improvement < self.settings.tolerance && damping <= DAMPING_FOR_STALL_TEST {
                debug!(iteration, dispersion, "risk parity objective converged");
                return self.accept(w, iteration, dispersion);
            }
        }

        if dispersion <= self.settings.tolerance {
            return Ok(Solution {
                weights: w,
                iterations: self.settings.max_iterations.max(sweeps),
            });
        }

        Err(OptimizerError::NotConverged {
            iterations: self.settings.max_iterations,
            dispersion,
        })
    }

    /// A stationary point counts as a solution unless the problem is
    /// unconstrained, where equal risk is always reachable and anything short
    /// of it is a stalled solve.
    fn accept(
        &self,
        weights: Vec<f64>,
        iterations: usize,
        dispersion: f64,
    ) -> Result<Solution, OptimizerError> {
        if self.constraints.is_empty() && dispersion > self.settings.parity_tolerance {
            return Err(OptimizerError::NotConverged {
                iterations,
                dispersion,
            });
        }
        Ok(Solution {
            weights,
            iterations,
        })
    }

    fn diagnose(
        &self,
        weights: &[f64],
        cov: &DMatrix<f64>,
        iterations: usize,
        converged: bool,
    ) -> RiskParityDiagnostics {
        let risk_contributions = risk_contributions(weights, cov);
        let dispersion = population_std(&risk_contributions);
        let target = 1.0 / weights.len().max(1) as f64;
        let max_deviation = risk_contributions
            .iter()
            .map(|rc| (rc - target).abs())
            .fold(0.0, f64::max);

        RiskParityDiagnostics {
            parity_achieved: converged && dispersion <= self.settings.parity_tolerance,
            risk_contributions,
            dispersion,
            max_deviation,
            iterations,
            converged,
        }
    }
}

/// Share of portfolio variance attributable to each asset. Sums to 1 unless
/// the portfolio variance is zero, in which case every entry is 0.
pub fn risk_contributions(weights: &[f64], cov: &DMatrix<f64>) -> Vec<f64> {
    let w = DVector::from_column_slice(weights);
    let marginal = cov * &w;
    let variance = w.dot(&marginal);
    if !(variance > 0.0) {
        return vec![0.0; weights.len()];
    }
    weights
        .iter()
        .zip(marginal.iter())
        .map(|(wi, mi)| wi * mi / variance)
        .collect()
}

/// `w_i ∝ 1/σ_i`, volatilities floored so a zero-variance asset cannot divide
/// by zero.
pub fn inverse_volatility_weights(cov: &DMatrix<f64>) -> Vec<f64> {
    let inverse: Vec<f64> = cov
        .diagonal()
        .iter()
        .map(|&var| 1.0 / var.max(0.0).sqrt().max(VOLATILITY_FLOOR))
        .collect();
    let total: f64 = inverse.iter().sum();
    inverse.iter().map(|v| v / total).collect()
}

/// Clip negatives to zero and renormalise to a unit sum.
pub fn clip_and_normalize(weights: &[f64]) -> Vec<f64> {
    let clipped: Vec<f64> = weights
        .iter()
        .map(|&w| {
            if w < -NEGATIVE_WEIGHT_TOLERANCE {
                warn!(weight = w, "negative weight clipped to zero");
            }
            if w.is_finite() { w.max(0.0) } else { 0.0 }
        })
        .collect();

    let total: f64 = clipped.iter().sum();
    if !(total > 0.0) {
        let n = weights.len().max(1) as f64;
        return vec![1.0 / n; weights.len()];
    }
    clipped.iter().map(|w| w / total).collect()
}

/// Total risk contribution per asset class, in class-name order. Untagged
/// assets are not attributed to any class.
pub fn class_risk_contributions(universe: &AssetUniverse, rc: &[f64]) -> Vec<(String, f64)> {
    universe
        .class_names()
        .into_iter()
        .map(|class| {
            let total = universe
                .members(&class)
                .iter()
                .map(|&i| rc.get(i).copied().unwrap_or(0.0))
                .sum();
            (class, total)
        })
        .collect()
}

/// Weights after scaling toward a target annual volatility.
#[derive(Debug, Clone, PartialEq)]
pub struct VolatilityScaling {
    pub weights: Vec<f64>,
    /// Annualised ex-ante volatility `√(wᵀΣw · 252)` of the unscaled weights.
    pub ex_ante_volatility: f64,
    /// Multiplier applied to every weight.
    pub scale: f64,
}

/// Scale `weights` uniformly so the ex-ante volatility under `cov` (daily
/// returns) matches `target` annualised. Leverage is not allowed: if the
/// scaled weights would sum above 1 they are renormalised to 1, so the
/// stage only ever moves part of the portfolio into cash. A zero-volatility
/// portfolio is returned unchanged.
pub fn apply_volatility_target(weights: &[f64], cov: &DMatrix<f64>, target: f64) -> VolatilityScaling {
    let w = DVector::from_column_slice(weights);
    let variance = w.dot(&(cov * &w)).max(0.0);
    let ex_ante_volatility = (variance * TRADING_DAYS_PER_YEAR).sqrt();
    let total: f64 = weights.iter().sum();

    if ex_ante_volatility < VOLATILITY_FLOOR || !(total > 0.0) {
        return VolatilityScaling {
            weights: weights.to_vec(),
            ex_ante_volatility,
            scale: 1.0,
        };
    }

    let raw = target / ex_ante_volatility;
    let scale = if raw * total > 1.0 { 1.0 / total } else { raw };
    VolatilityScaling {
        weights: weights.iter().map(|x| x * scale).collect(),
        ex_ante_volatility,
        scale,
    }
}

/// Whether weights are non-negative and sum to 1 within tolerance.
pub fn check_weights(weights: &[f64]) -> bool {
    let total: f64 = weights.iter().sum();
    weights.iter().all(|&w| w >= 0.0) && (total - 1.0).abs() <= WEIGHT_SUM_TOLERANCE
}

fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

fn check_covariance(cov: &DMatrix<f64>) -> Result<(), OptimizerError> {
    let n = cov.nrows();
    if n == 0 || cov.ncols() != n || cov.iter().any(|v| !v.is_finite()) {
        return Err(OptimizerError::SingularCovariance {
            min_eigenvalue: f64::NAN,
        });
    }

    let scale = cov.amax();
    let asymmetry = (cov - cov.transpose()).amax();
    if asymmetry > 1e-12 * scale.max(f64::MIN_POSITIVE) {
        return Err(OptimizerError::SingularCovariance {
            min_eigenvalue: f64::NAN,
        });
    }

    let eigen = SymmetricEigen::new(cov.clone());
    let max = eigen.eigenvalues.max();
    let min = eigen.eigenvalues.min();
    if !(max > 0.0) || min <= EIGENVALUE_FLOOR * max {
        return Err(OptimizerError::SingularCovariance {
            min_eigenvalue: min,
        });
    }
    Ok(())
}

/// `Σ (RC_i − 1/N)²`.
fn objective(w: &[f64], cov: &DMatrix<f64>) -> f64 {
    let target = 1.0 / w.len() as f64;
    risk_contributions(w, cov)
        .iter()
        .map(|rc| (rc - target).powi(2))
        .sum()
}

/// Residuals `RC − 1/N` and their Jacobian with respect to the weights.
fn residuals_and_jacobian(w: &[f64], cov: &DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>) {
    let n = w.len();
    let wv = DVector::from_column_slice(w);
    let s = cov * &wv;
    let v = wv.dot(&s);
    let target = 1.0 / n as f64;

    let residuals = DVector::from_fn(n, |i, _| w[i] * s[i] / v - target);
    let jacobian = DMatrix::from_fn(n, n, |i, j| {
        let own = if i == j { s[i] } else { 0.0 };
        (own + w[i] * cov[(i, j)]) / v - 2.0 * w[i] * s[i] * s[j] / (v * v)
    });
    (residuals, jacobian)
}

/// Unconstrained equal-risk weights by cyclic coordinate descent on
/// `½ yᵀΣy − b Σ ln y_i`, `b = 1/N`, normalised to a unit sum.
///
/// Each coordinate update is the positive root of
/// `σ_ii y_i² + c_i y_i − b = 0` with `c_i = Σ_{j≠i} σ_ij y_j`. Stops once the
/// risk-contribution dispersion is at most `tolerance` or after `max_sweeps`
/// sweeps. Returns the weights and the sweeps used.
fn equal_risk_start(cov: &DMatrix<f64>, max_sweeps: usize, tolerance: f64) -> (Vec<f64>, usize) {
    let n = cov.nrows();
    let budget = 1.0 / n as f64;
    let mut y: Vec<f64> = (0..n)
        .map(|i| 1.0 / cov[(i, i)].sqrt().max(VOLATILITY_FLOOR))
        .collect();

    let normalized = |y: &[f64]| {
        let total: f64 = y.iter().sum();
        y.iter().map(|v| v / total).collect::<Vec<f64>>()
    };

    let mut sweeps = 0;
    while sweeps < max_sweeps {
        if population_std(&risk_contributions(&normalized(&y), cov)) <= tolerance {
            break;
        }
        sweeps += 1;
        for i in 0..n {
            let sigma = cov[(i, i)];
            let cross: f64 = (0..n)
                .filter(|&j| j != i)
                .map(|j| cov[(i, j)] * y[j])
                .sum();
            let root = (cross * cross + 4.0 * sigma * budget).sqrt();
            // same root, without cancellation when cross > 0
            y[i] = if cross > 0.0 {
                2.0 * budget / (cross + root)
            } else {
                (root - cross) / (2.0 * sigma)
            };
        }
    }
    (normalized(&y), sweeps)
}

/// `start` projected onto the feasible region with Dykstra's alternating
/// projections (half-spaces first, simplex last).
fn feasible_start(
    start: Vec<f64>,
    constraints: &[LinearConstraint],
) -> Result<Vec<f64>, OptimizerError> {
    let n = start.len();
    let mut x = start;
    if constraints.is_empty() || max_violation(&x, constraints) == 0.0 {
        return Ok(x);
    }

    let sets = constraints.len() + 1;
    let mut increments = vec![vec![0.0; n]; sets];

    for _ in 0..PROJECTION_SWEEPS {
        let before = x.clone();
        for (k, increment) in increments.iter_mut().enumerate() {
            let shifted: Vec<f64> = x.iter().zip(increment.iter()).map(|(a, b)| a + b).collect();
            let projected = if k < constraints.len() {
                project_half_space(&shifted, &constraints[k])
            } else {
                project_simplex(&shifted)
            };
            for i in 0..n {
                increment[i] = shifted[i] - projected[i];
            }
            x = projected;
        }

        let moved = x
            .iter()
            .zip(&before)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        let violation = max_violation(&x, constraints);
        if moved < 1e-15 && violation < 1e-12 {
            break;
        }
    }

    let violation = max_violation(&x, constraints);
    if violation > FEASIBILITY_TOLERANCE {
        return Err(OptimizerError::EmptyFeasibleRegion { violation });
    }
    Ok(x)
}

fn max_violation(x: &[f64], constraints: &[LinearConstraint]) -> f64 {
    constraints
        .iter()
        .map(|c| c.violation(x))
        .fold(0.0, f64::max)
}

fn project_half_space(x: &[f64], c: &LinearConstraint) -> Vec<f64> {
    let value = c.value(x);
    if value >= c.bound {
        return x.to_vec();
    }
    let norm2: f64 = c.coefficients.iter().map(|a| a * a).sum();
    if norm2 == 0.0 {
        return x.to_vec();
    }
    let scale = (c.bound - value) / norm2;
    x.iter()
        .zip(&c.coefficients)
        .map(|(xi, ai)| xi + scale * ai)
        .collect()
}

/// Euclidean projection onto `{w ≥ 0, Σw = 1}`.
fn project_simplex(x: &[f64]) -> Vec<f64> {
    let mut sorted = x.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let mut cumulative = 0.0;
    let mut theta = 0.0;
    for (j, &u) in sorted.iter().enumerate() {
        cumulative += u;
        let candidate = (cumulative - 1.0) / (j + 1) as f64;
        if u - candidate > 0.0 {
            theta = candidate;
        }
    }
    x.iter().map(|&xi| (xi - theta).max(0.0)).collect()
}

/// Primal active-set solve of
/// `min ½dᵀHd + gᵀd  s.t. 1ᵀd = 0, a_j·(w + d) ≥ b_j`,
/// starting from the feasible point `d = 0`.
fn solve_qp_step(
    h: &DMatrix<f64>,
    g: &DVector<f64>,
    w: &[f64],
    inequalities: &[LinearConstraint],
) -> Option<Vec<f64>> {
    let n = w.len();
    let ones = vec![1.0; n];
    let mut d = DVector::<f64>::zeros(n);
    let mut working: Vec<usize> = Vec::new();
    let max_iterations = 10 * (n + inequalities.len()) + 50;

    for _ in 0..max_iterations {
        let mut rows: Vec<&[f64]> = Vec::with_capacity(working.len() + 1);
        rows.push(&ones);
        rows.extend(working.iter().map(|&j| inequalities[j].coefficients.as_slice()));

        let model_gradient = h * &d + g;
        let (p, multipliers) = solve_kkt(h, &rows, &(-model_gradient))?;

        if p.amax() <= STEP_EPS {
            let most_negative = working
                .iter()
                .enumerate()
                .map(|(k, _)| (k, multipliers[k + 1]))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            match most_negative {
                Some((k, lambda)) if lambda < -MULTIPLIER_EPS => {
                    working.remove(k);
                    continue;
                }
                _ => return Some(d.iter().copied().collect()),
            }
        }

        let x: Vec<f64> = w.iter().zip(d.iter()).map(|(a, b)| a + b).collect();
        let mut alpha = 1.0;
        let mut blocking = None;
        for (j, c) in inequalities.iter().enumerate() {
            if working.contains(&j) {
                continue;
            }
            let ap: f64 = c.coefficients.iter().zip(p.iter()).map(|(a, b)| a * b).sum();
            if ap < -STEP_EPS {
                let slack = c.value(&x) - c.bound;
                let limit = (slack / -ap).max(0.0);
                if limit < alpha {
                    alpha = limit;
                    blocking = Some(j);
                }
            }
        }

        d += p * alpha;
        if let Some(j) = blocking {
            working.push(j);
        }
    }

    Some(d.iter().copied().collect())
}

/// Solve `[H  −Aᵀ; A  0] [p; λ] = [rhs; 0]`.
fn solve_kkt(
    h: &DMatrix<f64>,
    rows: &[&[f64]],
    rhs: &DVector<f64>,
) -> Option<(DVector<f64>, DVector<f64>)> {
    let n = h.nrows();
    let m = rows.len();
    let mut kkt = DMatrix::<f64>::zeros(n + m, n + m);
    kkt.view_mut((0, 0), (n, n)).copy_from(h);
    for (j, row) in rows.iter().enumerate() {
        for i in 0..n {
            kkt[(i, n + j)] = -row[i];
            kkt[(n + j, i)] = row[i];
        }
    }

    let mut b = DVector::<f64>::zeros(n + m);
    b.rows_mut(0, n).copy_from(rhs);

    let solution = kkt.lu().solve(&b)?;
    if solution.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some((
        solution.rows(0, n).into_owned(),
        solution.rows(n, m).into_owned(),
    ))
}
