//! Covariance estimation with optional shrinkage.
//!
//! The sample covariance (ddof = 1) can be blended toward a structured target:
//! `shrunk = δ·F + (1 − δ)·S`. Intensity is either fixed or estimated from the
//! window in the Ledoit–Wolf manner. Near-singular results are left for the
//! optimizer to detect.

use crate::domain::returns::ReturnWindow;
use nalgebra::DMatrix;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShrinkageTarget {
    /// Average variance on the diagonal, zero elsewhere.
    ScaledIdentity,
    /// Each asset's own variance on the diagonal, zero elsewhere.
    Diagonal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShrinkageIntensity {
    Fixed(f64),
    LedoitWolf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShrinkageConfig {
    pub target: ShrinkageTarget,
    pub intensity: ShrinkageIntensity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceEstimate {
    pub matrix: DMatrix<f64>,
    /// Intensity actually applied, `None` when shrinkage is off.
    pub shrinkage: Option<f64>,
}

/// Estimate the covariance of a return window.
pub fn estimate(window: &ReturnWindow, shrinkage: Option<&ShrinkageConfig>) -> CovarianceEstimate {
    let centered = centered_returns(window);
    let sample = sample_covariance(&centered);

    let Some(config) = shrinkage else {
        return CovarianceEstimate {
            matrix: sample,
            shrinkage: None,
        };
    };

    let intensity = match config.intensity {
        ShrinkageIntensity::Fixed(delta) => delta.clamp(0.0, 1.0),
        ShrinkageIntensity::LedoitWolf => match config.target {
            ShrinkageTarget::ScaledIdentity => ledoit_wolf_identity_intensity(&centered),
            ShrinkageTarget::Diagonal => ledoit_wolf_diagonal_intensity(&centered),
        },
    };

    let target = shrinkage_target(&sample, config.target);
    let blended = &target * intensity + &sample * (1.0 - intensity);

    CovarianceEstimate {
        matrix: symmetrize(blended),
        shrinkage: Some(intensity),
    }
}

/// Demeaned T × N return matrix.
fn centered_returns(window: &ReturnWindow) -> DMatrix<f64> {
    let t = window.observations();
    let n = window.asset_count();
    let mut x = DMatrix::from_fn(t, n, |r, c| window.rows()[r][c]);
    if t == 0 {
        return x;
    }
    for c in 0..n {
        let mean = x.column(c).sum() / t as f64;
        x.column_mut(c).add_scalar_mut(-mean);
    }
    x
}

fn sample_covariance(centered: &DMatrix<f64>) -> DMatrix<f64> {
    let t = centered.nrows();
    let n = centered.ncols();
    if t < 2 {
        return DMatrix::zeros(n, n);
    }
    let cov = centered.transpose() * centered / (t as f64 - 1.0);
    symmetrize(cov)
}

fn shrinkage_target(sample: &DMatrix<f64>, target: ShrinkageTarget) -> DMatrix<f64> {
    let n = sample.nrows();
    match target {
        ShrinkageTarget::ScaledIdentity => {
            let mu = if n > 0 { sample.trace() / n as f64 } else { 0.0 };
            DMatrix::identity(n, n) * mu
        }
        ShrinkageTarget::Diagonal => DMatrix::from_diagonal(&sample.diagonal()),
    }
}

/// Ledoit–Wolf (2004) intensity toward a scaled identity, computed the way
/// scikit-learn's `ledoit_wolf_shrinkage` does.
///
/// The intensity comes from the ddof-0 moments while [`estimate`] blends the
/// ddof-1 sample toward its own average variance. The ratio is unchanged by
/// that rescaling, so the shrunk matrix is exactly `T / (T − 1)` times
/// scikit-learn's `ledoit_wolf` covariance.
pub fn ledoit_wolf_identity_intensity(centered: &DMatrix<f64>) -> f64 {
    let t = centered.nrows();
    let n = centered.ncols();
    if t == 0 || n == 0 {
        return 0.0;
    }
    let tf = t as f64;
    let nf = n as f64;

    let x2 = centered.map(|v| v * v);
    let emp_cov_trace: f64 = x2.sum() / tf;
    let mu = emp_cov_trace / nf;

    let beta_raw: f64 = (x2.transpose() * &x2).sum();
    let delta_raw: f64 = (centered.transpose() * centered).map(|v| v * v).sum() / (tf * tf);

    let beta = (beta_raw / tf - delta_raw) / (nf * tf);
    let delta = (delta_raw - 2.0 * mu * emp_cov_trace + nf * mu * mu) / nf;
    let beta = beta.min(delta);

    if beta <= 0.0 || delta <= 0.0 {
        0.0
    } else {
        (beta / delta).clamp(0.0, 1.0)
    }
}

/// Intensity for shrinking only the off-diagonal entries toward zero:
/// `Σ_{i≠j} Var(s_ij) / Σ_{i≠j} s_ij²`.
pub fn ledoit_wolf_diagonal_intensity(centered: &DMatrix<f64>) -> f64 {
    let t = centered.nrows();
    let n = centered.ncols();
    if t < 2 || n < 2 {
        return 0.0;
    }
    let tf = t as f64;

    let mut variance_sum = 0.0;
    let mut square_sum = 0.0;
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let products: Vec<f64> = (0..t)
                .map(|r| centered[(r, i)] * centered[(r, j)])
                .collect();
            let mean = products.iter().sum::<f64>() / tf;
            let spread: f64 = products.iter().map(|w| (w - mean).powi(2)).sum();
            let s_ij = tf / (tf - 1.0) * mean;

            variance_sum += tf / (tf - 1.0).powi(3) * spread;
            square_sum += s_ij * s_ij;
        }
    }

    if square_sum <= 0.0 {
        0.0
    } else {
        (variance_sum / square_sum).clamp(0.0, 1.0)
    }
}

fn symmetrize(m: DMatrix<f64>) -> DMatrix<f64> {
    (&m + m.transpose()) * 0.5
}
