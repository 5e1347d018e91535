//! Performance metrics and statistics.
//!
//! Everything is computed from the equity curve alone: the first point is the
//! initial value and its daily simple returns drive the risk measures.

use super::portfolio::EquityPoint;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
pub const DEFAULT_VAR_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Largest peak-to-trough loss as a positive fraction.
    pub max_drawdown: f64,
    /// Longest run of trading days spent below a prior peak.
    pub max_drawdown_duration: i64,
    pub calmar_ratio: f64,
    pub win_rate: f64,
    /// Historical one-day VaR, a positive loss fraction.
    pub value_at_risk: f64,
    pub conditional_value_at_risk: f64,
    pub skewness: f64,
    pub excess_kurtosis: f64,
    pub trading_days: usize,
}

impl Metrics {
    pub fn compute(equity_curve: &[EquityPoint], risk_free_rate: f64, var_confidence: f64) -> Self {
        let returns = daily_returns(equity_curve);
        let n = returns.len();

        let initial = equity_curve.first().map(|p| p.equity).unwrap_or(0.0);
        let final_equity = equity_curve.last().map(|p| p.equity).unwrap_or(initial);

        let total_return = if initial > 0.0 {
            final_equity / initial - 1.0
        } else {
            0.0
        };

        let annualized_return = if n > 0 && initial > 0.0 && final_equity > 0.0 {
            (final_equity / initial).powf(TRADING_DAYS_PER_YEAR / n as f64) - 1.0
        } else {
            0.0
        };

        let annualized_volatility = sample_std(&returns) * TRADING_DAYS_PER_YEAR.sqrt();
        let excess = annualized_return - risk_free_rate;

        let sharpe_ratio = if annualized_volatility > 0.0 {
            excess / annualized_volatility
        } else {
            0.0
        };

        let downside: Vec<f64> = returns.iter().copied().filter(|&r| r < 0.0).collect();
        let downside_deviation = sample_std(&downside) * TRADING_DAYS_PER_YEAR.sqrt();
        let sortino_ratio = ratio_or_infinite(excess, downside_deviation);

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve);
        let calmar_ratio = ratio_or_infinite(annualized_return, max_drawdown.abs());

        let win_rate = if n > 0 {
            returns.iter().filter(|&&r| r > 0.0).count() as f64 / n as f64
        } else {
            0.0
        };

        let (value_at_risk, conditional_value_at_risk) = historical_var(&returns, var_confidence);
        let (skewness, excess_kurtosis) = moments(&returns);

        Metrics {
            total_return,
            annualized_return,
            annualized_volatility,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration,
            calmar_ratio,
            win_rate,
            value_at_risk,
            conditional_value_at_risk,
            skewness,
            excess_kurtosis,
            trading_days: equity_curve.len(),
        }
    }
}

/// Simple returns between consecutive equity points.
pub fn daily_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            let curr = w[1].equity;
            if prev > 0.0 {
                (curr - prev) / prev
            } else {
                0.0
            }
        })
        .collect()
}

fn ratio_or_infinite(numerator: f64, risk: f64) -> f64 {
    if risk > 0.0 {
        numerator / risk
    } else if numerator > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, i64) {
    if equity_curve.is_empty() {
        return (0.0, 0);
    }

    let mut peak = equity_curve[0].equity;
    let mut max_dd = 0.0_f64;
    let mut max_dd_duration = 0i64;
    let mut current_dd_duration = 0i64;

    for point in equity_curve {
        if point.equity >= peak {
            peak = point.equity;
            current_dd_duration = 0;
        } else if peak > 0.0 {
            let dd = (peak - point.equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
            current_dd_duration += 1;
            if current_dd_duration > max_dd_duration {
                max_dd_duration = current_dd_duration;
            }
        }
    }

    (max_dd, max_dd_duration)
}

/// Linear-interpolation quantile of sorted data.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

fn historical_var(returns: &[f64], confidence: f64) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let cutoff = quantile(&sorted, 1.0 - confidence);
    let tail: Vec<f64> = sorted.iter().copied().filter(|&r| r <= cutoff).collect();
    let tail_mean = if tail.is_empty() {
        cutoff
    } else {
        tail.iter().sum::<f64>() / tail.len() as f64
    };
    (-cutoff, -tail_mean)
}

/// Population skewness and excess kurtosis.
fn moments(returns: &[f64]) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let m2 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    if m2 <= 0.0 {
        return (0.0, 0.0);
    }
    let m3 = returns.iter().map(|r| (r - mean).powi(3)).sum::<f64>() / n;
    let m4 = returns.iter().map(|r| (r - mean).powi(4)).sum::<f64>() / n;
    (m3 / m2.powf(1.5), m4 / (m2 * m2) - 3.0)
}
