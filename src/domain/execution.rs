//! Rebalance execution and cost booking.
//!
//! Trades every tradable asset to its target value at the event date's close.
//! Targets are sized on the post-cost portfolio value so cash ends near zero.
//! Assets without a valid close keep their holdings untouched.

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::portfolio::Portfolio;
use super::price_table::is_valid_price;

const COST_ITERATIONS: usize = 50;
const COST_TOLERANCE: f64 = 1e-12;

/// Configuration for rebalance execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Fraction of traded notional charged as commission.
    pub commission_rate: f64,
    /// Trades with a smaller absolute value are not executed. 0 disables.
    pub min_trade_value: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            commission_rate: 0.0,
            min_trade_value: 0.0,
        }
    }
}

/// Commission on a traded notional.
pub fn calculate_commission(traded_value: f64, config: &ExecutionConfig) -> f64 {
    config.commission_rate * traded_value
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub date: NaiveDate,
    pub pre_weights: Vec<f64>,
    pub post_weights: Vec<f64>,
    /// Signed trade value per asset (buy positive).
    pub trades: Vec<f64>,
    pub traded_value: f64,
    pub turnover: f64,
    pub cost: f64,
    pub value_before: f64,
    pub value_after: f64,
    pub skipped_assets: Vec<String>,
    /// Factor applied to tradable targets when skipped holdings leave too
    /// little capital. 1.0 when no scaling was needed.
    pub target_scale: f64,
}

/// Rebalance `portfolio` toward `targets` at `prices`.
///
/// `prices` and `targets` are in the portfolio's asset order. The portfolio is
/// expected to be marked to market for `date` already.
pub fn execute_rebalance(
    portfolio: &mut Portfolio,
    date: NaiveDate,
    prices: &[f64],
    targets: &[f64],
    config: &ExecutionConfig,
) -> ExecutionReport {
    let pre_weights = portfolio.weights();
    let value_before = portfolio.total_value();
    let current = portfolio.position_values();

    let tradable: Vec<bool> = prices.iter().map(|&p| is_valid_price(p)).collect();
    let mut skipped_assets = Vec::new();
    for (i, pos) in portfolio.positions.iter().enumerate() {
        if !tradable[i] {
            warn!(asset = %pos.asset, %date, price = prices[i], "invalid price at execution, trade skipped");
            skipped_assets.push(pos.asset.clone());
        }
    }

    let held_untradable: f64 = current
        .iter()
        .zip(&tradable)
        .filter(|(_, ok)| !**ok)
        .map(|(v, _)| v)
        .sum();
    let tradable_target_share: f64 = targets
        .iter()
        .zip(&tradable)
        .filter(|(_, ok)| **ok)
        .map(|(t, _)| t)
        .sum();

    let mut cost = 0.0;
    let mut plan = plan_trades(
        value_before,
        cost,
        &current,
        targets,
        &tradable,
        held_untradable,
        tradable_target_share,
        config,
    );
    for _ in 0..COST_ITERATIONS {
        let next_cost = calculate_commission(plan.traded_value, config);
        let converged = (next_cost - cost).abs() <= COST_TOLERANCE * value_before.abs().max(1.0);
        cost = next_cost;
        if converged {
            break;
        }
        plan = plan_trades(
            value_before,
            cost,
            &current,
            targets,
            &tradable,
            held_untradable,
            tradable_target_share,
            config,
        );
    }
    let cost = calculate_commission(plan.traded_value, config);

    for (i, pos) in portfolio.positions.iter_mut().enumerate() {
        let trade = plan.trades[i];
        if trade != 0.0 {
            pos.quantity = plan.target_values[i] / prices[i];
            pos.mark(prices[i], date);
        }
    }
    let net_bought: f64 = plan.trades.iter().sum();
    portfolio.cash -= net_bought + cost;

    let value_after = portfolio.total_value();
    let turnover = if value_before > 0.0 {
        plan.traded_value / (2.0 * value_before)
    } else {
        0.0
    };

    debug!(
        %date,
        turnover,
        cost,
        value_before,
        value_after,
        skipped = skipped_assets.len(),
        "rebalance executed"
    );

    ExecutionReport {
        date,
        pre_weights,
        post_weights: portfolio.weights(),
        trades: plan.trades,
        traded_value: plan.traded_value,
        turnover,
        cost,
        value_before,
        value_after,
        skipped_assets,
        target_scale: plan.scale,
    }
}

struct TradePlan {
    target_values: Vec<f64>,
    trades: Vec<f64>,
    traded_value: f64,
    scale: f64,
}

#[allow(clippy::too_many_arguments)]
fn plan_trades(
    value_before: f64,
    cost: f64,
    current: &[f64],
    targets: &[f64],
    tradable: &[bool],
    held_untradable: f64,
    tradable_target_share: f64,
    config: &ExecutionConfig,
) -> TradePlan {
    let investable = (value_before - cost).max(0.0);
    let wanted = investable * tradable_target_share;
    let available = (investable - held_untradable).max(0.0);
    let scale = if wanted > available && wanted > 0.0 {
        available / wanted
    } else {
        1.0
    };

    let mut target_values = current.to_vec();
    let mut trades = vec![0.0; current.len()];
    let mut traded_value = 0.0;
    for i in 0..current.len() {
        if !tradable[i] {
            continue;
        }
        let target = targets[i] * investable * scale;
        let trade = target - current[i];
        if trade.abs() < config.min_trade_value || trade == 0.0 {
            continue;
        }
        target_values[i] = target;
        trades[i] = trade;
        traded_value += trade.abs();
    }

    TradePlan {
        target_values,
        trades,
        traded_value,
        scale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn portfolio(capital: f64) -> Portfolio {
        Portfolio::new(&["A".to_string(), "B".to_string()], capital)
    }

    fn config(rate: f64) -> ExecutionConfig {
        ExecutionConfig {
            commission_rate: rate,
            min_trade_value: 0.0,
        }
    }

    #[test]
    fn commission_is_rate_times_notional() {
        assert!((calculate_commission(10000.0, &config(0.001)) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn initial_deployment_without_costs() {
        let mut p = portfolio(1000.0);
        let prices = [10.0, 20.0];
        p.mark_to_market(d(2), &prices);
        let report = execute_rebalance(&mut p, d(2), &prices, &[0.5, 0.5], &config(0.0));

        assert!((p.positions[0].quantity - 50.0).abs() < 1e-9);
        assert!((p.positions[1].quantity - 25.0).abs() < 1e-9);
        assert!(p.cash.abs() < 1e-9);
        assert!((report.turnover - 0.5).abs() < 1e-12);
        assert!(report.cost.abs() < f64::EPSILON);
    }

    #[test]
    fn value_is_conserved_net_of_cost() {
        let mut p = portfolio(1_000_000.0);
        let prices = [10.0, 20.0];
        p.mark_to_market(d(2), &prices);
        let report = execute_rebalance(&mut p, d(2), &prices, &[0.3, 0.7], &config(0.0003));

        assert!(report.cost > 0.0);
        let expected = report.value_before - report.cost;
        assert!((report.value_after - expected).abs() <= 1e-9 * report.value_before);
        assert!(p.cash.abs() < 1e-6);
        assert!(p.cash > -1e-6);
    }

    #[test]
    fn cost_is_rate_times_traded_value() {
        let mut p = portfolio(100_000.0);
        let prices = [5.0, 50.0];
        p.mark_to_market(d(2), &prices);
        let report = execute_rebalance(&mut p, d(2), &prices, &[0.4, 0.6], &config(0.001));

        assert!((report.cost - 0.001 * report.traded_value).abs() < 1e-12);
        assert!((report.turnover - report.traded_value / (2.0 * 100_000.0)).abs() < 1e-15);
    }

    #[test]
    fn invalid_price_skips_asset_and_keeps_position() {
        let mut p = portfolio(1000.0);
        let prices = [10.0, 20.0];
        p.mark_to_market(d(2), &prices);
        execute_rebalance(&mut p, d(2), &prices, &[0.5, 0.5], &config(0.0));

        let bad = [12.0, f64::NAN];
        p.mark_to_market(d(3), &bad);
        let report = execute_rebalance(&mut p, d(3), &bad, &[0.2, 0.8], &config(0.0));

        assert_eq!(report.skipped_assets, vec!["B".to_string()]);
        assert!((p.positions[1].quantity - 25.0).abs() < 1e-9);
        assert_eq!(p.positions[1].last_price, Some(20.0));
        // A gets its full 20% of the 1100 portfolio
        assert!((p.positions[0].market_value() - 220.0).abs() < 1e-9);
        assert!(p.cash >= -1e-9);
    }

    #[test]
    fn short_capital_scales_tradable_targets() {
        let mut p = portfolio(1000.0);
        let prices = [10.0, 10.0];
        p.mark_to_market(d(2), &prices);
        execute_rebalance(&mut p, d(2), &prices, &[0.2, 0.8], &config(0.0));

        // B stuck at 800 while targets ask for 50/50
        let bad = [10.0, 0.0];
        p.mark_to_market(d(3), &bad);
        let report = execute_rebalance(&mut p, d(3), &bad, &[0.5, 0.5], &config(0.0));

        assert!((report.target_scale - 0.2 / 0.5).abs() < 1e-12);
        assert!((p.positions[0].market_value() - 200.0).abs() < 1e-9);
        assert!(p.cash.abs() < 1e-9);
    }

    #[test]
    fn min_trade_value_filters_small_trades() {
        let mut p = portfolio(1000.0);
        let prices = [10.0, 10.0];
        p.mark_to_market(d(2), &prices);
        execute_rebalance(&mut p, d(2), &prices, &[0.5, 0.5], &config(0.0));

        let cfg = ExecutionConfig {
            commission_rate: 0.0,
            min_trade_value: 50.0,
        };
        let report = execute_rebalance(&mut p, d(3), &prices, &[0.52, 0.48], &cfg);
        assert_eq!(report.trades, vec![0.0, 0.0]);
        assert!((p.positions[0].quantity - 50.0).abs() < 1e-9);
    }

    #[test]
    fn turnover_of_full_swap_is_one() {
        let mut p = portfolio(1000.0);
        let prices = [10.0, 10.0];
        p.mark_to_market(d(2), &prices);
        execute_rebalance(&mut p, d(2), &prices, &[1.0, 0.0], &config(0.0));
        let report = execute_rebalance(&mut p, d(3), &prices, &[0.0, 1.0], &config(0.0));
        assert!((report.turnover - 1.0).abs() < 1e-12);
    }
}
