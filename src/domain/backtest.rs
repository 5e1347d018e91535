//! Backtest engine and day loop.
//!
//! For every trading day in `[start_date, end_date]`: mark to market, ask the
//! scheduler, and on a trigger estimate Σ from the window ending the prior
//! day, optimize, and execute at today's close. Every day ends with an equity
//! point.

use std::borrow::Cow;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::domain::covariance;
use crate::domain::error::{RiskParityError, WindowError};
use crate::domain::execution::{ExecutionConfig, execute_rebalance};
use crate::domain::metrics::{DEFAULT_VAR_CONFIDENCE, Metrics};
use crate::domain::optimizer::{
    RiskParityDiagnostics, RiskParityOptimizer, WeightMethod, apply_volatility_target,
    class_risk_contributions,
};
use crate::domain::portfolio::{EquityPoint, Portfolio};
use crate::domain::price_table::PriceTable;
use crate::domain::returns::{ReturnWindow, prior_return_count};
use crate::domain::scheduler::{DayContext, RebalanceScheduler, RebalanceTrigger};
use crate::domain::strategy::StrategyParams;
use crate::domain::universe::{
    AssetUniverse, LinearConstraint, UniverseError, resolve_constraints,
};

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub min_trade_value: f64,
    pub risk_free_rate: f64,
    pub var_confidence: f64,
}

impl BacktestConfig {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, initial_capital: f64) -> Self {
        BacktestConfig {
            start_date,
            end_date,
            initial_capital,
            commission_rate: 0.0,
            min_trade_value: 0.0,
            risk_free_rate: 0.0,
            var_confidence: DEFAULT_VAR_CONFIDENCE,
        }
    }

    fn execution(&self) -> ExecutionConfig {
        ExecutionConfig {
            commission_rate: self.commission_rate,
            min_trade_value: self.min_trade_value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceEvent {
    pub date: NaiveDate,
    pub trigger: RebalanceTrigger,
    pub pre_weights: Vec<f64>,
    pub target_weights: Vec<f64>,
    pub post_weights: Vec<f64>,
    pub turnover: f64,
    pub cost: f64,
    pub value_before: f64,
    pub value_after: f64,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub method: WeightMethod,
    pub diagnostics: RiskParityDiagnostics,
    pub class_risk: Vec<(String, f64)>,
    /// Shrinkage intensity applied to Σ, if any.
    pub shrinkage: Option<f64>,
    /// Multiplier from volatility targeting; 1.0 when the stage is off or
    /// did not bind.
    pub volatility_scale: f64,
    /// Signed trade value per asset (buy positive), zero where nothing traded.
    pub trades: Vec<f64>,
    pub skipped_assets: Vec<String>,
}

impl RebalanceEvent {
    /// Assets actually bought or sold.
    pub fn trade_count(&self) -> usize {
        self.trades.iter().filter(|t| **t != 0.0).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InsufficientHistory,
    InvalidWindow,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::InsufficientHistory => "insufficient_history",
            SkipReason::InvalidWindow => "invalid_window",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRebalance {
    pub date: NaiveDate,
    pub trigger: RebalanceTrigger,
    pub reason: SkipReason,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub rebalances: usize,
    pub skipped: usize,
    pub fallbacks: usize,
    pub parity_unreachable: usize,
    /// Individual asset trades across all rebalances.
    pub trade_count: usize,
    pub total_commission: f64,
    pub total_turnover: f64,
    pub final_value: f64,
    pub total_return: f64,
    /// Executed share of all triggers.
    pub rebalance_efficiency: f64,
}

impl RunSummary {
    fn from_run(
        events: &[RebalanceEvent],
        skipped: &[SkippedRebalance],
        initial_capital: f64,
        final_value: f64,
    ) -> Self {
        let rebalances = events.len();
        let triggers = rebalances + skipped.len();
        RunSummary {
            rebalances,
            skipped: skipped.len(),
            fallbacks: events.iter().filter(|e| e.method.is_fallback()).count(),
            parity_unreachable: events
                .iter()
                .filter(|e| !e.method.is_fallback() && !e.diagnostics.parity_achieved)
                .count(),
            trade_count: events.iter().map(RebalanceEvent::trade_count).sum(),
            total_commission: events.iter().map(|e| e.cost).sum(),
            total_turnover: events.iter().map(|e| e.turnover).sum(),
            final_value,
            total_return: if initial_capital > 0.0 {
                final_value / initial_capital - 1.0
            } else {
                0.0
            },
            rebalance_efficiency: if triggers > 0 {
                rebalances as f64 / triggers as f64
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub strategy_name: String,
    pub assets: Vec<String>,
    pub equity_curve: Vec<EquityPoint>,
    pub rebalances: Vec<RebalanceEvent>,
    pub skipped: Vec<SkippedRebalance>,
    pub portfolio: Portfolio,
    pub summary: RunSummary,
    pub metrics: Metrics,
}

/// Run one strategy over `prices`.
///
/// `universe` fixes the asset order; when it differs from the table's the
/// table is re-projected onto it.
pub fn run_backtest(
    prices: &PriceTable,
    universe: &AssetUniverse,
    strategy: &StrategyParams,
    config: &BacktestConfig,
) -> Result<BacktestResult, RiskParityError> {
    if universe.is_empty() {
        return Err(RiskParityError::EmptyPriceTable);
    }
    let table: Cow<'_, PriceTable> = if prices.assets() == universe.assets() {
        Cow::Borrowed(prices)
    } else {
        Cow::Owned(prices.select(universe.assets())?)
    };

    let rows = constraint_rows(universe, strategy)?;
    let days = table.range_indices(config.start_date, config.end_date);
    if days.is_empty() {
        return Err(RiskParityError::NoTradingDays {
            start: config.start_date,
            end: config.end_date,
        });
    }

    info!(
        strategy = %strategy.name,
        assets = table.asset_count(),
        days = days.len(),
        lookback = strategy.lookback,
        "backtest started"
    );

    let optimizer = RiskParityOptimizer::new(strategy.optimizer, rows);
    let execution = config.execution();
    let mut scheduler = RebalanceScheduler::new(strategy.mode, strategy.lookback);
    let mut portfolio = Portfolio::new(table.assets(), config.initial_capital);
    let mut events = Vec::new();
    let mut skipped = Vec::new();

    for index in days {
        let date = table.date(index);
        let closes = table.row(index);
        portfolio.mark_to_market(date, closes);

        let weights = portfolio.weights();
        let day = DayContext {
            date,
            previous_date: index.checked_sub(1).map(|i| table.date(i)),
            available_returns: prior_return_count(index),
            current_weights: &weights,
        };

        if let Some(trigger) = scheduler.evaluate(&day) {
            match ReturnWindow::trailing(&table, index, strategy.lookback) {
                Ok(window) => {
                    let event = rebalance(
                        &mut portfolio,
                        &window,
                        date,
                        closes,
                        trigger,
                        universe,
                        strategy,
                        &optimizer,
                        &execution,
                    );
                    scheduler.record_target(&event.target_weights);
                    events.push(event);
                }
                Err(err) => {
                    warn!(%date, trigger = trigger.label(), %err, "rebalance skipped");
                    let reason = match err {
                        WindowError::InsufficientHistory { .. } => SkipReason::InsufficientHistory,
                        WindowError::InvalidPrice { .. } => SkipReason::InvalidWindow,
                    };
                    skipped.push(SkippedRebalance {
                        date,
                        trigger,
                        reason,
                        detail: err.to_string(),
                    });
                }
            }
        }

        let equity = portfolio.total_value();
        portfolio.record_equity(date, equity);
    }
    scheduler.finish();

    let final_value = portfolio.total_value();
    let summary = RunSummary::from_run(&events, &skipped, config.initial_capital, final_value);
    let metrics = Metrics::compute(
        &portfolio.equity_curve,
        config.risk_free_rate,
        config.var_confidence,
    );

    info!(
        strategy = %strategy.name,
        rebalances = summary.rebalances,
        skipped = summary.skipped,
        fallbacks = summary.fallbacks,
        final_value,
        total_return = summary.total_return,
        "backtest finished"
    );

    Ok(BacktestResult {
        strategy_name: strategy.name.clone(),
        assets: table.assets().to_vec(),
        equity_curve: portfolio.equity_curve.clone(),
        rebalances: events,
        skipped,
        portfolio,
        summary,
        metrics,
    })
}

fn constraint_rows(
    universe: &AssetUniverse,
    strategy: &StrategyParams,
) -> Result<Vec<LinearConstraint>, RiskParityError> {
    resolve_constraints(universe, &strategy.constraints).map_err(|e| {
        let key = match &e {
            UniverseError::EmptySubset { name, .. }
            | UniverseError::Syntax { name, .. }
            | UniverseError::BoundOutOfRange { name, .. } => name.clone(),
            UniverseError::UnknownAsset(_) | UniverseError::EmptyClass(_) => "assets".to_string(),
        };
        RiskParityError::ConfigInvalid {
            section: "constraints".to_string(),
            key,
            reason: e.to_string(),
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn rebalance(
    portfolio: &mut Portfolio,
    window: &ReturnWindow,
    date: NaiveDate,
    closes: &[f64],
    trigger: RebalanceTrigger,
    universe: &AssetUniverse,
    strategy: &StrategyParams,
    optimizer: &RiskParityOptimizer,
    execution: &ExecutionConfig,
) -> RebalanceEvent {
    let estimate = covariance::estimate(window, strategy.shrinkage.as_ref());
    let optimized = optimizer.optimize(&estimate.matrix);
    debug!(
        %date,
        trigger = trigger.label(),
        method = optimized.method.label(),
        dispersion = optimized.diagnostics.dispersion,
        iterations = optimized.diagnostics.iterations,
        "target weights computed"
    );

    let (target_weights, volatility_scale) = match strategy.target_volatility {
        Some(target) => {
            let scaled = apply_volatility_target(&optimized.weights, &estimate.matrix, target);
            debug!(
                %date,
                ex_ante_volatility = scaled.ex_ante_volatility,
                scale = scaled.scale,
                "volatility target applied"
            );
            (scaled.weights, scaled.scale)
        }
        None => (optimized.weights, 1.0),
    };

    let report = execute_rebalance(portfolio, date, closes, &target_weights, execution);
    let class_risk = class_risk_contributions(universe, &optimized.diagnostics.risk_contributions);

    RebalanceEvent {
        date,
        trigger,
        pre_weights: report.pre_weights,
        target_weights,
        post_weights: report.post_weights,
        turnover: report.turnover,
        cost: report.cost,
        value_before: report.value_before,
        value_after: report.value_after,
        window_start: window.first_date().unwrap_or(date),
        window_end: window.last_date().unwrap_or(date),
        method: optimized.method,
        diagnostics: optimized.diagnostics,
        class_risk,
        shrinkage: estimate.shrinkage,
        volatility_scale,
        trades: report.trades,
        skipped_assets: report.skipped_assets,
    }
}
