//! CSV report writer.
//!
//! Writes three files into the output directory: `equity_curve.csv`,
//! `rebalances.csv` (one row per executed or skipped trigger) and
//! `metrics.csv` (`metric,value` pairs).

use crate::domain::backtest::BacktestResult;
use crate::domain::error::RiskParityError;
use crate::domain::optimizer::WeightMethod;
use crate::ports::report_port::ReportPort;
use serde::Serialize;
use std::fs;
use std::path::Path;

pub const EQUITY_FILE: &str = "equity_curve.csv";
pub const REBALANCE_FILE: &str = "rebalances.csv";
pub const METRICS_FILE: &str = "metrics.csv";

#[derive(Debug, Serialize)]
struct EquityRow {
    date: String,
    equity: f64,
}

#[derive(Debug, Serialize)]
struct RebalanceRow {
    date: String,
    status: &'static str,
    trigger: &'static str,
    method: String,
    turnover: Option<f64>,
    cost: Option<f64>,
    value_before: Option<f64>,
    value_after: Option<f64>,
    window_start: String,
    window_end: String,
    dispersion: Option<f64>,
    parity_achieved: Option<bool>,
    shrinkage: Option<f64>,
    volatility_scale: Option<f64>,
    target_weights: String,
    post_weights: String,
    trades: String,
    skipped_assets: String,
    detail: String,
}

#[derive(Debug, Serialize)]
struct MetricRow {
    metric: &'static str,
    value: f64,
}

/// `asset=weight` pairs joined with `;`.
fn format_weights(assets: &[String], weights: &[f64]) -> String {
    assets
        .iter()
        .zip(weights)
        .map(|(a, w)| format!("{a}={w:.6}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// `asset=value` pairs for the assets that traded, joined with `;`.
fn format_trades(assets: &[String], trades: &[f64]) -> String {
    assets
        .iter()
        .zip(trades)
        .filter(|(_, t)| **t != 0.0)
        .map(|(a, t)| format!("{a}={t:.2}"))
        .collect::<Vec<_>>()
        .join(";")
}

fn csv_error(e: csv::Error) -> RiskParityError {
    RiskParityError::Csv {
        reason: e.to_string(),
    }
}

pub struct CsvReportAdapter;

impl CsvReportAdapter {
    fn write_equity(result: &BacktestResult, path: &Path) -> Result<(), RiskParityError> {
        let mut wtr = csv::Writer::from_path(path).map_err(csv_error)?;
        for point in &result.equity_curve {
            wtr.serialize(EquityRow {
                date: point.date.to_string(),
                equity: point.equity,
            })
            .map_err(csv_error)?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn rebalance_rows(result: &BacktestResult) -> Vec<RebalanceRow> {
        let mut rows: Vec<RebalanceRow> = result
            .rebalances
            .iter()
            .map(|e| RebalanceRow {
                date: e.date.to_string(),
                status: "executed",
                trigger: e.trigger.label(),
                method: e.method.label().to_string(),
                turnover: Some(e.turnover),
                cost: Some(e.cost),
                value_before: Some(e.value_before),
                value_after: Some(e.value_after),
                window_start: e.window_start.to_string(),
                window_end: e.window_end.to_string(),
                dispersion: Some(e.diagnostics.dispersion),
                parity_achieved: Some(e.diagnostics.parity_achieved),
                shrinkage: e.shrinkage,
                volatility_scale: Some(e.volatility_scale),
                target_weights: format_weights(&result.assets, &e.target_weights),
                post_weights: format_weights(&result.assets, &e.post_weights),
                trades: format_trades(&result.assets, &e.trades),
                skipped_assets: e.skipped_assets.join(";"),
                detail: match &e.method {
                    WeightMethod::InverseVolatilityFallback { reason } => reason.to_string(),
                    WeightMethod::RiskParity => String::new(),
                },
            })
            .collect();

        rows.extend(result.skipped.iter().map(|s| RebalanceRow {
            date: s.date.to_string(),
            status: "skipped",
            trigger: s.trigger.label(),
            method: s.reason.label().to_string(),
            turnover: None,
            cost: None,
            value_before: None,
            value_after: None,
            window_start: String::new(),
            window_end: String::new(),
            dispersion: None,
            parity_achieved: None,
            shrinkage: None,
            volatility_scale: None,
            target_weights: String::new(),
            post_weights: String::new(),
            trades: String::new(),
            skipped_assets: String::new(),
            detail: s.detail.clone(),
        }));

        rows.sort_by(|a, b| a.date.cmp(&b.date));
        rows
    }

    fn write_rebalances(result: &BacktestResult, path: &Path) -> Result<(), RiskParityError> {
        let mut wtr = csv::Writer::from_path(path).map_err(csv_error)?;
        for row in Self::rebalance_rows(result) {
            wtr.serialize(row).map_err(csv_error)?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn metric_rows(result: &BacktestResult) -> Vec<MetricRow> {
        let m = &result.metrics;
        let s = &result.summary;
        [
            ("total_return", m.total_return),
            ("annualized_return", m.annualized_return),
            ("annualized_volatility", m.annualized_volatility),
            ("sharpe_ratio", m.sharpe_ratio),
            ("sortino_ratio", m.sortino_ratio),
            ("max_drawdown", m.max_drawdown),
            ("max_drawdown_duration", m.max_drawdown_duration as f64),
            ("calmar_ratio", m.calmar_ratio),
            ("win_rate", m.win_rate),
            ("value_at_risk", m.value_at_risk),
            ("conditional_value_at_risk", m.conditional_value_at_risk),
            ("skewness", m.skewness),
            ("excess_kurtosis", m.excess_kurtosis),
            ("rebalances", s.rebalances as f64),
            ("skipped_rebalances", s.skipped as f64),
            ("fallbacks", s.fallbacks as f64),
            ("parity_unreachable", s.parity_unreachable as f64),
            ("trade_count", s.trade_count as f64),
            ("total_commission", s.total_commission),
            ("total_turnover", s.total_turnover),
            ("final_value", s.final_value),
            ("rebalance_efficiency", s.rebalance_efficiency),
        ]
        .into_iter()
        .map(|(metric, value)| MetricRow { metric, value })
        .collect()
    }

    fn write_metrics(result: &BacktestResult, path: &Path) -> Result<(), RiskParityError> {
        let mut wtr = csv::Writer::from_path(path).map_err(csv_error)?;
        for row in Self::metric_rows(result) {
            wtr.serialize(row).map_err(csv_error)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

impl ReportPort for CsvReportAdapter {
    fn write(&self, result: &BacktestResult, output_dir: &Path) -> Result<(), RiskParityError> {
        fs::create_dir_all(output_dir)?;
        Self::write_equity(result, &output_dir.join(EQUITY_FILE))?;
        Self::write_rebalances(result, &output_dir.join(REBALANCE_FILE))?;
        Self::write_metrics(result, &output_dir.join(METRICS_FILE))?;
        Ok(())
    }
}
