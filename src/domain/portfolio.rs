//! Portfolio state and equity tracking.
//!
//! Positions are held in price-table column order so every weight vector the
//! ledger produces lines up with the optimizer's asset order.

use chrono::NaiveDate;
use tracing::warn;

use super::position::Position;

#[derive(Debug, Clone, PartialEq)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    pub positions: Vec<Position>,
    pub equity_curve: Vec<EquityPoint>,
}

impl Portfolio {
    pub fn new(assets: &[String], initial_capital: f64) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            positions: assets.iter().map(|a| Position::new(a)).collect(),
            equity_curve: Vec::new(),
        }
    }

    pub fn asset_count(&self) -> usize {
        self.positions.len()
    }

    pub fn get_position(&self, asset: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.asset == asset)
    }

    /// Mark every position at `prices`. Returns the indices whose price was
    /// invalid; those keep their previous mark.
    pub fn mark_to_market(&mut self, date: NaiveDate, prices: &[f64]) -> Vec<usize> {
        let mut invalid = Vec::new();
        for (i, (pos, &price)) in self.positions.iter_mut().zip(prices).enumerate() {
            if !pos.mark(price, date) {
                if !pos.is_flat() {
                    warn!(asset = %pos.asset, %date, price, "invalid mark, keeping last valid price");
                }
                invalid.push(i);
            }
        }
        invalid
    }

    pub fn position_values(&self) -> Vec<f64> {
        self.positions.iter().map(Position::market_value).collect()
    }

    pub fn total_value(&self) -> f64 {
        self.cash + self.positions.iter().map(Position::market_value).sum::<f64>()
    }

    /// Current asset weights. All zeros when the portfolio has no value.
    pub fn weights(&self) -> Vec<f64> {
        let total = self.total_value();
        if total <= 0.0 {
            return vec![0.0; self.positions.len()];
        }
        self.positions
            .iter()
            .map(|p| p.market_value() / total)
            .collect()
    }

    pub fn record_equity(&mut self, date: NaiveDate, equity: f64) {
        self.equity_curve.push(EquityPoint { date, equity });
    }
}
