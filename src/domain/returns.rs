//! Trailing return windows.
//!
//! A window holds the `lookback` simple returns that end on the trading day
//! before the decision date. The decision day's own close is never part of it.

use crate::domain::error::WindowError;
use crate::domain::price_table::{PriceTable, is_valid_price};
use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnWindow {
    assets: Vec<String>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<f64>>,
}

/// Number of returns dated strictly before the row at `index`.
pub fn prior_return_count(index: usize) -> usize {
    index.saturating_sub(1)
}

/// Whether a decision on row `index` has `lookback` prior returns available.
pub fn has_history(index: usize, lookback: usize) -> bool {
    prior_return_count(index) >= lookback
}

impl ReturnWindow {
    /// Build the window for a decision taken on row `decision_index`.
    ///
    /// Uses closes from rows `decision_index - lookback - 1 ..= decision_index - 1`,
    /// giving exactly `lookback` returns whose dates all precede the decision date.
    pub fn trailing(
        table: &PriceTable,
        decision_index: usize,
        lookback: usize,
    ) -> Result<Self, WindowError> {
        let available = prior_return_count(decision_index);
        if lookback == 0 || !has_history(decision_index, lookback) {
            return Err(WindowError::InsufficientHistory {
                date: table.date(decision_index),
                available,
                required: lookback,
            });
        }

        let first = decision_index - lookback - 1;
        let last = decision_index - 1;

        for index in first..=last {
            for (asset, &price) in table.assets().iter().zip(table.row(index)) {
                if !is_valid_price(price) {
                    return Err(WindowError::InvalidPrice {
                        asset: asset.clone(),
                        date: table.date(index),
                        price,
                    });
                }
            }
        }

        let mut dates = Vec::with_capacity(lookback);
        let mut rows = Vec::with_capacity(lookback);
        for index in (first + 1)..=last {
            let prev = table.row(index - 1);
            let curr = table.row(index);
            rows.push(prev.iter().zip(curr).map(|(p, c)| c / p - 1.0).collect());
            dates.push(table.date(index));
        }

        Ok(Self {
            assets: table.assets().to_vec(),
            dates,
            rows,
        })
    }

    /// Build a window directly from return rows. Used by tests and callers that
    /// already hold returns.
    pub fn from_rows(assets: Vec<String>, dates: Vec<NaiveDate>, rows: Vec<Vec<f64>>) -> Self {
        Self {
            assets,
            dates,
            rows,
        }
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn observations(&self) -> usize {
        self.rows.len()
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn table(closes: Vec<Vec<f64>>) -> PriceTable {
        let dates = (0..closes.len()).map(|i| d(i as u32 + 1)).collect();
        PriceTable::new(vec!["A".into(), "B".into()], dates, closes).unwrap()
    }

    #[test]
    fn window_ends_the_day_before_the_decision() {
        let t = table(vec![
            vec![100.0, 10.0],
            vec![110.0, 10.0],
            vec![99.0, 11.0],
            vec![99.0, 11.0],
            vec![500.0, 1.0],
        ]);
        let w = ReturnWindow::trailing(&t, 4, 3).unwrap();

        assert_eq!(w.observations(), 3);
        assert_eq!(w.dates(), &[d(2), d(3), d(4)]);
        assert!(w.dates().iter().all(|&date| date < d(5)));
        assert!((w.rows()[0][0] - 0.10).abs() < 1e-12);
        assert!((w.rows()[1][0] - (-0.10)).abs() < 1e-12);
        assert!((w.rows()[1][1] - 0.10).abs() < 1e-12);
        assert!(w.rows()[2][0].abs() < 1e-12);
    }

    #[test]
    fn insufficient_history_reported() {
        let t = table(vec![vec![1.0, 1.0]; 4]);
        let err = ReturnWindow::trailing(&t, 3, 3).unwrap_err();
        assert_eq!(
            err,
            WindowError::InsufficientHistory {
                date: d(4),
                available: 2,
                required: 3,
            }
        );
    }

    #[test]
    fn zero_lookback_is_insufficient() {
        let t = table(vec![vec![1.0, 1.0]; 4]);
        assert!(ReturnWindow::trailing(&t, 3, 0).is_err());
    }

    #[test]
    fn invalid_price_inside_window_reported() {
        let t = table(vec![
            vec![1.0, 1.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
            vec![1.0, 1.0],
        ]);
        let err = ReturnWindow::trailing(&t, 3, 2).unwrap_err();
        assert!(matches!(err, WindowError::InvalidPrice { asset, .. } if asset == "A"));
    }

    #[test]
    fn invalid_price_on_decision_day_is_outside_window() {
        let t = table(vec![
            vec![1.0, 1.0],
            vec![1.1, 1.0],
            vec![1.2, 1.0],
            vec![-1.0, 1.0],
        ]);
        assert!(ReturnWindow::trailing(&t, 3, 2).is_ok());
    }

    #[test]
    fn history_helpers() {
        assert_eq!(prior_return_count(0), 0);
        assert_eq!(prior_return_count(5), 4);
        assert!(has_history(4, 3));
        assert!(!has_history(3, 3));
    }
}
