//! Close-price table over a fixed asset universe.
//!
//! One row per trading day, one column per asset, in the order the assets were
//! supplied. Column order is the asset order used everywhere downstream.

use crate::domain::error::RiskParityError;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct PriceTable {
    assets: Vec<String>,
    dates: Vec<NaiveDate>,
    closes: Vec<Vec<f64>>,
    date_index: HashMap<NaiveDate, usize>,
}

impl PriceTable {
    /// Build a table, checking its shape.
    ///
    /// Dates must be strictly increasing and every row must carry one value
    /// per asset. Price values are not screened here.
    pub fn new(
        assets: Vec<String>,
        dates: Vec<NaiveDate>,
        closes: Vec<Vec<f64>>,
    ) -> Result<Self, RiskParityError> {
        if assets.is_empty() || dates.is_empty() {
            return Err(RiskParityError::EmptyPriceTable);
        }
        if dates.len() != closes.len() {
            return Err(RiskParityError::InvalidPriceTable {
                reason: format!("{} dates but {} price rows", dates.len(), closes.len()),
            });
        }

        let mut seen = HashSet::new();
        for asset in &assets {
            if !seen.insert(asset.as_str()) {
                return Err(RiskParityError::InvalidPriceTable {
                    reason: format!("duplicate asset {asset}"),
                });
            }
        }

        for (row, date) in closes.iter().zip(&dates) {
            if row.len() != assets.len() {
                return Err(RiskParityError::InvalidPriceTable {
                    reason: format!(
                        "row {date} has {} prices, expected {}",
                        row.len(),
                        assets.len()
                    ),
                });
            }
        }

        for pair in dates.windows(2) {
            if pair[1] <= pair[0] {
                return Err(RiskParityError::InvalidPriceTable {
                    reason: format!("dates not strictly increasing at {}", pair[1]),
                });
            }
        }

        let date_index = dates.iter().enumerate().map(|(i, &d)| (d, i)).collect();

        Ok(Self {
            assets,
            dates,
            closes,
            date_index,
        })
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn date(&self, index: usize) -> NaiveDate {
        self.dates[index]
    }

    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.date_index.get(&date).copied()
    }

    pub fn asset_index(&self, asset: &str) -> Option<usize> {
        self.assets.iter().position(|a| a == asset)
    }

    /// Closes for every asset on the row at `index`.
    pub fn row(&self, index: usize) -> &[f64] {
        &self.closes[index]
    }

    /// Row indices falling inside `[start, end]`.
    pub fn range_indices(&self, start: NaiveDate, end: NaiveDate) -> std::ops::Range<usize> {
        let from = self.dates.partition_point(|&d| d < start);
        let to = self.dates.partition_point(|&d| d <= end);
        from..to.max(from)
    }

    /// Restrict the table to a subset of assets, keeping the requested order.
    pub fn select(&self, assets: &[String]) -> Result<PriceTable, RiskParityError> {
        let columns = assets
            .iter()
            .map(|a| {
                self.asset_index(a)
                    .ok_or_else(|| RiskParityError::UnknownAsset { asset: a.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let closes = self
            .closes
            .iter()
            .map(|row| columns.iter().map(|&c| row[c]).collect())
            .collect();

        PriceTable::new(assets.to_vec(), self.dates.clone(), closes)
    }
}

/// A close is usable for valuation or trading only if it is finite and positive.
pub fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn sample_table() -> PriceTable {
        PriceTable::new(
            vec!["SPY".into(), "TLT".into()],
            vec![d(2), d(3), d(4), d(5)],
            vec![
                vec![100.0, 50.0],
                vec![101.0, 50.5],
                vec![102.0, 50.2],
                vec![101.5, 50.1],
            ],
        )
        .unwrap()
    }

    #[test]
    fn builds_date_index() {
        let table = sample_table();
        assert_eq!(table.len(), 4);
        assert_eq!(table.index_of(d(4)), Some(2));
        assert_eq!(table.index_of(d(6)), None);
        assert_eq!(table.row(1), &[101.0, 50.5]);
    }

    #[test]
    fn empty_table_rejected() {
        let err = PriceTable::new(vec!["SPY".into()], vec![], vec![]).unwrap_err();
        assert!(matches!(err, RiskParityError::EmptyPriceTable));

        let err = PriceTable::new(vec![], vec![d(2)], vec![vec![]]).unwrap_err();
        assert!(matches!(err, RiskParityError::EmptyPriceTable));
    }

    #[test]
    fn unordered_dates_rejected() {
        let err = PriceTable::new(
            vec!["SPY".into()],
            vec![d(3), d(2)],
            vec![vec![1.0], vec![1.0]],
        )
        .unwrap_err();
        assert!(matches!(err, RiskParityError::InvalidPriceTable { .. }));
    }

    #[test]
    fn duplicate_dates_rejected() {
        let err = PriceTable::new(
            vec!["SPY".into()],
            vec![d(3), d(3)],
            vec![vec![1.0], vec![1.0]],
        )
        .unwrap_err();
        assert!(matches!(err, RiskParityError::InvalidPriceTable { .. }));
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = PriceTable::new(
            vec!["SPY".into(), "TLT".into()],
            vec![d(2)],
            vec![vec![1.0]],
        )
        .unwrap_err();
        assert!(matches!(err, RiskParityError::InvalidPriceTable { .. }));
    }

    #[test]
    fn range_indices_inclusive() {
        let table = sample_table();
        assert_eq!(table.range_indices(d(3), d(4)), 1..3);
        assert_eq!(table.range_indices(d(1), d(31)), 0..4);
        assert!(table.range_indices(d(6), d(31)).is_empty());
    }

    #[test]
    fn select_reorders_columns() {
        let table = sample_table();
        let sub = table.select(&["TLT".to_string(), "SPY".to_string()]).unwrap();
        assert_eq!(sub.assets(), &["TLT".to_string(), "SPY".to_string()]);
        assert_eq!(sub.row(0), &[50.0, 100.0]);
    }

    #[test]
    fn select_unknown_asset_fails() {
        let err = sample_table().select(&["GLD".to_string()]).unwrap_err();
        assert!(matches!(err, RiskParityError::UnknownAsset { asset } if asset == "GLD"));
    }

    #[test]
    fn price_validity() {
        assert!(is_valid_price(1.0));
        assert!(!is_valid_price(0.0));
        assert!(!is_valid_price(-3.0));
        assert!(!is_valid_price(f64::NAN));
    }
}
