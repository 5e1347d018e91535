//! Per-asset holdings.

use chrono::NaiveDate;

use super::price_table::is_valid_price;

/// Fractional holding of one asset and the last valid mark it was valued at.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub asset: String,
    pub quantity: f64,
    pub last_price: Option<f64>,
    pub last_mark_date: Option<NaiveDate>,
}

impl Position {
    pub fn new(asset: &str) -> Self {
        Position {
            asset: asset.to_string(),
            quantity: 0.0,
            last_price: None,
            last_mark_date: None,
        }
    }

    /// Value at the last valid mark. A never-marked position is worth 0.
    pub fn market_value(&self) -> f64 {
        match self.last_price {
            Some(price) => self.quantity * price,
            None => 0.0,
        }
    }

    /// Update the mark. Invalid prices leave the previous mark in place and
    /// return `false`.
    pub fn mark(&mut self, price: f64, date: NaiveDate) -> bool {
        if !is_valid_price(price) {
            return false;
        }
        self.last_price = Some(price);
        self.last_mark_date = Some(date);
        true
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn new_position_is_flat() {
        let pos = Position::new("510300");
        assert!(pos.is_flat());
        assert!(pos.market_value().abs() < f64::EPSILON);
    }

    #[test]
    fn market_value_uses_last_mark() {
        let mut pos = Position::new("510300");
        pos.quantity = 2.5;
        assert!(pos.mark(4.0, d(2)));
        assert!((pos.market_value() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_mark_keeps_previous_price() {
        let mut pos = Position::new("510300");
        pos.quantity = 10.0;
        pos.mark(4.0, d(2));

        assert!(!pos.mark(f64::NAN, d(3)));
        assert!(!pos.mark(0.0, d(4)));
        assert_eq!(pos.last_price, Some(4.0));
        assert_eq!(pos.last_mark_date, Some(d(2)));
        assert!((pos.market_value() - 40.0).abs() < f64::EPSILON);
    }
}
