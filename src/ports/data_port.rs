//! Price data access port trait.

use crate::domain::error::RiskParityError;
use crate::domain::price_table::PriceTable;

pub trait DataPort {
    /// Load the full close-price table.
    fn load_prices(&self) -> Result<PriceTable, RiskParityError>;

    /// Load the table restricted to `assets`, in that order.
    fn load_assets(&self, assets: &[String]) -> Result<PriceTable, RiskParityError> {
        self.load_prices()?.select(assets)
    }
}
