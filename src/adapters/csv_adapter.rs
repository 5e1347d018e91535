//! Wide-format CSV price adapter.
//!
//! Header `date,<asset>,<asset>,...`, one row per trading day. An empty cell
//! is read as a missing price (NaN). No other screening is done here.

use crate::domain::error::RiskParityError;
use crate::domain::price_table::PriceTable;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;

pub struct CsvAdapter {
    path: PathBuf,
}

impl CsvAdapter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn parse(content: &str) -> Result<PriceTable, RiskParityError> {
        let mut rdr = csv::Reader::from_reader(content.as_bytes());

        let headers = rdr.headers().map_err(|e| RiskParityError::Csv {
            reason: format!("CSV header error: {}", e),
        })?;
        if headers.len() < 2 {
            return Err(RiskParityError::EmptyPriceTable);
        }
        let assets: Vec<String> = headers.iter().skip(1).map(|h| h.trim().to_string()).collect();

        let mut dates = Vec::new();
        let mut closes = Vec::new();
        for (line, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| RiskParityError::Csv {
                reason: format!("CSV parse error: {}", e),
            })?;

            let date_str = record.get(0).ok_or_else(|| RiskParityError::Csv {
                reason: "missing date column".into(),
            })?;
            let date = NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d").map_err(|e| {
                RiskParityError::Csv {
                    reason: format!("invalid date {:?} on row {}: {}", date_str, line + 1, e),
                }
            })?;

            let row = record
                .iter()
                .skip(1)
                .map(|cell| parse_price(cell, date))
                .collect::<Result<Vec<f64>, _>>()?;

            dates.push(date);
            closes.push(row);
        }

        PriceTable::new(assets, dates, closes)
    }
}

fn parse_price(cell: &str, date: NaiveDate) -> Result<f64, RiskParityError> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(f64::NAN);
    }
    cell.parse().map_err(|e| RiskParityError::Csv {
        reason: format!("invalid price {:?} on {}: {}", cell, date, e),
    })
}

impl DataPort for CsvAdapter {
    fn load_prices(&self) -> Result<PriceTable, RiskParityError> {
        let content = fs::read_to_string(&self.path).map_err(|e| RiskParityError::Csv {
            reason: format!("failed to read {}: {}", self.path.display(), e),
        })?;
        Self::parse(&content)
    }
}
