#![allow(dead_code)]

use chrono::NaiveDate;
use riskparity::domain::backtest::BacktestConfig;
use riskparity::domain::price_table::PriceTable;
use riskparity::domain::scheduler::{CalendarRule, RebalanceMode};
use riskparity::domain::strategy::StrategyParams;
use riskparity::domain::universe::AssetUniverse;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Weekdays starting at `start`, `count` of them.
pub fn trading_days(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    use chrono::Datelike;
    let mut days = Vec::with_capacity(count);
    let mut d = start;
    while days.len() < count {
        if d.weekday().num_days_from_monday() < 5 {
            days.push(d);
        }
        d = d.succ_opt().unwrap();
    }
    days
}

/// Deterministic price paths with distinct volatilities and some shared
/// factor exposure, so the sample covariance is well conditioned.
pub fn synthetic_table(assets: &[&str], days: usize) -> PriceTable {
    let dates = trading_days(date(2023, 1, 2), days);
    let n = assets.len();
    let mut level = vec![100.0; n];
    let mut closes = Vec::with_capacity(days);
    for t in 0..days {
        let tf = t as f64;
        let common = (tf * 0.37).sin() * 0.004;
        for (i, price) in level.iter_mut().enumerate() {
            let fi = i as f64 + 1.0;
            let own = (tf * (0.91 + 0.53 * fi)).sin() * 0.006 * fi;
            let exposure = 1.0 - 0.3 * i as f64;
            *price *= 1.0 + 0.0002 + exposure * common + own;
        }
        closes.push(level.clone());
    }
    PriceTable::new(assets.iter().map(|a| a.to_string()).collect(), dates, closes).unwrap()
}

pub fn untagged(table: &PriceTable) -> AssetUniverse {
    AssetUniverse::untagged(table.assets().to_vec())
}

pub fn monthly_strategy(lookback: usize) -> StrategyParams {
    StrategyParams::new(
        "monthly parity",
        lookback,
        RebalanceMode::Periodic(CalendarRule::Monthly),
    )
}

pub fn full_range(table: &PriceTable, capital: f64) -> BacktestConfig {
    BacktestConfig::new(table.date(0), *table.dates().last().unwrap(), capital)
}

pub fn write_file(dir: &std::path::Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Render a table in the wide CSV layout the price adapter reads.
pub fn to_csv(table: &PriceTable) -> String {
    let mut out = String::from("date");
    for a in table.assets() {
        out.push(',');
        out.push_str(a);
    }
    out.push('\n');
    for i in 0..table.len() {
        out.push_str(&table.date(i).to_string());
        for p in table.row(i) {
            out.push_str(&format!(",{p}"));
        }
        out.push('\n');
    }
    out
}
