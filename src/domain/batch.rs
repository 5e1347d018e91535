//! Independent backtests run concurrently over one shared price table.

use rayon::prelude::*;
use tracing::warn;

use crate::domain::backtest::{BacktestConfig, BacktestResult, run_backtest};
use crate::domain::error::RiskParityError;
use crate::domain::price_table::PriceTable;
use crate::domain::strategy::StrategyParams;
use crate::domain::universe::AssetUniverse;

#[derive(Debug, Clone)]
pub struct BatchJob {
    pub strategy: StrategyParams,
    pub config: BacktestConfig,
}

/// Run every job on the rayon pool. Results come back in job order.
pub fn run_batch(
    prices: &PriceTable,
    universe: &AssetUniverse,
    jobs: &[BatchJob],
) -> Vec<Result<BacktestResult, RiskParityError>> {
    jobs.par_iter()
        .map(|job| {
            let result = run_backtest(prices, universe, &job.strategy, &job.config);
            if let Err(e) = &result {
                warn!(strategy = %job.strategy.name, "batch run failed: {}", e);
            }
            result
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::scheduler::{CalendarRule, RebalanceMode};
    use chrono::NaiveDate;

    fn table() -> PriceTable {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let dates = (0..50).map(|i| start + chrono::Duration::days(i)).collect();
        let closes = (0..50)
            .map(|i| {
                let t = i as f64;
                vec![100.0 + (t * 0.7).sin() * 3.0, 50.0 + (t * 1.3).cos() * 0.5 + t * 0.01]
            })
            .collect();
        PriceTable::new(vec!["EQ".into(), "BD".into()], dates, closes).unwrap()
    }

    fn job(name: &str, lookback: usize, mode: RebalanceMode, table: &PriceTable) -> BatchJob {
        BatchJob {
            strategy: StrategyParams::new(name, lookback, mode),
            config: BacktestConfig::new(table.date(0), *table.dates().last().unwrap(), 10_000.0),
        }
    }

    #[test]
    fn batch_matches_sequential_runs_in_order() {
        let prices = table();
        let universe = AssetUniverse::untagged(prices.assets().to_vec());
        let jobs = vec![
            job("weekly", 10, RebalanceMode::Periodic(CalendarRule::Weekly), &prices),
            job("drift", 15, RebalanceMode::Adaptive { threshold: 0.02 }, &prices),
            job("monthly", 5, RebalanceMode::Periodic(CalendarRule::Monthly), &prices),
        ];

        let results = run_batch(&prices, &universe, &jobs);
        assert_eq!(results.len(), 3);
        for (job, result) in jobs.iter().zip(&results) {
            let parallel = result.as_ref().unwrap();
            let sequential = run_backtest(&prices, &universe, &job.strategy, &job.config).unwrap();
            assert_eq!(parallel.strategy_name, job.strategy.name);
            assert_eq!(parallel.equity_curve, sequential.equity_curve);
            assert_eq!(parallel.rebalances, sequential.rebalances);
        }
    }

    #[test]
    fn failing_job_does_not_stop_others() {
        let prices = table();
        let universe = AssetUniverse::untagged(prices.assets().to_vec());
        let mut bad = job("bad", 10, RebalanceMode::Adaptive { threshold: 0.05 }, &prices);
        bad.config.start_date = NaiveDate::from_ymd_opt(2031, 1, 1).unwrap();
        bad.config.end_date = NaiveDate::from_ymd_opt(2031, 2, 1).unwrap();
        let good = job("good", 10, RebalanceMode::Adaptive { threshold: 0.05 }, &prices);

        let results = run_batch(&prices, &universe, &[bad, good]);
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
    }
}
