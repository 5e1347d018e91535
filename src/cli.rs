//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{self as backtest_engine, BacktestConfig, BacktestResult};
use crate::domain::config_validation::{
    parse_date, validate_backtest_config, validate_strategy_config,
};
use crate::domain::covariance::{ShrinkageConfig, ShrinkageIntensity, ShrinkageTarget};
use crate::domain::error::RiskParityError;
use crate::domain::metrics::DEFAULT_VAR_CONFIDENCE;
use crate::domain::optimizer::OptimizerSettings;
use crate::domain::scheduler::{CalendarRule, RebalanceMode};
use crate::domain::strategy::StrategyParams;
use crate::domain::universe::{AssetUniverse, parse_constraint};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "riskparity", about = "Risk-parity allocation backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Price CSV, overriding [backtest] prices
        #[arg(short, long)]
        prices: Option<PathBuf>,
        /// Directory for the CSV reports
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Install the stderr `tracing` subscriber. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            prices,
            output,
        } => run_backtest(&config, prices.as_ref(), output.as_ref()),
        Command::Validate { config } => run_validate(&config),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = RiskParityError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn report_error(e: &RiskParityError) -> ExitCode {
    eprintln!("error: {e}");
    e.into()
}

fn run_backtest(
    config_path: &Path,
    prices_override: Option<&PathBuf>,
    output_path: Option<&PathBuf>,
) -> ExitCode {
    // Stage 1: Load and validate config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    if let Err(e) = validate_backtest_config(&adapter) {
        return report_error(&e);
    }
    if let Err(e) = validate_strategy_config(&adapter) {
        return report_error(&e);
    }

    // Stage 2: Build run parameters
    let bt_config = match build_backtest_config(&adapter) {
        Ok(c) => c,
        Err(e) => return report_error(&e),
    };
    let strategy = match build_strategy(&adapter) {
        Ok(s) => s,
        Err(e) => return report_error(&e),
    };
    eprintln!("Loading strategy: {}", strategy.name);

    // Stage 3: Load prices
    let prices_path = match prices_override
        .cloned()
        .or_else(|| adapter.get_string("backtest", "prices").map(PathBuf::from))
    {
        Some(p) => p,
        None => {
            return report_error(&RiskParityError::ConfigMissing {
                section: "backtest".into(),
                key: "prices".into(),
            });
        }
    };
    eprintln!("Loading prices from {}", prices_path.display());
    let table = match CsvAdapter::new(prices_path).load_prices() {
        Ok(t) => t,
        Err(e) => return report_error(&e),
    };

    let universe = match build_universe(&adapter, table.assets()) {
        Ok(u) => u,
        Err(e) => return report_error(&e),
    };

    // Stage 4: Run
    eprintln!(
        "Running backtest: {} assets, {} to {}",
        universe.len(),
        bt_config.start_date,
        bt_config.end_date,
    );
    let result = match backtest_engine::run_backtest(&table, &universe, &strategy, &bt_config) {
        Ok(r) => r,
        Err(e) => return report_error(&e),
    };

    // Stage 5: Console summary and reports
    print_summary(&result);

    if let Some(dir) = output_path {
        if let Err(e) = CsvReportAdapter.write(&result, dir) {
            return report_error(&e);
        }
        eprintln!("\nReports written to: {}", dir.display());
    }
    ExitCode::SUCCESS
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    if let Err(e) = validate_backtest_config(&adapter) {
        return report_error(&e);
    }
    if let Err(e) = validate_strategy_config(&adapter) {
        return report_error(&e);
    }
    match build_strategy(&adapter) {
        Ok(s) => {
            eprintln!("Config validated successfully");
            eprintln!("  Strategy:    {}", s.name);
            eprintln!("  Lookback:    {}", s.lookback);
            eprintln!("  Constraints: {}", s.constraints.len());
            ExitCode::SUCCESS
        }
        Err(e) => report_error(&e),
    }
}

pub fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    let s = &result.summary;
    eprintln!("\n=== Results: {} ===", result.strategy_name);
    eprintln!("Total Return:     {:.2}%", m.total_return * 100.0);
    eprintln!("Annualized:       {:.2}%", m.annualized_return * 100.0);
    eprintln!("Volatility:       {:.2}%", m.annualized_volatility * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", m.sortino_ratio);
    eprintln!("Calmar Ratio:     {:.2}", m.calmar_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", m.max_drawdown * 100.0);
    eprintln!("VaR / CVaR:       {:.2}% / {:.2}%", m.value_at_risk * 100.0, m.conditional_value_at_risk * 100.0);
    eprintln!("Rebalances:       {} ({} skipped, {} fallbacks)", s.rebalances, s.skipped, s.fallbacks);
    eprintln!("Trades:           {}", s.trade_count);
    eprintln!("Commissions:      {:.2}", s.total_commission);
    eprintln!("Turnover:         {:.2}", s.total_turnover);
    eprintln!("Final Value:      {:.2}", s.final_value);
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, RiskParityError> {
    let start_date = parse_date(
        adapter.get_string("backtest", "start_date").as_deref(),
        "start_date",
    )?;
    let end_date = parse_date(
        adapter.get_string("backtest", "end_date").as_deref(),
        "end_date",
    )?;

    if adapter.get_string("backtest", "commission_rate").is_none() {
        return Err(RiskParityError::ConfigMissing {
            section: "backtest".into(),
            key: "commission_rate".into(),
        });
    }

    Ok(BacktestConfig {
        start_date,
        end_date,
        initial_capital: adapter.get_double("backtest", "initial_capital", 1_000_000.0),
        commission_rate: adapter.get_double("backtest", "commission_rate", 0.0),
        min_trade_value: adapter.get_double("backtest", "min_trade_value", 0.0),
        risk_free_rate: adapter.get_double("backtest", "risk_free_rate", 0.0),
        var_confidence: adapter.get_double("backtest", "var_confidence", DEFAULT_VAR_CONFIDENCE),
    })
}

fn strategy_invalid(key: &str, reason: &str) -> RiskParityError {
    RiskParityError::ConfigInvalid {
        section: "strategy".into(),
        key: key.into(),
        reason: reason.into(),
    }
}

fn build_mode(adapter: &dyn ConfigPort) -> Result<RebalanceMode, RiskParityError> {
    let mode = adapter
        .get_string("strategy", "rebalance_mode")
        .ok_or_else(|| RiskParityError::ConfigMissing {
            section: "strategy".into(),
            key: "rebalance_mode".into(),
        })?;
    match mode.trim().to_lowercase().as_str() {
        "periodic" => {
            let frequency = adapter
                .get_string("strategy", "rebalance_frequency")
                .unwrap_or_default();
            CalendarRule::parse(&frequency)
                .map(RebalanceMode::Periodic)
                .ok_or_else(|| {
                    strategy_invalid("rebalance_frequency", "expected weekly, monthly or quarterly")
                })
        }
        "adaptive" => Ok(RebalanceMode::Adaptive {
            threshold: adapter.get_double("strategy", "drift_threshold", 0.05),
        }),
        _ => Err(strategy_invalid(
            "rebalance_mode",
            "expected periodic or adaptive",
        )),
    }
}

fn build_shrinkage(adapter: &dyn ConfigPort) -> Result<Option<ShrinkageConfig>, RiskParityError> {
    if adapter.get_string("strategy", "use_shrinkage").is_none() {
        return Err(RiskParityError::ConfigMissing {
            section: "strategy".into(),
            key: "use_shrinkage".into(),
        });
    }
    if !adapter.get_bool("strategy", "use_shrinkage", false) {
        return Ok(None);
    }
    let target = match adapter
        .get_string("strategy", "shrinkage_target")
        .unwrap_or_else(|| "scaled_identity".to_string())
        .trim()
        .to_lowercase()
        .as_str()
    {
        "scaled_identity" => ShrinkageTarget::ScaledIdentity,
        "diagonal" => ShrinkageTarget::Diagonal,
        _ => {
            return Err(strategy_invalid(
                "shrinkage_target",
                "expected scaled_identity or diagonal",
            ));
        }
    };
    let intensity = match adapter
        .get_string("strategy", "shrinkage")
        .unwrap_or_else(|| "ledoit_wolf".to_string())
        .trim()
        .to_lowercase()
        .as_str()
    {
        "ledoit_wolf" => ShrinkageIntensity::LedoitWolf,
        "fixed" => ShrinkageIntensity::Fixed(adapter.get_double("strategy", "shrinkage_intensity", 0.0)),
        _ => return Err(strategy_invalid("shrinkage", "expected ledoit_wolf or fixed")),
    };
    Ok(Some(ShrinkageConfig { target, intensity }))
}

pub fn build_strategy(adapter: &dyn ConfigPort) -> Result<StrategyParams, RiskParityError> {
    let name = adapter
        .get_string("strategy", "name")
        .unwrap_or_else(|| "Unnamed".to_string());
    let lookback = adapter.get_int("strategy", "lookback", 0);
    if lookback < 2 {
        return Err(strategy_invalid("lookback", "lookback must be at least 2"));
    }

    let defaults = OptimizerSettings::default();
    let optimizer = OptimizerSettings {
        max_iterations: adapter
            .get_int("strategy", "max_iterations", defaults.max_iterations as i64)
            .max(1) as usize,
        tolerance: adapter.get_double("strategy", "tolerance", defaults.tolerance),
        parity_tolerance: adapter.get_double("strategy", "parity_tolerance", defaults.parity_tolerance),
    };

    let constraints = adapter
        .section_entries("constraints")
        .into_iter()
        .map(|(key, expr)| {
            parse_constraint(&key, &expr).map_err(|e| RiskParityError::ConfigInvalid {
                section: "constraints".into(),
                key: key.clone(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(StrategyParams {
        name,
        lookback: lookback as usize,
        mode: build_mode(adapter)?,
        shrinkage: build_shrinkage(adapter)?,
        constraints,
        optimizer,
        target_volatility: adapter
            .get_string("strategy", "target_volatility")
            .map(|_| adapter.get_double("strategy", "target_volatility", f64::NAN)),
    })
}

/// The asset universe for a run.
///
/// With an `[assets]` section the universe is the tagged assets, in price
/// table column order; every tagged asset must exist in the table. Without
/// one, every table column is used untagged.
pub fn build_universe(
    adapter: &dyn ConfigPort,
    table_assets: &[String],
) -> Result<AssetUniverse, RiskParityError> {
    let tags = adapter.section_entries("assets");
    if tags.is_empty() {
        return Ok(AssetUniverse::untagged(table_assets.to_vec()));
    }

    for (asset, _) in &tags {
        if !table_assets.contains(asset) {
            return Err(RiskParityError::UnknownAsset {
                asset: asset.clone(),
            });
        }
    }
    let assets: Vec<String> = table_assets
        .iter()
        .filter(|a| tags.iter().any(|(t, _)| t == *a))
        .cloned()
        .collect();

    AssetUniverse::new(assets, &tags).map_err(|e| RiskParityError::ConfigInvalid {
        section: "assets".into(),
        key: "assets".into(),
        reason: e.to_string(),
    })
}
