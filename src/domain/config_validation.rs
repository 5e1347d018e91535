//! Configuration validation.
//!
//! Validates all config fields before a backtest runs. Every failure is fatal.

use crate::domain::error::RiskParityError;
use crate::domain::scheduler::CalendarRule;
use crate::domain::universe::{AssetUniverse, UniverseError, parse_constraint, resolve_constraints};
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), RiskParityError> {
    validate_initial_capital(config)?;
    validate_commission(config)?;
    validate_min_trade_value(config)?;
    validate_risk_free_rate(config)?;
    validate_var_confidence(config)?;
    validate_dates(config)?;
    Ok(())
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), RiskParityError> {
    validate_lookback(config)?;
    validate_rebalance_mode(config)?;
    validate_shrinkage(config)?;
    validate_optimizer(config)?;
    validate_target_volatility(config)?;
    validate_allocation(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: &str) -> RiskParityError {
    RiskParityError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn missing(section: &str, key: &str) -> RiskParityError {
    RiskParityError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), RiskParityError> {
    let value = config.get_double("backtest", "initial_capital", 0.0);
    if !(value > 0.0) || !value.is_finite() {
        return Err(invalid(
            "backtest",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }
    Ok(())
}

fn validate_commission(config: &dyn ConfigPort) -> Result<(), RiskParityError> {
    if config.get_string("backtest", "commission_rate").is_none() {
        return Err(missing("backtest", "commission_rate"));
    }
    let value = config.get_double("backtest", "commission_rate", f64::NAN);
    if !(0.0..1.0).contains(&value) {
        return Err(invalid(
            "backtest",
            "commission_rate",
            "commission_rate must be non-negative and below 1",
        ));
    }
    Ok(())
}

fn validate_min_trade_value(config: &dyn ConfigPort) -> Result<(), RiskParityError> {
    let value = config.get_double("backtest", "min_trade_value", 0.0);
    if !(value >= 0.0) {
        return Err(invalid(
            "backtest",
            "min_trade_value",
            "min_trade_value must be non-negative",
        ));
    }
    Ok(())
}

fn validate_risk_free_rate(config: &dyn ConfigPort) -> Result<(), RiskParityError> {
    let value = config.get_double("backtest", "risk_free_rate", 0.0);
    if !(0.0..1.0).contains(&value) {
        return Err(invalid(
            "backtest",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    Ok(())
}

fn validate_var_confidence(config: &dyn ConfigPort) -> Result<(), RiskParityError> {
    let value = config.get_double("backtest", "var_confidence", 0.95);
    if !(value > 0.0 && value < 1.0) {
        return Err(invalid(
            "backtest",
            "var_confidence",
            "var_confidence must be strictly between 0 and 1",
        ));
    }
    Ok(())
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), RiskParityError> {
    let start_str = config.get_string("backtest", "start_date");
    let end_str = config.get_string("backtest", "end_date");

    let start_date = parse_date(start_str.as_deref(), "start_date")?;
    let end_date = parse_date(end_str.as_deref(), "end_date")?;

    if start_date >= end_date {
        return Err(invalid(
            "backtest",
            "start_date",
            "start_date must be before end_date",
        ));
    }
    Ok(())
}

pub fn parse_date(value: Option<&str>, field: &str) -> Result<NaiveDate, RiskParityError> {
    match value {
        None => Err(missing("backtest", field)),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
            invalid(
                "backtest",
                field,
                &format!("invalid {} format, expected YYYY-MM-DD", field),
            )
        }),
    }
}

fn validate_lookback(config: &dyn ConfigPort) -> Result<(), RiskParityError> {
    if config.get_string("strategy", "lookback").is_none() {
        return Err(missing("strategy", "lookback"));
    }
    let value = config.get_int("strategy", "lookback", 0);
    if value < 2 {
        return Err(invalid(
            "strategy",
            "lookback",
            "lookback must be an integer of at least 2",
        ));
    }
    Ok(())
}

fn validate_rebalance_mode(config: &dyn ConfigPort) -> Result<(), RiskParityError> {
    let mode = config
        .get_string("strategy", "rebalance_mode")
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| missing("strategy", "rebalance_mode"))?;

    match mode.trim().to_lowercase().as_str() {
        "periodic" => {
            let frequency = config
                .get_string("strategy", "rebalance_frequency")
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| missing("strategy", "rebalance_frequency"))?;
            if CalendarRule::parse(&frequency).is_none() {
                return Err(invalid(
                    "strategy",
                    "rebalance_frequency",
                    "rebalance_frequency must be weekly, monthly or quarterly",
                ));
            }
        }
        "adaptive" => {
            if config.get_string("strategy", "drift_threshold").is_none() {
                return Err(missing("strategy", "drift_threshold"));
            }
            let threshold = config.get_double("strategy", "drift_threshold", f64::NAN);
            if !(threshold > 0.0 && threshold < 1.0) {
                return Err(invalid(
                    "strategy",
                    "drift_threshold",
                    "drift_threshold must be strictly between 0 and 1",
                ));
            }
        }
        _ => {
            return Err(invalid(
                "strategy",
                "rebalance_mode",
                "rebalance_mode must be periodic or adaptive",
            ));
        }
    }
    Ok(())
}

fn validate_shrinkage(config: &dyn ConfigPort) -> Result<(), RiskParityError> {
    let flag = config
        .get_string("strategy", "use_shrinkage")
        .ok_or_else(|| missing("strategy", "use_shrinkage"))?;
    let enabled = match flag.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => true,
        "false" | "no" | "0" => false,
        _ => {
            return Err(invalid(
                "strategy",
                "use_shrinkage",
                "use_shrinkage must be true or false",
            ));
        }
    };
    if !enabled {
        return Ok(());
    }

    let method = config
        .get_string("strategy", "shrinkage")
        .unwrap_or_else(|| "ledoit_wolf".to_string());
    match method.trim().to_lowercase().as_str() {
        "ledoit_wolf" => {}
        "fixed" => {
            if config.get_string("strategy", "shrinkage_intensity").is_none() {
                return Err(missing("strategy", "shrinkage_intensity"));
            }
            let delta = config.get_double("strategy", "shrinkage_intensity", f64::NAN);
            if !(0.0..=1.0).contains(&delta) {
                return Err(invalid(
                    "strategy",
                    "shrinkage_intensity",
                    "shrinkage_intensity must be between 0 and 1",
                ));
            }
        }
        _ => {
            return Err(invalid(
                "strategy",
                "shrinkage",
                "shrinkage must be ledoit_wolf or fixed",
            ));
        }
    }

    if let Some(target) = config.get_string("strategy", "shrinkage_target") {
        match target.trim().to_lowercase().as_str() {
            "scaled_identity" | "diagonal" => {}
            _ => {
                return Err(invalid(
                    "strategy",
                    "shrinkage_target",
                    "shrinkage_target must be scaled_identity or diagonal",
                ));
            }
        }
    }
    Ok(())
}

fn validate_optimizer(config: &dyn ConfigPort) -> Result<(), RiskParityError> {
    if config.get_int("strategy", "max_iterations", 200) < 1 {
        return Err(invalid(
            "strategy",
            "max_iterations",
            "max_iterations must be at least 1",
        ));
    }
    for key in ["tolerance", "parity_tolerance"] {
        let value = config.get_double("strategy", key, 1e-6);
        if !(value > 0.0) {
            return Err(invalid("strategy", key, &format!("{key} must be positive")));
        }
    }
    Ok(())
}

/// Optional; when present it must be an annualised volatility in (0, 2].
fn validate_target_volatility(config: &dyn ConfigPort) -> Result<(), RiskParityError> {
    if config.get_string("strategy", "target_volatility").is_none() {
        return Ok(());
    }
    let target = config.get_double("strategy", "target_volatility", f64::NAN);
    if !(target > 0.0 && target <= 2.0) {
        return Err(invalid(
            "strategy",
            "target_volatility",
            "target_volatility must be positive and at most 2",
        ));
    }
    Ok(())
}

/// `[assets]` tags and `[constraints]` rows must parse and every constrained
/// class must have at least one tagged asset.
fn validate_allocation(config: &dyn ConfigPort) -> Result<(), RiskParityError> {
    let tags = config.section_entries("assets");
    for (asset, class) in &tags {
        if class.trim().is_empty() {
            return Err(invalid("assets", asset, "asset class must not be empty"));
        }
    }

    let assets: Vec<String> = tags.iter().map(|(a, _)| a.clone()).collect();
    let universe = AssetUniverse::new(assets, &tags)
        .map_err(|e| invalid("assets", "assets", &e.to_string()))?;

    let constraints = config
        .section_entries("constraints")
        .into_iter()
        .map(|(name, expr)| {
            parse_constraint(&name, &expr)
                .map_err(|e| invalid("constraints", &name, &e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    resolve_constraints(&universe, &constraints).map_err(|e| match &e {
        UniverseError::EmptySubset { name, .. } => invalid("constraints", name, &e.to_string()),
        _ => invalid("constraints", "constraints", &e.to_string()),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    const VALID: &str = r#"
[backtest]
initial_capital = 1000000
start_date = 2018-01-02
end_date = 2023-12-29
commission_rate = 0.0003

[strategy]
name = All Weather
lookback = 100
rebalance_mode = adaptive
drift_threshold = 0.05
use_shrinkage = true
shrinkage = fixed
shrinkage_intensity = 0.2
shrinkage_target = diagonal

[assets]
510300 = stock
511010 = bond
518880 = gold

[constraints]
min_stock = stock >= 0.30
max_bond = bond <= 0.50
"#;

    fn adapter(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    fn with(key_line: &str, replacement: &str) -> FileConfigAdapter {
        adapter(&VALID.replace(key_line, replacement))
    }

    fn assert_invalid(result: Result<(), RiskParityError>, expected_key: &str) {
        match result {
            Err(RiskParityError::ConfigInvalid { key, .. }) => assert_eq!(key, expected_key),
            other => panic!("expected ConfigInvalid for {expected_key}, got {other:?}"),
        }
    }

    fn assert_missing(result: Result<(), RiskParityError>, expected_key: &str) {
        match result {
            Err(RiskParityError::ConfigMissing { key, .. }) => assert_eq!(key, expected_key),
            other => panic!("expected ConfigMissing for {expected_key}, got {other:?}"),
        }
    }

    #[test]
    fn valid_config_passes() {
        let a = adapter(VALID);
        assert!(validate_backtest_config(&a).is_ok());
        assert!(validate_strategy_config(&a).is_ok());
    }

    #[test]
    fn non_positive_capital_rejected() {
        let a = with("initial_capital = 1000000", "initial_capital = 0");
        assert_invalid(validate_backtest_config(&a), "initial_capital");
    }

    #[test]
    fn negative_commission_rejected() {
        let a = with("commission_rate = 0.0003", "commission_rate = -0.01");
        assert_invalid(validate_backtest_config(&a), "commission_rate");
    }

    #[test]
    fn missing_commission_rate_reported() {
        let a = with("commission_rate = 0.0003", "");
        assert_missing(validate_backtest_config(&a), "commission_rate");
        let a = with("commission_rate = 0.0003", "commission_rate = cheap");
        assert_invalid(validate_backtest_config(&a), "commission_rate");
    }

    #[test]
    fn missing_use_shrinkage_reported() {
        let a = with("use_shrinkage = true", "");
        assert_missing(validate_strategy_config(&a), "use_shrinkage");
        let a = with("use_shrinkage = true", "use_shrinkage = sometimes");
        assert_invalid(validate_strategy_config(&a), "use_shrinkage");
    }

    #[test]
    fn target_volatility_must_be_positive() {
        let a = with("use_shrinkage = true", "use_shrinkage = true\ntarget_volatility = 0.06");
        assert!(validate_strategy_config(&a).is_ok());
        let a = with("use_shrinkage = true", "use_shrinkage = true\ntarget_volatility = 0");
        assert_invalid(validate_strategy_config(&a), "target_volatility");
        let a = with("use_shrinkage = true", "use_shrinkage = true\ntarget_volatility = high");
        assert_invalid(validate_strategy_config(&a), "target_volatility");
    }

    #[test]
    fn start_after_end_rejected() {
        let a = with("start_date = 2018-01-02", "start_date = 2024-01-02");
        assert_invalid(validate_backtest_config(&a), "start_date");
    }

    #[test]
    fn unparsable_date_rejected() {
        let a = with("end_date = 2023-12-29", "end_date = 29/12/2023");
        assert_invalid(validate_backtest_config(&a), "end_date");
    }

    #[test]
    fn missing_date_reported() {
        let a = with("end_date = 2023-12-29", "");
        assert_missing(validate_backtest_config(&a), "end_date");
    }

    #[test]
    fn missing_rebalance_mode_rejected() {
        let a = with("rebalance_mode = adaptive", "");
        assert_missing(validate_strategy_config(&a), "rebalance_mode");
    }

    #[test]
    fn unknown_rebalance_mode_rejected() {
        let a = with("rebalance_mode = adaptive", "rebalance_mode = sometimes");
        assert_invalid(validate_strategy_config(&a), "rebalance_mode");
    }

    #[test]
    fn lookback_must_exceed_one() {
        let a = with("lookback = 100", "lookback = 0");
        assert_invalid(validate_strategy_config(&a), "lookback");
        let a = with("lookback = 100", "lookback = 1");
        assert_invalid(validate_strategy_config(&a), "lookback");
    }

    #[test]
    fn threshold_outside_unit_interval_rejected() {
        for bad in ["0", "1", "1.5", "-0.1"] {
            let a = with("drift_threshold = 0.05", &format!("drift_threshold = {bad}"));
            assert_invalid(validate_strategy_config(&a), "drift_threshold");
        }
    }

    #[test]
    fn periodic_requires_frequency() {
        let a = with("rebalance_mode = adaptive", "rebalance_mode = periodic");
        assert_missing(validate_strategy_config(&a), "rebalance_frequency");

        let a = with(
            "rebalance_mode = adaptive",
            "rebalance_mode = periodic\nrebalance_frequency = daily",
        );
        assert_invalid(validate_strategy_config(&a), "rebalance_frequency");

        let a = with(
            "rebalance_mode = adaptive",
            "rebalance_mode = periodic\nrebalance_frequency = quarterly",
        );
        assert!(validate_strategy_config(&a).is_ok());
    }

    #[test]
    fn intensity_outside_unit_interval_rejected() {
        let a = with("shrinkage_intensity = 0.2", "shrinkage_intensity = 1.2");
        assert_invalid(validate_strategy_config(&a), "shrinkage_intensity");
    }

    #[test]
    fn intensity_ignored_without_shrinkage() {
        let a = adapter(
            &VALID
                .replace("use_shrinkage = true", "use_shrinkage = false")
                .replace("shrinkage_intensity = 0.2", "shrinkage_intensity = 7"),
        );
        assert!(validate_strategy_config(&a).is_ok());
    }

    #[test]
    fn constraint_syntax_error_rejected() {
        let a = with("min_stock = stock >= 0.30", "min_stock = stock > 0.30");
        assert_invalid(validate_strategy_config(&a), "min_stock");
    }

    #[test]
    fn constraint_bound_outside_unit_interval_rejected() {
        let a = with("max_bond = bond <= 0.50", "max_bond = bond <= 1.50");
        assert_invalid(validate_strategy_config(&a), "max_bond");
    }

    #[test]
    fn constraint_on_untagged_class_rejected() {
        let a = with("max_bond = bond <= 0.50", "max_cash = cash <= 0.50");
        assert_invalid(validate_strategy_config(&a), "max_cash");
    }
}
