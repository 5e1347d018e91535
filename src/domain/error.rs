//! Domain error types.
//!
//! [`RiskParityError`] covers the fatal class: anything that stops a run
//! before the first simulated day. The remaining types are recoverable
//! conditions the backtest driver turns into log lines and result records.

use chrono::NaiveDate;

/// Top-level error type for riskparity.
#[derive(Debug, thiserror::Error)]
pub enum RiskParityError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("price table is empty")]
    EmptyPriceTable,

    #[error("invalid price table: {reason}")]
    InvalidPriceTable { reason: String },

    #[error("asset {asset} is not in the price table")]
    UnknownAsset { asset: String },

    #[error("no trading days between {start} and {end}")]
    NoTradingDays { start: NaiveDate, end: NaiveDate },

    #[error("csv error: {reason}")]
    Csv { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&RiskParityError> for std::process::ExitCode {
    fn from(err: &RiskParityError) -> Self {
        let code: u8 = match err {
            RiskParityError::Io(_) | RiskParityError::Csv { .. } => 1,
            RiskParityError::ConfigParse { .. }
            | RiskParityError::ConfigMissing { .. }
            | RiskParityError::ConfigInvalid { .. } => 2,
            RiskParityError::EmptyPriceTable
            | RiskParityError::InvalidPriceTable { .. }
            | RiskParityError::UnknownAsset { .. }
            | RiskParityError::NoTradingDays { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

/// Why a return window could not be built for a decision date.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WindowError {
    #[error("insufficient history on {date}: have {available} returns, need {required}")]
    InsufficientHistory {
        date: NaiveDate,
        available: usize,
        required: usize,
    },

    #[error("invalid price for {asset} on {date}: {price}")]
    InvalidPrice {
        asset: String,
        date: NaiveDate,
        price: f64,
    },
}

/// Why the optimizer could not produce risk-parity weights.
///
/// Every variant is answered with inverse-volatility weights; none is fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptimizerError {
    #[error("covariance matrix is singular or not positive definite (min eigenvalue {min_eigenvalue:e})")]
    SingularCovariance { min_eigenvalue: f64 },

    #[error("optimizer did not converge after {iterations} iterations (dispersion {dispersion:e})")]
    NotConverged { iterations: usize, dispersion: f64 },

    #[error("allocation constraints admit no feasible weights (violation {violation:e})")]
    EmptyFeasibleRegion { violation: f64 },
}
