//! Core domain types and logic.

pub mod backtest;
pub mod batch;
pub mod config_validation;
pub mod covariance;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod optimizer;
pub mod portfolio;
pub mod position;
pub mod price_table;
pub mod returns;
pub mod scheduler;
pub mod strategy;
pub mod universe;
