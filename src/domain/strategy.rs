//! Strategy parameters.
//!
//! Every strategy variant (periodic or adaptive, with or without shrinkage,
//! constrained or not, volatility-targeted or not) is one value of
//! [`StrategyParams`].

use crate::domain::covariance::ShrinkageConfig;
use crate::domain::optimizer::OptimizerSettings;
use crate::domain::scheduler::RebalanceMode;
use crate::domain::universe::AllocationConstraint;

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyParams {
    pub name: String,
    /// Number of trailing daily returns per estimation window.
    pub lookback: usize,
    pub mode: RebalanceMode,
    /// `None` uses the plain sample covariance.
    pub shrinkage: Option<ShrinkageConfig>,
    pub constraints: Vec<AllocationConstraint>,
    pub optimizer: OptimizerSettings,
    /// Annualised volatility the optimized weights are scaled down to, with
    /// the remainder held as cash. `None` keeps the weights fully invested.
    pub target_volatility: Option<f64>,
}

impl StrategyParams {
    pub fn new(name: &str, lookback: usize, mode: RebalanceMode) -> Self {
        StrategyParams {
            name: name.to_string(),
            lookback,
            mode,
            shrinkage: None,
            constraints: Vec::new(),
            optimizer: OptimizerSettings::default(),
            target_volatility: None,
        }
    }

    pub fn is_constrained(&self) -> bool {
        !self.constraints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::covariance::{ShrinkageIntensity, ShrinkageTarget};
    use crate::domain::scheduler::CalendarRule;
    use crate::domain::universe::parse_constraint;

    #[test]
    fn new_uses_defaults() {
        let s = StrategyParams::new("All Weather", 60, RebalanceMode::Periodic(CalendarRule::Weekly));
        assert_eq!(s.name, "All Weather");
        assert_eq!(s.lookback, 60);
        assert!(s.shrinkage.is_none());
        assert!(!s.is_constrained());
        assert_eq!(s.optimizer, OptimizerSettings::default());
        assert!(s.target_volatility.is_none());
    }

    #[test]
    fn constrained_adaptive_variant() {
        let mut s = StrategyParams::new("Drift", 100, RebalanceMode::Adaptive { threshold: 0.05 });
        s.shrinkage = Some(ShrinkageConfig {
            target: ShrinkageTarget::Diagonal,
            intensity: ShrinkageIntensity::LedoitWolf,
        });
        s.constraints
            .push(parse_constraint("min_stock", "stock >= 0.6").unwrap());
        assert!(s.is_constrained());
    }
}
