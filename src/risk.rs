//! Tracking-difference risk module
//!
//! Implements:
//! 1. Expected shortfall of tracking difference from tracking error
//! 2. Remaining tracking-difference budget
//! 3. Budget deficit charged against staking yield

use crate::types::FundConstraints;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// `sqrt(2/π)·0.5`, the mean of a half-normal times one half
pub fn shortfall_factor() -> f64 {
    (2.0 / PI).sqrt() * 0.5
}

/// Expected shortfall for a given tracking error. Always `≤ 0`.
pub fn expected_shortfall(tracking_error: f64) -> f64 {
    // + 0.0 maps -0.0 to 0.0 at zero tracking error
    -tracking_error * shortfall_factor() + 0.0
}

/// Budget check of one tracking-error figure against the fund's TD cap
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TdRiskAssessment {
    pub expected_shortfall: f64,
    /// `cap_td − current_td`
    pub budget: f64,
    /// `min(0, budget − |shortfall|)`
    pub deficit: f64,
}

impl TdRiskAssessment {
    pub fn within_budget(&self) -> bool {
        self.deficit == 0.0
    }
}

/// Checks tracking errors against one fund's constraints
pub struct TdRiskManager {
    fund: FundConstraints,
}

impl TdRiskManager {
    pub fn new(fund: FundConstraints) -> Self {
        Self { fund }
    }

    pub fn fund(&self) -> &FundConstraints {
        &self.fund
    }

    pub fn assess(&self, tracking_error: f64) -> TdRiskAssessment {
        let expected_shortfall = expected_shortfall(tracking_error);
        let budget = self.fund.budget();
        let deficit = (budget - expected_shortfall.abs()).min(0.0);
        TdRiskAssessment {
            expected_shortfall,
            budget,
            deficit,
        }
    }

    /// Largest tracking error whose shortfall still fits the budget
    pub fn max_tracking_error(&self) -> f64 {
        self.fund.budget().max(0.0) / shortfall_factor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_expected_shortfall() {
        assert_eq!(expected_shortfall(0.0).to_bits(), 0.0f64.to_bits());
        assert_relative_eq!(expected_shortfall(0.01), -0.01 * 0.398_942_280_4, max_relative = 1e-9);
    }

    #[test]
    fn test_deficit_only_when_budget_exceeded() {
        let manager = TdRiskManager::new(FundConstraints::default());
        let small = manager.assess(0.001);
        assert!(small.within_budget());
        assert_eq!(small.deficit, 0.0);

        let large = manager.assess(0.01);
        assert!(!large.within_budget());
        assert_relative_eq!(large.deficit, 0.0007 - 0.01 * shortfall_factor(), max_relative = 1e-9);
    }

    #[test]
    fn test_max_tracking_error_sits_on_boundary() {
        let manager = TdRiskManager::new(FundConstraints::default());
        let te = manager.max_tracking_error();
        let at = manager.assess(te);
        assert!(at.deficit.abs() < 1e-15);
        assert!(manager.assess(te * 1.01).deficit < 0.0);
    }

    #[test]
    fn test_exhausted_budget() {
        let fund = FundConstraints { current_td: 0.016, ..FundConstraints::default() };
        let manager = TdRiskManager::new(fund);
        assert_eq!(manager.max_tracking_error(), 0.0);
        // A negative budget is charged in full even with no tracking error
        assert_relative_eq!(manager.assess(0.0).deficit, -0.001, max_relative = 1e-9);
    }
}
