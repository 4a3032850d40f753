//! Net staking benefit
//!
//! Staking yield above a baseline level, plus the yield still earned on the
//! capital that sits overweight during unbonding, less whatever part of the
//! expected tracking shortfall the fund's TD budget cannot absorb.

use crate::risk::{TdRiskAssessment, TdRiskManager};
use crate::types::{FundConstraints, Leg, PerLeg, StakingConfig, DAYS_PER_YEAR};
use serde::{Deserialize, Serialize};

/// Yield benefit of one staked leg
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LegBenefit {
    /// `w·y·max(0, s − s₀)`
    pub baseline: f64,
    /// Yield on the excess redeemed while unbonding
    pub marginal: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetBenefitResult {
    pub tracking_error: f64,
    pub legs: PerLeg<LegBenefit>,
    pub total_yield_benefit: f64,
    pub expected_shortfall: f64,
    pub td_budget: f64,
    pub td_budget_deficit: f64,
    pub net_benefit: f64,
    pub net_benefit_bps: f64,
    /// Net benefit in fund currency (`net·NAV`)
    pub net_benefit_currency: f64,
}

impl NetBenefitResult {
    pub fn leg(&self, leg: Leg) -> LegBenefit {
        self.legs.get(leg)
    }
}

/// Per-evaluation inputs that vary across a sensitivity grid
#[derive(Debug, Clone, Copy)]
pub struct BenefitInputs {
    pub tracking_error: f64,
    pub staking: PerLeg<StakingConfig>,
    /// `E[max(0, R − τ)]` per leg
    pub expected_excess: PerLeg<f64>,
}

pub struct NetBenefitEngine {
    weights: PerLeg<f64>,
    lambda: f64,
    risk: TdRiskManager,
}

impl NetBenefitEngine {
    pub fn new(weights: PerLeg<f64>, lambda: f64, fund: FundConstraints) -> Self {
        Self {
            weights,
            lambda,
            risk: TdRiskManager::new(fund),
        }
    }

    pub fn fund(&self) -> &FundConstraints {
        self.risk.fund()
    }

    pub fn leg_benefit(&self, leg: Leg, staking: &StakingConfig, expected_excess: f64) -> LegBenefit {
        leg_benefit(self.weights.get(leg), staking, self.lambda, expected_excess)
    }

    pub fn evaluate(&self, inputs: &BenefitInputs) -> NetBenefitResult {
        let legs = PerLeg::new(
            self.leg_benefit(Leg::A, &inputs.staking.a, inputs.expected_excess.a),
            self.leg_benefit(Leg::B, &inputs.staking.b, inputs.expected_excess.b),
        );
        let total_yield_benefit = legs.a.total + legs.b.total;
        let TdRiskAssessment {
            expected_shortfall,
            budget,
            deficit,
        } = self.risk.assess(inputs.tracking_error);

        let net_benefit = total_yield_benefit + deficit;
        NetBenefitResult {
            tracking_error: inputs.tracking_error,
            legs,
            total_yield_benefit,
            expected_shortfall,
            td_budget: budget,
            td_budget_deficit: deficit,
            net_benefit,
            net_benefit_bps: net_benefit * 10_000.0,
            net_benefit_currency: net_benefit * self.fund().nav,
        }
    }
}

fn leg_benefit(weight: f64, staking: &StakingConfig, lambda: f64, expected_excess: f64) -> LegBenefit {
    let carry = weight * staking.annual_yield;
    let baseline = carry * (staking.staking_pct - staking.baseline_staking_pct).max(0.0);
    let locked_fraction = lambda * staking.unbonding_days as f64 / DAYS_PER_YEAR;
    let marginal = carry * locked_fraction * expected_excess;
    LegBenefit {
        baseline,
        marginal,
        total: baseline + marginal,
    }
}
