//! Annual tracking error and its decomposition
//!
//! Annual variance is the expected episode count times the expected
//! variance-days of one episode:
//!
//! `AnnualVar = λ·[d_short·E[Var_joint] + (d_long − d_short)·E[Var_residual]]`
//!
//! The decomposition splits the same quantity into an own-asset term per leg
//! plus a cross term, so the three contributions always sum to the total.

use crate::expectation::{ExcessMoments, ExpectationEngine, Expectations};
use crate::optimization::KCoefficients;
use crate::types::{PerLeg, RedemptionDistribution};
use crate::variance::VarianceModel;
use serde::{Deserialize, Serialize};

/// Tracking error for one staking configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingErrorResult {
    pub annual_variance: f64,
    /// `sqrt(annual_variance)`
    pub tracking_error: f64,
    pub joint_days: u32,
    pub residual_days: u32,
    pub expectations: Expectations,
    pub decomposition: TeDecomposition,
}

/// Own-asset and cross contributions to annual tracking variance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TeDecomposition {
    pub tracking_error: f64,
    /// TE if only leg A were staked
    pub te_a_only: f64,
    pub te_b_only: f64,
    /// `sqrt(TE_A² + TE_B²)`, i.e. ignoring co-movement of the two legs
    pub independence_approx: f64,
    /// Exact TE minus the independence approximation; negative when the
    /// hedges offset each other
    pub correlation_cost: f64,
    pub correlation_cost_pct: f64,
    pub variance_a: f64,
    pub variance_b: f64,
    pub variance_cross: f64,
    pub a_contribution_pct: f64,
    pub b_contribution_pct: f64,
    pub cross_contribution_pct: f64,
}

impl TeDecomposition {
    pub fn total_variance(&self) -> f64 {
        self.variance_a + self.variance_b + self.variance_cross
    }
}

pub struct TrackingErrorEngine;

impl TrackingErrorEngine {
    pub fn evaluate(model: &VarianceModel, distribution: &RedemptionDistribution) -> TrackingErrorResult {
        let moments = ExpectationEngine::moments(distribution, model.thresholds);
        Self::from_moments(model, moments, distribution.expected_per_year())
    }

    /// Closed form from precomputed excess moments
    pub fn from_moments(model: &VarianceModel, moments: ExcessMoments, lambda: f64) -> TrackingErrorResult {
        let expectations = ExpectationEngine::from_moments(model, moments);
        let joint_days = model.joint_days();
        let residual_days = model.residual_days();

        let annual_variance = lambda
            * (joint_days as f64 * expectations.joint_variance
                + residual_days as f64 * expectations.residual_variance);
        // Rounding can leave a PSD quadratic form a hair below zero
        let tracking_error = annual_variance.max(0.0).sqrt();

        let decomposition = decompose(
            &model.k,
            &moments,
            lambda,
            model.unbonding_days,
            joint_days,
            tracking_error,
        );

        TrackingErrorResult {
            annual_variance,
            tracking_error,
            joint_days,
            residual_days,
            expectations,
            decomposition,
        }
    }
}

fn decompose(
    k: &KCoefficients,
    moments: &ExcessMoments,
    lambda: f64,
    days: PerLeg<u32>,
    joint_days: u32,
    tracking_error: f64,
) -> TeDecomposition {
    let variance_a = lambda * days.a as f64 * k.aa * moments.second.a;
    let variance_b = lambda * days.b as f64 * k.bb * moments.second.b;
    let variance_cross = lambda * joint_days as f64 * 2.0 * k.ab * moments.cross;
    let total = variance_a + variance_b + variance_cross;

    let te_a_only = variance_a.sqrt();
    let te_b_only = variance_b.sqrt();
    let independence_approx = (variance_a + variance_b).sqrt();
    let correlation_cost = tracking_error - independence_approx;
    let correlation_cost_pct = if independence_approx > 0.0 {
        (tracking_error / independence_approx - 1.0) * 100.0
    } else {
        0.0
    };

    let share = |v: f64| if total > 0.0 { v / total * 100.0 } else { 0.0 };

    TeDecomposition {
        tracking_error,
        te_a_only,
        te_b_only,
        independence_approx,
        correlation_cost,
        correlation_cost_pct,
        variance_a,
        variance_b,
        variance_cross,
        a_contribution_pct: share(variance_a),
        b_contribution_pct: share(variance_b),
        cross_contribution_pct: share(variance_cross),
    }
}
