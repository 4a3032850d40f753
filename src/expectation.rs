//! Expectations over the redemption-size distribution
//!
//! Every expectation the engine needs is a polynomial in the per-leg excess
//! `e_i(r) = (r − τ_i)₊`, so one pass over the support collects the first
//! moments, second moments and the cross moment. Regime variances then follow
//! by linearity.

use crate::types::{PerLeg, RedemptionDistribution};
use crate::variance::{excess, VarianceModel};
use serde::{Deserialize, Serialize};

/// Moments of the per-leg excess over redemption size
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExcessMoments {
    /// `E[e_A]`, `E[e_B]`
    pub first: PerLeg<f64>,
    /// `E[e_A²]`, `E[e_B²]`
    pub second: PerLeg<f64>,
    /// `E[e_A·e_B]`
    pub cross: f64,
}

/// Regime variance expectations for one configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Expectations {
    /// `E[Var_joint(R)]`
    pub joint_variance: f64,
    /// `E[Var_residual(R)]`
    pub residual_variance: f64,
    pub moments: ExcessMoments,
}

pub struct ExpectationEngine;

impl ExpectationEngine {
    /// Single pass over the support, in support order.
    pub fn moments(distribution: &RedemptionDistribution, thresholds: PerLeg<f64>) -> ExcessMoments {
        distribution
            .iter()
            .fold(ExcessMoments::default(), |mut acc, (r, p)| {
                let ea = excess(r, thresholds.a);
                let eb = excess(r, thresholds.b);
                acc.first.a += p * ea;
                acc.first.b += p * eb;
                acc.second.a += p * ea * ea;
                acc.second.b += p * eb * eb;
                acc.cross += p * ea * eb;
                acc
            })
    }

    /// Regime expectations from precomputed moments
    pub fn from_moments(model: &VarianceModel, moments: ExcessMoments) -> Expectations {
        let k = &model.k;
        let joint_variance =
            k.aa * moments.second.a + 2.0 * k.ab * moments.cross + k.bb * moments.second.b;
        let long = model.long_leg();
        let residual_variance = k.own(long) * moments.second.get(long);
        Expectations {
            joint_variance,
            residual_variance,
            moments,
        }
    }

    pub fn evaluate(model: &VarianceModel, distribution: &RedemptionDistribution) -> Expectations {
        Self::from_moments(model, Self::moments(distribution, model.thresholds))
    }

    /// `E[f(R)]` for an arbitrary per-episode function
    pub fn expect(distribution: &RedemptionDistribution, f: impl Fn(f64) -> f64) -> f64 {
        distribution.iter().map(|(r, p)| p * f(r)).sum()
    }
}
