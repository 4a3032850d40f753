//! Threshold variance model
//!
//! Daily tracking variance is zero until a redemption eats through the
//! liquid buffer `τ = 1 − staking_pct`, then grows with the squared excess
//! `(r − τ)²`. With two staked assets the episode splits into a joint regime,
//! where both are overweight, and a residual regime, where only the asset
//! with the longer unbonding period is still locked.

use crate::optimization::KCoefficients;
use crate::types::{Leg, PerLeg, StakingConfig};
use serde::{Deserialize, Serialize};

/// `max(0, r − τ)`
#[inline]
pub fn excess(r: f64, threshold: f64) -> f64 {
    (r - threshold).max(0.0)
}

/// Single-asset threshold model: variance `k·(r − τ)₊²`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdVariance {
    /// Benchmark weight of the staked asset
    pub weight: f64,
    pub staking_pct: f64,
    /// `w²·(vᵗΣv)`
    pub base_k: f64,
}

impl ThresholdVariance {
    pub fn new(weight: f64, staking_pct: f64, base_k: f64) -> Self {
        Self {
            weight,
            staking_pct,
            base_k,
        }
    }

    pub fn threshold(&self) -> f64 {
        1.0 - self.staking_pct
    }

    /// Overweight forced on the asset by a redemption of size `r`
    pub fn overweight(&self, r: f64) -> f64 {
        self.weight * excess(r, self.threshold())
    }

    /// Daily tracking variance
    pub fn variance(&self, r: f64) -> f64 {
        let e = excess(r, self.threshold());
        self.base_k * e * e
    }

    /// `Var(r) / r²`, the coefficient a constant-k model would need at `r`.
    ///
    /// Zero at or below the threshold, then strictly increasing towards
    /// [`Self::limiting_coefficient`] as `r → 1`.
    pub fn effective_coefficient(&self, r: f64) -> f64 {
        if r <= self.threshold() || r == 0.0 {
            return 0.0;
        }
        self.variance(r) / (r * r)
    }

    /// `k·s²`, the effective coefficient at a full redemption
    pub fn limiting_coefficient(&self) -> f64 {
        self.base_k * self.staking_pct * self.staking_pct
    }
}

/// Two-asset piecewise-quadratic variance model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarianceModel {
    pub k: KCoefficients,
    pub thresholds: PerLeg<f64>,
    pub unbonding_days: PerLeg<u32>,
}

impl VarianceModel {
    pub fn new(k: KCoefficients, staking: PerLeg<StakingConfig>) -> Self {
        Self {
            k,
            thresholds: staking.map(|s| s.threshold()),
            unbonding_days: staking.map(|s| s.unbonding_days),
        }
    }

    /// Leg with the longer unbonding period (A on ties)
    pub fn long_leg(&self) -> Leg {
        long_leg(self.unbonding_days)
    }

    /// Days both assets are overweight
    pub fn joint_days(&self) -> u32 {
        self.unbonding_days.a.min(self.unbonding_days.b)
    }

    /// Days only the long leg is overweight
    pub fn residual_days(&self) -> u32 {
        self.unbonding_days.a.max(self.unbonding_days.b) - self.joint_days()
    }

    pub fn excess(&self, leg: Leg, r: f64) -> f64 {
        excess(r, self.thresholds.get(leg))
    }

    /// Daily variance while both assets are overweight
    pub fn joint_variance(&self, r: f64) -> f64 {
        let ea = self.excess(Leg::A, r);
        let eb = self.excess(Leg::B, r);
        self.k.aa * ea * ea + 2.0 * self.k.ab * ea * eb + self.k.bb * eb * eb
    }

    /// Daily variance once the short leg has unbonded
    pub fn residual_variance(&self, r: f64) -> f64 {
        let leg = self.long_leg();
        let e = self.excess(leg, r);
        self.k.own(leg) * e * e
    }

    /// Variance-days contributed by one episode of size `r`
    pub fn episode_variance_days(&self, r: f64) -> f64 {
        self.joint_days() as f64 * self.joint_variance(r)
            + self.residual_days() as f64 * self.residual_variance(r)
    }
}

pub(crate) fn long_leg(days: PerLeg<u32>) -> Leg {
    if days.b > days.a {
        Leg::B
    } else {
        Leg::A
    }
}
