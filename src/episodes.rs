//! Episodic schedule analysis for a single staked asset
//!
//! Implements:
//! 1. Overweight forced by each redemption pattern at a given staking level
//! 2. Minimum-variance active weights and daily variance per episode
//! 3. Variance-days aggregation into an annual tracking error
//! 4. Overweight staking yield, half-normal shortfall and extra staking benefit

use crate::covariance::{CovarianceBuilder, MarketParameters};
use crate::error::{ensure_in_range, EngineError, EngineResult};
use crate::optimization::{ConstraintOptimizer, HedgeSolution};
use crate::risk::expected_shortfall;
use crate::types::{AssetUniverse, Leg, StakingConfig, DAYS_PER_YEAR};
use crate::variance::ThresholdVariance;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Trading days used to annualize a single episode's daily variance
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// `count` redemptions of `redemption_pct` of NAV, each lasting `duration_days`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RedemptionPattern {
    pub redemption_pct: f64,
    pub count: u32,
    pub duration_days: u32,
}

impl RedemptionPattern {
    pub fn new(redemption_pct: f64, count: u32, duration_days: u32) -> Self {
        Self {
            redemption_pct,
            count,
            duration_days,
        }
    }

    /// Eighteen ten-day episodes a year: 12×5%, 3×10%, 2×20%, 1×30%
    pub fn standard_schedule() -> Vec<RedemptionPattern> {
        vec![
            Self::new(0.05, 12, 10),
            Self::new(0.10, 3, 10),
            Self::new(0.20, 2, 10),
            Self::new(0.30, 1, 10),
        ]
    }
}

/// Metrics of one episode of a pattern; every repetition is identical
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetrics {
    pub pattern: RedemptionPattern,
    pub staking_pct: f64,
    /// Overweight forced on the staked asset
    pub overweight: f64,
    /// Minimum-variance active weights in universe order
    pub active_weights: Vec<f64>,
    pub daily_variance: f64,
    /// `sqrt(duration · daily variance)`
    pub tracking_error: f64,
    /// Yield earned on the overweight over the episode
    pub staking_benefit: f64,
    /// Shortfall of the episode's daily variance annualized over trading days
    pub expected_shortfall: f64,
}

impl EpisodeMetrics {
    /// Variance-days of all repetitions of the pattern
    pub fn variance_days(&self) -> f64 {
        self.pattern.count as f64 * self.pattern.duration_days as f64 * self.daily_variance
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleAnalysis {
    pub staking_pct: f64,
    pub episodes: Vec<EpisodeMetrics>,
    pub total_variance_days: f64,
    pub tracking_error: f64,
    /// Yield on overweights summed over every episode
    pub overweight_benefit: f64,
    pub expected_shortfall: f64,
    /// `overweight_benefit + expected_shortfall`
    pub net_overweight: f64,
    /// `w · max(0, s − baseline) · yield`
    pub extra_staking_benefit: f64,
    pub net_benefit: f64,
}

impl ScheduleAnalysis {
    pub fn episode_count(&self) -> u64 {
        self.episodes.iter().map(|m| m.pattern.count as u64).sum()
    }
}

/// Risk and return of a redemption schedule for one staked asset
#[derive(Debug, Clone)]
pub struct EpisodicAnalyzer {
    leg: Leg,
    weight: f64,
    staking: StakingConfig,
    solution: HedgeSolution,
}

impl EpisodicAnalyzer {
    pub fn new(
        universe: &AssetUniverse,
        market: &MarketParameters,
        leg: Leg,
        weight: f64,
        staking: StakingConfig,
    ) -> EngineResult<Self> {
        ensure_in_range("benchmark weight", weight, 0.0, 1.0)?;
        staking.validate()?;
        let optimizer = ConstraintOptimizer::new(CovarianceBuilder::from_market(universe, market)?)?;
        let solution = optimizer.solve(&[universe.illiquid(leg)])?;
        debug!(
            %leg,
            asset = universe.illiquid_name(leg),
            condition_number = optimizer.condition_number(),
            "episodic analyzer ready"
        );
        Ok(Self {
            leg,
            weight,
            staking,
            solution,
        })
    }

    pub fn leg(&self) -> Leg {
        self.leg
    }

    pub fn solution(&self) -> &HedgeSolution {
        &self.solution
    }

    /// Threshold model of the staked asset at `staking_pct`
    pub fn threshold_model(&self, staking_pct: f64) -> ThresholdVariance {
        ThresholdVariance::new(
            self.weight,
            staking_pct,
            self.weight * self.weight * self.solution.gram(0, 0),
        )
    }

    /// Analyzes a schedule at the configured staking level or `staking_override`
    pub fn analyze_schedule(
        &self,
        patterns: &[RedemptionPattern],
        staking_override: Option<f64>,
    ) -> EngineResult<ScheduleAnalysis> {
        let staking_pct = staking_override.unwrap_or(self.staking.staking_pct);
        ensure_in_range("staking_pct", staking_pct, 0.0, 1.0)?;
        let model = self.threshold_model(staking_pct);

        let episodes = patterns
            .iter()
            .map(|pattern| self.analyze_episode(&model, *pattern))
            .collect::<EngineResult<Vec<_>>>()?;

        let total_variance_days = episodes.iter().fold(0.0, |acc, m| acc + m.variance_days());
        let tracking_error = total_variance_days.sqrt();
        let overweight_benefit = episodes
            .iter()
            .fold(0.0, |acc, m| acc + m.pattern.count as f64 * m.staking_benefit);
        let shortfall = expected_shortfall(tracking_error);
        let net_overweight = overweight_benefit + shortfall;
        let extra_staking_benefit = self.weight
            * (staking_pct - self.staking.baseline_staking_pct).max(0.0)
            * self.staking.annual_yield;

        debug!(
            patterns = patterns.len(),
            staking_pct,
            tracking_error,
            "schedule analyzed"
        );
        Ok(ScheduleAnalysis {
            staking_pct,
            episodes,
            total_variance_days,
            tracking_error,
            overweight_benefit,
            expected_shortfall: shortfall,
            net_overweight,
            extra_staking_benefit,
            net_benefit: net_overweight + extra_staking_benefit,
        })
    }

    fn analyze_episode(&self, model: &ThresholdVariance, pattern: RedemptionPattern) -> EngineResult<EpisodeMetrics> {
        ensure_in_range("redemption_pct", pattern.redemption_pct, 0.0, 1.0)?;
        let overweight = model.overweight(pattern.redemption_pct);
        let active = self.solution.active_weights(&[overweight])?;
        let daily_variance = self.solution.variance_of(&active);
        if !daily_variance.is_finite() {
            return Err(EngineError::numerical(
                "episode variance",
                format!("non-finite variance at redemption {}", pattern.redemption_pct),
            ));
        }
        let days = pattern.duration_days as f64;
        Ok(EpisodeMetrics {
            pattern,
            staking_pct: model.staking_pct,
            overweight,
            active_weights: active.iter().copied().collect(),
            daily_variance,
            tracking_error: (days * daily_variance).sqrt(),
            staking_benefit: overweight * self.staking.annual_yield * days / DAYS_PER_YEAR,
            expected_shortfall: expected_shortfall((daily_variance * TRADING_DAYS_PER_YEAR).sqrt()),
        })
    }
}
