//! Monte Carlo check of the closed-form tracking error
//!
//! Each simulated year draws `N ~ Poisson(λ)` redemption episodes with sizes
//! from the discrete distribution and accumulates the variance-days of every
//! episode. The sample mean should converge to the analytical annual variance.

use crate::error::{EngineError, EngineResult};
use crate::tracking::TrackingErrorEngine;
use crate::types::RedemptionDistribution;
use crate::variance::VarianceModel;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Poisson;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloConfig {
    pub simulations: usize,
    /// Fixed seed for reproducible runs; entropy when absent
    pub seed: Option<u64>,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            simulations: 10_000,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloSummary {
    pub simulations: usize,
    pub mean_annual_variance: f64,
    pub analytical_annual_variance: f64,
    /// `|simulated − analytical| / analytical`, 0 when both vanish
    pub relative_gap: f64,
    pub mean_tracking_error: f64,
    pub te_p5: f64,
    pub te_p50: f64,
    pub te_p95: f64,
}

pub struct MonteCarloValidator<'a> {
    model: &'a VarianceModel,
    distribution: &'a RedemptionDistribution,
}

impl<'a> MonteCarloValidator<'a> {
    pub fn new(model: &'a VarianceModel, distribution: &'a RedemptionDistribution) -> Self {
        Self {
            model,
            distribution,
        }
    }

    pub fn run(&self, config: &MonteCarloConfig) -> EngineResult<MonteCarloSummary> {
        if config.simulations == 0 {
            return Err(EngineError::invalid("monte carlo needs at least one simulation"));
        }
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let sampler = EpisodeSampler::new(self.distribution)?;

        let mut variances: Vec<f64> = (0..config.simulations)
            .map(|_| self.simulate_year(&mut rng, &sampler))
            .collect();
        let n = variances.len() as f64;
        let mean_annual_variance = variances.iter().fold(0.0, |acc, v| acc + v) / n;

        for v in variances.iter_mut() {
            *v = v.sqrt();
        }
        let mut te = variances;
        let mean_tracking_error = te.iter().fold(0.0, |acc, v| acc + v) / n;
        te.sort_by(f64::total_cmp);

        let analytical_annual_variance = TrackingErrorEngine::evaluate(self.model, self.distribution).annual_variance;
        let relative_gap = if analytical_annual_variance > 0.0 {
            (mean_annual_variance - analytical_annual_variance).abs() / analytical_annual_variance
        } else if mean_annual_variance > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let summary = MonteCarloSummary {
            simulations: config.simulations,
            mean_annual_variance,
            analytical_annual_variance,
            relative_gap,
            mean_tracking_error,
            te_p5: percentile(&te, 0.05),
            te_p50: percentile(&te, 0.50),
            te_p95: percentile(&te, 0.95),
        };
        info!(
            simulations = summary.simulations,
            relative_gap = summary.relative_gap,
            "monte carlo validation complete"
        );
        Ok(summary)
    }

    fn simulate_year<R: Rng>(&self, rng: &mut R, sampler: &EpisodeSampler) -> f64 {
        let episodes = sampler.episode_count(rng);
        // Fold from +0.0: an empty f64 sum is -0.0
        (0..episodes).fold(0.0, |acc, _| acc + self.model.episode_variance_days(sampler.size(rng)))
    }
}

struct EpisodeSampler<'a> {
    count: Option<Poisson<f64>>,
    index: WeightedIndex<f64>,
    sizes: &'a [f64],
}

impl<'a> EpisodeSampler<'a> {
    fn new(distribution: &'a RedemptionDistribution) -> EngineResult<Self> {
        let lambda = distribution.expected_per_year();
        // Poisson rejects λ = 0; a year with no expected episodes is simply empty
        let count = if lambda > 0.0 {
            Some(
                Poisson::new(lambda)
                    .map_err(|e| EngineError::invalid(format!("episode rate {lambda}: {e}")))?,
            )
        } else {
            None
        };
        let index = WeightedIndex::new(distribution.probabilities())
            .map_err(|e| EngineError::invalid(format!("redemption probabilities: {e}")))?;
        debug!(lambda, support = distribution.sizes().len(), "episode sampler ready");
        Ok(Self {
            count,
            index,
            sizes: distribution.sizes(),
        })
    }

    fn episode_count<R: Rng>(&self, rng: &mut R) -> u64 {
        self.count.as_ref().map_or(0, |p| p.sample(rng) as u64)
    }

    fn size<R: Rng>(&self, rng: &mut R) -> f64 {
        self.sizes[self.index.sample(rng)]
    }
}

/// Nearest-rank percentile of sorted data
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
