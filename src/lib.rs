//! Two-Asset Staking Tracking-Error Engine
//!
//! Quantifies the tracking error an index fund takes on by staking part of
//! two illiquid holdings, and trades it off against staking yield:
//! - Covariance construction from volatilities and block correlations
//! - Minimum-variance hedge vectors via Lagrange multipliers
//! - Threshold variance model with joint and residual regimes
//! - Closed-form annual tracking error and its decomposition
//! - Net benefit against the fund's tracking-difference budget
//! - Parallel sensitivity grids and optimum search
//! - Monte Carlo validation of the closed form
//! - Single-asset analysis of explicit redemption schedules

pub mod types;
pub mod error;
pub mod covariance;
pub mod optimization;
pub mod cache;
pub mod variance;
pub mod expectation;
pub mod tracking;
pub mod risk;
pub mod benefit;
pub mod sensitivity;
pub mod simulation;
pub mod episodes;
pub mod config;

pub use types::*;
pub use error::*;
pub use covariance::*;
pub use optimization::*;
pub use cache::*;
pub use variance::*;
pub use expectation::*;
pub use tracking::*;
pub use risk::*;
pub use benefit::*;
pub use sensitivity::*;
pub use simulation::*;
pub use episodes::*;
pub use config::*;

use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Main orchestrator: request in, full analysis out
pub struct StakingRiskEngine {
    config: EngineConfig,
    grid: SensitivityGridEngine,
    cache: FactorizationCache,
    pool: Option<rayon::ThreadPool>,
}

impl StakingRiskEngine {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let pool = match config.threads {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("staking-te-{i}"))
                    .build()
                    .map_err(|e| EngineError::invalid(format!("thread pool: {e}")))?,
            ),
            None => None,
        };
        Ok(Self {
            grid: SensitivityGridEngine::new(config.grid.clone()),
            config,
            cache: FactorizationCache::new(),
            pool,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &FactorizationCache {
        &self.cache
    }

    /// Hedge solution for the request's market, shared through the cache
    pub fn hedge_solution(&self, resolved: &ResolvedRequest) -> EngineResult<Arc<HedgeSolution>> {
        let vols = resolved.market.volatility_vector(&resolved.universe)?;
        self.cache
            .get_or_solve(&resolved.universe, &vols, &resolved.market.correlations)
    }

    /// Level-independent inputs for a resolved request
    pub fn scenario(&self, resolved: &ResolvedRequest) -> EngineResult<StakingScenario> {
        let solution = self.hedge_solution(resolved)?;
        let weights = resolved.leg_weights()?;
        let k = KCoefficients::from_solution(&solution, weights)?;
        debug!(k_aa = k.aa, k_bb = k.bb, k_ab = k.ab, "k-coefficients");
        StakingScenario::new(
            k,
            weights,
            resolved.staking,
            resolved.distribution.clone(),
            resolved.fund,
        )
    }

    /// Schedule analyzer for one staked leg of a resolved request
    pub fn episodic_analyzer(&self, resolved: &ResolvedRequest, leg: Leg) -> EngineResult<EpisodicAnalyzer> {
        let weight = resolved.leg_weights()?.get(leg);
        EpisodicAnalyzer::new(&resolved.universe, &resolved.market, leg, weight, resolved.staking.get(leg))
    }

    #[instrument(skip_all)]
    pub fn calculate(&self, request: &CalculationRequest) -> EngineResult<CalculationResponse> {
        let resolved = request.resolve()?;
        let scenario = self.scenario(&resolved)?;
        let configured = resolved.staking.map(|s| s.staking_pct);

        let point = scenario.evaluate_configured()?;

        let sweep = self.run(|| self.grid.sweep_1d(&scenario))?;
        let fallback_level = match sweep.mode {
            SweepMode::Single(Leg::B) => configured.b,
            _ => configured.a,
        };
        let optimal_staking_level = sweep.optimum().map_or(fallback_level, |(level, _)| level);

        let (optimal_staking_levels, cells) = if self.config.include_2d {
            let grid = self.run(|| self.grid.sweep_2d(&scenario))?;
            let best = grid.optimum().map_or(configured, |p| p.staking);
            (best, grid.cells())
        } else {
            (configured, Vec::new())
        };

        let monte_carlo = match &self.config.monte_carlo {
            Some(mc) => {
                let model = scenario.model_at(configured);
                Some(MonteCarloValidator::new(&model, scenario.distribution()).run(mc)?)
            }
            None => None,
        };

        info!(
            tracking_error = point.tracking.tracking_error,
            net_benefit_bps = point.benefit.net_benefit_bps,
            optimal_staking_level,
            "calculation complete"
        );

        let mut parameters_used = request.clone();
        parameters_used.fund_details = Some(resolved.fund);

        Ok(CalculationResponse {
            decomposition: point.tracking.decomposition,
            net_benefit: point.benefit,
            k_coefficients: *scenario.k(),
            optimal_staking_level,
            optimal_staking_levels,
            sensitivity_analysis: sweep.rows(),
            sensitivity_analysis_2d: cells,
            monte_carlo,
            parameters_used,
        })
    }

    fn run<T: Send>(&self, op: impl FnOnce() -> T + Send) -> T {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}
