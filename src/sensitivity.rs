//! Sensitivity grids over staking levels
//!
//! Implements:
//! 1. A batch kernel evaluating TE and net benefit for N staking pairs
//! 2. One-dimensional sweeps (both legs together, or one leg alone)
//! 3. Two-dimensional grids over both legs
//! 4. Optimum selection by net benefit
//!
//! Everything that does not depend on the staking level (k-coefficients,
//! weights, distribution, fund) is fixed in a [`StakingScenario`]; a grid is
//! then just a matrix of `(s_A, s_B)` rows fed through the same kernel. A
//! single evaluation is a batch of one.

use crate::benefit::{BenefitInputs, NetBenefitEngine, NetBenefitResult};
use crate::error::{EngineError, EngineResult};
use crate::expectation::ExpectationEngine;
use crate::optimization::KCoefficients;
use crate::tracking::{TrackingErrorEngine, TrackingErrorResult};
use crate::types::{FundConstraints, Leg, PerLeg, RedemptionDistribution, StakingConfig};
use crate::variance::VarianceModel;
use ndarray::{Array1, Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default 1-D staking levels
pub const DEFAULT_LEVELS: [f64; 15] = [
    0.70, 0.75, 0.80, 0.85, 0.88, 0.89, 0.90, 0.91, 0.92, 0.93, 0.94, 0.95, 0.96, 0.97, 0.98,
];

/// Points per axis of the default 2-D grid
pub const DEFAULT_GRID_POINTS: usize = 31;

/// Full result for one staking pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointEvaluation {
    pub staking: PerLeg<f64>,
    pub tracking: TrackingErrorResult,
    pub benefit: NetBenefitResult,
}

impl PointEvaluation {
    pub fn net_benefit_bps(&self) -> f64 {
        self.benefit.net_benefit_bps
    }
}

/// Level-independent inputs of one calculation
pub struct StakingScenario {
    k: KCoefficients,
    staking: PerLeg<StakingConfig>,
    distribution: RedemptionDistribution,
    benefit: NetBenefitEngine,
}

impl StakingScenario {
    pub fn new(
        k: KCoefficients,
        weights: PerLeg<f64>,
        staking: PerLeg<StakingConfig>,
        distribution: RedemptionDistribution,
        fund: FundConstraints,
    ) -> EngineResult<Self> {
        staking.a.validate()?;
        staking.b.validate()?;
        fund.validate()?;
        let benefit = NetBenefitEngine::new(weights, distribution.expected_per_year(), fund);
        Ok(Self {
            k,
            staking,
            distribution,
            benefit,
        })
    }

    pub fn k(&self) -> &KCoefficients {
        &self.k
    }

    pub fn staking(&self) -> PerLeg<StakingConfig> {
        self.staking
    }

    pub fn distribution(&self) -> &RedemptionDistribution {
        &self.distribution
    }

    /// Configs with staking levels replaced
    pub fn staking_at(&self, levels: PerLeg<f64>) -> PerLeg<StakingConfig> {
        PerLeg::new(
            self.staking.a.with_staking(levels.a),
            self.staking.b.with_staking(levels.b),
        )
    }

    pub fn model_at(&self, levels: PerLeg<f64>) -> VarianceModel {
        VarianceModel::new(self.k, self.staking_at(levels))
    }

    /// Evaluates at the configured staking levels
    pub fn evaluate_configured(&self) -> EngineResult<PointEvaluation> {
        self.evaluate(self.staking.a.staking_pct, self.staking.b.staking_pct)
    }

    pub fn evaluate(&self, staking_a: f64, staking_b: f64) -> EngineResult<PointEvaluation> {
        let levels = ndarray::arr2(&[[staking_a, staking_b]]);
        self.evaluate_batch(levels.view(), false)?
            .iter()
            .next()
            .copied()
            .ok_or_else(|| EngineError::invalid("empty evaluation batch"))
    }

    /// Evaluates every `(s_A, s_B)` row of `levels`, in row order.
    pub fn evaluate_batch(&self, levels: ArrayView2<f64>, parallel: bool) -> EngineResult<Array1<PointEvaluation>> {
        if levels.ncols() != 2 {
            return Err(EngineError::invalid(format!(
                "staking level batch needs 2 columns, got {}",
                levels.ncols()
            )));
        }
        if let Some(bad) = levels.iter().find(|v| !v.is_finite() || **v < 0.0 || **v > 1.0) {
            return Err(EngineError::invalid(format!(
                "staking level must be in [0, 1], got {bad}"
            )));
        }

        let rows = Zip::from(levels.rows());
        let out = if parallel {
            rows.par_map_collect(|row| self.evaluate_row(row[0], row[1]))
        } else {
            rows.map_collect(|row| self.evaluate_row(row[0], row[1]))
        };
        metrics::counter!("staking_te_points_evaluated_total").increment(out.len() as u64);
        Ok(out)
    }

    fn evaluate_row(&self, staking_a: f64, staking_b: f64) -> PointEvaluation {
        let levels = PerLeg::new(staking_a, staking_b);
        let staking = self.staking_at(levels);
        let model = VarianceModel::new(self.k, staking);
        let moments = ExpectationEngine::moments(&self.distribution, model.thresholds);
        let tracking = TrackingErrorEngine::from_moments(&model, moments, self.distribution.expected_per_year());
        let benefit = self.benefit.evaluate(&BenefitInputs {
            tracking_error: tracking.tracking_error,
            staking,
            expected_excess: moments.first,
        });
        PointEvaluation {
            staking: levels,
            tracking,
            benefit,
        }
    }
}

/// What a 1-D sweep varies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Both legs at the same level
    #[default]
    Joint,
    /// One leg swept, the other held at its configured level
    Single(Leg),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub levels: Vec<f64>,
    pub sweep: SweepMode,
    pub grid_points: usize,
    /// Per-leg `(low, high)`; defaults to `(baseline, 1.0)`
    pub range_a: Option<(f64, f64)>,
    pub range_b: Option<(f64, f64)>,
    pub parallel: bool,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            levels: DEFAULT_LEVELS.to_vec(),
            sweep: SweepMode::Joint,
            grid_points: DEFAULT_GRID_POINTS,
            range_a: None,
            range_b: None,
            parallel: true,
        }
    }
}

/// Row of a 1-D sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensitivityPoint {
    pub staking_level: f64,
    pub tracking_error: f64,
    pub yield_benefit: f64,
    pub expected_shortfall: f64,
    pub net_benefit_bps: f64,
}

/// Cell of a 2-D grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensitivityPoint2D {
    pub staking_a: f64,
    pub staking_b: f64,
    pub tracking_error: f64,
    pub yield_benefit: f64,
    pub expected_shortfall: f64,
    pub net_benefit_bps: f64,
}

impl From<&PointEvaluation> for SensitivityPoint2D {
    fn from(p: &PointEvaluation) -> Self {
        Self {
            staking_a: p.staking.a,
            staking_b: p.staking.b,
            tracking_error: p.tracking.tracking_error,
            yield_benefit: p.benefit.total_yield_benefit,
            expected_shortfall: p.benefit.expected_shortfall,
            net_benefit_bps: p.benefit.net_benefit_bps,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SensitivityGrid1D {
    pub mode: SweepMode,
    pub levels: Vec<f64>,
    pub points: Vec<PointEvaluation>,
}

impl SensitivityGrid1D {
    /// Index of the best point; ties go to the first
    pub fn optimum_index(&self) -> Option<usize> {
        argmax(self.points.iter().map(PointEvaluation::net_benefit_bps))
    }

    pub fn optimum(&self) -> Option<(f64, &PointEvaluation)> {
        self.optimum_index().map(|i| (self.levels[i], &self.points[i]))
    }

    pub fn rows(&self) -> Vec<SensitivityPoint> {
        self.levels
            .iter()
            .zip(&self.points)
            .map(|(&staking_level, p)| SensitivityPoint {
                staking_level,
                tracking_error: p.tracking.tracking_error,
                yield_benefit: p.benefit.total_yield_benefit,
                expected_shortfall: p.benefit.expected_shortfall,
                net_benefit_bps: p.benefit.net_benefit_bps,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct SensitivityGrid2D {
    pub levels_a: Vec<f64>,
    pub levels_b: Vec<f64>,
    /// `points[(i, j)]` is B level `i`, A level `j`
    pub points: Array2<PointEvaluation>,
}

impl SensitivityGrid2D {
    /// Row-major `(i, j)` of the best cell; ties go to the first
    pub fn optimum_index(&self) -> Option<(usize, usize)> {
        let ncols = self.points.ncols();
        argmax(self.points.iter().map(PointEvaluation::net_benefit_bps)).map(|k| (k / ncols, k % ncols))
    }

    pub fn optimum(&self) -> Option<&PointEvaluation> {
        self.optimum_index().map(|ij| &self.points[ij])
    }

    pub fn cells(&self) -> Vec<SensitivityPoint2D> {
        self.points.iter().map(SensitivityPoint2D::from).collect()
    }
}

/// First index of the maximum; NaN never wins
fn argmax(values: impl Iterator<Item = f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.enumerate() {
        match best {
            None if !v.is_nan() => best = Some((i, v)),
            Some((_, b)) if v > b => best = Some((i, v)),
            _ => {}
        }
    }
    best.map(|(i, _)| i)
}

pub struct SensitivityGridEngine {
    config: GridConfig,
}

impl SensitivityGridEngine {
    pub fn new(config: GridConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn sweep_1d(&self, scenario: &StakingScenario) -> EngineResult<SensitivityGrid1D> {
        let configured = scenario.staking().map(|s| s.staking_pct);
        let levels = self.config.levels.clone();
        let mut batch = Array2::<f64>::zeros((levels.len(), 2));
        for (mut row, &level) in batch.rows_mut().into_iter().zip(&levels) {
            let pair = match self.config.sweep {
                SweepMode::Joint => PerLeg::new(level, level),
                SweepMode::Single(Leg::A) => PerLeg::new(level, configured.b),
                SweepMode::Single(Leg::B) => PerLeg::new(configured.a, level),
            };
            row[0] = pair.a;
            row[1] = pair.b;
        }
        let points = scenario.evaluate_batch(batch.view(), self.config.parallel)?.to_vec();
        debug!(points = points.len(), mode = ?self.config.sweep, "1-D sweep evaluated");
        Ok(SensitivityGrid1D {
            mode: self.config.sweep,
            levels,
            points,
        })
    }

    pub fn sweep_2d(&self, scenario: &StakingScenario) -> EngineResult<SensitivityGrid2D> {
        let staking = scenario.staking();
        let levels_a = axis(
            self.config.range_a.unwrap_or((staking.a.baseline_staking_pct, 1.0)),
            self.config.grid_points,
        )?;
        let levels_b = axis(
            self.config.range_b.unwrap_or((staking.b.baseline_staking_pct, 1.0)),
            self.config.grid_points,
        )?;

        let (nb, na) = (levels_b.len(), levels_a.len());
        let batch = Array2::from_shape_fn((nb * na, 2), |(k, col)| {
            if col == 0 {
                levels_a[k % na]
            } else {
                levels_b[k / na]
            }
        });
        let points = scenario
            .evaluate_batch(batch.view(), self.config.parallel)?
            .into_shape_with_order((nb, na))
            .map_err(|e| EngineError::invalid(format!("grid reshape failed: {e}")))?;
        debug!(rows = nb, cols = na, "2-D grid evaluated");
        Ok(SensitivityGrid2D {
            levels_a: levels_a.to_vec(),
            levels_b: levels_b.to_vec(),
            points,
        })
    }
}

fn axis((low, high): (f64, f64), n: usize) -> EngineResult<Array1<f64>> {
    if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low > high {
        return Err(EngineError::invalid(format!(
            "grid range ({low}, {high}) must satisfy 0 <= low <= high <= 1"
        )));
    }
    Ok(Array1::linspace(low, high, n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn scenario() -> StakingScenario {
        let k = KCoefficients { aa: 2.4e-5, bb: 0.9e-5, ab: 0.6e-5 };
        let eth = StakingConfig { staking_pct: 0.9, unbonding_days: 10, annual_yield: 0.03, baseline_staking_pct: 0.7 };
        let sol = StakingConfig { staking_pct: 0.9, unbonding_days: 2, annual_yield: 0.073, baseline_staking_pct: 0.7 };
        let d = RedemptionDistribution::from_counts(&[0.05, 0.10, 0.20, 0.30], &[12, 3, 2, 1], 18.0).unwrap();
        StakingScenario::new(k, PerLeg::new(0.1049, 0.0387), PerLeg::new(eth, sol), d, FundConstraints::default())
            .unwrap()
    }

    #[test]
    fn test_batch_matches_single_evaluation() {
        let s = scenario();
        let levels = ndarray::arr2(&[[0.7, 0.7], [0.85, 0.95], [0.93, 0.8], [1.0, 1.0], [0.0, 0.5]]);
        for parallel in [false, true] {
            let batch = s.evaluate_batch(levels.view(), parallel).unwrap();
            for (row, point) in levels.rows().into_iter().zip(batch.iter()) {
                let single = s.evaluate(row[0], row[1]).unwrap();
                assert_relative_eq!(single.tracking.tracking_error, point.tracking.tracking_error, max_relative = 1e-9);
                assert_relative_eq!(single.benefit.net_benefit_bps, point.benefit.net_benefit_bps, max_relative = 1e-9);
            }
        }
    }

    #[test]
    fn test_batch_rejects_bad_levels() {
        let s = scenario();
        assert!(s.evaluate(1.2, 0.9).is_err());
        assert!(s.evaluate(0.9, f64::NAN).is_err());
        let three = Array2::<f64>::zeros((2, 3));
        assert!(s.evaluate_batch(three.view(), false).is_err());
    }

    #[test]
    fn test_default_1d_sweep() {
        let s = scenario();
        let grid = SensitivityGridEngine::new(GridConfig::default()).sweep_1d(&s).unwrap();
        assert_eq!(grid.points.len(), DEFAULT_LEVELS.len());
        for (level, p) in grid.levels.iter().zip(&grid.points) {
            assert_eq!(p.staking.a, *level);
            assert_eq!(p.staking.b, *level);
        }
        let (level, best) = grid.optimum().unwrap();
        assert!(grid.points.iter().all(|p| p.net_benefit_bps() <= best.net_benefit_bps()));
        assert!(DEFAULT_LEVELS.contains(&level));
    }

    #[test]
    fn test_single_leg_sweep_holds_other_leg() {
        let s = scenario();
        let config = GridConfig { sweep: SweepMode::Single(Leg::B), levels: vec![0.7, 0.8, 0.95], ..GridConfig::default() };
        let grid = SensitivityGridEngine::new(config).sweep_1d(&s).unwrap();
        for p in &grid.points {
            assert_eq!(p.staking.a, 0.9);
        }
        assert_eq!(grid.points[2].staking.b, 0.95);
    }

    #[test]
    fn test_2d_grid_layout() {
        let s = scenario();
        let config = GridConfig { grid_points: 4, range_b: Some((0.8, 0.95)), ..GridConfig::default() };
        let grid = SensitivityGridEngine::new(config).sweep_2d(&s).unwrap();
        assert_eq!(grid.points.dim(), (4, 4));
        assert_abs_diff_eq!(grid.levels_a[0], 0.7, epsilon = 1e-15);
        assert_abs_diff_eq!(grid.levels_a[3], 1.0, epsilon = 1e-15);
        // Rows follow leg B, columns follow leg A
        let cell = &grid.points[(1, 2)];
        assert_eq!(cell.staking.b, grid.levels_b[1]);
        assert_eq!(cell.staking.a, grid.levels_a[2]);
        let cells = grid.cells();
        assert_eq!(cells[6].staking_a, grid.levels_a[2]);

        let (i, j) = grid.optimum_index().unwrap();
        let best = grid.points[(i, j)].net_benefit_bps();
        assert!(grid.points.iter().all(|p| p.net_benefit_bps() <= best));
    }

    #[test]
    fn test_default_2d_grid_size() {
        let grid = SensitivityGridEngine::new(GridConfig::default()).sweep_2d(&scenario()).unwrap();
        assert_eq!(grid.points.len(), 31 * 31);
    }

    #[test]
    fn test_ties_go_to_first_point() {
        assert_eq!(argmax([1.0, 3.0, 3.0, 2.0].into_iter()), Some(1));
        assert_eq!(argmax([f64::NAN, 2.0, 2.0].into_iter()), Some(1));
        assert_eq!(argmax(std::iter::empty()), None);

        // Thresholds above every redemption size and levels under baseline:
        // every point nets exactly zero
        let s = scenario();
        let config = GridConfig { levels: vec![0.5, 0.6, 0.65], ..GridConfig::default() };
        let grid = SensitivityGridEngine::new(config).sweep_1d(&s).unwrap();
        assert_eq!(grid.optimum_index(), Some(0));
    }

    #[test]
    fn test_empty_grid_has_no_optimum() {
        let config = GridConfig { levels: Vec::new(), grid_points: 0, ..GridConfig::default() };
        let engine = SensitivityGridEngine::new(config);
        let s = scenario();
        assert!(engine.sweep_1d(&s).unwrap().optimum().is_none());
        assert!(engine.sweep_2d(&s).unwrap().optimum().is_none());
    }

    #[test]
    fn test_invalid_range_rejected() {
        let config = GridConfig { range_a: Some((0.9, 0.8)), ..GridConfig::default() };
        assert!(SensitivityGridEngine::new(config).sweep_2d(&scenario()).is_err());
    }
}
