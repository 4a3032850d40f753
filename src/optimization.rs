//! Optimization module
//!
//! Implements:
//! 1. Minimum-variance hedge vectors via Lagrange multipliers
//! 2. Direct active-weight solves for arbitrary overweights
//! 3. k-coefficients for the two-asset variance model
//!
//! For target assets `t₁..t_k` the constraint matrix `C` has a budget row
//! `1ᵗ` plus one unit row per target. Minimizing `aᵗΣa` subject to `C a = c`
//! gives `a = Σ⁻¹Cᵗ(CΣ⁻¹Cᵗ)⁻¹c`; the hedge vector for `t_i` is the solution
//! for `c = e_{i+1}`. `(CΣ⁻¹Cᵗ)⁻¹` is computed once and shared by every
//! target and every right-hand side.

use crate::covariance::CovarianceMatrix;
use crate::error::{EngineError, EngineResult};
use crate::types::{Leg, PerLeg};
use nalgebra::{DMatrix, DVector};
use smallvec::SmallVec;
use tracing::debug;

/// Covariance matrices with a worse condition number are rejected
pub const MAX_CONDITION_NUMBER: f64 = 1e12;

/// Constrained minimum-variance solver over one covariance matrix
#[derive(Debug, Clone)]
pub struct ConstraintOptimizer {
    cov: CovarianceMatrix,
    inv_cov: DMatrix<f64>,
    condition_number: f64,
}

impl ConstraintOptimizer {
    /// Factorizes `cov`, failing if it is not safely invertible.
    pub fn new(cov: CovarianceMatrix) -> EngineResult<Self> {
        let eigen = cov.as_matrix().clone().symmetric_eigen();
        let min = eigen.eigenvalues.min();
        let max = eigen.eigenvalues.max();
        if !min.is_finite() || !max.is_finite() || min <= 0.0 {
            return Err(EngineError::numerical(
                "covariance inverse",
                format!("matrix is not positive definite (smallest eigenvalue {min:e})"),
            ));
        }
        let condition_number = max / min;
        if condition_number > MAX_CONDITION_NUMBER {
            return Err(EngineError::numerical(
                "covariance inverse",
                format!("condition number {condition_number:e} exceeds {MAX_CONDITION_NUMBER:e}"),
            ));
        }
        let inv_cov = cov
            .as_matrix()
            .clone()
            .cholesky()
            .ok_or_else(|| EngineError::numerical("covariance inverse", "Cholesky factorization failed"))?
            .inverse();

        debug!(dim = cov.dim(), condition_number, "covariance factorized");
        Ok(Self {
            cov,
            inv_cov,
            condition_number,
        })
    }

    pub fn covariance(&self) -> &CovarianceMatrix {
        &self.cov
    }

    pub fn condition_number(&self) -> f64 {
        self.condition_number
    }

    fn constraint_matrix(&self, targets: &[usize]) -> EngineResult<DMatrix<f64>> {
        let n = self.cov.dim();
        if targets.is_empty() {
            return Err(EngineError::invalid("at least one target asset is required"));
        }
        if targets.len() + 1 > n {
            return Err(EngineError::invalid(format!(
                "{} targets leave no free assets in a universe of {n}",
                targets.len()
            )));
        }
        let mut c = DMatrix::zeros(targets.len() + 1, n);
        c.row_mut(0).fill(1.0);
        for (row, &t) in targets.iter().enumerate() {
            if t >= n {
                return Err(EngineError::invalid(format!("target index {t} out of range")));
            }
            if targets[..row].contains(&t) {
                return Err(EngineError::invalid(format!("target index {t} given twice")));
            }
            c[(row + 1, t)] = 1.0;
        }
        Ok(c)
    }

    /// Solves for the hedge vector of every target, sharing one factorization.
    pub fn solve(&self, targets: &[usize]) -> EngineResult<HedgeSolution> {
        let c = self.constraint_matrix(targets)?;
        let projected = &self.inv_cov * c.transpose();
        let lagrange = &c * &projected;

        let eigen = lagrange.clone().symmetric_eigen();
        let min = eigen.eigenvalues.min();
        let max = eigen.eigenvalues.max();
        if !(min > max * f64::EPSILON * 1e3) {
            return Err(EngineError::numerical(
                "constraint system",
                format!("CΣ⁻¹Cᵗ is singular (eigenvalues {min:e}..{max:e})"),
            ));
        }
        let lagrange_inverse = lagrange
            .lu()
            .try_inverse()
            .ok_or_else(|| EngineError::numerical("constraint system", "CΣ⁻¹Cᵗ could not be inverted"))?;

        // Column j of Σ⁻¹Cᵗ(CΣ⁻¹Cᵗ)⁻¹ answers c = e_j.
        let responses = &projected * &lagrange_inverse;
        let hedge_vectors: SmallVec<[DVector<f64>; 2]> = (0..targets.len())
            .map(|i| responses.column(i + 1).into_owned())
            .collect();

        let k = hedge_vectors.len();
        let gram = DMatrix::from_fn(k, k, |i, j| self.cov.bilinear(&hedge_vectors[i], &hedge_vectors[j]));

        debug!(targets = ?targets, "hedge vectors solved");
        Ok(HedgeSolution {
            covariance: self.cov.clone(),
            targets: targets.iter().copied().collect(),
            responses,
            hedge_vectors,
            gram,
        })
    }
}

/// Hedge vectors and the shared Lagrange factorization for a target set
#[derive(Debug, Clone)]
pub struct HedgeSolution {
    covariance: CovarianceMatrix,
    targets: SmallVec<[usize; 2]>,
    /// `Σ⁻¹Cᵗ(CΣ⁻¹Cᵗ)⁻¹`, one column per constraint row
    responses: DMatrix<f64>,
    hedge_vectors: SmallVec<[DVector<f64>; 2]>,
    /// `v_iᵗ Σ v_j`
    gram: DMatrix<f64>,
}

impl HedgeSolution {
    pub fn covariance(&self) -> &CovarianceMatrix {
        &self.covariance
    }

    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    /// Hedge vector of the `i`-th target
    pub fn hedge_vector(&self, i: usize) -> Option<&DVector<f64>> {
        self.hedge_vectors.get(i)
    }

    /// `v_iᵗ Σ v_j`
    pub fn gram(&self, i: usize, j: usize) -> f64 {
        self.gram[(i, j)]
    }

    /// Optimal active weights for overweights `δ` on the targets (in target order).
    pub fn active_weights(&self, overweights: &[f64]) -> EngineResult<DVector<f64>> {
        if overweights.len() != self.targets.len() {
            return Err(EngineError::invalid(format!(
                "{} overweights for {} targets",
                overweights.len(),
                self.targets.len()
            )));
        }
        let mut rhs = DVector::zeros(self.targets.len() + 1);
        for (i, &delta) in overweights.iter().enumerate() {
            rhs[i + 1] = delta;
        }
        Ok(&self.responses * rhs)
    }

    /// Daily tracking variance `aᵗΣa` of an active-weight vector
    pub fn variance_of(&self, active: &DVector<f64>) -> f64 {
        self.covariance.quadratic_form(active)
    }
}

/// Per-asset k-coefficients of the two-asset variance model
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KCoefficients {
    pub aa: f64,
    pub bb: f64,
    pub ab: f64,
}

impl KCoefficients {
    /// `k_ij = w_i w_j (v_iᵗΣv_j)` from a two-target solution ordered (A, B).
    pub fn from_solution(solution: &HedgeSolution, weights: PerLeg<f64>) -> EngineResult<Self> {
        if solution.targets().len() != 2 {
            return Err(EngineError::invalid(format!(
                "two-asset k-coefficients need 2 targets, solution has {}",
                solution.targets().len()
            )));
        }
        Ok(Self {
            aa: weights.a * weights.a * solution.gram(0, 0),
            bb: weights.b * weights.b * solution.gram(1, 1),
            ab: weights.a * weights.b * solution.gram(0, 1),
        })
    }

    /// Own-asset coefficient
    pub fn own(&self, leg: Leg) -> f64 {
        match leg {
            Leg::A => self.aa,
            Leg::B => self.bb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::{CorrelationSpec, CovarianceBuilder};
    use crate::types::AssetUniverse;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn six_asset_optimizer() -> ConstraintOptimizer {
        let u = AssetUniverse::new(["BTC", "ETH", "XRP", "SOL", "ADA", "XLM"], "ETH", "SOL").unwrap();
        let vols = [0.039, 0.048, 0.053, 0.071, 0.055, 0.051];
        let spec = CorrelationSpec::uniform(0.6).with_pair("BTC", "ETH", 0.7);
        let cov = CovarianceBuilder::build(&u, &vols, &spec).unwrap();
        ConstraintOptimizer::new(cov).unwrap()
    }

    #[test]
    fn test_hedge_vector_invariants() {
        let opt = six_asset_optimizer();
        let sol = opt.solve(&[1, 3]).unwrap();
        let v_a = sol.hedge_vector(0).unwrap();
        let v_b = sol.hedge_vector(1).unwrap();

        assert_abs_diff_eq!(v_a.sum(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v_a[1], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v_a[3], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v_b.sum(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v_b[3], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v_b[1], 0.0, epsilon = 1e-12);
        // BTC carries most of the offset for an ETH overweight
        assert!(v_a[0] < 0.0);
    }

    #[test]
    fn test_single_target_solution() {
        let opt = six_asset_optimizer();
        let sol = opt.solve(&[1]).unwrap();
        let v = sol.hedge_vector(0).unwrap();
        assert_abs_diff_eq!(v.sum(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v[1], 1.0, epsilon = 1e-12);
        assert!(sol.gram(0, 0) > 0.0);
    }

    #[test]
    fn test_active_weights_are_linear_in_overweight() {
        let opt = six_asset_optimizer();
        let sol = opt.solve(&[1]).unwrap();
        let v = sol.hedge_vector(0).unwrap();
        for delta in [0.0, 0.01, 0.02, 0.03, 0.04, 0.05, 0.25] {
            let active = sol.active_weights(&[delta]).unwrap();
            let expected = v * delta;
            assert_abs_diff_eq!((active - expected).norm(), 0.0, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_variance_is_quadratic_in_overweight() {
        let opt = six_asset_optimizer();
        let sol = opt.solve(&[1]).unwrap();
        let v_sigma_v = sol.gram(0, 0);
        for delta in [0.01, 0.02, 0.03, 0.04, 0.05] {
            let active = sol.active_weights(&[delta]).unwrap();
            assert_relative_eq!(sol.variance_of(&active), delta * delta * v_sigma_v, max_relative = 1e-10);
        }
    }

    #[test]
    fn test_joint_overweights_superpose() {
        let opt = six_asset_optimizer();
        let sol = opt.solve(&[1, 3]).unwrap();
        let active = sol.active_weights(&[0.02, 0.005]).unwrap();
        let expected = sol.hedge_vector(0).unwrap() * 0.02 + sol.hedge_vector(1).unwrap() * 0.005;
        assert_abs_diff_eq!((active - expected).norm(), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_hedge_is_minimum_variance() {
        let opt = six_asset_optimizer();
        let sol = opt.solve(&[1]).unwrap();
        let v = sol.hedge_vector(0).unwrap().clone();
        let best = sol.variance_of(&v);
        // Any feasible perturbation (sum zero, zero on the target) increases variance
        let mut bump = DVector::zeros(6);
        bump[0] = 0.01;
        bump[4] = -0.01;
        assert!(sol.variance_of(&(&v + &bump)) > best);
        assert!(sol.variance_of(&(&v - &bump)) > best);
    }

    #[test]
    fn test_singular_covariance_is_rejected() {
        let u = AssetUniverse::new(["BTC", "ETH", "SOL"], "ETH", "SOL").unwrap();
        let cov = CovarianceBuilder::build(&u, &[0.04, 0.05, 0.06], &CorrelationSpec::uniform(1.0)).unwrap();
        assert!(matches!(
            ConstraintOptimizer::new(cov),
            Err(EngineError::NumericalInstability { .. })
        ));

        let cov = CovarianceBuilder::build(&u, &[0.0, 0.05, 0.06], &CorrelationSpec::uniform(0.3)).unwrap();
        assert!(matches!(
            ConstraintOptimizer::new(cov),
            Err(EngineError::NumericalInstability { .. })
        ));
    }

    #[test]
    fn test_invalid_targets() {
        let opt = six_asset_optimizer();
        assert!(opt.solve(&[]).is_err());
        assert!(opt.solve(&[1, 1]).is_err());
        assert!(opt.solve(&[9]).is_err());
    }

    #[test]
    fn test_k_coefficients() {
        let opt = six_asset_optimizer();
        let sol = opt.solve(&[1, 3]).unwrap();
        let k = KCoefficients::from_solution(&sol, PerLeg::new(0.1049, 0.0387)).unwrap();
        assert!(k.aa >= 0.0);
        assert!(k.bb >= 0.0);
        assert_relative_eq!(k.ab, 0.1049 * 0.0387 * sol.gram(0, 1), max_relative = 1e-12);
        assert_eq!(k.own(Leg::A), k.aa);
        assert!(KCoefficients::from_solution(&opt.solve(&[1]).unwrap(), PerLeg::new(0.1, 0.1)).is_err());
    }
}
