//! Covariance construction
//!
//! Builds `Σ = D·R·D` from daily volatilities and a correlation structure
//! given as explicit pairs plus a fallback correlation for every other pair.

use crate::error::{ensure_in_range, EngineError, EngineResult};
use crate::types::AssetUniverse;
use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Explicit correlation between two assets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationPair {
    pub first: String,
    pub second: String,
    pub rho: f64,
}

impl CorrelationPair {
    pub fn new(first: impl Into<String>, second: impl Into<String>, rho: f64) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
            rho,
        }
    }
}

/// Pairwise correlations; unspecified pairs use `default_rho`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSpec {
    #[serde(default)]
    pub pairs: Vec<CorrelationPair>,
    pub default_rho: f64,
}

impl CorrelationSpec {
    pub fn uniform(rho: f64) -> Self {
        Self {
            pairs: Vec::new(),
            default_rho: rho,
        }
    }

    pub fn with_pair(mut self, first: &str, second: &str, rho: f64) -> Self {
        self.pairs.push(CorrelationPair::new(first, second, rho));
        self
    }

    /// Resolves the full correlation matrix for `universe`. Later pairs win.
    pub fn matrix(&self, universe: &AssetUniverse) -> EngineResult<DMatrix<f64>> {
        ensure_in_range("default correlation", self.default_rho, -1.0, 1.0)?;
        let n = universe.len();
        let mut corr = DMatrix::from_element(n, n, self.default_rho);
        corr.fill_diagonal(1.0);
        for pair in &self.pairs {
            ensure_in_range(
                &format!("correlation {}-{}", pair.first, pair.second),
                pair.rho,
                -1.0,
                1.0,
            )?;
            let i = universe.index_of(&pair.first)?;
            let j = universe.index_of(&pair.second)?;
            if i == j {
                return Err(EngineError::invalid(format!(
                    "self-correlation given for {}",
                    pair.first
                )));
            }
            corr[(i, j)] = pair.rho;
            corr[(j, i)] = pair.rho;
        }
        Ok(corr)
    }
}

/// Market inputs: daily volatilities plus correlation structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketParameters {
    pub daily_volatilities: IndexMap<String, f64>,
    pub correlations: CorrelationSpec,
}

impl MarketParameters {
    /// Volatilities in universe order
    pub fn volatility_vector(&self, universe: &AssetUniverse) -> EngineResult<Vec<f64>> {
        universe
            .assets()
            .map(|asset| {
                let vol = self
                    .daily_volatilities
                    .get(asset)
                    .copied()
                    .ok_or_else(|| EngineError::invalid(format!("missing volatility for {asset}")))?;
                if !vol.is_finite() || vol < 0.0 {
                    return Err(EngineError::invalid(format!(
                        "volatility of {asset} must be non-negative, got {vol}"
                    )));
                }
                Ok(vol)
            })
            .collect()
    }
}

/// Symmetric N×N covariance matrix in universe order
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceMatrix {
    inner: DMatrix<f64>,
}

impl CovarianceMatrix {
    pub fn as_matrix(&self) -> &DMatrix<f64> {
        &self.inner
    }

    pub fn dim(&self) -> usize {
        self.inner.nrows()
    }

    /// `xᵗ Σ y`
    pub fn bilinear(&self, x: &DVector<f64>, y: &DVector<f64>) -> f64 {
        x.dot(&(&self.inner * y))
    }

    /// `xᵗ Σ x`
    pub fn quadratic_form(&self, x: &DVector<f64>) -> f64 {
        self.bilinear(x, x)
    }
}

/// Builds covariance matrices; the result is a pure function of the inputs.
pub struct CovarianceBuilder;

impl CovarianceBuilder {
    pub fn build(
        universe: &AssetUniverse,
        volatilities: &[f64],
        correlations: &CorrelationSpec,
    ) -> EngineResult<CovarianceMatrix> {
        if volatilities.len() != universe.len() {
            return Err(EngineError::invalid(format!(
                "{} volatilities for {} assets",
                volatilities.len(),
                universe.len()
            )));
        }
        let corr = correlations.matrix(universe)?;
        let d = DMatrix::from_diagonal(&DVector::from_column_slice(volatilities));
        let mut cov = &d * corr * &d;
        // D·R·D is symmetric in exact arithmetic; pin it so downstream
        // factorizations see an exactly symmetric input.
        let n = cov.nrows();
        for i in 0..n {
            for j in (i + 1)..n {
                let v = 0.5 * (cov[(i, j)] + cov[(j, i)]);
                cov[(i, j)] = v;
                cov[(j, i)] = v;
            }
        }
        Ok(CovarianceMatrix { inner: cov })
    }

    pub fn from_market(universe: &AssetUniverse, market: &MarketParameters) -> EngineResult<CovarianceMatrix> {
        let vols = market.volatility_vector(universe)?;
        Self::build(universe, &vols, &market.correlations)
    }
}

/// Market-parameter tuple that determines a hedge solution.
///
/// Floats are kept as raw bits so equality is exact and `Eq` holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarketKey {
    assets: Vec<String>,
    illiquid: [usize; 2],
    volatilities: Vec<u64>,
    correlation: Vec<u64>,
}

impl MarketKey {
    pub fn new(universe: &AssetUniverse, volatilities: &[f64], correlation: &DMatrix<f64>) -> Self {
        let legs = universe.illiquid_indices();
        Self {
            assets: universe.assets().map(str::to_string).collect(),
            illiquid: [legs.a, legs.b],
            volatilities: volatilities.iter().map(|v| v.to_bits()).collect(),
            correlation: correlation.iter().map(|v| v.to_bits()).collect(),
        }
    }
}
