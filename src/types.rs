//! Core value types for the staking tracking-error engine

use crate::error::{ensure_in_range, EngineError, EngineResult};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance on benchmark weights summing to one
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-4;

/// Tolerance on redemption probabilities summing to one
pub const PROBABILITY_SUM_TOLERANCE: f64 = 0.01;

/// Calendar days used to annualize episode durations
pub const DAYS_PER_YEAR: f64 = 365.0;

/// One of the two illiquid (staked) assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    A,
    B,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Leg::A => write!(f, "A"),
            Leg::B => write!(f, "B"),
        }
    }
}

/// Per-leg pair of values, indexed by [`Leg`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerLeg<T> {
    pub a: T,
    pub b: T,
}

impl<T: Copy> PerLeg<T> {
    pub fn new(a: T, b: T) -> Self {
        Self { a, b }
    }

    pub fn get(&self, leg: Leg) -> T {
        match leg {
            Leg::A => self.a,
            Leg::B => self.b,
        }
    }

    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> PerLeg<U> {
        PerLeg {
            a: f(self.a),
            b: f(self.b),
        }
    }
}

/// Ordered asset universe with two designated illiquid assets.
///
/// Positions are fixed at construction; covariance rows, weight vectors and
/// constraint matrices all use this ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUniverse {
    assets: IndexSet<String>,
    illiquid: PerLeg<usize>,
}

impl AssetUniverse {
    pub fn new<I, S>(assets: I, illiquid_a: &str, illiquid_b: &str) -> EngineResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = IndexSet::new();
        for asset in assets {
            let asset = asset.into();
            if !set.insert(asset.clone()) {
                return Err(EngineError::invalid(format!("duplicate asset {asset}")));
            }
        }
        if set.len() < 3 {
            return Err(EngineError::invalid(format!(
                "universe needs at least 3 assets to hedge two illiquid legs, got {}",
                set.len()
            )));
        }
        let a = set
            .get_index_of(illiquid_a)
            .ok_or_else(|| EngineError::UnknownAsset(illiquid_a.to_string()))?;
        let b = set
            .get_index_of(illiquid_b)
            .ok_or_else(|| EngineError::UnknownAsset(illiquid_b.to_string()))?;
        if a == b {
            return Err(EngineError::invalid(format!(
                "illiquid assets must be distinct, got {illiquid_a} twice"
            )));
        }
        Ok(Self {
            assets: set,
            illiquid: PerLeg::new(a, b),
        })
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn index_of(&self, asset: &str) -> EngineResult<usize> {
        self.assets
            .get_index_of(asset)
            .ok_or_else(|| EngineError::UnknownAsset(asset.to_string()))
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.assets.get_index(index).map(String::as_str)
    }

    pub fn assets(&self) -> impl Iterator<Item = &str> {
        self.assets.iter().map(String::as_str)
    }

    /// Position of an illiquid leg
    pub fn illiquid(&self, leg: Leg) -> usize {
        self.illiquid.get(leg)
    }

    pub fn illiquid_indices(&self) -> PerLeg<usize> {
        self.illiquid
    }

    pub fn illiquid_name(&self, leg: Leg) -> &str {
        self.name(self.illiquid(leg)).unwrap_or_default()
    }
}

/// Benchmark weights keyed by asset, in universe order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BenchmarkWeights {
    weights: IndexMap<String, f64>,
}

impl BenchmarkWeights {
    pub fn new(weights: IndexMap<String, f64>) -> EngineResult<Self> {
        let weights = Self { weights };
        weights.validate()?;
        Ok(weights)
    }

    pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, f64)>) -> EngineResult<Self> {
        Self::new(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.weights.is_empty() {
            return Err(EngineError::invalid("benchmark weights are empty"));
        }
        for (asset, &w) in &self.weights {
            ensure_in_range(&format!("weight of {asset}"), w, 0.0, 1.0)?;
        }
        let total: f64 = self.weights.values().sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::invalid(format!(
                "weights must sum to 1.0, got {total}"
            )));
        }
        Ok(())
    }

    pub fn get(&self, asset: &str) -> Option<f64> {
        self.weights.get(asset).copied()
    }

    pub fn assets(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(k, &v)| (k.as_str(), v))
    }

    /// Weight of an illiquid leg
    pub fn leg_weight(&self, universe: &AssetUniverse, leg: Leg) -> EngineResult<f64> {
        let name = universe.illiquid_name(leg);
        self.get(name)
            .ok_or_else(|| EngineError::UnknownAsset(name.to_string()))
    }
}

/// Staking configuration of one illiquid asset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StakingConfig {
    /// Fraction of the holding that is staked
    pub staking_pct: f64,
    /// Days staked capital stays locked
    pub unbonding_days: u32,
    pub annual_yield: f64,
    /// Reference staking level for the "extra" benefit
    pub baseline_staking_pct: f64,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            staking_pct: 0.90,
            unbonding_days: 10,
            annual_yield: 0.05,
            baseline_staking_pct: 0.70,
        }
    }
}

impl StakingConfig {
    pub fn validate(&self) -> EngineResult<()> {
        ensure_in_range("staking_pct", self.staking_pct, 0.0, 1.0)?;
        ensure_in_range("annual_yield", self.annual_yield, 0.0, 1.0)?;
        ensure_in_range("baseline_staking_pct", self.baseline_staking_pct, 0.0, 1.0)?;
        Ok(())
    }

    /// Redemption fraction below which no overweight is required
    pub fn threshold(&self) -> f64 {
        1.0 - self.staking_pct
    }

    pub fn with_staking(self, staking_pct: f64) -> Self {
        Self { staking_pct, ..self }
    }
}

/// One redemption size and its probability
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RedemptionPoint {
    pub size: f64,
    pub probability: f64,
}

/// Discrete redemption-size distribution plus episode frequency
#[derive(Debug, Clone, PartialEq)]
pub struct RedemptionDistribution {
    sizes: Vec<f64>,
    probabilities: Vec<f64>,
    expected_per_year: f64,
}

impl RedemptionDistribution {
    pub fn new(points: &[RedemptionPoint], expected_per_year: f64) -> EngineResult<Self> {
        if points.is_empty() {
            return Err(EngineError::invalid("redemption distribution is empty"));
        }
        ensure_in_range("expected_redemptions_per_year", expected_per_year, 0.0, f64::MAX)?;
        for p in points {
            ensure_in_range("redemption size", p.size, 0.0, 1.0)?;
            ensure_in_range("redemption probability", p.probability, 0.0, 1.0)?;
        }
        let total: f64 = points.iter().map(|p| p.probability).sum();
        if (total - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
            return Err(EngineError::invalid(format!(
                "probabilities must sum to 1.0, got {total}"
            )));
        }
        Ok(Self {
            sizes: points.iter().map(|p| p.size).collect(),
            probabilities: points.iter().map(|p| p.probability).collect(),
            expected_per_year,
        })
    }

    /// Builds the distribution from observed counts per size
    pub fn from_counts(sizes: &[f64], counts: &[u32], expected_per_year: f64) -> EngineResult<Self> {
        if sizes.len() != counts.len() {
            return Err(EngineError::invalid(format!(
                "{} sizes but {} counts",
                sizes.len(),
                counts.len()
            )));
        }
        let total: u64 = counts.iter().map(|&c| c as u64).sum();
        if total == 0 {
            return Err(EngineError::invalid("redemption counts sum to zero"));
        }
        let points: Vec<_> = sizes
            .iter()
            .zip(counts)
            .map(|(&size, &count)| RedemptionPoint {
                size,
                probability: count as f64 / total as f64,
            })
            .collect();
        Self::new(&points, expected_per_year)
    }

    pub fn sizes(&self) -> &[f64] {
        &self.sizes
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    /// Expected redemption episodes per year (lambda)
    pub fn expected_per_year(&self) -> f64 {
        self.expected_per_year
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.sizes.iter().copied().zip(self.probabilities.iter().copied())
    }

    pub fn mean(&self) -> f64 {
        self.iter().map(|(r, p)| r * p).sum()
    }

    pub fn variance(&self) -> f64 {
        let mean = self.mean();
        self.iter().map(|(r, p)| p * r * r).sum::<f64>() - mean * mean
    }
}

/// Fund tracking-difference figures
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FundConstraints {
    /// Net asset value in currency units
    pub nav: f64,
    pub current_td: f64,
    /// Tracking difference cap set by the committee
    pub cap_td: f64,
}

impl Default for FundConstraints {
    fn default() -> Self {
        Self {
            nav: 500_000_000.0,
            current_td: 0.0143,
            cap_td: 0.015,
        }
    }
}

impl FundConstraints {
    pub fn validate(&self) -> EngineResult<()> {
        if !self.nav.is_finite() || self.nav <= 0.0 {
            return Err(EngineError::invalid(format!("nav must be positive, got {}", self.nav)));
        }
        ensure_in_range("current_td", self.current_td, 0.0, 1.0)?;
        ensure_in_range("cap_td", self.cap_td, 0.0, 1.0)?;
        Ok(())
    }

    /// Remaining tracking-difference budget
    pub fn budget(&self) -> f64 {
        self.cap_td - self.current_td
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_indices_are_stable() {
        let u = AssetUniverse::new(["BTC", "ETH", "XRP", "SOL"], "ETH", "SOL").unwrap();
        assert_eq!(u.len(), 4);
        assert_eq!(u.illiquid(Leg::A), 1);
        assert_eq!(u.illiquid(Leg::B), 3);
        assert_eq!(u.index_of("XRP").unwrap(), 2);
        assert_eq!(u.illiquid_name(Leg::B), "SOL");
        assert!(matches!(u.index_of("DOGE"), Err(EngineError::UnknownAsset(_))));
    }

    #[test]
    fn test_universe_equality() {
        let u = AssetUniverse::new(["BTC", "ETH", "XRP", "SOL"], "ETH", "SOL").unwrap();
        assert_eq!(u, u.clone());
        let swapped = AssetUniverse::new(["BTC", "ETH", "XRP", "SOL"], "SOL", "ETH").unwrap();
        assert_ne!(u, swapped);
        assert_eq!(swapped.illiquid_indices(), PerLeg::new(3, 1));
    }

    #[test]
    fn test_universe_rejects_bad_legs() {
        assert!(AssetUniverse::new(["BTC", "ETH", "SOL"], "ETH", "ETH").is_err());
        assert!(AssetUniverse::new(["BTC", "ETH", "SOL"], "ETH", "ADA").is_err());
        assert!(AssetUniverse::new(["ETH", "SOL"], "ETH", "SOL").is_err());
        assert!(AssetUniverse::new(["BTC", "BTC", "ETH", "SOL"], "ETH", "SOL").is_err());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        assert!(BenchmarkWeights::from_pairs([("BTC", 0.6), ("ETH", 0.4)]).is_ok());
        assert!(BenchmarkWeights::from_pairs([("BTC", 0.6), ("ETH", 0.3)]).is_err());
        assert!(BenchmarkWeights::from_pairs([("BTC", 1.1), ("ETH", -0.1)]).is_err());
    }

    #[test]
    fn test_distribution_from_counts() {
        let d = RedemptionDistribution::from_counts(&[0.05, 0.10, 0.20, 0.30], &[12, 3, 2, 1], 18.0)
            .unwrap();
        assert!((d.probabilities()[0] - 12.0 / 18.0).abs() < 1e-15);
        let expected_mean = (0.05 * 12.0 + 0.10 * 3.0 + 0.20 * 2.0 + 0.30) / 18.0;
        assert!((d.mean() - expected_mean).abs() < 1e-12);
        assert!(d.variance() > 0.0);
    }

    #[test]
    fn test_distribution_from_large_counts() {
        let d = RedemptionDistribution::from_counts(&[0.05, 0.30], &[u32::MAX, u32::MAX], 18.0).unwrap();
        assert_eq!(d.probabilities(), &[0.5, 0.5]);
        assert!(RedemptionDistribution::from_counts(&[0.05, 0.30], &[0, 0], 18.0).is_err());
    }

    #[test]
    fn test_distribution_validation() {
        let bad = [RedemptionPoint { size: 0.1, probability: 0.5 }];
        assert!(RedemptionDistribution::new(&bad, 10.0).is_err());
        let out_of_range = [RedemptionPoint { size: 1.5, probability: 1.0 }];
        assert!(RedemptionDistribution::new(&out_of_range, 10.0).is_err());
        let ok = [RedemptionPoint { size: 0.1, probability: 1.0 }];
        assert!(RedemptionDistribution::new(&ok, -1.0).is_err());
        assert!(RedemptionDistribution::new(&ok, 0.0).is_ok());
    }

    #[test]
    fn test_staking_boundaries_are_valid() {
        let mut cfg = StakingConfig::default();
        cfg.staking_pct = 0.0;
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.threshold(), 1.0);
        cfg.staking_pct = 1.0;
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.threshold(), 0.0);
        cfg.staking_pct = 1.2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_fund_budget() {
        let fund = FundConstraints::default();
        assert!((fund.budget() - 0.0007).abs() < 1e-12);
        assert!(FundConstraints { nav: 0.0, ..fund }.validate().is_err());
    }
}
