//! Request, response and engine configuration
//!
//! Every field has a default, so `{}` is a valid request: the core six-asset
//! universe with ETH and SOL staked at 90%.

use crate::benefit::NetBenefitResult;
use crate::covariance::{CorrelationSpec, MarketParameters};
use crate::error::{ensure_in_range, EngineError, EngineResult};
use crate::optimization::KCoefficients;
use crate::sensitivity::{GridConfig, SensitivityPoint, SensitivityPoint2D};
use crate::simulation::{MonteCarloConfig, MonteCarloSummary};
use crate::tracking::TeDecomposition;
use crate::types::{
    AssetUniverse, BenchmarkWeights, FundConstraints, Leg, PerLeg, RedemptionDistribution,
    RedemptionPoint, StakingConfig,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine-level settings, independent of any one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub grid: GridConfig,
    /// Compute the 2-D grid and joint optimum
    pub include_2d: bool,
    /// Run the Monte Carlo check alongside every calculation
    pub monte_carlo: Option<MonteCarloConfig>,
    /// Worker threads for grid evaluation; rayon's default when absent
    pub threads: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            include_2d: true,
            monte_carlo: None,
            threads: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::invalid(format!("engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| EngineError::invalid(format!("reading {}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> EngineResult<()> {
        for &level in &self.grid.levels {
            ensure_in_range("grid level", level, 0.0, 1.0)?;
        }
        if let Some(mc) = &self.monte_carlo {
            if mc.simulations == 0 {
                return Err(EngineError::invalid("monte_carlo.simulations must be positive"));
            }
        }
        if self.threads == Some(0) {
            return Err(EngineError::invalid("threads must be positive"));
        }
        Ok(())
    }
}

/// Built-in benchmark universes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniverseProfile {
    /// BTC, ETH, XRP, SOL, ADA, XLM
    #[default]
    Core,
    /// Core plus LINK, LTC, UNI
    Extended,
}

impl UniverseProfile {
    pub fn benchmark_weights(self) -> IndexMap<String, f64> {
        let pairs: &[(&str, f64)] = match self {
            UniverseProfile::Core => &[
                ("BTC", 0.7869),
                ("ETH", 0.1049),
                ("XRP", 0.0549),
                ("SOL", 0.0387),
                ("ADA", 0.0119),
                ("XLM", 0.0027),
            ],
            UniverseProfile::Extended => &[
                ("BTC", 0.7298),
                ("ETH", 0.1435),
                ("XRP", 0.0653),
                ("SOL", 0.0364),
                ("ADA", 0.0113),
                ("LINK", 0.0046),
                ("XLM", 0.0037),
                ("LTC", 0.0034),
                ("UNI", 0.0020),
            ],
        };
        pairs.iter().map(|&(k, v)| (k.to_string(), v)).collect()
    }

    /// Daily volatilities of the profile's assets
    pub fn daily_volatilities(self) -> IndexMap<String, f64> {
        let core: &[(&str, f64)] = &[
            ("BTC", 0.039),
            ("ETH", 0.048),
            ("XRP", 0.053),
            ("SOL", 0.071),
            ("ADA", 0.055),
            ("XLM", 0.051),
        ];
        let extra: &[(&str, f64)] = &[("LINK", 0.0525), ("LTC", 0.060), ("UNI", 0.095)];
        let mut vols: IndexMap<String, f64> = core.iter().map(|&(k, v)| (k.to_string(), v)).collect();
        if self == UniverseProfile::Extended {
            vols.extend(extra.iter().map(|&(k, v)| (k.to_string(), v)));
        }
        vols
    }
}

/// Block correlation structure around BTC and ETH
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorrelationParameters {
    pub btc_eth: f64,
    #[serde(alias = "btc_excluded")]
    pub btc_other: f64,
    #[serde(alias = "eth_excluded")]
    pub eth_other: f64,
    #[serde(alias = "within_excluded")]
    pub within_other: f64,
}

impl Default for CorrelationParameters {
    fn default() -> Self {
        Self {
            btc_eth: 0.70,
            btc_other: 0.60,
            eth_other: 0.60,
            within_other: 0.60,
        }
    }
}

impl CorrelationParameters {
    /// Expands the blocks to explicit pairs over `universe`
    pub fn to_spec(&self, universe: &AssetUniverse) -> CorrelationSpec {
        let has = |name: &str| universe.index_of(name).is_ok();
        let mut spec = CorrelationSpec::uniform(self.within_other);
        if has("BTC") && has("ETH") {
            spec = spec.with_pair("BTC", "ETH", self.btc_eth);
        }
        for other in universe.assets().filter(|a| *a != "BTC" && *a != "ETH") {
            if has("BTC") {
                spec = spec.with_pair("BTC", other, self.btc_other);
            }
            if has("ETH") {
                spec = spec.with_pair("ETH", other, self.eth_other);
            }
        }
        spec
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrelationInput {
    Explicit(CorrelationSpec),
    Structured(CorrelationParameters),
}

impl Default for CorrelationInput {
    fn default() -> Self {
        CorrelationInput::Structured(CorrelationParameters::default())
    }
}

impl CorrelationInput {
    pub fn to_spec(&self, universe: &AssetUniverse) -> CorrelationSpec {
        match self {
            CorrelationInput::Explicit(spec) => spec.clone(),
            CorrelationInput::Structured(params) => params.to_spec(universe),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketParams {
    pub profile: UniverseProfile,
    /// Replaces the profile's weights when present
    pub benchmark_weights: Option<IndexMap<String, f64>>,
    /// Merged over the profile's volatilities
    pub volatilities: IndexMap<String, f64>,
    pub correlations: CorrelationInput,
    pub illiquid_a: String,
    pub illiquid_b: String,
}

impl Default for MarketParams {
    fn default() -> Self {
        Self {
            profile: UniverseProfile::Core,
            benchmark_weights: None,
            volatilities: IndexMap::new(),
            correlations: CorrelationInput::default(),
            illiquid_a: "ETH".to_string(),
            illiquid_b: "SOL".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StakingParams {
    pub a: StakingConfig,
    pub b: StakingConfig,
}

impl Default for StakingParams {
    fn default() -> Self {
        Self {
            a: StakingConfig {
                staking_pct: 0.90,
                unbonding_days: 10,
                annual_yield: 0.03,
                baseline_staking_pct: 0.70,
            },
            b: StakingConfig {
                staking_pct: 0.90,
                unbonding_days: 2,
                annual_yield: 0.073,
                baseline_staking_pct: 0.70,
            },
        }
    }
}

impl StakingParams {
    pub fn legs(&self) -> PerLeg<StakingConfig> {
        PerLeg::new(self.a, self.b)
    }
}

/// One redemption size with either a probability or an observed count
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RedemptionItem {
    pub size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

impl RedemptionItem {
    pub fn with_probability(size: f64, probability: f64) -> Self {
        Self {
            size,
            probability: Some(probability),
            count: None,
        }
    }

    pub fn with_count(size: f64, count: u32) -> Self {
        Self {
            size,
            probability: None,
            count: Some(count),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedemptionParams {
    pub expected_redemptions_per_year: f64,
    pub distribution: Vec<RedemptionItem>,
}

impl Default for RedemptionParams {
    fn default() -> Self {
        Self {
            expected_redemptions_per_year: 18.0,
            distribution: vec![
                RedemptionItem::with_probability(0.05, 0.667),
                RedemptionItem::with_probability(0.10, 0.167),
                RedemptionItem::with_probability(0.20, 0.111),
                RedemptionItem::with_probability(0.30, 0.055),
            ],
        }
    }
}

impl RedemptionParams {
    /// Items must all carry probabilities or all carry counts
    pub fn to_distribution(&self) -> EngineResult<RedemptionDistribution> {
        let lambda = self.expected_redemptions_per_year;
        let items = &self.distribution;
        if items.iter().all(|i| i.probability.is_some()) {
            let points: Vec<_> = items
                .iter()
                .filter_map(|i| {
                    i.probability.map(|probability| RedemptionPoint {
                        size: i.size,
                        probability,
                    })
                })
                .collect();
            RedemptionDistribution::new(&points, lambda)
        } else if items.iter().all(|i| i.count.is_some()) {
            let sizes: Vec<f64> = items.iter().map(|i| i.size).collect();
            let counts: Vec<u32> = items.iter().filter_map(|i| i.count).collect();
            RedemptionDistribution::from_counts(&sizes, &counts, lambda)
        } else {
            Err(EngineError::invalid(
                "redemption items must all give a probability or all give a count",
            ))
        }
    }
}

/// One tracking-error calculation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculationRequest {
    pub staking: StakingParams,
    pub redemption: RedemptionParams,
    pub market: MarketParams,
    pub fund_details: Option<FundConstraints>,
}

/// A request with defaults applied and every input validated
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub universe: AssetUniverse,
    pub weights: BenchmarkWeights,
    pub market: MarketParameters,
    pub staking: PerLeg<StakingConfig>,
    pub distribution: RedemptionDistribution,
    pub fund: FundConstraints,
}

impl ResolvedRequest {
    pub fn leg_weights(&self) -> EngineResult<PerLeg<f64>> {
        Ok(PerLeg::new(
            self.weights.leg_weight(&self.universe, Leg::A)?,
            self.weights.leg_weight(&self.universe, Leg::B)?,
        ))
    }
}

impl CalculationRequest {
    pub fn resolve(&self) -> EngineResult<ResolvedRequest> {
        let market = &self.market;
        let weights = BenchmarkWeights::new(
            market
                .benchmark_weights
                .clone()
                .unwrap_or_else(|| market.profile.benchmark_weights()),
        )?;
        let universe = AssetUniverse::new(weights.assets(), &market.illiquid_a, &market.illiquid_b)?;

        let mut daily_volatilities = market.profile.daily_volatilities();
        daily_volatilities.extend(market.volatilities.iter().map(|(k, &v)| (k.clone(), v)));
        let market = MarketParameters {
            daily_volatilities,
            correlations: market.correlations.to_spec(&universe),
        };
        // Surface missing or negative volatilities before any solve
        market.volatility_vector(&universe)?;

        let staking = self.staking.legs();
        staking.a.validate()?;
        staking.b.validate()?;

        let fund = self.fund_details.unwrap_or_default();
        fund.validate()?;

        Ok(ResolvedRequest {
            universe,
            weights,
            market,
            staking,
            distribution: self.redemption.to_distribution()?,
            fund,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResponse {
    pub decomposition: TeDecomposition,
    pub net_benefit: NetBenefitResult,
    pub k_coefficients: KCoefficients,
    /// Best common level from the 1-D sweep
    pub optimal_staking_level: f64,
    /// Best pair from the 2-D grid
    pub optimal_staking_levels: PerLeg<f64>,
    pub sensitivity_analysis: Vec<SensitivityPoint>,
    pub sensitivity_analysis_2d: Vec<SensitivityPoint2D>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monte_carlo: Option<MonteCarloSummary>,
    pub parameters_used: CalculationRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_request_uses_defaults() {
        let request: CalculationRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, CalculationRequest::default());
        let resolved = request.resolve().unwrap();
        assert_eq!(resolved.universe.len(), 6);
        assert_eq!(resolved.universe.illiquid_name(Leg::A), "ETH");
        let w = resolved.leg_weights().unwrap();
        assert_eq!((w.a, w.b), (0.1049, 0.0387));
        assert_eq!(resolved.staking.a.unbonding_days, 10);
        assert_eq!(resolved.staking.b.annual_yield, 0.073);
        assert_eq!(resolved.distribution.expected_per_year(), 18.0);
        assert_eq!(resolved.fund, FundConstraints::default());
    }

    #[test]
    fn test_profile_weights_sum_to_one() {
        for profile in [UniverseProfile::Core, UniverseProfile::Extended] {
            let weights = BenchmarkWeights::new(profile.benchmark_weights()).unwrap();
            let vols = profile.daily_volatilities();
            assert!(weights.assets().all(|a| vols.contains_key(a)));
        }
    }

    #[test]
    fn test_extended_profile_resolves() {
        let request: CalculationRequest =
            serde_json::from_str(r#"{"market": {"profile": "extended"}}"#).unwrap();
        let resolved = request.resolve().unwrap();
        assert_eq!(resolved.universe.len(), 9);
        assert_eq!(resolved.leg_weights().unwrap().a, 0.1435);
    }

    #[test]
    fn test_structured_correlations_expand() {
        let u = AssetUniverse::new(["BTC", "ETH", "XRP", "SOL"], "ETH", "SOL").unwrap();
        let params = CorrelationParameters { btc_eth: 0.7, btc_other: 0.5, eth_other: 0.4, within_other: 0.3 };
        let corr = params.to_spec(&u).matrix(&u).unwrap();
        assert_eq!(corr[(0, 1)], 0.7);
        assert_eq!(corr[(0, 2)], 0.5);
        assert_eq!(corr[(1, 3)], 0.4);
        assert_eq!(corr[(2, 3)], 0.3);
    }

    #[test]
    fn test_legacy_correlation_names() {
        let json = r#"{"btc_eth": 0.8, "btc_excluded": 0.5, "within_excluded": 0.4, "eth_excluded": 0.45}"#;
        let input: CorrelationInput = serde_json::from_str(json).unwrap();
        match input {
            CorrelationInput::Structured(p) => {
                assert_eq!(p.btc_other, 0.5);
                assert_eq!(p.within_other, 0.4);
            }
            other => panic!("expected structured, got {other:?}"),
        }
        let explicit: CorrelationInput =
            serde_json::from_str(r#"{"default_rho": 0.5, "pairs": [{"first": "BTC", "second": "ETH", "rho": 0.9}]}"#)
                .unwrap();
        assert!(matches!(explicit, CorrelationInput::Explicit(_)));
    }

    #[test]
    fn test_redemption_counts() {
        let params = RedemptionParams {
            expected_redemptions_per_year: 18.0,
            distribution: vec![
                RedemptionItem::with_count(0.05, 12),
                RedemptionItem::with_count(0.10, 3),
                RedemptionItem::with_count(0.20, 2),
                RedemptionItem::with_count(0.30, 1),
            ],
        };
        let d = params.to_distribution().unwrap();
        assert_eq!(d.probabilities()[3], 1.0 / 18.0);

        let mixed = RedemptionParams {
            distribution: vec![RedemptionItem::with_count(0.05, 1), RedemptionItem::with_probability(0.1, 0.5)],
            ..RedemptionParams::default()
        };
        assert!(mixed.to_distribution().is_err());
    }

    #[test]
    fn test_resolve_rejects_bad_inputs() {
        let mut request = CalculationRequest::default();
        request.market.benchmark_weights = Some([("BTC".to_string(), 0.5), ("ETH".to_string(), 0.2)].into_iter().collect());
        assert!(matches!(request.resolve(), Err(EngineError::InvalidConfiguration(_))));

        let mut request = CalculationRequest::default();
        request.market.illiquid_b = "DOGE".to_string();
        assert!(matches!(request.resolve(), Err(EngineError::UnknownAsset(_))));

        let mut request = CalculationRequest::default();
        request.market.volatilities.insert("SOL".to_string(), -0.1);
        assert!(request.resolve().is_err());

        let mut request = CalculationRequest::default();
        request.staking.a.staking_pct = 1.5;
        assert!(request.resolve().is_err());

        let mut request = CalculationRequest::default();
        request.redemption.distribution = vec![RedemptionItem::with_probability(0.1, 0.5)];
        assert!(request.resolve().is_err());
    }

    #[test]
    fn test_engine_config_from_json() {
        let config = EngineConfig::from_json(r#"{"grid": {"levels": [0.8, 0.9], "parallel": false}, "include_2d": false}"#)
            .unwrap();
        assert_eq!(config.grid.levels, vec![0.8, 0.9]);
        assert!(!config.grid.parallel);
        assert_eq!(config.grid.grid_points, 31);
        assert!(EngineConfig::from_json(r#"{"grid": {"levels": [1.2]}}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"threads": 0}"#).is_err());
        assert!(EngineConfig::from_json("not json").is_err());
    }
}
