//! Hedge-solution cache
//!
//! Repeated evaluations with the same market parameters but different staking
//! levels reuse one covariance factorization. Entries are keyed by the full
//! market-parameter tuple, so two markets whose hashes collide still get
//! their own solutions. Entries are immutable once written. A failed solve
//! never reaches the map.

use crate::covariance::{CorrelationSpec, CovarianceBuilder, MarketKey};
use crate::error::EngineResult;
use crate::optimization::{ConstraintOptimizer, HedgeSolution};
use crate::types::AssetUniverse;
use fxhash::FxBuildHasher;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Thread-safe, write-once cache of two-target hedge solutions
#[derive(Debug, Default)]
pub struct FactorizationCache<S = FxBuildHasher> {
    entries: RwLock<HashMap<MarketKey, Arc<HedgeSolution>, S>>,
}

impl FactorizationCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: BuildHasher> FactorizationCache<S> {

    /// Returns the cached solution for these market parameters, solving on miss.
    pub fn get_or_solve(
        &self,
        universe: &AssetUniverse,
        volatilities: &[f64],
        correlations: &CorrelationSpec,
    ) -> EngineResult<Arc<HedgeSolution>> {
        let corr = correlations.matrix(universe)?;
        let key = MarketKey::new(universe, volatilities, &corr);

        if let Some(hit) = self.read_entry(&key) {
            metrics::counter!("staking_te_factorization_cache_hits_total").increment(1);
            debug!("factorization cache hit");
            return Ok(hit);
        }
        metrics::counter!("staking_te_factorization_cache_misses_total").increment(1);

        let cov = CovarianceBuilder::build(universe, volatilities, correlations)?;
        let legs = universe.illiquid_indices();
        let solution = Arc::new(ConstraintOptimizer::new(cov)?.solve(&[legs.a, legs.b])?);

        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("factorization cache lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        // Another thread may have won the race; keep the first writer's entry.
        let stored = entries.entry(key).or_insert(solution).clone();
        debug!(size = entries.len(), "factorization cached");
        Ok(stored)
    }

    fn read_entry(&self, key: &MarketKey) -> Option<Arc<HedgeSolution>> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(key).cloned()
    }

    pub fn contains(
        &self,
        universe: &AssetUniverse,
        volatilities: &[f64],
        correlations: &CorrelationSpec,
    ) -> EngineResult<bool> {
        let corr = correlations.matrix(universe)?;
        Ok(self.read_entry(&MarketKey::new(universe, volatilities, &corr)).is_some())
    }

    /// Drops the entry for one market-parameter tuple
    pub fn invalidate(
        &self,
        universe: &AssetUniverse,
        volatilities: &[f64],
        correlations: &CorrelationSpec,
    ) -> EngineResult<bool> {
        let corr = correlations.matrix(universe)?;
        let key = MarketKey::new(universe, volatilities, &corr);
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(entries.remove(&key).is_some())
    }

    pub fn clear(&self) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.clear();
    }

    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::hash::{BuildHasherDefault, Hasher};

    /// Sends every key to the same bucket
    #[derive(Default)]
    struct ConstantHasher;

    impl Hasher for ConstantHasher {
        fn finish(&self) -> u64 {
            0
        }

        fn write(&mut self, _bytes: &[u8]) {}
    }

    fn universe() -> AssetUniverse {
        AssetUniverse::new(["BTC", "ETH", "XRP", "SOL"], "ETH", "SOL").unwrap()
    }

    #[test]
    fn test_hit_returns_same_solution() {
        let cache = FactorizationCache::new();
        let u = universe();
        let vols = [0.039, 0.048, 0.053, 0.071];
        let spec = CorrelationSpec::uniform(0.6);

        let first = cache.get_or_solve(&u, &vols, &spec).unwrap();
        let second = cache.get_or_solve(&u, &vols, &spec).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        let other = cache
            .get_or_solve(&u, &vols, &CorrelationSpec::uniform(0.5))
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_solve_does_not_poison_cache() {
        let cache = FactorizationCache::new();
        let u = universe();
        let singular = CorrelationSpec::uniform(1.0);
        let err = cache.get_or_solve(&u, &[0.04; 4], &singular).unwrap_err();
        assert!(matches!(err, EngineError::NumericalInstability { .. }));
        assert!(cache.is_empty());
        assert!(!cache.contains(&u, &[0.04; 4], &singular).unwrap());

        assert!(cache.get_or_solve(&u, &[0.04; 4], &CorrelationSpec::uniform(0.6)).is_ok());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = FactorizationCache::new();
        let u = universe();
        let spec = CorrelationSpec::uniform(0.6);
        cache.get_or_solve(&u, &[0.04; 4], &spec).unwrap();
        assert!(cache.invalidate(&u, &[0.04; 4], &spec).unwrap());
        assert!(!cache.invalidate(&u, &[0.04; 4], &spec).unwrap());
        cache.get_or_solve(&u, &[0.04; 4], &spec).unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_colliding_hashes_keep_distinct_solutions() {
        let cache = FactorizationCache::<BuildHasherDefault<ConstantHasher>>::default();
        let u = universe();
        let vols = [0.039, 0.048, 0.053, 0.071];
        let high = CorrelationSpec::uniform(0.6);
        let low = CorrelationSpec::uniform(0.3);

        let first = cache.get_or_solve(&u, &vols, &high).unwrap();
        let second = cache.get_or_solve(&u, &vols, &low).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_ne!(first.gram(0, 0), second.gram(0, 0));
        assert_eq!(cache.len(), 2);

        let again = cache.get_or_solve(&u, &vols, &high).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(cache.invalidate(&u, &vols, &low).unwrap());
        assert!(cache.contains(&u, &vols, &high).unwrap());
    }
}
