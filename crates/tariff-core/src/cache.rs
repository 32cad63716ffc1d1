//! Catalog cache
//!
//! Short-lived cache of plans and product feature sets in front of the
//! catalog repositories. Writes made through [`crate::CatalogService`]
//! invalidate the affected entries; anything else ages out via TTL.

use std::sync::Arc;

use moka::future::Cache;
use tariff_types::{Feature, Plan, PlanId, ProductId};

use crate::config::CacheConfig;

/// Cached plans and product feature sets
#[derive(Clone)]
pub struct CatalogCache {
    plans: Cache<PlanId, Plan>,
    feature_sets: Cache<ProductId, Arc<Vec<Feature>>>,
    config: CacheConfig,
}

impl std::fmt::Debug for CatalogCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogCache")
            .field("config", &self.config)
            .field("plan_cache_size", &self.plans.entry_count())
            .field("feature_set_cache_size", &self.feature_sets.entry_count())
            .finish_non_exhaustive()
    }
}

impl Default for CatalogCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CatalogCache {
    pub fn new(config: CacheConfig) -> Self {
        let plans = Cache::builder()
            .max_capacity(config.max_plans)
            .time_to_live(config.plan_ttl)
            .build();

        let feature_sets = Cache::builder()
            .max_capacity(config.max_feature_sets)
            .time_to_live(config.feature_ttl)
            .build();

        Self {
            plans,
            feature_sets,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up cached plans. Returns the hits and the ids still to fetch.
    pub async fn get_plans(&self, ids: &[PlanId]) -> (Vec<Plan>, Vec<PlanId>) {
        let mut hits = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match self.plans.get(id).await {
                Some(plan) => hits.push(plan),
                None => missing.push(*id),
            }
        }

        if !hits.is_empty() {
            metrics::counter!("tariff_cache_hits", "cache" => "plan").increment(hits.len() as u64);
        }
        if !missing.is_empty() {
            metrics::counter!("tariff_cache_misses", "cache" => "plan")
                .increment(missing.len() as u64);
        }
        (hits, missing)
    }

    pub async fn insert_plans(&self, plans: &[Plan]) {
        for plan in plans {
            self.plans.insert(plan.id(), plan.clone()).await;
        }
    }

    /// Cached active features of a product
    pub async fn get_feature_set(&self, product_id: ProductId) -> Option<Arc<Vec<Feature>>> {
        let cached = self.feature_sets.get(&product_id).await;
        if cached.is_some() {
            tracing::trace!(%product_id, "feature set cache hit");
            metrics::counter!("tariff_cache_hits", "cache" => "feature_set").increment(1);
        } else {
            metrics::counter!("tariff_cache_misses", "cache" => "feature_set").increment(1);
        }
        cached
    }

    pub async fn insert_feature_set(&self, product_id: ProductId, features: Arc<Vec<Feature>>) {
        self.feature_sets.insert(product_id, features).await;
    }

    pub async fn invalidate_plan(&self, id: PlanId) {
        self.plans.invalidate(&id).await;
    }

    pub async fn invalidate_product(&self, id: ProductId) {
        self.feature_sets.invalidate(&id).await;
    }

    /// Drop every feature set; a feature may belong to any number of products
    pub fn invalidate_feature_sets(&self) {
        self.feature_sets.invalidate_all();
    }

    pub fn invalidate_all(&self) {
        self.plans.invalidate_all();
        self.feature_sets.invalidate_all();
    }

    /// Flush pending maintenance so [`Self::stats`] is exact
    pub async fn sync(&self) {
        self.plans.run_pending_tasks().await;
        self.feature_sets.run_pending_tasks().await;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            plan_entries: self.plans.entry_count(),
            feature_set_entries: self.feature_sets.entry_count(),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached plans
    pub plan_entries: u64,
    /// Number of cached product feature sets
    pub feature_set_entries: u64,
}

impl CacheStats {
    pub fn total_entries(&self) -> u64 {
        self.plan_entries + self.feature_set_entries
    }
}
