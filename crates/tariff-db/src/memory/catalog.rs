//! In-memory catalog repositories

use async_trait::async_trait;

use tariff_types::{
    BillingCycle, BillingCycleId, Feature, FeatureId, Plan, PlanId, Product, ProductId,
};

use super::{apply_limit, MemoryStore};
use crate::error::DbResult;
use crate::repo::{
    BillingCycleRepository, FeatureRepository, ListFilter, PlanRepository, ProductRepository,
};

fn sorted_by_key<T>(mut rows: Vec<T>, key: impl Fn(&T) -> &str, filter: &ListFilter) -> Vec<T> {
    rows.sort_by(|a, b| key(a).cmp(key(b)));
    apply_limit(rows, filter.limit)
}

/// In-memory feature repository
#[derive(Clone)]
pub struct MemoryFeatureRepository {
    store: MemoryStore,
}

impl MemoryFeatureRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl FeatureRepository for MemoryFeatureRepository {
    async fn save(&self, feature: &Feature) -> DbResult<()> {
        self.store.record("features.save")?;
        self.store
            .inner
            .features
            .upsert("feature", feature.id(), feature.key(), feature.clone())
    }

    async fn find_by_id(&self, id: FeatureId) -> DbResult<Option<Feature>> {
        self.store.record("features.find_by_id")?;
        Ok(self.store.inner.features.get(&id))
    }

    async fn find_by_key(&self, key: &str) -> DbResult<Option<Feature>> {
        self.store.record("features.find_by_key")?;
        Ok(self.store.inner.features.get_by_key(key))
    }

    async fn find_by_ids(&self, ids: &[FeatureId]) -> DbResult<Vec<Feature>> {
        self.store.record("features.find_by_ids")?;
        Ok(self.store.inner.features.get_many(ids))
    }

    async fn find_all(&self, filter: &ListFilter) -> DbResult<Vec<Feature>> {
        self.store.record("features.find_all")?;
        let rows = self.store.inner.features.filter(|f| {
            (filter.include_archived || !f.is_archived()) && filter.matches_key(f.key())
        });
        Ok(sorted_by_key(rows, Feature::key, filter))
    }

    async fn delete(&self, id: FeatureId) -> DbResult<bool> {
        self.store.record("features.delete")?;
        Ok(self
            .store
            .inner
            .features
            .remove(&id, |f| f.key().to_string())
            .is_some())
    }

    async fn exists(&self, key: &str) -> DbResult<bool> {
        self.store.record("features.exists")?;
        Ok(self.store.inner.features.contains_key(key))
    }
}

/// In-memory product repository
#[derive(Clone)]
pub struct MemoryProductRepository {
    store: MemoryStore,
}

impl MemoryProductRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProductRepository for MemoryProductRepository {
    async fn save(&self, product: &Product) -> DbResult<()> {
        self.store.record("products.save")?;
        self.store
            .inner
            .products
            .upsert("product", product.id(), product.key(), product.clone())
    }

    async fn find_by_id(&self, id: ProductId) -> DbResult<Option<Product>> {
        self.store.record("products.find_by_id")?;
        Ok(self.store.inner.products.get(&id))
    }

    async fn find_by_key(&self, key: &str) -> DbResult<Option<Product>> {
        self.store.record("products.find_by_key")?;
        Ok(self.store.inner.products.get_by_key(key))
    }

    async fn find_all(&self, filter: &ListFilter) -> DbResult<Vec<Product>> {
        self.store.record("products.find_all")?;
        let rows = self.store.inner.products.filter(|p| {
            (filter.include_archived || !p.is_archived()) && filter.matches_key(p.key())
        });
        Ok(sorted_by_key(rows, Product::key, filter))
    }

    async fn delete(&self, id: ProductId) -> DbResult<bool> {
        self.store.record("products.delete")?;
        Ok(self
            .store
            .inner
            .products
            .remove(&id, |p| p.key().to_string())
            .is_some())
    }

    async fn exists(&self, key: &str) -> DbResult<bool> {
        self.store.record("products.exists")?;
        Ok(self.store.inner.products.contains_key(key))
    }

    async fn find_by_feature(&self, feature_id: FeatureId) -> DbResult<Vec<Product>> {
        self.store.record("products.find_by_feature")?;
        let rows = self
            .store
            .inner
            .products
            .filter(|p| p.has_feature(feature_id));
        Ok(sorted_by_key(rows, Product::key, &ListFilter::default()))
    }

    async fn remove_feature_links(&self, feature_id: FeatureId) -> DbResult<u64> {
        self.store.record("products.remove_feature_links")?;
        let mut removed = 0;
        for mut product in self.store.inner.products.rows.iter_mut() {
            if product.detach_feature(feature_id) {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// In-memory plan repository
#[derive(Clone)]
pub struct MemoryPlanRepository {
    store: MemoryStore,
}

impl MemoryPlanRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PlanRepository for MemoryPlanRepository {
    async fn save(&self, plan: &Plan) -> DbResult<()> {
        self.store.record("plans.save")?;
        self.store
            .inner
            .plans
            .upsert("plan", plan.id(), plan.key(), plan.clone())
    }

    async fn find_by_id(&self, id: PlanId) -> DbResult<Option<Plan>> {
        self.store.record("plans.find_by_id")?;
        Ok(self.store.inner.plans.get(&id))
    }

    async fn find_by_key(&self, key: &str) -> DbResult<Option<Plan>> {
        self.store.record("plans.find_by_key")?;
        Ok(self.store.inner.plans.get_by_key(key))
    }

    async fn find_by_ids(&self, ids: &[PlanId]) -> DbResult<Vec<Plan>> {
        self.store.record("plans.find_by_ids")?;
        Ok(self.store.inner.plans.get_many(ids))
    }

    async fn find_all(&self, filter: &ListFilter) -> DbResult<Vec<Plan>> {
        self.store.record("plans.find_all")?;
        let rows = self.store.inner.plans.filter(|p| {
            (filter.include_archived || !p.is_archived()) && filter.matches_key(p.key())
        });
        Ok(sorted_by_key(rows, Plan::key, filter))
    }

    async fn delete(&self, id: PlanId) -> DbResult<bool> {
        self.store.record("plans.delete")?;
        Ok(self
            .store
            .inner
            .plans
            .remove(&id, |p| p.key().to_string())
            .is_some())
    }

    async fn exists(&self, key: &str) -> DbResult<bool> {
        self.store.record("plans.exists")?;
        Ok(self.store.inner.plans.contains_key(key))
    }

    async fn find_by_product(&self, product_id: ProductId) -> DbResult<Vec<Plan>> {
        self.store.record("plans.find_by_product")?;
        let rows = self
            .store
            .inner
            .plans
            .filter(|p| p.product_id() == product_id);
        Ok(sorted_by_key(rows, Plan::key, &ListFilter::default()))
    }

    async fn has_feature_value(&self, feature_id: FeatureId) -> DbResult<bool> {
        self.store.record("plans.has_feature_value")?;
        Ok(self
            .store
            .inner
            .plans
            .any(|p| p.has_feature_value(feature_id)))
    }

    async fn is_transition_target(&self, billing_cycle_key: &str) -> DbResult<bool> {
        self.store.record("plans.is_transition_target")?;
        Ok(self
            .store
            .inner
            .plans
            .any(|p| p.transition_target() == Some(billing_cycle_key)))
    }
}

/// In-memory billing cycle repository
#[derive(Clone)]
pub struct MemoryBillingCycleRepository {
    store: MemoryStore,
}

impl MemoryBillingCycleRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BillingCycleRepository for MemoryBillingCycleRepository {
    async fn save(&self, cycle: &BillingCycle) -> DbResult<()> {
        self.store.record("billing_cycles.save")?;
        self.store
            .inner
            .billing_cycles
            .upsert("billing cycle", cycle.id(), cycle.key(), cycle.clone())
    }

    async fn find_by_id(&self, id: BillingCycleId) -> DbResult<Option<BillingCycle>> {
        self.store.record("billing_cycles.find_by_id")?;
        Ok(self.store.inner.billing_cycles.get(&id))
    }

    async fn find_by_key(&self, key: &str) -> DbResult<Option<BillingCycle>> {
        self.store.record("billing_cycles.find_by_key")?;
        Ok(self.store.inner.billing_cycles.get_by_key(key))
    }

    async fn find_by_ids(&self, ids: &[BillingCycleId]) -> DbResult<Vec<BillingCycle>> {
        self.store.record("billing_cycles.find_by_ids")?;
        Ok(self.store.inner.billing_cycles.get_many(ids))
    }

    async fn find_all(&self, filter: &ListFilter) -> DbResult<Vec<BillingCycle>> {
        self.store.record("billing_cycles.find_all")?;
        let rows = self.store.inner.billing_cycles.filter(|c| {
            (filter.include_archived || !c.is_archived()) && filter.matches_key(c.key())
        });
        Ok(sorted_by_key(rows, BillingCycle::key, filter))
    }

    async fn delete(&self, id: BillingCycleId) -> DbResult<bool> {
        self.store.record("billing_cycles.delete")?;
        Ok(self
            .store
            .inner
            .billing_cycles
            .remove(&id, |c| c.key().to_string())
            .is_some())
    }

    async fn exists(&self, key: &str) -> DbResult<bool> {
        self.store.record("billing_cycles.exists")?;
        Ok(self.store.inner.billing_cycles.contains_key(key))
    }

    async fn find_by_plan(&self, plan_id: PlanId) -> DbResult<Vec<BillingCycle>> {
        self.store.record("billing_cycles.find_by_plan")?;
        let rows = self
            .store
            .inner
            .billing_cycles
            .filter(|c| c.plan_id() == plan_id);
        Ok(sorted_by_key(rows, BillingCycle::key, &ListFilter::default()))
    }

    async fn find_by_external_price_id(&self, price_id: &str) -> DbResult<Option<BillingCycle>> {
        self.store.record("billing_cycles.find_by_external_price_id")?;
        Ok(self
            .store
            .inner
            .billing_cycles
            .filter(|c| c.external_price_id() == Some(price_id))
            .into_iter()
            .next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbError;
    use tariff_types::{DurationUnit, FeatureValueType};

    #[tokio::test]
    async fn test_feature_key_is_unique() {
        let store = MemoryStore::new();
        let repo = MemoryFeatureRepository::new(store);
        let first = Feature::new("seats", "Seats", FeatureValueType::Numeric, "1").unwrap();
        let second = Feature::new("seats", "Seats", FeatureValueType::Numeric, "2").unwrap();

        repo.save(&first).await.unwrap();
        let err = repo.save(&second).await.unwrap_err();
        assert_eq!(
            err,
            DbError::Conflict {
                entity: "feature",
                key: "seats".to_string()
            }
        );

        // Updating the same record is not a conflict
        repo.save(&first).await.unwrap();
        assert!(repo.exists("seats").await.unwrap());
    }

    #[tokio::test]
    async fn test_feature_delete_frees_key() {
        let store = MemoryStore::new();
        let repo = MemoryFeatureRepository::new(store);
        let feature = Feature::new("seats", "Seats", FeatureValueType::Numeric, "1").unwrap();
        repo.save(&feature).await.unwrap();

        assert!(repo.delete(feature.id()).await.unwrap());
        assert!(!repo.delete(feature.id()).await.unwrap());
        assert!(!repo.exists("seats").await.unwrap());
        assert!(repo.find_by_key("seats").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_all_hides_archived_by_default() {
        let store = MemoryStore::new();
        let repo = MemoryFeatureRepository::new(store);
        let active = Feature::new("a", "A", FeatureValueType::Text, "x").unwrap();
        let mut archived = Feature::new("b", "B", FeatureValueType::Text, "x").unwrap();
        archived.archive();
        repo.save(&active).await.unwrap();
        repo.save(&archived).await.unwrap();

        let visible = repo.find_all(&ListFilter::default()).await.unwrap();
        assert_eq!(visible.len(), 1);

        let all = repo
            .find_all(&ListFilter {
                include_archived: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_cycle_lookup_by_price() {
        let store = MemoryStore::new();
        let repo = MemoryBillingCycleRepository::new(store);
        let cycle = BillingCycle::new("pro-monthly", PlanId::new(), "Monthly", DurationUnit::Months, Some(1))
            .unwrap()
            .with_external_price_id("price_123");
        repo.save(&cycle).await.unwrap();

        let found = repo.find_by_external_price_id("price_123").await.unwrap();
        assert_eq!(found.map(|c| c.id()), Some(cycle.id()));
        assert!(repo.find_by_external_price_id("price_x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_calls_are_counted() {
        let store = MemoryStore::new();
        let repo = MemoryPlanRepository::new(store.clone());
        repo.find_by_ids(&[PlanId::new()]).await.unwrap();
        repo.find_by_ids(&[]).await.unwrap();

        assert_eq!(store.call_count("plans.find_by_ids"), 2);
        assert_eq!(store.calls_to("plans"), 2);
        store.reset_calls();
        assert_eq!(store.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        let repo = MemoryPlanRepository::new(store.clone());
        store.fail_on("plans.find_by_id", "connection reset");

        let err = repo.find_by_id(PlanId::new()).await.unwrap_err();
        assert!(err.is_retryable());

        store.clear_failures();
        assert!(repo.find_by_id(PlanId::new()).await.unwrap().is_none());
    }
}
