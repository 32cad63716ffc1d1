//! Feature checker
//!
//! Answers "what value does feature X have for this customer right now?"
//! with a bounded number of repository round trips per call: one each for
//! the customer, the product, the product's features, the customer's
//! subscriptions, their billing cycles and their plans. Feature sets and
//! plans are served from the [`CatalogCache`] when present.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tariff_db::Repositories;
use tariff_types::{BillingCycle, BillingCycleId, Feature, Plan, PlanId, Product, Subscription};
use tracing::instrument;

use crate::cache::CatalogCache;
use crate::error::{CoreError, CoreResult};
use crate::resolver::{order_for_resolution, resolve_all, SubscriptionContext};

/// Entitlement lookups over the catalog and subscriptions
#[derive(Debug, Clone)]
pub struct FeatureChecker {
    repos: Repositories,
    cache: CatalogCache,
}

/// Everything a resolution needs, loaded in one pass
struct Snapshot {
    features: Arc<Vec<Feature>>,
    subscriptions: Vec<(Subscription, PlanId)>,
    plans: HashMap<PlanId, Plan>,
}

impl Snapshot {
    fn resolve(&self, features: &[Feature]) -> BTreeMap<String, String> {
        let mut contexts: Vec<_> = self
            .subscriptions
            .iter()
            .map(|(subscription, plan_id)| SubscriptionContext {
                subscription,
                plan_id: *plan_id,
            })
            .collect();
        order_for_resolution(&mut contexts);
        resolve_all(features, &self.plans, &contexts)
    }
}

impl FeatureChecker {
    pub fn new(repos: Repositories, cache: CatalogCache) -> Self {
        Self { repos, cache }
    }

    /// Resolved value of one feature
    #[instrument(skip(self))]
    pub async fn get_value_for_customer(
        &self,
        customer_key: &str,
        product_key: &str,
        feature_key: &str,
    ) -> CoreResult<String> {
        let snapshot = self.load(customer_key, product_key).await?;
        let Some(feature) = snapshot.features.iter().find(|f| f.key() == feature_key) else {
            return Err(self.missing_feature(feature_key, product_key).await?);
        };

        let mut values = snapshot.resolve(std::slice::from_ref(feature));
        values
            .remove(feature_key)
            .ok_or_else(|| CoreError::not_found("feature", feature_key))
    }

    /// Resolved values of every active feature of the product, keyed by feature key
    #[instrument(skip(self))]
    pub async fn get_all_features_for_customer(
        &self,
        customer_key: &str,
        product_key: &str,
    ) -> CoreResult<BTreeMap<String, String>> {
        let snapshot = self.load(customer_key, product_key).await?;
        Ok(snapshot.resolve(&snapshot.features))
    }

    async fn load(&self, customer_key: &str, product_key: &str) -> CoreResult<Snapshot> {
        let customer = self
            .repos
            .customers
            .find_by_key(customer_key)
            .await?
            .ok_or_else(|| CoreError::not_found("customer", customer_key))?;
        let product = self
            .repos
            .products
            .find_by_key(product_key)
            .await?
            .ok_or_else(|| CoreError::not_found("product", product_key))?;

        let features = self.feature_set(&product).await?;

        let subscriptions: Vec<Subscription> = self
            .repos
            .subscriptions
            .find_by_customer(customer.id())
            .await?
            .into_iter()
            .filter(|s| s.status().is_entitling())
            .collect();

        let cycles = self.billing_cycles(&subscriptions).await?;
        let plan_ids: BTreeSet<PlanId> = cycles.values().map(BillingCycle::plan_id).collect();
        let plans: HashMap<PlanId, Plan> = self
            .plans(&plan_ids.into_iter().collect::<Vec<_>>())
            .await?
            .into_iter()
            .filter(|p| p.product_id() == product.id())
            .map(|p| (p.id(), p))
            .collect();

        let subscriptions = subscriptions
            .into_iter()
            .filter_map(|s| {
                let plan_id = cycles.get(&s.billing_cycle_id())?.plan_id();
                plans.contains_key(&plan_id).then_some((s, plan_id))
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            customer_key,
            product_key,
            subscriptions = subscriptions.len(),
            "entitlement snapshot loaded"
        );
        Ok(Snapshot {
            features,
            subscriptions,
            plans,
        })
    }

    /// Active features of a product, sorted by key
    async fn feature_set(&self, product: &Product) -> CoreResult<Arc<Vec<Feature>>> {
        if let Some(cached) = self.cache.get_feature_set(product.id()).await {
            return Ok(cached);
        }

        let ids: Vec<_> = product.feature_ids().iter().copied().collect();
        let mut features: Vec<Feature> = if ids.is_empty() {
            Vec::new()
        } else {
            self.repos.features.find_by_ids(&ids).await?
        };
        features.retain(|f| !f.is_archived());
        features.sort_by(|a, b| a.key().cmp(b.key()));

        let features = Arc::new(features);
        self.cache
            .insert_feature_set(product.id(), Arc::clone(&features))
            .await;
        Ok(features)
    }

    async fn billing_cycles(
        &self,
        subscriptions: &[Subscription],
    ) -> CoreResult<HashMap<BillingCycleId, BillingCycle>> {
        let ids: BTreeSet<_> = subscriptions.iter().map(Subscription::billing_cycle_id).collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<_> = ids.into_iter().collect();
        Ok(self
            .repos
            .billing_cycles
            .find_by_ids(&ids)
            .await?
            .into_iter()
            .map(|c| (c.id(), c))
            .collect())
    }

    async fn plans(&self, ids: &[PlanId]) -> CoreResult<Vec<Plan>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let (mut plans, missing) = self.cache.get_plans(ids).await;
        if !missing.is_empty() {
            let fetched = self.repos.plans.find_by_ids(&missing).await?;
            self.cache.insert_plans(&fetched).await;
            plans.extend(fetched);
        }
        Ok(plans)
    }

    /// Error for a feature outside the product's active feature set
    async fn missing_feature(&self, feature_key: &str, product_key: &str) -> CoreResult<CoreError> {
        let err = match self.repos.features.find_by_key(feature_key).await? {
            Some(_) => CoreError::not_found("product feature", format!("{product_key}/{feature_key}")),
            None => CoreError::not_found("feature", feature_key),
        };
        Ok(err)
    }
}
