//! Catalog service - features, products, plans, billing cycles and customers

use tariff_db::{ListFilter, Repositories};
use tariff_types::{
    BillingCycle, Customer, DomainError, DurationUnit, Feature, FeatureValueType, Plan, Product,
};
use tracing::instrument;

use crate::cache::CatalogCache;
use crate::error::{CoreError, CoreResult};

/// Input for [`CatalogService::create_billing_cycle`]
#[derive(Debug, Clone)]
pub struct CreateBillingCycle {
    pub plan_key: String,
    pub key: String,
    pub display_name: String,
    pub duration_unit: DurationUnit,
    pub duration_value: Option<u32>,
    pub external_price_id: Option<String>,
}

/// Catalog administration
///
/// Every save invalidates the affected [`CatalogCache`] entries. Hard deletes
/// require the record to be archived and unreferenced.
#[derive(Debug, Clone)]
pub struct CatalogService {
    repos: Repositories,
    cache: CatalogCache,
}

impl CatalogService {
    pub fn new(repos: Repositories, cache: CatalogCache) -> Self {
        Self { repos, cache }
    }

    pub fn cache(&self) -> &CatalogCache {
        &self.cache
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub async fn get_feature(&self, key: &str) -> CoreResult<Feature> {
        self.repos
            .features
            .find_by_key(key)
            .await?
            .ok_or_else(|| CoreError::not_found("feature", key))
    }

    pub async fn get_product(&self, key: &str) -> CoreResult<Product> {
        self.repos
            .products
            .find_by_key(key)
            .await?
            .ok_or_else(|| CoreError::not_found("product", key))
    }

    pub async fn get_plan(&self, key: &str) -> CoreResult<Plan> {
        self.repos
            .plans
            .find_by_key(key)
            .await?
            .ok_or_else(|| CoreError::not_found("plan", key))
    }

    pub async fn get_billing_cycle(&self, key: &str) -> CoreResult<BillingCycle> {
        self.repos
            .billing_cycles
            .find_by_key(key)
            .await?
            .ok_or_else(|| CoreError::not_found("billing cycle", key))
    }

    pub async fn get_customer(&self, key: &str) -> CoreResult<Customer> {
        self.repos
            .customers
            .find_by_key(key)
            .await?
            .ok_or_else(|| CoreError::not_found("customer", key))
    }

    pub async fn list_features(&self, filter: &ListFilter) -> CoreResult<Vec<Feature>> {
        Ok(self.repos.features.find_all(filter).await?)
    }

    pub async fn list_products(&self, filter: &ListFilter) -> CoreResult<Vec<Product>> {
        Ok(self.repos.products.find_all(filter).await?)
    }

    pub async fn list_plans(&self, filter: &ListFilter) -> CoreResult<Vec<Plan>> {
        Ok(self.repos.plans.find_all(filter).await?)
    }

    pub async fn list_billing_cycles(&self, filter: &ListFilter) -> CoreResult<Vec<BillingCycle>> {
        Ok(self.repos.billing_cycles.find_all(filter).await?)
    }

    pub async fn list_customers(&self, filter: &ListFilter) -> CoreResult<Vec<Customer>> {
        Ok(self.repos.customers.find_all(filter).await?)
    }

    // =========================================================================
    // Features
    // =========================================================================

    #[instrument(skip(self, display_name))]
    pub async fn create_feature(
        &self,
        key: &str,
        display_name: &str,
        value_type: FeatureValueType,
        default_value: &str,
    ) -> CoreResult<Feature> {
        if self.repos.features.exists(key).await? {
            return Err(CoreError::conflict("feature", key));
        }
        let feature = Feature::new(key, display_name, value_type, default_value)?;
        self.save_feature(&feature).await?;
        tracing::info!(feature_key = %key, "feature created");
        Ok(feature)
    }

    #[instrument(skip(self))]
    pub async fn set_feature_default(&self, key: &str, default_value: &str) -> CoreResult<Feature> {
        let mut feature = self.get_feature(key).await?;
        feature.set_default_value(default_value)?;
        self.save_feature(&feature).await?;
        Ok(feature)
    }

    #[instrument(skip(self))]
    pub async fn archive_feature(&self, key: &str) -> CoreResult<Feature> {
        let mut feature = self.get_feature(key).await?;
        if feature.archive() {
            self.save_feature(&feature).await?;
            tracing::info!(feature_key = %key, "feature archived");
        }
        Ok(feature)
    }

    /// Delete an archived feature no plan value or override refers to.
    ///
    /// Product associations are removed with it.
    #[instrument(skip(self))]
    pub async fn delete_feature(&self, key: &str) -> CoreResult<()> {
        let feature = self.get_feature(key).await?;
        if !feature.is_archived() {
            return Err(not_archived("feature", key));
        }
        if self.repos.plans.has_feature_value(feature.id()).await? {
            return Err(still_referenced("feature", key, "plan feature values"));
        }
        if self.repos.subscriptions.has_overrides_for_feature(feature.id()).await? {
            return Err(still_referenced("feature", key, "subscription overrides"));
        }

        let unlinked = self.repos.products.remove_feature_links(feature.id()).await?;
        self.repos.features.delete(feature.id()).await?;
        self.cache.invalidate_feature_sets();
        tracing::info!(feature_key = %key, unlinked, "feature deleted");
        Ok(())
    }

    async fn save_feature(&self, feature: &Feature) -> CoreResult<()> {
        self.repos.features.save(feature).await?;
        self.cache.invalidate_feature_sets();
        Ok(())
    }

    // =========================================================================
    // Products
    // =========================================================================

    #[instrument(skip(self, display_name))]
    pub async fn create_product(&self, key: &str, display_name: &str) -> CoreResult<Product> {
        if self.repos.products.exists(key).await? {
            return Err(CoreError::conflict("product", key));
        }
        let product = Product::new(key, display_name)?;
        self.save_product(&product).await?;
        tracing::info!(product_key = %key, "product created");
        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn attach_feature(&self, product_key: &str, feature_key: &str) -> CoreResult<Product> {
        let mut product = self.get_product(product_key).await?;
        let feature = self.get_feature(feature_key).await?;
        if feature.is_archived() {
            return Err(archived("feature", feature_key));
        }
        if product.attach_feature(feature.id()) {
            self.save_product(&product).await?;
        }
        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn detach_feature(&self, product_key: &str, feature_key: &str) -> CoreResult<Product> {
        let mut product = self.get_product(product_key).await?;
        let feature = self.get_feature(feature_key).await?;
        if product.detach_feature(feature.id()) {
            self.save_product(&product).await?;
        }
        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn archive_product(&self, key: &str) -> CoreResult<Product> {
        let mut product = self.get_product(key).await?;
        if product.archive() {
            self.save_product(&product).await?;
            tracing::info!(product_key = %key, "product archived");
        }
        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn delete_product(&self, key: &str) -> CoreResult<()> {
        let product = self.get_product(key).await?;
        if !product.is_archived() {
            return Err(not_archived("product", key));
        }
        if !self.repos.plans.find_by_product(product.id()).await?.is_empty() {
            return Err(still_referenced("product", key, "plans"));
        }
        self.repos.products.delete(product.id()).await?;
        self.cache.invalidate_product(product.id()).await;
        tracing::info!(product_key = %key, "product deleted");
        Ok(())
    }

    async fn save_product(&self, product: &Product) -> CoreResult<()> {
        self.repos.products.save(product).await?;
        self.cache.invalidate_product(product.id()).await;
        Ok(())
    }

    // =========================================================================
    // Plans
    // =========================================================================

    #[instrument(skip(self, display_name))]
    pub async fn create_plan(
        &self,
        product_key: &str,
        key: &str,
        display_name: &str,
    ) -> CoreResult<Plan> {
        let product = self.get_product(product_key).await?;
        if product.is_archived() {
            return Err(archived("product", product_key));
        }
        if self.repos.plans.exists(key).await? {
            return Err(CoreError::conflict("plan", key));
        }
        let plan = Plan::new(key, product.id(), display_name)?;
        self.save_plan(&plan).await?;
        tracing::info!(plan_key = %key, product_key = %product_key, "plan created");
        Ok(plan)
    }

    /// Set a plan value for one of its product's features
    #[instrument(skip(self))]
    pub async fn set_plan_feature_value(
        &self,
        plan_key: &str,
        feature_key: &str,
        value: &str,
    ) -> CoreResult<Plan> {
        let mut plan = self.get_plan(plan_key).await?;
        let feature = self.get_feature(feature_key).await?;
        let product = self
            .repos
            .products
            .find_by_id(plan.product_id())
            .await?
            .ok_or_else(|| CoreError::not_found("product", plan.product_id().to_string()))?;
        if !product.has_feature(feature.id()) {
            return Err(DomainError::Rule(format!(
                "feature {feature_key} is not part of product {}",
                product.key()
            ))
            .into());
        }

        if plan.set_feature_value(&feature, value)? {
            self.save_plan(&plan).await?;
        }
        Ok(plan)
    }

    #[instrument(skip(self))]
    pub async fn remove_plan_feature_value(&self, plan_key: &str, feature_key: &str) -> CoreResult<Plan> {
        let mut plan = self.get_plan(plan_key).await?;
        let feature = self.get_feature(feature_key).await?;
        if plan.remove_feature_value(feature.id()) {
            self.save_plan(&plan).await?;
        }
        Ok(plan)
    }

    /// Set or clear the billing cycle subscriptions move to when they expire
    #[instrument(skip(self))]
    pub async fn set_plan_transition(
        &self,
        plan_key: &str,
        billing_cycle_key: Option<&str>,
    ) -> CoreResult<Plan> {
        let mut plan = self.get_plan(plan_key).await?;
        if let Some(cycle_key) = billing_cycle_key {
            let cycle = self.get_billing_cycle(cycle_key).await?;
            if cycle.is_archived() {
                return Err(archived("billing cycle", cycle_key));
            }
        }
        if plan.set_transition_target(billing_cycle_key.map(str::to_string)) {
            self.save_plan(&plan).await?;
        }
        Ok(plan)
    }

    #[instrument(skip(self))]
    pub async fn archive_plan(&self, key: &str) -> CoreResult<Plan> {
        let mut plan = self.get_plan(key).await?;
        if plan.archive() {
            self.save_plan(&plan).await?;
            tracing::info!(plan_key = %key, "plan archived");
        }
        Ok(plan)
    }

    #[instrument(skip(self))]
    pub async fn delete_plan(&self, key: &str) -> CoreResult<()> {
        let plan = self.get_plan(key).await?;
        if !plan.is_archived() {
            return Err(not_archived("plan", key));
        }
        if !self.repos.billing_cycles.find_by_plan(plan.id()).await?.is_empty() {
            return Err(still_referenced("plan", key, "billing cycles"));
        }
        self.repos.plans.delete(plan.id()).await?;
        self.cache.invalidate_plan(plan.id()).await;
        tracing::info!(plan_key = %key, "plan deleted");
        Ok(())
    }

    async fn save_plan(&self, plan: &Plan) -> CoreResult<()> {
        self.repos.plans.save(plan).await?;
        self.cache.invalidate_plan(plan.id()).await;
        Ok(())
    }

    // =========================================================================
    // Billing cycles
    // =========================================================================

    #[instrument(skip(self, input), fields(billing_cycle_key = %input.key))]
    pub async fn create_billing_cycle(&self, input: CreateBillingCycle) -> CoreResult<BillingCycle> {
        let plan = self.get_plan(&input.plan_key).await?;
        if plan.is_archived() {
            return Err(archived("plan", &input.plan_key));
        }
        if self.repos.billing_cycles.exists(&input.key).await? {
            return Err(CoreError::conflict("billing cycle", input.key));
        }

        let mut cycle = BillingCycle::new(
            input.key,
            plan.id(),
            input.display_name,
            input.duration_unit,
            input.duration_value,
        )?;
        if let Some(price_id) = input.external_price_id {
            cycle = cycle.with_external_price_id(price_id);
        }
        self.repos.billing_cycles.save(&cycle).await?;
        tracing::info!(plan_key = %plan.key(), "billing cycle created");
        Ok(cycle)
    }

    #[instrument(skip(self))]
    pub async fn set_external_price_id(
        &self,
        key: &str,
        price_id: Option<&str>,
    ) -> CoreResult<BillingCycle> {
        let mut cycle = self.get_billing_cycle(key).await?;
        if cycle.set_external_price_id(price_id.map(str::to_string)) {
            self.repos.billing_cycles.save(&cycle).await?;
        }
        Ok(cycle)
    }

    #[instrument(skip(self))]
    pub async fn archive_billing_cycle(&self, key: &str) -> CoreResult<BillingCycle> {
        let mut cycle = self.get_billing_cycle(key).await?;
        if cycle.archive() {
            self.repos.billing_cycles.save(&cycle).await?;
            tracing::info!(billing_cycle_key = %key, "billing cycle archived");
        }
        Ok(cycle)
    }

    #[instrument(skip(self))]
    pub async fn delete_billing_cycle(&self, key: &str) -> CoreResult<()> {
        let cycle = self.get_billing_cycle(key).await?;
        if !cycle.is_archived() {
            return Err(not_archived("billing cycle", key));
        }
        if self
            .repos
            .subscriptions
            .has_subscriptions_for_billing_cycle(cycle.id())
            .await?
        {
            return Err(still_referenced("billing cycle", key, "subscriptions"));
        }
        if self.repos.plans.is_transition_target(key).await? {
            return Err(still_referenced("billing cycle", key, "plan transitions"));
        }
        self.repos.billing_cycles.delete(cycle.id()).await?;
        tracing::info!(billing_cycle_key = %key, "billing cycle deleted");
        Ok(())
    }

    // =========================================================================
    // Customers
    // =========================================================================

    #[instrument(skip(self, display_name, email))]
    pub async fn create_customer(
        &self,
        key: &str,
        display_name: &str,
        email: &str,
    ) -> CoreResult<Customer> {
        if self.repos.customers.exists(key).await? {
            return Err(CoreError::conflict("customer", key));
        }
        let customer = Customer::new(key, display_name, email)?;
        let saved = self.repos.customers.save(&customer).await?;
        tracing::info!(customer_key = %key, "customer created");
        Ok(saved)
    }

    #[instrument(skip(self))]
    pub async fn archive_customer(&self, key: &str) -> CoreResult<Customer> {
        let mut customer = self.get_customer(key).await?;
        if customer.archive() {
            customer = self.repos.customers.save(&customer).await?;
            tracing::info!(customer_key = %key, "customer archived");
        }
        Ok(customer)
    }

    #[instrument(skip(self))]
    pub async fn delete_customer(&self, key: &str) -> CoreResult<()> {
        let customer = self.get_customer(key).await?;
        if !customer.is_archived() {
            return Err(not_archived("customer", key));
        }
        if self
            .repos
            .subscriptions
            .has_subscriptions_for_customer(customer.id())
            .await?
        {
            return Err(still_referenced("customer", key, "subscriptions"));
        }
        self.repos.customers.delete(customer.id()).await?;
        tracing::info!(customer_key = %key, "customer deleted");
        Ok(())
    }
}

fn not_archived(entity: &'static str, key: &str) -> CoreError {
    DomainError::NotArchived {
        entity,
        key: key.to_string(),
    }
    .into()
}

fn archived(entity: &'static str, key: &str) -> CoreError {
    DomainError::Archived {
        entity,
        key: key.to_string(),
    }
    .into()
}

fn still_referenced(entity: &'static str, key: &str, by: &'static str) -> CoreError {
    DomainError::StillReferenced {
        entity,
        key: key.to_string(),
        by,
    }
    .into()
}
