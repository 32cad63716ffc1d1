//! Repository traits
//!
//! Define async repository interfaces for persistence operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tariff_types::{
    BillingCycle, BillingCycleId, Customer, CustomerId, Feature, FeatureId, Plan, PlanId,
    Product, ProductId, Subscription, SubscriptionId, SubscriptionStatus,
};

use crate::error::DbResult;

/// Filter for catalog listings
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Include archived records
    pub include_archived: bool,
    /// Only keys starting with this prefix
    pub key_prefix: Option<String>,
    /// Maximum number of rows
    pub limit: Option<usize>,
}

impl ListFilter {
    pub fn matches_key(&self, key: &str) -> bool {
        self.key_prefix
            .as_deref()
            .map_or(true, |prefix| key.starts_with(prefix))
    }
}

/// Filter for subscription listings
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub customer_id: Option<CustomerId>,
    pub billing_cycle_id: Option<BillingCycleId>,
    pub status: Option<SubscriptionStatus>,
    pub limit: Option<usize>,
}

/// Feature repository trait
#[async_trait]
pub trait FeatureRepository: Send + Sync {
    /// Insert or update a feature
    async fn save(&self, feature: &Feature) -> DbResult<()>;

    async fn find_by_id(&self, id: FeatureId) -> DbResult<Option<Feature>>;

    async fn find_by_key(&self, key: &str) -> DbResult<Option<Feature>>;

    /// Batch lookup; unknown ids are skipped
    async fn find_by_ids(&self, ids: &[FeatureId]) -> DbResult<Vec<Feature>>;

    async fn find_all(&self, filter: &ListFilter) -> DbResult<Vec<Feature>>;

    /// Delete a feature. Returns `false` if it did not exist.
    async fn delete(&self, id: FeatureId) -> DbResult<bool>;

    async fn exists(&self, key: &str) -> DbResult<bool>;
}

/// Product repository trait
#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn save(&self, product: &Product) -> DbResult<()>;

    async fn find_by_id(&self, id: ProductId) -> DbResult<Option<Product>>;

    async fn find_by_key(&self, key: &str) -> DbResult<Option<Product>>;

    async fn find_all(&self, filter: &ListFilter) -> DbResult<Vec<Product>>;

    async fn delete(&self, id: ProductId) -> DbResult<bool>;

    async fn exists(&self, key: &str) -> DbResult<bool>;

    /// Products associated with a feature
    async fn find_by_feature(&self, feature_id: FeatureId) -> DbResult<Vec<Product>>;

    /// Drop every product association of a feature. Returns the number removed.
    async fn remove_feature_links(&self, feature_id: FeatureId) -> DbResult<u64>;
}

/// Plan repository trait
#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn save(&self, plan: &Plan) -> DbResult<()>;

    async fn find_by_id(&self, id: PlanId) -> DbResult<Option<Plan>>;

    async fn find_by_key(&self, key: &str) -> DbResult<Option<Plan>>;

    /// Batch lookup; unknown ids are skipped
    async fn find_by_ids(&self, ids: &[PlanId]) -> DbResult<Vec<Plan>>;

    async fn find_all(&self, filter: &ListFilter) -> DbResult<Vec<Plan>>;

    async fn delete(&self, id: PlanId) -> DbResult<bool>;

    async fn exists(&self, key: &str) -> DbResult<bool>;

    async fn find_by_product(&self, product_id: ProductId) -> DbResult<Vec<Plan>>;

    /// Whether any plan carries a value for the feature
    async fn has_feature_value(&self, feature_id: FeatureId) -> DbResult<bool>;

    /// Whether any plan transitions onto the given billing cycle key
    async fn is_transition_target(&self, billing_cycle_key: &str) -> DbResult<bool>;
}

/// Billing cycle repository trait
#[async_trait]
pub trait BillingCycleRepository: Send + Sync {
    async fn save(&self, cycle: &BillingCycle) -> DbResult<()>;

    async fn find_by_id(&self, id: BillingCycleId) -> DbResult<Option<BillingCycle>>;

    async fn find_by_key(&self, key: &str) -> DbResult<Option<BillingCycle>>;

    /// Batch lookup; unknown ids are skipped
    async fn find_by_ids(&self, ids: &[BillingCycleId]) -> DbResult<Vec<BillingCycle>>;

    async fn find_all(&self, filter: &ListFilter) -> DbResult<Vec<BillingCycle>>;

    async fn delete(&self, id: BillingCycleId) -> DbResult<bool>;

    async fn exists(&self, key: &str) -> DbResult<bool>;

    async fn find_by_plan(&self, plan_id: PlanId) -> DbResult<Vec<BillingCycle>>;

    /// Find the cycle bound to a payment provider price
    async fn find_by_external_price_id(&self, price_id: &str) -> DbResult<Option<BillingCycle>>;
}

/// Customer repository trait
#[async_trait]
pub trait CustomerRepository: Send + Sync {
    /// Versioned insert or update.
    ///
    /// Fails with `VersionConflict` when the stored row moved past
    /// `customer.version()`. Returns the stored copy.
    async fn save(&self, customer: &Customer) -> DbResult<Customer>;

    async fn find_by_id(&self, id: CustomerId) -> DbResult<Option<Customer>>;

    async fn find_by_key(&self, key: &str) -> DbResult<Option<Customer>>;

    /// Find a customer by payment provider customer id
    async fn find_by_external_billing_id(&self, external_id: &str) -> DbResult<Option<Customer>>;

    async fn find_all(&self, filter: &ListFilter) -> DbResult<Vec<Customer>>;

    async fn delete(&self, id: CustomerId) -> DbResult<bool>;

    async fn exists(&self, key: &str) -> DbResult<bool>;
}

/// Subscription repository trait
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Versioned insert or update, see [`CustomerRepository::save`]
    async fn save(&self, subscription: &Subscription) -> DbResult<Subscription>;

    async fn find_by_id(&self, id: SubscriptionId) -> DbResult<Option<Subscription>>;

    async fn find_by_key(&self, key: &str) -> DbResult<Option<Subscription>>;

    async fn find_all(&self, filter: &SubscriptionFilter) -> DbResult<Vec<Subscription>>;

    async fn delete(&self, id: SubscriptionId) -> DbResult<bool>;

    async fn exists(&self, key: &str) -> DbResult<bool>;

    /// All subscriptions of a customer in one fetch
    async fn find_by_customer(&self, customer_id: CustomerId) -> DbResult<Vec<Subscription>>;

    /// Find a subscription by payment provider subscription id
    async fn find_by_external_billing_id(
        &self,
        external_id: &str,
    ) -> DbResult<Option<Subscription>>;

    /// Entitling subscriptions whose period ended at or before `now`, that
    /// will not auto-renew and whose plan declares an on-expiry transition
    async fn find_expired_with_transition_plans(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> DbResult<Vec<Subscription>>;

    /// Auto-renewing active/trial subscriptions whose period ended
    async fn find_due_for_renewal(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> DbResult<Vec<Subscription>>;

    /// Like [`Self::find_expired_with_transition_plans`] but for plans
    /// without a transition
    async fn find_lapsed(&self, now: DateTime<Utc>, limit: usize) -> DbResult<Vec<Subscription>>;

    async fn has_subscriptions_for_billing_cycle(
        &self,
        billing_cycle_id: BillingCycleId,
    ) -> DbResult<bool>;

    async fn has_subscriptions_for_customer(&self, customer_id: CustomerId) -> DbResult<bool>;

    /// Whether any subscription overrides the feature
    async fn has_overrides_for_feature(&self, feature_id: FeatureId) -> DbResult<bool>;
}

/// Ledger state of a provider event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Processing,
    Completed,
}

/// Ledger row for a provider event
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub event_type: String,
    pub state: EventState,
    pub outcome: Option<String>,
    pub claimed_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of claiming an event id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Caller holds exclusive processing rights
    Claimed,
    /// Already processed to completion
    AlreadyCompleted,
    /// Another worker is processing it
    InProgress,
}

/// Provider event ledger
#[async_trait]
pub trait ProcessedEventRepository: Send + Sync {
    /// Atomically claim an event id for processing.
    ///
    /// Claims stuck in processing for longer than `stale_after` are taken over.
    async fn claim(
        &self,
        event_id: &str,
        event_type: &str,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> DbResult<ClaimOutcome>;

    /// Mark a claimed event as completed
    async fn complete(&self, event_id: &str, outcome: &str, now: DateTime<Utc>) -> DbResult<()>;

    /// Drop a claim so the event can be processed again
    async fn release(&self, event_id: &str) -> DbResult<()>;

    async fn find(&self, event_id: &str) -> DbResult<Option<ProcessedEvent>>;
}
