//! Subscription lifecycle manager
//!
//! Creates subscriptions and drives them through renewal, cancellation,
//! expiry and on-expiry plan transitions. Every operation loads the
//! aggregate, applies one command and saves once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tariff_db::Repositories;
use tariff_types::{
    BillingCycle, DomainError, FeatureId, NewSubscription, OverrideKind, Plan, Subscription,
};
use tracing::instrument;

use crate::calculator::period_end_for;
use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, CoreResult};

/// Input for [`SubscriptionLifecycleManager::create_subscription`]
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub key: String,
    pub customer_key: String,
    pub billing_cycle_key: String,
    pub auto_renew: bool,
    /// Defaults to now
    pub activation_date: Option<DateTime<Utc>>,
    pub trial_end_date: Option<DateTime<Utc>>,
    pub external_billing_id: Option<String>,
}

impl CreateSubscription {
    pub fn new(
        key: impl Into<String>,
        customer_key: impl Into<String>,
        billing_cycle_key: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            customer_key: customer_key.into(),
            billing_cycle_key: billing_cycle_key.into(),
            auto_renew: true,
            activation_date: None,
            trial_end_date: None,
            external_billing_id: None,
        }
    }

    #[must_use]
    pub fn with_auto_renew(mut self, auto_renew: bool) -> Self {
        self.auto_renew = auto_renew;
        self
    }

    #[must_use]
    pub fn with_activation_date(mut self, at: DateTime<Utc>) -> Self {
        self.activation_date = Some(at);
        self
    }

    #[must_use]
    pub fn with_trial_end(mut self, at: DateTime<Utc>) -> Self {
        self.trial_end_date = Some(at);
        self
    }

    #[must_use]
    pub fn with_external_billing_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_billing_id = Some(external_id.into());
        self
    }
}

/// How a cancellation takes effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelMode {
    Immediately,
    AtPeriodEnd,
}

/// An expired subscription and the one that replaced it
#[derive(Debug, Clone)]
pub struct Transition {
    pub expired: Subscription,
    pub successor: Subscription,
}

/// Keys of a completed transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionedPair {
    pub from_key: String,
    pub to_key: String,
}

/// A subscription a batch operation could not process
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub subscription_key: String,
    pub error: CoreError,
}

/// Outcome of a batch sweep
#[derive(Debug, Clone)]
pub struct BatchReport<T> {
    pub completed: Vec<T>,
    pub failures: Vec<BatchFailure>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, subscription_key: &str, result: CoreResult<T>) {
        match result {
            Ok(item) => self.completed.push(item),
            Err(error) => {
                tracing::warn!(subscription_key, %error, "batch item failed");
                self.failures.push(BatchFailure {
                    subscription_key: subscription_key.to_string(),
                    error,
                });
            }
        }
    }
}

/// Key of the subscription created when `key` transitions onto `target_cycle_key`
pub fn successor_key(key: &str, target_cycle_key: &str) -> String {
    format!("{key}~{target_cycle_key}")
}

/// Subscription lifecycle manager
#[derive(Clone)]
pub struct SubscriptionLifecycleManager {
    repos: Repositories,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SubscriptionLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionLifecycleManager")
            .finish_non_exhaustive()
    }
}

impl SubscriptionLifecycleManager {
    pub fn new(repos: Repositories) -> Self {
        Self::with_clock(repos, Arc::new(SystemClock))
    }

    pub fn with_clock(repos: Repositories, clock: Arc<dyn Clock>) -> Self {
        Self { repos, clock }
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub async fn get_subscription(&self, key: &str) -> CoreResult<Subscription> {
        self.repos
            .subscriptions
            .find_by_key(key)
            .await?
            .ok_or_else(|| CoreError::not_found("subscription", key))
    }

    pub async fn list_for_customer(&self, customer_key: &str) -> CoreResult<Vec<Subscription>> {
        let customer = self
            .repos
            .customers
            .find_by_key(customer_key)
            .await?
            .ok_or_else(|| CoreError::not_found("customer", customer_key))?;
        Ok(self.repos.subscriptions.find_by_customer(customer.id()).await?)
    }

    async fn billing_cycle_of(&self, subscription: &Subscription) -> CoreResult<BillingCycle> {
        self.repos
            .billing_cycles
            .find_by_id(subscription.billing_cycle_id())
            .await?
            .ok_or_else(|| {
                CoreError::not_found("billing cycle", subscription.billing_cycle_id().to_string())
            })
    }

    async fn plan_of(&self, cycle: &BillingCycle) -> CoreResult<Plan> {
        self.repos
            .plans
            .find_by_id(cycle.plan_id())
            .await?
            .ok_or_else(|| CoreError::not_found("plan", cycle.plan_id().to_string()))
    }

    async fn feature_id(&self, feature_key: &str) -> CoreResult<FeatureId> {
        let feature = self
            .repos
            .features
            .find_by_key(feature_key)
            .await?
            .ok_or_else(|| CoreError::not_found("feature", feature_key))?;
        Ok(feature.id())
    }

    async fn save(&self, subscription: &Subscription) -> CoreResult<Subscription> {
        Ok(self.repos.subscriptions.save(subscription).await?)
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Create a subscription on a billing cycle.
    ///
    /// Status is `pending` for a future activation, `trial` while the trial
    /// end lies ahead and `active` otherwise.
    #[instrument(skip(self, input), fields(subscription_key = %input.key))]
    pub async fn create_subscription(&self, input: CreateSubscription) -> CoreResult<Subscription> {
        if self.repos.subscriptions.exists(&input.key).await? {
            return Err(CoreError::conflict("subscription", input.key));
        }

        let customer = self
            .repos
            .customers
            .find_by_key(&input.customer_key)
            .await?
            .ok_or_else(|| CoreError::not_found("customer", &input.customer_key))?;
        if customer.is_archived() {
            return Err(archived("customer", customer.key()));
        }

        let cycle = self
            .repos
            .billing_cycles
            .find_by_key(&input.billing_cycle_key)
            .await?
            .ok_or_else(|| CoreError::not_found("billing cycle", &input.billing_cycle_key))?;
        if cycle.is_archived() {
            return Err(archived("billing cycle", cycle.key()));
        }
        cycle.validate()?;

        let plan = self.plan_of(&cycle).await?;
        if plan.is_archived() {
            return Err(archived("plan", plan.key()));
        }

        let now = self.clock.now();
        let start = input.activation_date.unwrap_or(now);
        let period_end = period_end_for(start, &cycle)?;
        let subscription = Subscription::create(
            NewSubscription {
                key: input.key,
                customer_id: customer.id(),
                billing_cycle_id: cycle.id(),
                auto_renew: input.auto_renew,
                activation_date: Some(start),
                trial_end_date: input.trial_end_date,
                external_billing_id: input.external_billing_id,
            },
            period_end,
            now,
        )?;

        let saved = self.save(&subscription).await?;
        tracing::info!(
            status = %saved.status(),
            billing_cycle_key = %cycle.key(),
            "subscription created"
        );
        Ok(saved)
    }

    /// Start the next period.
    ///
    /// Temporary overrides are dropped and a finished trial becomes active.
    #[instrument(skip(self, key), fields(subscription_key = %key))]
    pub async fn renew(&self, key: &str) -> CoreResult<Subscription> {
        let mut subscription = self.get_subscription(key).await?;
        self.renew_loaded(&mut subscription).await
    }

    async fn renew_loaded(&self, subscription: &mut Subscription) -> CoreResult<Subscription> {
        let cycle = self.billing_cycle_of(subscription).await?;
        let now = self.clock.now();
        let period_end = period_end_for(now, &cycle)?;
        let cleared = subscription.apply_renewal(now, period_end)?;

        let saved = self.save(subscription).await?;
        tracing::info!(
            subscription_key = %saved.key(),
            cleared_overrides = cleared,
            status = %saved.status(),
            "subscription renewed"
        );
        Ok(saved)
    }

    #[instrument(skip(self, key), fields(subscription_key = %key))]
    pub async fn cancel(&self, key: &str, mode: CancelMode) -> CoreResult<Subscription> {
        let mut subscription = self.get_subscription(key).await?;
        subscription.cancel(self.clock.now(), mode == CancelMode::AtPeriodEnd)?;
        let saved = self.save(&subscription).await?;
        tracing::info!(status = %saved.status(), ?mode, "subscription cancelled");
        Ok(saved)
    }

    /// Activate a pending subscription with a period starting now
    #[instrument(skip(self, key), fields(subscription_key = %key))]
    pub async fn activate(&self, key: &str) -> CoreResult<Subscription> {
        let mut subscription = self.get_subscription(key).await?;
        let cycle = self.billing_cycle_of(&subscription).await?;
        let now = self.clock.now();
        subscription.activate(now, period_end_for(now, &cycle)?)?;
        let saved = self.save(&subscription).await?;
        tracing::info!("subscription activated");
        Ok(saved)
    }

    #[instrument(skip(self, key), fields(subscription_key = %key))]
    pub async fn suspend(&self, key: &str) -> CoreResult<Subscription> {
        let mut subscription = self.get_subscription(key).await?;
        subscription.suspend(self.clock.now())?;
        let saved = self.save(&subscription).await?;
        tracing::info!("subscription suspended");
        Ok(saved)
    }

    /// Lift a suspension or withdraw a scheduled cancellation
    #[instrument(skip(self, key), fields(subscription_key = %key))]
    pub async fn resume(&self, key: &str) -> CoreResult<Subscription> {
        let mut subscription = self.get_subscription(key).await?;
        subscription.resume(self.clock.now())?;
        let saved = self.save(&subscription).await?;
        tracing::info!("subscription resumed");
        Ok(saved)
    }

    #[instrument(skip(self, key, value), fields(subscription_key = %key))]
    pub async fn set_override(
        &self,
        key: &str,
        feature_key: &str,
        value: &str,
        kind: OverrideKind,
    ) -> CoreResult<Subscription> {
        let mut subscription = self.get_subscription(key).await?;
        let feature = self
            .repos
            .features
            .find_by_key(feature_key)
            .await?
            .ok_or_else(|| CoreError::not_found("feature", feature_key))?;
        if feature.is_archived() {
            return Err(archived("feature", feature_key));
        }

        if !subscription.set_override(&feature, value, kind, self.clock.now())? {
            return Ok(subscription);
        }
        let saved = self.save(&subscription).await?;
        tracing::debug!(feature_key, ?kind, "override set");
        Ok(saved)
    }

    #[instrument(skip(self, key), fields(subscription_key = %key))]
    pub async fn remove_override(&self, key: &str, feature_key: &str) -> CoreResult<Subscription> {
        let mut subscription = self.get_subscription(key).await?;
        let feature_id = self.feature_id(feature_key).await?;
        if !subscription.remove_override(feature_id) {
            return Ok(subscription);
        }
        self.save(&subscription).await
    }

    // =========================================================================
    // Expiry processing
    // =========================================================================

    /// Move one subscription onto its plan's on-expiry billing cycle.
    ///
    /// The current period must have ended; terminal subscriptions are
    /// rejected before any successor is created. The successor key is derived from the old key, so a retry after a
    /// partial failure picks up the successor created by the first attempt.
    #[instrument(skip(self, key), fields(subscription_key = %key))]
    pub async fn transition_on_expiry(&self, key: &str) -> CoreResult<Transition> {
        let subscription = self.get_subscription(key).await?;
        self.transition_loaded(subscription).await
    }

    async fn transition_loaded(&self, mut subscription: Subscription) -> CoreResult<Transition> {
        let now = self.clock.now();
        if subscription.status().is_terminal() {
            return Err(DomainError::Terminal(subscription.status()).into());
        }
        if !subscription.is_period_elapsed(now) {
            return Err(CoreError::Domain(DomainError::Rule(format!(
                "subscription {} has not reached the end of its period",
                subscription.key()
            ))));
        }

        let cycle = self.billing_cycle_of(&subscription).await?;
        let plan = self.plan_of(&cycle).await?;
        let target_key = plan.transition_target().ok_or_else(|| {
            CoreError::Domain(DomainError::Rule(format!(
                "plan {} has no on-expiry transition",
                plan.key()
            )))
        })?;
        let target = self
            .repos
            .billing_cycles
            .find_by_key(target_key)
            .await?
            .ok_or_else(|| CoreError::not_found("billing cycle", target_key))?;

        let new_key = successor_key(subscription.key(), target.key());
        let successor = match self.repos.subscriptions.find_by_key(&new_key).await? {
            Some(existing) => {
                tracing::debug!(successor_key = %new_key, "successor already exists");
                existing
            }
            None => {
                let created = Subscription::create(
                    NewSubscription {
                        key: new_key,
                        customer_id: subscription.customer_id(),
                        billing_cycle_id: target.id(),
                        auto_renew: subscription.auto_renew(),
                        activation_date: Some(now),
                        trial_end_date: None,
                        external_billing_id: None,
                    },
                    period_end_for(now, &target)?,
                    now,
                )?;
                self.save(&created).await?
            }
        };

        subscription.expire(now)?;
        let expired = self.save(&subscription).await?;
        tracing::info!(
            subscription_key = %expired.key(),
            successor_key = %successor.key(),
            billing_cycle_key = %target.key(),
            "subscription transitioned"
        );
        Ok(Transition { expired, successor })
    }

    /// Transition every elapsed subscription whose plan declares an on-expiry target
    #[instrument(skip(self))]
    pub async fn process_expired_transitions(
        &self,
        limit: usize,
    ) -> CoreResult<BatchReport<TransitionedPair>> {
        let due = self
            .repos
            .subscriptions
            .find_expired_with_transition_plans(self.clock.now(), limit)
            .await?;

        let mut report = BatchReport::default();
        for subscription in due {
            let key = subscription.key().to_string();
            let result = self.transition_loaded(subscription).await.map(|t| TransitionedPair {
                from_key: t.expired.key().to_string(),
                to_key: t.successor.key().to_string(),
            });
            report.record(&key, result);
        }
        tracing::info!(
            transitioned = report.completed.len(),
            failed = report.failures.len(),
            "processed expired transitions"
        );
        Ok(report)
    }

    /// Renew auto-renewing subscriptions whose period elapsed
    #[instrument(skip(self))]
    pub async fn process_due_renewals(&self, limit: usize) -> CoreResult<BatchReport<String>> {
        let due = self
            .repos
            .subscriptions
            .find_due_for_renewal(self.clock.now(), limit)
            .await?;

        let mut report = BatchReport::default();
        for mut subscription in due {
            let key = subscription.key().to_string();
            let result = self
                .renew_loaded(&mut subscription)
                .await
                .map(|s| s.key().to_string());
            report.record(&key, result);
        }
        tracing::info!(
            renewed = report.completed.len(),
            failed = report.failures.len(),
            "processed due renewals"
        );
        Ok(report)
    }

    /// Expire elapsed subscriptions that neither renew nor transition
    #[instrument(skip(self))]
    pub async fn expire_lapsed(&self, limit: usize) -> CoreResult<BatchReport<String>> {
        let now = self.clock.now();
        let lapsed = self.repos.subscriptions.find_lapsed(now, limit).await?;

        let mut report = BatchReport::default();
        for mut subscription in lapsed {
            let key = subscription.key().to_string();
            let result = match subscription.expire(now) {
                Ok(()) => self.save(&subscription).await.map(|s| s.key().to_string()),
                Err(err) => Err(err.into()),
            };
            report.record(&key, result);
        }
        tracing::info!(
            expired = report.completed.len(),
            failed = report.failures.len(),
            "expired lapsed subscriptions"
        );
        Ok(report)
    }
}

fn archived(entity: &'static str, key: &str) -> CoreError {
    DomainError::Archived {
        entity,
        key: key.to_string(),
    }
    .into()
}
