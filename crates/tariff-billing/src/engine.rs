//! Provider event reconciliation
//!
//! Every event id is claimed in the event ledger before its handler runs and
//! marked completed afterwards, so redeliveries are no-ops. Handlers for one
//! provider object run under a per-object async mutex, read fresh state,
//! compute the target state and save once. A version conflict from the
//! repository restarts the handler from a fresh read.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use tariff_core::{period_end_for, Clock, CoreError, SystemClock};
use tariff_db::{ClaimOutcome, DbError, Repositories};
use tariff_types::{BillingCycle, Customer, NewSubscription, Subscription};

use crate::config::ReconciliationConfig;
use crate::error::BillingError;
use crate::event::{ProviderEvent, ProviderEventType};
use crate::payload::{epoch_to_utc, ProviderCustomer, ProviderInvoice, ProviderSubscription};

/// Result of processing one provider event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessOutcome {
    /// Internal state changed
    Applied,
    /// Internal state already matched the event
    Unchanged,
    /// The event id was processed before
    Duplicate,
    /// Another delivery of the event holds the claim
    InProgress,
    /// The event could not be routed and was dropped
    Ignored,
    /// The event predates the newest one applied to the subscription
    Stale,
}

impl ProcessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::Duplicate => "duplicate",
            Self::InProgress => "in_progress",
            Self::Ignored => "ignored",
            Self::Stale => "stale",
        }
    }
}

impl std::fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn record_outcome(event_type: &ProviderEventType, outcome: &'static str) {
    metrics::counter!(
        "tariff_provider_events_total",
        "type" => event_type.metric_label(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Applies provider events to customers and subscriptions
pub struct ReconciliationEngine {
    repos: Repositories,
    config: ReconciliationConfig,
    clock: Arc<dyn Clock>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ReconciliationEngine {
    pub fn new(repos: Repositories, config: ReconciliationConfig) -> Self {
        Self {
            repos,
            config,
            clock: Arc::new(SystemClock),
            locks: DashMap::new(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Process a raw event envelope.
    ///
    /// An envelope that cannot be parsed is dropped as [`ProcessOutcome::Ignored`].
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn process_payload(&self, payload: &[u8]) -> Result<ProcessOutcome, BillingError> {
        match ProviderEvent::parse(payload) {
            Ok(event) => self.process_event(&event).await,
            Err(e) => {
                warn!(error = %e, "Dropping unparsable provider event");
                record_outcome(&ProviderEventType::Unknown(String::new()), "ignored");
                Ok(ProcessOutcome::Ignored)
            }
        }
    }

    /// Process one provider event.
    ///
    /// Only storage failures and exhausted conflict retries return an error;
    /// the ledger claim is released first so a redelivery is processed again.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn process_event(&self, event: &ProviderEvent) -> Result<ProcessOutcome, BillingError> {
        let claim = self
            .repos
            .events
            .claim(
                &event.id,
                event.event_type.as_str(),
                self.clock.now(),
                self.config.claim_timeout,
            )
            .await?;

        match claim {
            ClaimOutcome::AlreadyCompleted => {
                debug!("Provider event already processed");
                record_outcome(&event.event_type, ProcessOutcome::Duplicate.as_str());
                return Ok(ProcessOutcome::Duplicate);
            }
            ClaimOutcome::InProgress => {
                debug!("Provider event is being processed by another delivery");
                record_outcome(&event.event_type, ProcessOutcome::InProgress.as_str());
                return Ok(ProcessOutcome::InProgress);
            }
            ClaimOutcome::Claimed => {}
        }

        let outcome = match self.dispatch(event).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_retryable() => return Err(self.release(event, e).await),
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "Dropping provider event that cannot be applied");
                ProcessOutcome::Ignored
            }
        };

        if let Err(e) = self
            .repos
            .events
            .complete(&event.id, outcome.as_str(), self.clock.now())
            .await
        {
            return Err(self.release(event, e.into()).await);
        }
        record_outcome(&event.event_type, outcome.as_str());
        debug!(outcome = %outcome, "Provider event processed");
        Ok(outcome)
    }

    /// Drop the ledger claim after a failure so a redelivery is processed again
    async fn release(&self, event: &ProviderEvent, cause: BillingError) -> BillingError {
        error!(error = %cause, code = cause.error_code(), "Provider event failed, releasing claim");
        if let Err(e) = self.repos.events.release(&event.id).await {
            error!(error = %e, "Failed to release provider event claim");
        }
        record_outcome(&event.event_type, "failed");
        cause
    }

    async fn dispatch(&self, event: &ProviderEvent) -> Result<ProcessOutcome, BillingError> {
        match &event.event_type {
            ProviderEventType::CustomerCreated | ProviderEventType::CustomerUpdated => {
                let Some(customer) = decode::<ProviderCustomer>(event) else {
                    return Ok(ProcessOutcome::Ignored);
                };
                self.serialized(&customer.id, || self.link_customer(&customer))
                    .await
            }
            ProviderEventType::CustomerDeleted => {
                let Some(customer) = decode::<ProviderCustomer>(event) else {
                    return Ok(ProcessOutcome::Ignored);
                };
                self.serialized(&customer.id, || self.unlink_customer(&customer))
                    .await
            }
            ProviderEventType::SubscriptionCreated => {
                let Some(sub) = decode::<ProviderSubscription>(event) else {
                    return Ok(ProcessOutcome::Ignored);
                };
                self.serialized(&sub.id, || self.create_subscription(event, &sub))
                    .await
            }
            ProviderEventType::SubscriptionUpdated => {
                let Some(sub) = decode::<ProviderSubscription>(event) else {
                    return Ok(ProcessOutcome::Ignored);
                };
                self.serialized(&sub.id, || self.update_subscription(event, &sub))
                    .await
            }
            ProviderEventType::SubscriptionDeleted => {
                let Some(sub) = decode::<ProviderSubscription>(event) else {
                    return Ok(ProcessOutcome::Ignored);
                };
                self.serialized(&sub.id, || self.delete_subscription(event, &sub))
                    .await
            }
            ProviderEventType::InvoicePaymentSucceeded => {
                let Some(invoice) = decode::<ProviderInvoice>(event) else {
                    return Ok(ProcessOutcome::Ignored);
                };
                let Some(external_id) = invoice.subscription.as_deref() else {
                    debug!(invoice_id = %invoice.id, "Invoice is not for a subscription");
                    return Ok(ProcessOutcome::Ignored);
                };
                self.serialized(external_id, || self.record_invoice(external_id, &invoice))
                    .await
            }
            ProviderEventType::Unknown(name) => {
                info!(event_type = %name, "Ignoring unhandled provider event type");
                Ok(ProcessOutcome::Ignored)
            }
        }
    }

    /// Run `op` under the lock for one provider object, retrying version conflicts
    async fn serialized<F, Fut>(&self, aggregate: &str, mut op: F) -> Result<ProcessOutcome, BillingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ProcessOutcome, BillingError>>,
    {
        let lock = self.locks.entry(aggregate.to_string()).or_default().clone();

        let result = {
            let _guard = lock.lock().await;
            let mut attempt = 0u32;
            loop {
                match op().await {
                    Err(e) if e.is_version_conflict() => {
                        if attempt >= self.config.max_conflict_retries {
                            warn!(aggregate, attempts = attempt + 1, "Giving up after repeated version conflicts");
                            break Err(BillingError::ConflictRetriesExhausted {
                                aggregate: aggregate.to_string(),
                                attempts: attempt + 1,
                            });
                        }
                        attempt += 1;
                        debug!(aggregate, attempt, "Version conflict, retrying from a fresh read");
                    }
                    other => break other,
                }
            }
        };

        drop(lock);
        self.locks
            .remove_if(aggregate, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    // ===== Customers =====

    async fn link_customer(&self, payload: &ProviderCustomer) -> Result<ProcessOutcome, BillingError> {
        let customers = &self.repos.customers;

        if let Some(customer) = customers.find_by_external_billing_id(&payload.id).await? {
            debug!(customer_key = %customer.key(), "Provider customer already linked");
            return Ok(ProcessOutcome::Unchanged);
        }

        let Some(key) = payload.metadata_value(&self.config.customer_key_field) else {
            warn!(external_id = %payload.id, "Provider customer carries no customer key");
            return Ok(ProcessOutcome::Ignored);
        };
        let Some(mut customer) = customers.find_by_key(key).await? else {
            warn!(customer_key = %key, "Provider customer references an unknown customer");
            return Ok(ProcessOutcome::Ignored);
        };

        if !customer.link_external_billing_id(&payload.id) {
            return Ok(ProcessOutcome::Unchanged);
        }
        customers.save(&customer).await?;

        info!(customer_key = %customer.key(), external_id = %payload.id, "Linked provider customer");
        Ok(ProcessOutcome::Applied)
    }

    async fn unlink_customer(&self, payload: &ProviderCustomer) -> Result<ProcessOutcome, BillingError> {
        let customers = &self.repos.customers;

        let Some(mut customer) = customers.find_by_external_billing_id(&payload.id).await? else {
            debug!(external_id = %payload.id, "Deleted provider customer is not linked");
            return Ok(ProcessOutcome::Ignored);
        };

        if !customer.clear_external_billing_id() {
            return Ok(ProcessOutcome::Unchanged);
        }
        customers.save(&customer).await?;

        info!(customer_key = %customer.key(), "Unlinked deleted provider customer");
        Ok(ProcessOutcome::Applied)
    }

    /// Customer of a provider subscription, by stored link then metadata key
    async fn customer_for(&self, payload: &ProviderSubscription) -> Result<Option<Customer>, BillingError> {
        let customers = &self.repos.customers;
        if let Some(customer) = customers.find_by_external_billing_id(&payload.customer).await? {
            return Ok(Some(customer));
        }
        match payload.metadata_value(&self.config.customer_key_field) {
            Some(key) => Ok(customers.find_by_key(key).await?),
            None => Ok(None),
        }
    }

    // ===== Subscriptions =====

    /// Internal subscription for a provider subscription, by stored link then metadata key
    async fn subscription_for(
        &self,
        payload: &ProviderSubscription,
    ) -> Result<Option<Subscription>, BillingError> {
        let subscriptions = &self.repos.subscriptions;
        if let Some(subscription) = subscriptions.find_by_external_billing_id(&payload.id).await? {
            return Ok(Some(subscription));
        }
        match payload.metadata_value(&self.config.subscription_key_field) {
            Some(key) => Ok(subscriptions.find_by_key(key).await?),
            None => Ok(None),
        }
    }

    /// Billing cycle for the first item's price.
    ///
    /// Tries the provider price id, then the price lookup key as cycle key,
    /// then the billing cycle metadata key.
    async fn cycle_for(&self, payload: &ProviderSubscription) -> Result<Option<BillingCycle>, BillingError> {
        let cycles = &self.repos.billing_cycles;

        if let Some(price) = payload.price() {
            if let Some(cycle) = cycles.find_by_external_price_id(&price.id).await? {
                return Ok(Some(cycle));
            }
            if let Some(lookup_key) = price.lookup_key.as_deref().filter(|k| !k.is_empty()) {
                if let Some(cycle) = cycles.find_by_key(lookup_key).await? {
                    return Ok(Some(cycle));
                }
            }
        }

        match payload.metadata_value(&self.config.billing_cycle_key_field) {
            Some(key) => Ok(cycles.find_by_key(key).await?),
            None => Ok(None),
        }
    }

    async fn create_subscription(
        &self,
        event: &ProviderEvent,
        payload: &ProviderSubscription,
    ) -> Result<ProcessOutcome, BillingError> {
        let Some(customer) = self.customer_for(payload).await? else {
            warn!(external_id = %payload.id, customer = %payload.customer, "Provider subscription has no known customer");
            return Ok(ProcessOutcome::Ignored);
        };

        let mut changed = match self.subscription_for(payload).await? {
            Some(mut existing) => {
                debug!(subscription_key = %existing.key(), "Provider subscription already recorded");
                if existing.link_external_billing_id(&payload.id) {
                    self.repos.subscriptions.save(&existing).await?;
                    true
                } else {
                    false
                }
            }
            None => {
                let Some(cycle) = self.cycle_for(payload).await? else {
                    warn!(external_id = %payload.id, "No billing cycle matches the provider subscription");
                    return Ok(ProcessOutcome::Ignored);
                };
                let Some(subscription) = self.new_subscription(event, payload, &customer, &cycle)? else {
                    warn!(external_id = %payload.id, status = %payload.status, "Unrecognised provider subscription status");
                    return Ok(ProcessOutcome::Ignored);
                };

                match self.repos.subscriptions.save(&subscription).await {
                    Ok(saved) => {
                        info!(
                            subscription_key = %saved.key(),
                            billing_cycle_key = %cycle.key(),
                            status = %saved.status(),
                            "Created subscription from provider"
                        );
                        true
                    }
                    Err(DbError::Conflict { key, .. }) => {
                        debug!(subscription_key = %key, "Subscription created by a concurrent delivery");
                        false
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        if customer.external_billing_id().is_none() {
            let mut customer = customer;
            if customer.link_external_billing_id(&payload.customer) {
                self.repos.customers.save(&customer).await?;
                info!(customer_key = %customer.key(), external_id = %payload.customer, "Backfilled provider customer id");
                changed = true;
            }
        }

        Ok(if changed {
            ProcessOutcome::Applied
        } else {
            ProcessOutcome::Unchanged
        })
    }

    fn new_subscription(
        &self,
        event: &ProviderEvent,
        payload: &ProviderSubscription,
        customer: &Customer,
        cycle: &BillingCycle,
    ) -> Result<Option<Subscription>, BillingError> {
        let Some(snapshot) = payload.snapshot() else {
            return Ok(None);
        };

        let key = payload
            .metadata_value(&self.config.subscription_key_field)
            .unwrap_or(&payload.id);
        let start = snapshot.period_start.unwrap_or(event.created);
        let period_end = match snapshot.period_end {
            Some(end) => Some(end),
            None => period_end_for(start, cycle).map_err(CoreError::from)?,
        };

        let mut subscription = Subscription::create(
            NewSubscription {
                key: key.to_string(),
                customer_id: customer.id(),
                billing_cycle_id: cycle.id(),
                auto_renew: !payload.cancel_at_period_end,
                activation_date: Some(start),
                trial_end_date: snapshot.trial_end_date,
                external_billing_id: Some(payload.id.clone()),
            },
            period_end,
            self.clock.now(),
        )
        .map_err(CoreError::from)?;
        subscription.apply_provider_snapshot(&snapshot, event.created);
        Ok(Some(subscription))
    }

    async fn update_subscription(
        &self,
        event: &ProviderEvent,
        payload: &ProviderSubscription,
    ) -> Result<ProcessOutcome, BillingError> {
        let Some(mut subscription) = self.subscription_for(payload).await? else {
            warn!(external_id = %payload.id, "Provider subscription is not recorded");
            return Ok(ProcessOutcome::Ignored);
        };

        if subscription.is_stale_provider_event(event.created) {
            info!(subscription_key = %subscription.key(), "Discarding stale provider event");
            return Ok(ProcessOutcome::Stale);
        }

        let Some(snapshot) = payload.snapshot() else {
            warn!(external_id = %payload.id, status = %payload.status, "Unrecognised provider subscription status");
            return Ok(ProcessOutcome::Ignored);
        };

        let synced_before = subscription.provider_synced_at();
        let linked = subscription.link_external_billing_id(&payload.id);
        let changed = subscription.apply_provider_snapshot(&snapshot, event.created) || linked;

        // Advancing the sync mark alone still has to be stored so older
        // deliveries are recognised as stale.
        if !changed && subscription.provider_synced_at() == synced_before {
            return Ok(ProcessOutcome::Unchanged);
        }
        let saved = self.repos.subscriptions.save(&subscription).await?;

        if !changed {
            return Ok(ProcessOutcome::Unchanged);
        }
        info!(subscription_key = %saved.key(), status = %saved.status(), "Applied provider subscription state");
        Ok(ProcessOutcome::Applied)
    }

    async fn delete_subscription(
        &self,
        event: &ProviderEvent,
        payload: &ProviderSubscription,
    ) -> Result<ProcessOutcome, BillingError> {
        let Some(mut subscription) = self.subscription_for(payload).await? else {
            warn!(external_id = %payload.id, "Deleted provider subscription is not recorded");
            return Ok(ProcessOutcome::Ignored);
        };

        let ended_at = payload
            .ended_at
            .or(payload.canceled_at)
            .and_then(epoch_to_utc)
            .unwrap_or(event.created);

        let linked = subscription.link_external_billing_id(&payload.id);
        let expired = subscription.force_expire(ended_at);
        if !linked && !expired {
            return Ok(ProcessOutcome::Unchanged);
        }
        self.repos.subscriptions.save(&subscription).await?;

        info!(subscription_key = %subscription.key(), "Expired subscription deleted at provider");
        Ok(ProcessOutcome::Applied)
    }

    // ===== Invoices =====

    async fn record_invoice(
        &self,
        external_id: &str,
        invoice: &ProviderInvoice,
    ) -> Result<ProcessOutcome, BillingError> {
        let Some((start, end)) = invoice.line_period() else {
            warn!(invoice_id = %invoice.id, "Invoice carries no billing period");
            return Ok(ProcessOutcome::Ignored);
        };

        let subscriptions = &self.repos.subscriptions;
        let Some(mut subscription) = subscriptions.find_by_external_billing_id(external_id).await? else {
            warn!(invoice_id = %invoice.id, external_id, "Invoice references an unrecorded subscription");
            return Ok(ProcessOutcome::Ignored);
        };

        if subscription.status().is_terminal() {
            debug!(subscription_key = %subscription.key(), "Invoice for a finished subscription");
            return Ok(ProcessOutcome::Unchanged);
        }
        if !subscription.advance_period(start, end) {
            return Ok(ProcessOutcome::Unchanged);
        }
        subscriptions.save(&subscription).await?;

        info!(subscription_key = %subscription.key(), period_end = %end, "Advanced period from paid invoice");
        Ok(ProcessOutcome::Applied)
    }
}

fn decode<T: for<'de> serde::Deserialize<'de>>(event: &ProviderEvent) -> Option<T> {
    match event.payload() {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(error = %e, "Dropping provider event with unparsable payload");
            None
        }
    }
}
