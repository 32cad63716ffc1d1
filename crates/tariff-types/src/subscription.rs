//! Subscription types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    require_non_empty, BillingCycleId, CustomerId, DomainError, Feature, FeatureId,
    SubscriptionId, ValidationError,
};

/// Subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created with a future activation date
    Pending,
    /// Subscription is active
    Active,
    /// In trial period
    Trial,
    /// Cancels when the current period ends
    CancellationPending,
    /// Subscription was cancelled
    Cancelled,
    /// Period ended without renewal
    Expired,
    /// Administrative or payment hold
    Suspended,
}

impl SubscriptionStatus {
    /// Cancelled and expired subscriptions never change again
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }

    /// Whether the subscription currently grants its plan's features
    pub const fn is_entitling(&self) -> bool {
        matches!(self, Self::Active | Self::Trial | Self::CancellationPending)
    }

    /// Allowed edges of the lifecycle state machine
    pub const fn can_transition_to(&self, to: Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, to),
            (Pending, Active | Trial | Cancelled)
                | (Active, Trial | CancellationPending | Cancelled | Expired | Suspended)
                | (Trial, Active | CancellationPending | Cancelled | Expired)
                | (CancellationPending, Active | Cancelled | Expired)
                | (Suspended, Active | Cancelled | Expired)
        )
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Trial => write!(f, "trial"),
            Self::CancellationPending => write!(f, "cancellation_pending"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Expired => write!(f, "expired"),
            Self::Suspended => write!(f, "suspended"),
        }
    }
}

/// Lifetime of a feature override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideKind {
    /// Survives renewals
    Permanent,
    /// Dropped at the next renewal
    Temporary,
}

/// Per-subscription feature value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureOverride {
    pub feature_id: FeatureId,
    pub value: String,
    pub kind: OverrideKind,
    pub created_at: DateTime<Utc>,
}

impl FeatureOverride {
    pub fn is_temporary(&self) -> bool {
        self.kind == OverrideKind::Temporary
    }
}

/// Input for [`Subscription::create`]
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub key: String,
    pub customer_id: CustomerId,
    pub billing_cycle_id: BillingCycleId,
    pub auto_renew: bool,
    /// Defaults to the creation time
    pub activation_date: Option<DateTime<Utc>>,
    pub trial_end_date: Option<DateTime<Utc>>,
    pub external_billing_id: Option<String>,
}

/// Provider-reported subscription state
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSnapshot {
    pub status: SubscriptionStatus,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub cancellation_date: Option<DateTime<Utc>>,
    pub trial_end_date: Option<DateTime<Utc>>,
}

/// A customer's binding to a billing cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    id: SubscriptionId,
    key: String,
    customer_id: CustomerId,
    billing_cycle_id: BillingCycleId,
    status: SubscriptionStatus,
    activation_date: Option<DateTime<Utc>>,
    expiration_date: Option<DateTime<Utc>>,
    cancellation_date: Option<DateTime<Utc>>,
    trial_end_date: Option<DateTime<Utc>>,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    auto_renew: bool,
    external_billing_id: Option<String>,
    overrides: BTreeMap<FeatureId, FeatureOverride>,
    #[serde(default)]
    provider_synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Create a subscription.
    ///
    /// Status is `pending` when activation lies in the future, `trial` when
    /// the trial end lies in the future, `active` otherwise. `period_end` is
    /// `None` for perpetual cycles.
    pub fn create(
        new: NewSubscription,
        period_end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        require_non_empty("subscription key", &new.key)?;

        let start = new.activation_date.unwrap_or(now);
        let status = if start > now {
            SubscriptionStatus::Pending
        } else if new.trial_end_date.is_some_and(|end| end > now) {
            SubscriptionStatus::Trial
        } else {
            SubscriptionStatus::Active
        };

        Ok(Self {
            id: SubscriptionId::new(),
            key: new.key,
            customer_id: new.customer_id,
            billing_cycle_id: new.billing_cycle_id,
            status,
            activation_date: Some(start),
            expiration_date: None,
            cancellation_date: None,
            trial_end_date: new.trial_end_date,
            current_period_start: Some(start),
            current_period_end: period_end,
            auto_renew: new.auto_renew,
            external_billing_id: new.external_billing_id,
            overrides: BTreeMap::new(),
            provider_synced_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn billing_cycle_id(&self) -> BillingCycleId {
        self.billing_cycle_id
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status
    }

    pub fn activation_date(&self) -> Option<DateTime<Utc>> {
        self.activation_date
    }

    pub fn expiration_date(&self) -> Option<DateTime<Utc>> {
        self.expiration_date
    }

    pub fn cancellation_date(&self) -> Option<DateTime<Utc>> {
        self.cancellation_date
    }

    pub fn trial_end_date(&self) -> Option<DateTime<Utc>> {
        self.trial_end_date
    }

    pub fn current_period_start(&self) -> Option<DateTime<Utc>> {
        self.current_period_start
    }

    /// `None` for perpetual cycles
    pub fn current_period_end(&self) -> Option<DateTime<Utc>> {
        self.current_period_end
    }

    pub fn auto_renew(&self) -> bool {
        self.auto_renew
    }

    /// Payment provider subscription id
    pub fn external_billing_id(&self) -> Option<&str> {
        self.external_billing_id.as_deref()
    }

    /// Creation time of the newest provider event applied
    pub fn provider_synced_at(&self) -> Option<DateTime<Utc>> {
        self.provider_synced_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn override_for(&self, feature_id: FeatureId) -> Option<&FeatureOverride> {
        self.overrides.get(&feature_id)
    }

    pub fn overrides(&self) -> impl Iterator<Item = &FeatureOverride> {
        self.overrides.values()
    }

    pub fn has_override_for(&self, feature_id: FeatureId) -> bool {
        self.overrides.contains_key(&feature_id)
    }

    /// The current period ended at or before `now`
    pub fn is_period_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.current_period_end.is_some_and(|end| end <= now)
    }

    fn transition_to(
        &mut self,
        to: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::Terminal(self.status));
        }
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Activate a pending subscription with a fresh period
    pub fn activate(
        &mut self,
        now: DateTime<Utc>,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<(), DomainError> {
        self.transition_to(SubscriptionStatus::Active, now)?;
        self.activation_date = Some(now);
        self.current_period_start = Some(now);
        self.current_period_end = period_end;
        Ok(())
    }

    /// Start a new period.
    ///
    /// Drops temporary overrides and flips a finished trial to active.
    /// Returns the number of overrides dropped.
    pub fn apply_renewal(
        &mut self,
        now: DateTime<Utc>,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<usize, DomainError> {
        match self.status {
            SubscriptionStatus::Active | SubscriptionStatus::Trial => {}
            status if status.is_terminal() => return Err(DomainError::Terminal(status)),
            status => return Err(DomainError::NotRenewable(status)),
        }

        let before = self.overrides.len();
        self.overrides.retain(|_, o| !o.is_temporary());
        let cleared = before - self.overrides.len();

        self.current_period_start = Some(now);
        self.current_period_end = period_end;
        if self.status == SubscriptionStatus::Trial
            && self.trial_end_date.map_or(true, |end| end <= now)
        {
            self.status = SubscriptionStatus::Active;
        }
        self.updated_at = now;
        Ok(cleared)
    }

    /// Cancel now, or at the end of the current period.
    ///
    /// A subscription without a period end is always cancelled immediately.
    pub fn cancel(&mut self, now: DateTime<Utc>, at_period_end: bool) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::Terminal(self.status));
        }

        if at_period_end && self.current_period_end.is_some() {
            if self.status != SubscriptionStatus::CancellationPending {
                self.transition_to(SubscriptionStatus::CancellationPending, now)?;
            }
        } else {
            self.transition_to(SubscriptionStatus::Cancelled, now)?;
            self.cancellation_date = Some(now);
        }
        self.auto_renew = false;
        self.updated_at = now;
        Ok(())
    }

    /// Natural expiry through the state machine
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(SubscriptionStatus::Expired, now)?;
        self.expiration_date = Some(now);
        Ok(())
    }

    /// Expire regardless of the current status. Returns `false` if already expired.
    pub fn force_expire(&mut self, at: DateTime<Utc>) -> bool {
        if self.status == SubscriptionStatus::Expired {
            return false;
        }
        self.status = SubscriptionStatus::Expired;
        self.expiration_date = Some(at);
        self.auto_renew = false;
        self.updated_at = Utc::now();
        true
    }

    pub fn suspend(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(SubscriptionStatus::Suspended, now)
    }

    /// Lift a suspension, or withdraw a scheduled cancellation
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        let reactivating = self.status == SubscriptionStatus::CancellationPending;
        self.transition_to(SubscriptionStatus::Active, now)?;
        if reactivating {
            self.auto_renew = true;
        }
        Ok(())
    }

    /// Set a feature override validated against the feature type.
    ///
    /// Returns `false` when an identical override already exists.
    pub fn set_override(
        &mut self,
        feature: &Feature,
        value: impl Into<String>,
        kind: OverrideKind,
        now: DateTime<Utc>,
    ) -> Result<bool, ValidationError> {
        let value = value.into();
        feature.validate_value(&value)?;

        if let Some(existing) = self.overrides.get(&feature.id()) {
            if existing.value == value && existing.kind == kind {
                return Ok(false);
            }
        }

        self.overrides.insert(
            feature.id(),
            FeatureOverride {
                feature_id: feature.id(),
                value,
                kind,
                created_at: now,
            },
        );
        self.updated_at = now;
        Ok(true)
    }

    pub fn remove_override(&mut self, feature_id: FeatureId) -> bool {
        let removed = self.overrides.remove(&feature_id).is_some();
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Record the provider subscription id. Returns `false` when unchanged.
    pub fn link_external_billing_id(&mut self, external_id: &str) -> bool {
        if self.external_billing_id.as_deref() == Some(external_id) {
            return false;
        }
        self.external_billing_id = Some(external_id.to_string());
        self.updated_at = Utc::now();
        true
    }

    /// Whether a provider event created at `event_at` predates the newest one applied
    pub fn is_stale_provider_event(&self, event_at: DateTime<Utc>) -> bool {
        self.provider_synced_at.is_some_and(|synced| event_at < synced)
    }

    /// Apply provider-reported state.
    ///
    /// Stale events and changes out of a terminal status are ignored.
    /// Returns `true` when anything material changed.
    pub fn apply_provider_snapshot(
        &mut self,
        snapshot: &ProviderSnapshot,
        event_at: DateTime<Utc>,
    ) -> bool {
        if self.is_stale_provider_event(event_at) {
            return false;
        }

        let mut changed = false;

        if self.status != snapshot.status && !self.status.is_terminal() {
            self.status = snapshot.status;
            if snapshot.status == SubscriptionStatus::Expired && self.expiration_date.is_none() {
                self.expiration_date = Some(event_at);
            }
            if snapshot.status.is_entitling() && self.activation_date.is_none() {
                self.activation_date = snapshot.period_start.or(Some(event_at));
            }
            changed = true;
        }

        if snapshot.status == SubscriptionStatus::Cancelled {
            if let Some(cancelled_at) = snapshot.cancellation_date {
                if self.cancellation_date != Some(cancelled_at) {
                    self.cancellation_date = Some(cancelled_at);
                    changed = true;
                }
            }
        }

        if snapshot.trial_end_date.is_some() && self.trial_end_date != snapshot.trial_end_date {
            self.trial_end_date = snapshot.trial_end_date;
            changed = true;
        }

        if let (Some(start), Some(end)) = (snapshot.period_start, snapshot.period_end) {
            if self.current_period_start != Some(start) || self.current_period_end != Some(end) {
                self.current_period_start = Some(start);
                self.current_period_end = Some(end);
                changed = true;
            }
        }

        self.provider_synced_at = Some(event_at);
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }

    /// Move the period forward to `[start, end)`.
    ///
    /// Never moves the period end backwards. Returns `true` when changed.
    pub fn advance_period(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        if self.current_period_end.is_some_and(|current| end < current) {
            return false;
        }
        if self.current_period_start == Some(start) && self.current_period_end == Some(end) {
            return false;
        }
        self.current_period_start = Some(start);
        self.current_period_end = Some(end);
        self.updated_at = Utc::now();
        true
    }

    /// Called by repositories after a successful versioned save
    pub fn advance_version(&mut self) {
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FeatureValueType;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn new_sub(activation: Option<DateTime<Utc>>, trial_end: Option<DateTime<Utc>>) -> Subscription {
        Subscription::create(
            NewSubscription {
                key: "sub-1".to_string(),
                customer_id: CustomerId::new(),
                billing_cycle_id: BillingCycleId::new(),
                auto_renew: true,
                activation_date: activation,
                trial_end_date: trial_end,
                external_billing_id: None,
            },
            Some(now() + Duration::days(30)),
            now(),
        )
        .unwrap()
    }

    #[test]
    fn test_creation_status_rules() {
        assert_eq!(new_sub(None, None).status(), SubscriptionStatus::Active);
        assert_eq!(
            new_sub(Some(now() + Duration::days(3)), None).status(),
            SubscriptionStatus::Pending
        );
        assert_eq!(
            new_sub(None, Some(now() + Duration::days(14))).status(),
            SubscriptionStatus::Trial
        );
        assert_eq!(
            new_sub(None, Some(now() - Duration::days(1))).status(),
            SubscriptionStatus::Active
        );
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        use SubscriptionStatus::*;
        for to in [Pending, Active, Trial, CancellationPending, Cancelled, Expired, Suspended] {
            assert!(!Cancelled.can_transition_to(to));
            assert!(!Expired.can_transition_to(to));
        }
    }

    #[test]
    fn test_renewal_drops_only_temporary_overrides() {
        let seats = Feature::new("seats", "Seats", FeatureValueType::Numeric, "1").unwrap();
        let sso = Feature::new("sso", "SSO", FeatureValueType::Toggle, "false").unwrap();
        let mut sub = new_sub(None, None);
        sub.set_override(&seats, "50", OverrideKind::Permanent, now()).unwrap();
        sub.set_override(&sso, "true", OverrideKind::Temporary, now()).unwrap();

        let later = now() + Duration::days(30);
        let cleared = sub.apply_renewal(later, Some(later + Duration::days(30))).unwrap();

        assert_eq!(cleared, 1);
        assert!(sub.has_override_for(seats.id()));
        assert!(!sub.has_override_for(sso.id()));
        assert_eq!(sub.current_period_start(), Some(later));
    }

    #[test]
    fn test_renewal_ends_finished_trial() {
        let mut sub = new_sub(None, Some(now() + Duration::days(7)));
        let later = now() + Duration::days(8);
        sub.apply_renewal(later, None).unwrap();
        assert_eq!(sub.status(), SubscriptionStatus::Active);
    }

    #[test]
    fn test_renewal_of_terminal_subscription_fails() {
        let mut sub = new_sub(None, None);
        sub.cancel(now(), false).unwrap();
        assert_eq!(
            sub.apply_renewal(now(), None),
            Err(DomainError::Terminal(SubscriptionStatus::Cancelled))
        );
    }

    #[test]
    fn test_cancel_at_period_end() {
        let mut sub = new_sub(None, None);
        sub.cancel(now(), true).unwrap();
        assert_eq!(sub.status(), SubscriptionStatus::CancellationPending);
        assert!(!sub.auto_renew());
        assert_eq!(sub.cancellation_date(), None);

        sub.cancel(now(), false).unwrap();
        assert_eq!(sub.status(), SubscriptionStatus::Cancelled);
        assert_eq!(sub.cancellation_date(), Some(now()));
    }

    #[test]
    fn test_force_expire_is_idempotent() {
        let mut sub = new_sub(None, None);
        assert!(sub.force_expire(now()));
        assert!(!sub.force_expire(now()));
        assert_eq!(sub.status(), SubscriptionStatus::Expired);
    }

    #[test]
    fn test_stale_snapshot_is_ignored() {
        let mut sub = new_sub(None, None);
        let snapshot = ProviderSnapshot {
            status: SubscriptionStatus::Suspended,
            period_start: None,
            period_end: None,
            cancellation_date: None,
            trial_end_date: None,
        };
        assert!(sub.apply_provider_snapshot(&snapshot, now()));

        let older = ProviderSnapshot {
            status: SubscriptionStatus::Active,
            ..snapshot
        };
        assert!(!sub.apply_provider_snapshot(&older, now() - Duration::seconds(5)));
        assert_eq!(sub.status(), SubscriptionStatus::Suspended);
    }

    #[test]
    fn test_advance_period_never_regresses() {
        let mut sub = new_sub(None, None);
        let end = sub.current_period_end().unwrap();
        assert!(!sub.advance_period(now() - Duration::days(60), end - Duration::days(30)));
        assert!(sub.advance_period(end, end + Duration::days(30)));
        assert!(!sub.advance_period(end, end + Duration::days(30)));
    }
}
