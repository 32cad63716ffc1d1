//! In-memory subscription repository

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tariff_types::{
    BillingCycleId, CustomerId, FeatureId, Subscription, SubscriptionId, SubscriptionStatus,
};

use super::{apply_limit, MemoryStore};
use crate::error::DbResult;
use crate::repo::{SubscriptionFilter, SubscriptionRepository};

/// In-memory subscription repository with optimistic versioning
#[derive(Clone)]
pub struct MemorySubscriptionRepository {
    store: MemoryStore,
}

impl MemorySubscriptionRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    /// Billing cycles whose plan declares an on-expiry transition
    fn cycles_with_transition(&self) -> HashSet<BillingCycleId> {
        let plans: HashSet<_> = self
            .store
            .inner
            .plans
            .filter(|p| p.transition_target().is_some())
            .into_iter()
            .map(|p| p.id())
            .collect();

        self.store
            .inner
            .billing_cycles
            .filter(|c| plans.contains(&c.plan_id()))
            .into_iter()
            .map(|c| c.id())
            .collect()
    }

    /// Elapsed entitling subscriptions matching `predicate`, oldest period end first
    fn elapsed_where(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        predicate: impl Fn(&Subscription) -> bool,
    ) -> Vec<Subscription> {
        let mut rows = self.store.inner.subscriptions.filter(|s| {
            s.status().is_entitling() && s.is_period_elapsed(now) && predicate(s)
        });
        rows.sort_by(|a, b| {
            a.current_period_end()
                .cmp(&b.current_period_end())
                .then_with(|| a.key().cmp(b.key()))
        });
        apply_limit(rows, Some(limit))
    }
}

fn is_renewable(subscription: &Subscription) -> bool {
    subscription.auto_renew()
        && matches!(
            subscription.status(),
            SubscriptionStatus::Active | SubscriptionStatus::Trial
        )
}

#[async_trait]
impl SubscriptionRepository for MemorySubscriptionRepository {
    async fn save(&self, subscription: &Subscription) -> DbResult<Subscription> {
        self.store.record("subscriptions.save")?;
        self.store.inner.subscriptions.upsert_versioned(
            "subscription",
            subscription.id(),
            subscription.key(),
            subscription,
            Subscription::version,
            Subscription::advance_version,
        )
    }

    async fn find_by_id(&self, id: SubscriptionId) -> DbResult<Option<Subscription>> {
        self.store.record("subscriptions.find_by_id")?;
        Ok(self.store.inner.subscriptions.get(&id))
    }

    async fn find_by_key(&self, key: &str) -> DbResult<Option<Subscription>> {
        self.store.record("subscriptions.find_by_key")?;
        Ok(self.store.inner.subscriptions.get_by_key(key))
    }

    async fn find_all(&self, filter: &SubscriptionFilter) -> DbResult<Vec<Subscription>> {
        self.store.record("subscriptions.find_all")?;
        let mut rows = self.store.inner.subscriptions.filter(|s| {
            filter.customer_id.map_or(true, |id| s.customer_id() == id)
                && filter
                    .billing_cycle_id
                    .map_or(true, |id| s.billing_cycle_id() == id)
                && filter.status.map_or(true, |status| s.status() == status)
        });
        rows.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(apply_limit(rows, filter.limit))
    }

    async fn delete(&self, id: SubscriptionId) -> DbResult<bool> {
        self.store.record("subscriptions.delete")?;
        Ok(self
            .store
            .inner
            .subscriptions
            .remove(&id, |s| s.key().to_string())
            .is_some())
    }

    async fn exists(&self, key: &str) -> DbResult<bool> {
        self.store.record("subscriptions.exists")?;
        Ok(self.store.inner.subscriptions.contains_key(key))
    }

    async fn find_by_customer(&self, customer_id: CustomerId) -> DbResult<Vec<Subscription>> {
        self.store.record("subscriptions.find_by_customer")?;
        let mut rows = self
            .store
            .inner
            .subscriptions
            .filter(|s| s.customer_id() == customer_id);
        rows.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(rows)
    }

    async fn find_by_external_billing_id(
        &self,
        external_id: &str,
    ) -> DbResult<Option<Subscription>> {
        self.store.record("subscriptions.find_by_external_billing_id")?;
        Ok(self
            .store
            .inner
            .subscriptions
            .filter(|s| s.external_billing_id() == Some(external_id))
            .into_iter()
            .next())
    }

    async fn find_expired_with_transition_plans(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> DbResult<Vec<Subscription>> {
        self.store.record("subscriptions.find_expired_with_transition_plans")?;
        let cycles = self.cycles_with_transition();
        Ok(self.elapsed_where(now, limit, |s| {
            !is_renewable(s) && cycles.contains(&s.billing_cycle_id())
        }))
    }

    async fn find_due_for_renewal(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> DbResult<Vec<Subscription>> {
        self.store.record("subscriptions.find_due_for_renewal")?;
        Ok(self.elapsed_where(now, limit, is_renewable))
    }

    async fn find_lapsed(&self, now: DateTime<Utc>, limit: usize) -> DbResult<Vec<Subscription>> {
        self.store.record("subscriptions.find_lapsed")?;
        let cycles = self.cycles_with_transition();
        Ok(self.elapsed_where(now, limit, |s| {
            !is_renewable(s) && !cycles.contains(&s.billing_cycle_id())
        }))
    }

    async fn has_subscriptions_for_billing_cycle(
        &self,
        billing_cycle_id: BillingCycleId,
    ) -> DbResult<bool> {
        self.store.record("subscriptions.has_subscriptions_for_billing_cycle")?;
        Ok(self
            .store
            .inner
            .subscriptions
            .any(|s| s.billing_cycle_id() == billing_cycle_id))
    }

    async fn has_subscriptions_for_customer(&self, customer_id: CustomerId) -> DbResult<bool> {
        self.store.record("subscriptions.has_subscriptions_for_customer")?;
        Ok(self
            .store
            .inner
            .subscriptions
            .any(|s| s.customer_id() == customer_id))
    }

    async fn has_overrides_for_feature(&self, feature_id: FeatureId) -> DbResult<bool> {
        self.store.record("subscriptions.has_overrides_for_feature")?;
        Ok(self
            .store
            .inner
            .subscriptions
            .any(|s| s.has_override_for(feature_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BillingCycleRepository, PlanRepository};
    use chrono::Duration;
    use tariff_types::{BillingCycle, DurationUnit, NewSubscription, Plan, ProductId};

    struct Fixture {
        store: MemoryStore,
        repo: MemorySubscriptionRepository,
        cycle: BillingCycle,
        trial_cycle: BillingCycle,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let repos = store.repositories();

        let plan = Plan::new("pro", ProductId::new(), "Pro").unwrap();
        let mut trial_plan = Plan::new("pro-trial", ProductId::new(), "Pro trial").unwrap();
        trial_plan.set_transition_target(Some("pro-monthly".to_string()));
        repos.plans.save(&plan).await.unwrap();
        repos.plans.save(&trial_plan).await.unwrap();

        let cycle =
            BillingCycle::new("pro-monthly", plan.id(), "Monthly", DurationUnit::Months, Some(1))
                .unwrap();
        let trial_cycle =
            BillingCycle::new("pro-trial-14d", trial_plan.id(), "Trial", DurationUnit::Days, Some(14))
                .unwrap();
        repos.billing_cycles.save(&cycle).await.unwrap();
        repos.billing_cycles.save(&trial_cycle).await.unwrap();

        Fixture {
            repo: MemorySubscriptionRepository::new(store.clone()),
            store,
            cycle,
            trial_cycle,
        }
    }

    fn subscription(
        key: &str,
        cycle: BillingCycleId,
        auto_renew: bool,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Subscription {
        Subscription::create(
            NewSubscription {
                key: key.to_string(),
                customer_id: CustomerId::new(),
                billing_cycle_id: cycle,
                auto_renew,
                activation_date: Some(start),
                trial_end_date: None,
                external_billing_id: None,
            },
            Some(end),
            start,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_elapsed_subscriptions_are_partitioned() {
        let f = fixture().await;
        let now = Utc::now();
        let start = now - Duration::days(40);
        let end = now - Duration::days(10);

        let renewing = subscription("renewing", f.cycle.id(), true, start, end);
        let lapsing = subscription("lapsing", f.cycle.id(), false, start, end);
        let transitioning = subscription("transitioning", f.trial_cycle.id(), false, start, end);
        let trial_renewing = subscription("trial-renewing", f.trial_cycle.id(), true, start, end);
        let current = subscription("current", f.cycle.id(), true, now, now + Duration::days(30));
        for s in [&renewing, &lapsing, &transitioning, &trial_renewing, &current] {
            f.repo.save(s).await.unwrap();
        }

        let keys = |rows: Vec<Subscription>| -> Vec<String> {
            rows.into_iter().map(|s| s.key().to_string()).collect()
        };

        assert_eq!(
            keys(f.repo.find_due_for_renewal(now, 10).await.unwrap()),
            vec!["renewing", "trial-renewing"]
        );
        assert_eq!(keys(f.repo.find_lapsed(now, 10).await.unwrap()), vec!["lapsing"]);
        assert_eq!(
            keys(f.repo.find_expired_with_transition_plans(now, 10).await.unwrap()),
            vec!["transitioning"]
        );
    }

    #[tokio::test]
    async fn test_expired_batch_is_ordered_and_limited() {
        let f = fixture().await;
        let now = Utc::now();
        let start = now - Duration::days(40);

        let older = subscription("b-older", f.trial_cycle.id(), false, start, now - Duration::days(5));
        let newer = subscription("a-newer", f.trial_cycle.id(), false, start, now - Duration::days(1));
        f.repo.save(&newer).await.unwrap();
        f.repo.save(&older).await.unwrap();

        let batch = f
            .repo
            .find_expired_with_transition_plans(now, 1)
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].key(), "b-older");
    }

    #[tokio::test]
    async fn test_terminal_subscriptions_are_not_scheduled() {
        let f = fixture().await;
        let now = Utc::now();
        let mut expired = subscription(
            "done",
            f.trial_cycle.id(),
            false,
            now - Duration::days(40),
            now - Duration::days(10),
        );
        expired.expire(now).unwrap();
        f.repo.save(&expired).await.unwrap();

        assert!(f
            .repo
            .find_expired_with_transition_plans(now, 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            f.store
                .call_count("subscriptions.find_expired_with_transition_plans"),
            1
        );
    }

    #[tokio::test]
    async fn test_find_all_filters() {
        let f = fixture().await;
        let now = Utc::now();
        let a = subscription("a", f.cycle.id(), true, now, now + Duration::days(30));
        let b = subscription("b", f.trial_cycle.id(), true, now, now + Duration::days(30));
        f.repo.save(&a).await.unwrap();
        f.repo.save(&b).await.unwrap();

        let by_cycle = f
            .repo
            .find_all(&SubscriptionFilter {
                billing_cycle_id: Some(f.cycle.id()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_cycle.len(), 1);
        assert_eq!(by_cycle[0].key(), "a");

        assert!(f
            .repo
            .has_subscriptions_for_billing_cycle(f.trial_cycle.id())
            .await
            .unwrap());
        assert!(f.repo.has_subscriptions_for_customer(a.customer_id()).await.unwrap());
    }
}
