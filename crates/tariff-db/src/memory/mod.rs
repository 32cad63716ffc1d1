//! In-memory repositories
//!
//! All repositories share one [`MemoryStore`], so cross-table lookups such as
//! [`SubscriptionRepository::find_expired_with_transition_plans`] see a
//! consistent view. Every repository call is counted per operation name
//! (e.g. `"plans.find_by_ids"`), and individual operations can be made to fail
//! with [`DbError::Storage`].
//!
//! [`SubscriptionRepository::find_expired_with_transition_plans`]: crate::SubscriptionRepository::find_expired_with_transition_plans

mod catalog;
mod customer;
mod events;
mod subscription;

use std::hash::Hash;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use tariff_types::{
    BillingCycle, BillingCycleId, Customer, CustomerId, Feature, FeatureId, Plan, PlanId,
    Product, ProductId, Subscription, SubscriptionId,
};

use crate::error::{DbError, DbResult};
use crate::repo::ProcessedEvent;
use crate::Repositories;

pub use catalog::{
    MemoryBillingCycleRepository, MemoryFeatureRepository, MemoryPlanRepository,
    MemoryProductRepository,
};
pub use customer::MemoryCustomerRepository;
pub use events::MemoryProcessedEventRepository;
pub use subscription::MemorySubscriptionRepository;

/// Shared in-memory storage backing every memory repository
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    features: Table<FeatureId, Feature>,
    products: Table<ProductId, Product>,
    plans: Table<PlanId, Plan>,
    billing_cycles: Table<BillingCycleId, BillingCycle>,
    customers: Table<CustomerId, Customer>,
    subscriptions: Table<SubscriptionId, Subscription>,
    events: DashMap<String, ProcessedEvent>,
    calls: DashMap<&'static str, u64>,
    failures: DashMap<&'static str, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a repository bundle over this store
    pub fn repositories(&self) -> Repositories {
        Repositories {
            features: Arc::new(MemoryFeatureRepository::new(self.clone())),
            products: Arc::new(MemoryProductRepository::new(self.clone())),
            plans: Arc::new(MemoryPlanRepository::new(self.clone())),
            billing_cycles: Arc::new(MemoryBillingCycleRepository::new(self.clone())),
            customers: Arc::new(MemoryCustomerRepository::new(self.clone())),
            subscriptions: Arc::new(MemorySubscriptionRepository::new(self.clone())),
            events: Arc::new(MemoryProcessedEventRepository::new(self.clone())),
        }
    }

    /// Number of calls made to one operation since the last reset
    pub fn call_count(&self, operation: &str) -> u64 {
        self.inner.calls.get(operation).map_or(0, |c| *c.value())
    }

    /// Number of calls made to operations of one repository, e.g. `"plans"`
    pub fn calls_to(&self, repository: &str) -> u64 {
        let prefix = format!("{repository}.");
        self.inner
            .calls
            .iter()
            .filter(|c| c.key().starts_with(&prefix))
            .map(|c| *c.value())
            .sum()
    }

    pub fn total_calls(&self) -> u64 {
        self.inner.calls.iter().map(|c| *c.value()).sum()
    }

    pub fn reset_calls(&self) {
        self.inner.calls.clear();
    }

    /// Make an operation fail with a storage error until cleared
    pub fn fail_on(&self, operation: &'static str, message: impl Into<String>) {
        self.inner.failures.insert(operation, message.into());
    }

    pub fn clear_failures(&self) {
        self.inner.failures.clear();
    }

    fn record(&self, operation: &'static str) -> DbResult<()> {
        *self.inner.calls.entry(operation).or_insert(0) += 1;
        if let Some(message) = self.inner.failures.get(operation) {
            tracing::debug!(operation, "injected storage failure");
            return Err(DbError::Storage(message.value().clone()));
        }
        Ok(())
    }
}

/// Rows keyed by id with a unique natural-key index
struct Table<I, T> {
    rows: DashMap<I, T>,
    keys: DashMap<String, I>,
}

impl<I, T> Default for Table<I, T>
where
    I: Eq + Hash,
{
    fn default() -> Self {
        Self {
            rows: DashMap::new(),
            keys: DashMap::new(),
        }
    }
}

impl<I, T> Table<I, T>
where
    I: Copy + Eq + Hash + std::fmt::Display,
    T: Clone,
{
    fn get(&self, id: &I) -> Option<T> {
        self.rows.get(id).map(|r| r.value().clone())
    }

    fn get_by_key(&self, key: &str) -> Option<T> {
        let id = *self.keys.get(key)?.value();
        self.get(&id)
    }

    fn contains_key(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    fn get_many(&self, ids: &[I]) -> Vec<T> {
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    fn filter(&self, mut predicate: impl FnMut(&T) -> bool) -> Vec<T> {
        self.rows
            .iter()
            .filter(|r| predicate(r.value()))
            .map(|r| r.value().clone())
            .collect()
    }

    fn any(&self, mut predicate: impl FnMut(&T) -> bool) -> bool {
        self.rows.iter().any(|r| predicate(r.value()))
    }

    /// Unversioned upsert enforcing key uniqueness
    fn upsert(&self, entity: &'static str, id: I, key: &str, value: T) -> DbResult<()> {
        match self.keys.entry(key.to_string()) {
            Entry::Occupied(e) if *e.get() != id => {
                return Err(DbError::Conflict {
                    entity,
                    key: key.to_string(),
                })
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(e) => {
                e.insert(id);
            }
        }
        self.rows.insert(id, value);
        Ok(())
    }

    /// Upsert guarded by an optimistic version; returns the stored copy
    fn upsert_versioned(
        &self,
        entity: &'static str,
        id: I,
        key: &str,
        value: &T,
        version: impl Fn(&T) -> u64,
        advance: impl FnOnce(&mut T),
    ) -> DbResult<T> {
        let key_entry = match self.keys.entry(key.to_string()) {
            Entry::Occupied(e) if *e.get() != id => {
                return Err(DbError::Conflict {
                    entity,
                    key: key.to_string(),
                })
            }
            entry => entry,
        };

        let stored = match self.rows.entry(id) {
            Entry::Occupied(mut e) => {
                if version(e.get()) != version(value) {
                    return Err(DbError::VersionConflict {
                        entity,
                        id: id.to_string(),
                    });
                }
                let mut next = value.clone();
                advance(&mut next);
                e.insert(next.clone());
                next
            }
            Entry::Vacant(e) => {
                if version(value) != 0 {
                    return Err(DbError::VersionConflict {
                        entity,
                        id: id.to_string(),
                    });
                }
                let mut next = value.clone();
                advance(&mut next);
                e.insert(next.clone());
                next
            }
        };

        if let Entry::Vacant(e) = key_entry {
            e.insert(id);
        }
        Ok(stored)
    }

    fn remove(&self, id: &I, key_of: impl Fn(&T) -> String) -> Option<T> {
        let (_, value) = self.rows.remove(id)?;
        self.keys.remove(&key_of(&value));
        Some(value)
    }
}

fn apply_limit<T>(mut rows: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    rows
}
