//! Tariff DB - Persistence abstractions
//!
//! Async repository traits consumed by the tariff services, plus a
//! DashMap-backed in-memory implementation.
//!
//! # Example
//!
//! ```rust,ignore
//! use tariff_db::memory::MemoryStore;
//!
//! let store = MemoryStore::new();
//! let repos = store.repositories();
//!
//! let customer = repos.customers.find_by_key("acme").await?;
//! ```

pub mod error;
pub mod memory;
pub mod repo;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repo::*;

/// Bundle of every repository the services depend on
#[derive(Clone)]
pub struct Repositories {
    pub features: Arc<dyn FeatureRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub plans: Arc<dyn PlanRepository>,
    pub billing_cycles: Arc<dyn BillingCycleRepository>,
    pub customers: Arc<dyn CustomerRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub events: Arc<dyn ProcessedEventRepository>,
}

impl std::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repositories").finish_non_exhaustive()
    }
}
