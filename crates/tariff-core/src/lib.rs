//! Tariff Core - Catalog, entitlement and lifecycle logic
//!
//! Business logic on top of the `tariff-db` repository traits:
//! - Billing period arithmetic
//! - Feature value resolution (override > plan > default)
//! - Subscription lifecycle management
//! - Catalog administration with a TTL-bounded cache
//! - Customer entitlement lookups

pub mod cache;
pub mod calculator;
pub mod catalog;
pub mod checker;
pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod resolver;
pub mod services;

pub use cache::{CacheStats, CatalogCache};
pub use calculator::{next_period_end, period_end_for};
pub use catalog::{CatalogService, CreateBillingCycle};
pub use checker::FeatureChecker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, ConfigError, CoreConfig};
pub use error::{CoreError, CoreResult};
pub use lifecycle::{
    successor_key, BatchFailure, BatchReport, CancelMode, CreateSubscription,
    SubscriptionLifecycleManager, Transition, TransitionedPair,
};
pub use resolver::{order_for_resolution, resolve, resolve_all, resolution_order, SubscriptionContext};
pub use services::{CoreServices, MaintenanceReport};
