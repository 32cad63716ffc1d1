//! Tariff Billing - Payment-provider reconciliation
//!
//! Applies already-verified provider events (customers, subscriptions, paid
//! invoices) to the tariff customer and subscription aggregates. Processing
//! is idempotent under redelivery and tolerant of out-of-order delivery.
//!
//! # Example
//!
//! ```rust,ignore
//! use tariff_billing::{ReconciliationConfig, ReconciliationEngine};
//!
//! let engine = ReconciliationEngine::new(repos, ReconciliationConfig::from_env()?);
//! let outcome = engine.process_payload(&body).await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod payload;

pub use config::ReconciliationConfig;
pub use engine::{ProcessOutcome, ReconciliationEngine};
pub use error::BillingError;
pub use event::{ProviderEvent, ProviderEventType};
pub use payload::{
    epoch_to_utc, map_status, ProviderCustomer, ProviderInvoice, ProviderSubscription,
};
