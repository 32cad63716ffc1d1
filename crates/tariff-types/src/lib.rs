//! Tariff Types - Shared domain types
//!
//! This crate contains the catalog and subscription aggregates used across
//! the tariff crates:
//! - Features, products, plans and billing cycles
//! - Customers and their subscriptions
//! - Validation and business-rule errors

pub mod billing_cycle;
pub mod customer;
pub mod error;
pub mod feature;
pub mod ids;
pub mod plan;
pub mod product;
pub mod status;
pub mod subscription;

pub use billing_cycle::*;
pub use customer::*;
pub use error::*;
pub use feature::*;
pub use ids::*;
pub use plan::*;
pub use product::*;
pub use status::*;
pub use subscription::*;

/// Reject blank natural keys and names.
pub(crate) fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty { field });
    }
    Ok(())
}
