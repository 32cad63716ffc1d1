//! Domain errors

use thiserror::Error;

use crate::{DurationUnit, FeatureValueType, SubscriptionStatus};

/// Malformed input rejected before it reaches an aggregate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Value does not satisfy the feature type grammar
    #[error("invalid {value_type} value: {value:?}")]
    InvalidFeatureValue {
        /// Declared feature type
        value_type: FeatureValueType,
        /// Offending value
        value: String,
    },

    /// Non-forever unit without a duration value
    #[error("duration value is required for unit {0}")]
    MissingDurationValue(DurationUnit),

    /// Forever unit with a duration value
    #[error("duration value must be absent for unit forever")]
    UnexpectedDurationValue,

    /// Zero duration value
    #[error("duration value must be positive")]
    NonPositiveDuration,

    /// Date arithmetic left the representable range
    #[error("billing period end is out of range")]
    DateOutOfRange,

    /// Blank key or name
    #[error("{field} must not be empty")]
    Empty {
        /// Field name
        field: &'static str,
    },
}

/// Business-rule violation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Status change not allowed by the subscription state machine
    #[error("cannot move subscription from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: SubscriptionStatus,
        /// Requested status
        to: SubscriptionStatus,
    },

    /// Subscription is cancelled or expired
    #[error("subscription is {0}")]
    Terminal(SubscriptionStatus),

    /// Renewal requested outside active/trial
    #[error("subscription in status {0} cannot be renewed")]
    NotRenewable(SubscriptionStatus),

    /// Hard delete requested for a live record
    #[error("{entity} {key} must be archived before deletion")]
    NotArchived {
        /// Entity kind
        entity: &'static str,
        /// Natural key
        key: String,
    },

    /// Hard delete blocked by live references
    #[error("{entity} {key} is still referenced by {by}")]
    StillReferenced {
        /// Entity kind
        entity: &'static str,
        /// Natural key
        key: String,
        /// Referencing rows
        by: &'static str,
    },

    /// Archived record used where a live one is required
    #[error("{entity} {key} is archived")]
    Archived {
        /// Entity kind
        entity: &'static str,
        /// Natural key
        key: String,
    },

    /// Any other business rule
    #[error("{0}")]
    Rule(String),
}
