//! Provider event envelope

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::BillingError;
use crate::payload::epoch_to_utc;

/// Provider event types we handle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProviderEventType {
    /// Customer created
    CustomerCreated,
    /// Customer updated
    CustomerUpdated,
    /// Customer deleted
    CustomerDeleted,
    /// Customer subscription created
    SubscriptionCreated,
    /// Customer subscription updated
    SubscriptionUpdated,
    /// Customer subscription deleted
    SubscriptionDeleted,
    /// Invoice payment succeeded
    InvoicePaymentSucceeded,
    /// Unknown event type
    Unknown(String),
}

impl From<&str> for ProviderEventType {
    fn from(s: &str) -> Self {
        match s {
            "customer.created" => Self::CustomerCreated,
            "customer.updated" => Self::CustomerUpdated,
            "customer.deleted" => Self::CustomerDeleted,
            "customer.subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            "invoice.payment_succeeded" => Self::InvoicePaymentSucceeded,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl ProviderEventType {
    /// Wire name of the event type
    pub fn as_str(&self) -> &str {
        match self {
            Self::CustomerCreated => "customer.created",
            Self::CustomerUpdated => "customer.updated",
            Self::CustomerDeleted => "customer.deleted",
            Self::SubscriptionCreated => "customer.subscription.created",
            Self::SubscriptionUpdated => "customer.subscription.updated",
            Self::SubscriptionDeleted => "customer.subscription.deleted",
            Self::InvoicePaymentSucceeded => "invoice.payment_succeeded",
            Self::Unknown(other) => other,
        }
    }

    /// Label value for metrics; unknown types collapse to one label
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::CustomerCreated => "customer.created",
            Self::CustomerUpdated => "customer.updated",
            Self::CustomerDeleted => "customer.deleted",
            Self::SubscriptionCreated => "customer.subscription.created",
            Self::SubscriptionUpdated => "customer.subscription.updated",
            Self::SubscriptionDeleted => "customer.subscription.deleted",
            Self::InvoicePaymentSucceeded => "invoice.payment_succeeded",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl std::fmt::Display for ProviderEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed provider event
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    /// Event ID, used for deduplication
    pub id: String,
    /// Event type
    pub event_type: ProviderEventType,
    /// When the provider created the event
    pub created: DateTime<Utc>,
    /// The `data.object` payload
    pub object: serde_json::Value,
}

impl ProviderEvent {
    pub fn new(
        id: impl Into<String>,
        event_type: impl AsRef<str>,
        created: DateTime<Utc>,
        object: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            event_type: ProviderEventType::from(event_type.as_ref()),
            created,
            object,
        }
    }

    /// Parse a raw `{ id, type, created, data: { object } }` envelope
    pub fn parse(payload: &[u8]) -> Result<Self, BillingError> {
        let raw: RawEnvelope =
            serde_json::from_slice(payload).map_err(|e| BillingError::Payload(e.to_string()))?;

        let created = epoch_to_utc(raw.created).ok_or_else(|| {
            BillingError::Payload(format!("event timestamp out of range: {}", raw.created))
        })?;

        debug!(event_id = %raw.id, event_type = %raw.event_type, "Parsed provider event");

        Ok(Self {
            id: raw.id,
            event_type: ProviderEventType::from(raw.event_type.as_str()),
            created,
            object: raw.data.object,
        })
    }

    /// Decode the payload object
    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, BillingError> {
        T::deserialize(&self.object).map_err(|e| {
            BillingError::Payload(format!("{} payload: {e}", self.event_type.as_str()))
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}
