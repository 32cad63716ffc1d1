//! Provider payload objects
//!
//! Only the fields reconciliation reads are modelled; everything else in the
//! provider JSON is ignored.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use tariff_types::{ProviderSnapshot, SubscriptionStatus};

/// Convert provider epoch seconds
pub fn epoch_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Provider list wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderList<T> {
    /// Items of the list
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> Default for ProviderList<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

/// Provider customer
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderCustomer {
    /// Customer ID
    pub id: String,
    /// Customer email
    pub email: Option<String>,
    /// Customer display name
    pub name: Option<String>,
    /// Free-form key/value pairs set on the customer
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ProviderCustomer {
    pub fn metadata_value(&self, field: &str) -> Option<&str> {
        metadata_value(&self.metadata, field)
    }
}

/// Provider price attached to a subscription item
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderPrice {
    /// Price ID
    pub id: String,
    /// Lookup key set on the price
    pub lookup_key: Option<String>,
}

/// Provider subscription item
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSubscriptionItem {
    /// Price the item bills
    pub price: ProviderPrice,
    /// Item period start (Unix timestamp)
    pub current_period_start: Option<i64>,
    /// Item period end (Unix timestamp)
    pub current_period_end: Option<i64>,
}

/// Provider subscription
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSubscription {
    /// Subscription ID
    pub id: String,
    /// Customer ID
    pub customer: String,
    /// Provider status string
    pub status: String,
    /// Whether the subscription cancels at period end
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// When the subscription was canceled (Unix timestamp)
    pub canceled_at: Option<i64>,
    /// When the subscription ended (Unix timestamp)
    pub ended_at: Option<i64>,
    /// Current period start (Unix timestamp)
    pub current_period_start: Option<i64>,
    /// Current period end (Unix timestamp)
    pub current_period_end: Option<i64>,
    /// Trial end (Unix timestamp)
    pub trial_end: Option<i64>,
    /// Subscription items
    #[serde(default)]
    pub items: ProviderList<ProviderSubscriptionItem>,
    /// Free-form key/value pairs set on the subscription
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ProviderSubscription {
    pub fn metadata_value(&self, field: &str) -> Option<&str> {
        metadata_value(&self.metadata, field)
    }

    /// Price of the first item
    pub fn price(&self) -> Option<&ProviderPrice> {
        self.items.data.first().map(|item| &item.price)
    }

    /// Current period bounds.
    ///
    /// Newer provider API versions report the period per item only.
    pub fn period(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let (start, end) = match (self.current_period_start, self.current_period_end) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                let item = self.items.data.first()?;
                (item.current_period_start?, item.current_period_end?)
            }
        };
        Some((epoch_to_utc(start)?, epoch_to_utc(end)?))
    }

    /// Internal status for the provider status, `None` when unrecognised
    pub fn internal_status(&self) -> Option<SubscriptionStatus> {
        map_status(&self.status, self.cancel_at_period_end)
    }

    /// Provider state as an internal snapshot
    pub fn snapshot(&self) -> Option<ProviderSnapshot> {
        let status = self.internal_status()?;
        let period = self.period();
        Some(ProviderSnapshot {
            status,
            period_start: period.map(|(start, _)| start),
            period_end: period.map(|(_, end)| end),
            cancellation_date: self.canceled_at.and_then(epoch_to_utc),
            trial_end_date: self.trial_end.and_then(epoch_to_utc),
        })
    }
}

/// Map a provider subscription status onto the internal state machine
pub fn map_status(status: &str, cancel_at_period_end: bool) -> Option<SubscriptionStatus> {
    let mapped = match status {
        "active" if cancel_at_period_end => SubscriptionStatus::CancellationPending,
        "active" => SubscriptionStatus::Active,
        "trialing" => SubscriptionStatus::Trial,
        "canceled" => SubscriptionStatus::Cancelled,
        "past_due" | "unpaid" | "paused" => SubscriptionStatus::Suspended,
        "incomplete" => SubscriptionStatus::Pending,
        "incomplete_expired" => SubscriptionStatus::Expired,
        _ => return None,
    };
    Some(mapped)
}

/// Billing period of an invoice line
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProviderPeriod {
    /// Period start (Unix timestamp)
    pub start: i64,
    /// Period end (Unix timestamp)
    pub end: i64,
}

/// Invoice line item
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderInvoiceLine {
    /// Period the line bills
    pub period: Option<ProviderPeriod>,
}

/// Provider invoice
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderInvoice {
    /// Invoice ID
    pub id: String,
    /// Customer ID
    pub customer: Option<String>,
    /// Subscription ID the invoice bills
    pub subscription: Option<String>,
    /// Invoice line items
    #[serde(default)]
    pub lines: ProviderList<ProviderInvoiceLine>,
}

impl ProviderInvoice {
    /// Billing period of the first line that carries one.
    ///
    /// `None` when absent, out of range or inverted.
    pub fn line_period(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let period = self.lines.data.iter().find_map(|line| line.period)?;
        let start = epoch_to_utc(period.start)?;
        let end = epoch_to_utc(period.end)?;
        (start < end).then_some((start, end))
    }
}

fn metadata_value<'a>(metadata: &'a HashMap<String, String>, field: &str) -> Option<&'a str> {
    metadata
        .get(field)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}
