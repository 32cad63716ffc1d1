//! Reconciliation configuration

use chrono::Duration;

use tariff_core::config::{parse_var, ConfigError};

/// Reconciliation engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationConfig {
    /// Metadata field carrying the internal customer key.
    /// Default: `customer_key`
    pub customer_key_field: String,

    /// Metadata field carrying the internal subscription key.
    /// Default: `subscription_key`
    pub subscription_key_field: String,

    /// Metadata field naming the billing cycle for a new subscription.
    /// Default: `billing_cycle_key`
    pub billing_cycle_key_field: String,

    /// Retries after a version conflict before giving up.
    /// Default: 3
    pub max_conflict_retries: u32,

    /// How long a ledger claim may stay in processing before another
    /// delivery takes it over.
    /// Default: 5 minutes
    pub claim_timeout: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            customer_key_field: "customer_key".to_string(),
            subscription_key_field: "subscription_key".to_string(),
            billing_cycle_key_field: "billing_cycle_key".to_string(),
            max_conflict_retries: 3,
            claim_timeout: Duration::minutes(5),
        }
    }
}

impl ReconciliationConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the metadata field names
    #[must_use]
    pub fn with_metadata_fields(
        mut self,
        customer_key: impl Into<String>,
        subscription_key: impl Into<String>,
        billing_cycle_key: impl Into<String>,
    ) -> Self {
        self.customer_key_field = customer_key.into();
        self.subscription_key_field = subscription_key.into();
        self.billing_cycle_key_field = billing_cycle_key.into();
        self
    }

    #[must_use]
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    #[must_use]
    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Reads a `.env` file when present. Recognized variables:
    /// `TARIFF_METADATA_CUSTOMER_KEY`, `TARIFF_METADATA_SUBSCRIPTION_KEY`,
    /// `TARIFF_METADATA_BILLING_CYCLE_KEY`, `TARIFF_MAX_CONFLICT_RETRIES` and
    /// `TARIFF_EVENT_CLAIM_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let field = |name: &'static str, default: String| -> Result<String, ConfigError> {
            match lookup(name) {
                Some(raw) if raw.trim().is_empty() => Err(ConfigError::Invalid(name)),
                Some(raw) => Ok(raw.trim().to_string()),
                None => Ok(default),
            }
        };

        let claim_secs = parse_var(
            &lookup,
            "TARIFF_EVENT_CLAIM_TIMEOUT_SECS",
            defaults.claim_timeout.num_seconds(),
        )?;
        if claim_secs <= 0 {
            return Err(ConfigError::Invalid("TARIFF_EVENT_CLAIM_TIMEOUT_SECS"));
        }

        Ok(Self {
            customer_key_field: field("TARIFF_METADATA_CUSTOMER_KEY", defaults.customer_key_field)?,
            subscription_key_field: field(
                "TARIFF_METADATA_SUBSCRIPTION_KEY",
                defaults.subscription_key_field,
            )?,
            billing_cycle_key_field: field(
                "TARIFF_METADATA_BILLING_CYCLE_KEY",
                defaults.billing_cycle_key_field,
            )?,
            max_conflict_retries: parse_var(
                &lookup,
                "TARIFF_MAX_CONFLICT_RETRIES",
                defaults.max_conflict_retries,
            )?,
            claim_timeout: Duration::seconds(claim_secs),
        })
    }
}
