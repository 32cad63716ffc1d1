//! Customer types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{require_non_empty, CatalogStatus, CustomerId, ValidationError};

/// A billable customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    id: CustomerId,
    key: String,
    display_name: String,
    email: String,
    external_billing_id: Option<String>,
    status: CatalogStatus,
    #[serde(default)]
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Customer {
    /// Create an active customer without a provider mapping
    pub fn new(
        key: impl Into<String>,
        display_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let key = key.into();
        require_non_empty("customer key", &key)?;

        let now = Utc::now();
        Ok(Self {
            id: CustomerId::new(),
            key,
            display_name: display_name.into(),
            email: email.into(),
            external_billing_id: None,
            status: CatalogStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> CustomerId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Payment provider customer id
    pub fn external_billing_id(&self) -> Option<&str> {
        self.external_billing_id.as_deref()
    }

    pub fn status(&self) -> CatalogStatus {
        self.status
    }

    pub fn is_archived(&self) -> bool {
        self.status == CatalogStatus::Archived
    }

    /// Optimistic concurrency version of the stored row
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Record the provider customer id. Returns `false` when unchanged.
    pub fn link_external_billing_id(&mut self, external_id: &str) -> bool {
        if self.external_billing_id.as_deref() == Some(external_id) {
            return false;
        }
        self.external_billing_id = Some(external_id.to_string());
        self.updated_at = Utc::now();
        true
    }

    /// Drop the provider mapping. Returns `false` when there was none.
    pub fn clear_external_billing_id(&mut self) -> bool {
        if self.external_billing_id.take().is_none() {
            return false;
        }
        self.updated_at = Utc::now();
        true
    }

    pub fn rename(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
        self.updated_at = Utc::now();
    }

    pub fn set_email(&mut self, email: impl Into<String>) {
        self.email = email.into();
        self.updated_at = Utc::now();
    }

    pub fn archive(&mut self) -> bool {
        if self.is_archived() {
            return false;
        }
        self.status = CatalogStatus::Archived;
        self.updated_at = Utc::now();
        true
    }

    /// Called by repositories after a successful versioned save
    pub fn advance_version(&mut self) {
        self.version += 1;
    }
}
