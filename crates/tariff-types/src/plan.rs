//! Plan types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{require_non_empty, CatalogStatus, Feature, FeatureId, PlanId, ProductId, ValidationError};

/// Plan-level value for one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFeatureValue {
    pub feature_id: FeatureId,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named bundle of feature values belonging to one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    id: PlanId,
    key: String,
    product_id: ProductId,
    display_name: String,
    status: CatalogStatus,
    on_expire_transition_to_billing_cycle_key: Option<String>,
    feature_values: BTreeMap<FeatureId, PlanFeatureValue>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Plan {
    /// Create an active plan for a product
    pub fn new(
        key: impl Into<String>,
        product_id: ProductId,
        display_name: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let key = key.into();
        require_non_empty("plan key", &key)?;

        let now = Utc::now();
        Ok(Self {
            id: PlanId::new(),
            key,
            product_id,
            display_name: display_name.into(),
            status: CatalogStatus::Active,
            on_expire_transition_to_billing_cycle_key: None,
            feature_values: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> PlanId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn status(&self) -> CatalogStatus {
        self.status
    }

    pub fn is_archived(&self) -> bool {
        self.status == CatalogStatus::Archived
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Billing cycle key subscriptions roll onto when they expire
    pub fn transition_target(&self) -> Option<&str> {
        self.on_expire_transition_to_billing_cycle_key.as_deref()
    }

    /// Plan value for a feature, if the plan overrides it
    pub fn feature_value(&self, feature_id: FeatureId) -> Option<&str> {
        self.feature_values.get(&feature_id).map(|v| v.value.as_str())
    }

    pub fn feature_values(&self) -> impl Iterator<Item = &PlanFeatureValue> {
        self.feature_values.values()
    }

    pub fn has_feature_value(&self, feature_id: FeatureId) -> bool {
        self.feature_values.contains_key(&feature_id)
    }

    /// Set the plan value for a feature, validated against its type.
    ///
    /// Returns `false` when the stored value was already identical.
    pub fn set_feature_value(
        &mut self,
        feature: &Feature,
        value: impl Into<String>,
    ) -> Result<bool, ValidationError> {
        let value = value.into();
        feature.validate_value(&value)?;

        let now = Utc::now();
        match self.feature_values.get_mut(&feature.id()) {
            Some(existing) if existing.value == value => return Ok(false),
            Some(existing) => {
                existing.value = value;
                existing.updated_at = now;
            }
            None => {
                self.feature_values.insert(
                    feature.id(),
                    PlanFeatureValue {
                        feature_id: feature.id(),
                        value,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        self.updated_at = now;
        Ok(true)
    }

    pub fn remove_feature_value(&mut self, feature_id: FeatureId) -> bool {
        let removed = self.feature_values.remove(&feature_id).is_some();
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Set or clear the on-expiry transition target
    pub fn set_transition_target(&mut self, billing_cycle_key: Option<String>) -> bool {
        if self.on_expire_transition_to_billing_cycle_key == billing_cycle_key {
            return false;
        }
        self.on_expire_transition_to_billing_cycle_key = billing_cycle_key;
        self.updated_at = Utc::now();
        true
    }

    pub fn rename(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
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
}
