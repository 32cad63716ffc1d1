//! Product types

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{require_non_empty, FeatureId, ProductId, ProductStatus, ValidationError};

/// A sellable product bundling a set of features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    key: String,
    display_name: String,
    status: ProductStatus,
    feature_ids: BTreeSet<FeatureId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Product {
    /// Create an active product without features
    pub fn new(key: impl Into<String>, display_name: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        require_non_empty("product key", &key)?;

        let now = Utc::now();
        Ok(Self {
            id: ProductId::new(),
            key,
            display_name: display_name.into(),
            status: ProductStatus::Active,
            feature_ids: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> ProductId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn is_archived(&self) -> bool {
        self.status == ProductStatus::Archived
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Features associated with this product
    pub fn feature_ids(&self) -> &BTreeSet<FeatureId> {
        &self.feature_ids
    }

    pub fn has_feature(&self, feature_id: FeatureId) -> bool {
        self.feature_ids.contains(&feature_id)
    }

    /// Associate a feature. Returns `false` if it was already associated.
    pub fn attach_feature(&mut self, feature_id: FeatureId) -> bool {
        let added = self.feature_ids.insert(feature_id);
        if added {
            self.updated_at = Utc::now();
        }
        added
    }

    /// Remove a feature association. Returns `false` if it was absent.
    pub fn detach_feature(&mut self, feature_id: FeatureId) -> bool {
        let removed = self.feature_ids.remove(&feature_id);
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }

    pub fn rename(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
        self.updated_at = Utc::now();
    }

    /// Change status. Returns `false` when unchanged.
    pub fn set_status(&mut self, status: ProductStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }

    pub fn archive(&mut self) -> bool {
        self.set_status(ProductStatus::Archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_association() {
        let mut product = Product::new("crm", "CRM").unwrap();
        let feature = FeatureId::new();

        assert!(product.attach_feature(feature));
        assert!(!product.attach_feature(feature));
        assert!(product.has_feature(feature));
        assert!(product.detach_feature(feature));
        assert!(!product.has_feature(feature));
    }

    #[test]
    fn test_status_changes() {
        let mut product = Product::new("crm", "CRM").unwrap();
        assert!(product.set_status(ProductStatus::Inactive));
        assert!(!product.set_status(ProductStatus::Inactive));
        assert!(product.archive());
        assert!(product.is_archived());
    }
}
