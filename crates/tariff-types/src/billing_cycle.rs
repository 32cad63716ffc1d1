//! Billing cycle types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{require_non_empty, BillingCycleId, CatalogStatus, PlanId, ValidationError};

/// Unit of a billing period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    Days,
    Weeks,
    Months,
    Years,
    /// Perpetual, never expires
    Forever,
}

impl DurationUnit {
    /// Check that a duration value is present exactly when the unit needs one
    pub fn validate_value(self, value: Option<u32>) -> Result<(), ValidationError> {
        match (self, value) {
            (Self::Forever, None) => Ok(()),
            (Self::Forever, Some(_)) => Err(ValidationError::UnexpectedDurationValue),
            (unit, None) => Err(ValidationError::MissingDurationValue(unit)),
            (_, Some(0)) => Err(ValidationError::NonPositiveDuration),
            (_, Some(_)) => Ok(()),
        }
    }
}

impl std::fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Days => write!(f, "days"),
            Self::Weeks => write!(f, "weeks"),
            Self::Months => write!(f, "months"),
            Self::Years => write!(f, "years"),
            Self::Forever => write!(f, "forever"),
        }
    }
}

/// A recurring or perpetual billing period attached to a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingCycle {
    id: BillingCycleId,
    key: String,
    plan_id: PlanId,
    display_name: String,
    duration_unit: DurationUnit,
    duration_value: Option<u32>,
    #[serde(default)]
    external_price_id: Option<String>,
    status: CatalogStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BillingCycle {
    /// Create an active billing cycle
    pub fn new(
        key: impl Into<String>,
        plan_id: PlanId,
        display_name: impl Into<String>,
        duration_unit: DurationUnit,
        duration_value: Option<u32>,
    ) -> Result<Self, ValidationError> {
        let key = key.into();
        require_non_empty("billing cycle key", &key)?;
        duration_unit.validate_value(duration_value)?;

        let now = Utc::now();
        Ok(Self {
            id: BillingCycleId::new(),
            key,
            plan_id,
            display_name: display_name.into(),
            duration_unit,
            duration_value,
            external_price_id: None,
            status: CatalogStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    /// Attach the provider price identifier
    pub fn with_external_price_id(mut self, price_id: impl Into<String>) -> Self {
        self.external_price_id = Some(price_id.into());
        self
    }

    pub fn id(&self) -> BillingCycleId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn plan_id(&self) -> PlanId {
        self.plan_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn duration_unit(&self) -> DurationUnit {
        self.duration_unit
    }

    pub fn duration_value(&self) -> Option<u32> {
        self.duration_value
    }

    pub fn external_price_id(&self) -> Option<&str> {
        self.external_price_id.as_deref()
    }

    pub fn status(&self) -> CatalogStatus {
        self.status
    }

    pub fn is_archived(&self) -> bool {
        self.status == CatalogStatus::Archived
    }

    pub fn is_forever(&self) -> bool {
        self.duration_unit == DurationUnit::Forever
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Re-check the duration invariant, e.g. for rows loaded from storage
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.duration_unit.validate_value(self.duration_value)
    }

    pub fn set_external_price_id(&mut self, price_id: Option<String>) -> bool {
        if self.external_price_id == price_id {
            return false;
        }
        self.external_price_id = price_id;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forever_rejects_value() {
        let err = BillingCycle::new("life", PlanId::new(), "Lifetime", DurationUnit::Forever, Some(1))
            .unwrap_err();
        assert_eq!(err, ValidationError::UnexpectedDurationValue);
    }

    #[test]
    fn test_recurring_requires_value() {
        let err = BillingCycle::new("monthly", PlanId::new(), "Monthly", DurationUnit::Months, None)
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingDurationValue(DurationUnit::Months));
    }

    #[test]
    fn test_zero_duration_rejected() {
        assert_eq!(
            DurationUnit::Days.validate_value(Some(0)),
            Err(ValidationError::NonPositiveDuration)
        );
    }

    #[test]
    fn test_deserialized_row_can_be_revalidated() {
        let cycle = BillingCycle::new("life", PlanId::new(), "Lifetime", DurationUnit::Forever, None)
            .unwrap();
        let mut json = serde_json::to_value(&cycle).unwrap();
        json["duration_value"] = serde_json::json!(12);

        let corrupted: BillingCycle = serde_json::from_value(json).unwrap();
        assert_eq!(corrupted.validate(), Err(ValidationError::UnexpectedDurationValue));
    }
}
