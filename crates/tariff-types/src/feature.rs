//! Feature types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{require_non_empty, CatalogStatus, FeatureId, ValidationError};

/// Value type of a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureValueType {
    /// `"true"` or `"false"`
    Toggle,
    /// Finite number
    Numeric,
    /// Free text
    Text,
}

impl FeatureValueType {
    /// Check a raw value against this type's grammar
    pub fn validate(self, value: &str) -> Result<(), ValidationError> {
        let valid = match self {
            Self::Toggle => value == "true" || value == "false",
            Self::Numeric => {
                value.trim() == value && value.parse::<f64>().is_ok_and(f64::is_finite)
            }
            Self::Text => true,
        };

        if valid {
            Ok(())
        } else {
            Err(ValidationError::InvalidFeatureValue {
                value_type: self,
                value: value.to_string(),
            })
        }
    }
}

impl std::fmt::Display for FeatureValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Toggle => write!(f, "toggle"),
            Self::Numeric => write!(f, "numeric"),
            Self::Text => write!(f, "text"),
        }
    }
}

impl std::str::FromStr for FeatureValueType {
    type Err = ValueTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "toggle" | "boolean" => Ok(Self::Toggle),
            "numeric" | "number" => Ok(Self::Numeric),
            "text" | "string" => Ok(Self::Text),
            _ => Err(ValueTypeParseError(s.to_string())),
        }
    }
}

/// Error parsing a value type string
#[derive(Debug, Clone)]
pub struct ValueTypeParseError(pub String);

impl std::fmt::Display for ValueTypeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid feature value type: {}", self.0)
    }
}

impl std::error::Error for ValueTypeParseError {}

/// A named, typed capability with a default value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    id: FeatureId,
    key: String,
    display_name: String,
    value_type: FeatureValueType,
    default_value: String,
    status: CatalogStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Feature {
    /// Create an active feature, validating the default against the type
    pub fn new(
        key: impl Into<String>,
        display_name: impl Into<String>,
        value_type: FeatureValueType,
        default_value: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let key = key.into();
        let default_value = default_value.into();
        require_non_empty("feature key", &key)?;
        value_type.validate(&default_value)?;

        let now = Utc::now();
        Ok(Self {
            id: FeatureId::new(),
            key,
            display_name: display_name.into(),
            value_type,
            default_value,
            status: CatalogStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> FeatureId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn value_type(&self) -> FeatureValueType {
        self.value_type
    }

    pub fn default_value(&self) -> &str {
        &self.default_value
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

    /// Validate a value intended for this feature
    pub fn validate_value(&self, value: &str) -> Result<(), ValidationError> {
        self.value_type.validate(value)
    }

    pub fn rename(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
        self.updated_at = Utc::now();
    }

    /// Replace the default value
    pub fn set_default_value(&mut self, value: impl Into<String>) -> Result<(), ValidationError> {
        let value = value.into();
        self.value_type.validate(&value)?;
        self.default_value = value;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Archive the feature. Returns `false` if it was already archived.
    pub fn archive(&mut self) -> bool {
        if self.is_archived() {
            return false;
        }
        self.status = CatalogStatus::Archived;
        self.updated_at = Utc::now();
        true
    }
}
