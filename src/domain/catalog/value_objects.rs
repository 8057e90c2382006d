use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Catalog Value Objects
// ============================================================================

/// Image shown for services that have no uploaded picture.
pub const DEFAULT_IMAGE: &str = "rectangle-2-6.png";

/// How a service's base price scales with the request's usage parameters.
///
/// New entries must use one of the three known types. Rows written by older
/// tooling may carry anything else; those are kept as `Other` and priced with
/// a quantity of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseType {
    PerUser,
    PerCore,
    Subscription,
    Other(String),
}

impl LicenseType {
    pub fn as_str(&self) -> &str {
        match self {
            LicenseType::PerUser => "per_user",
            LicenseType::PerCore => "per_core",
            LicenseType::Subscription => "subscription",
            LicenseType::Other(raw) => raw.as_str(),
        }
    }

    /// Lenient decoding for persisted rows.
    pub fn from_stored(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| LicenseType::Other(raw.to_string()))
    }
}

impl fmt::Display for LicenseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per_user" => Ok(LicenseType::PerUser),
            "per_core" => Ok(LicenseType::PerCore),
            "subscription" => Ok(LicenseType::Subscription),
            other => Err(format!(
                "license type must be one of per_user, per_core, subscription (got '{}')",
                other
            )),
        }
    }
}

impl Serialize for LicenseType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LicenseService {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub base_price: f64,
    pub license_type: LicenseType,
    pub image_url: Option<String>,
    pub is_deleted: bool,
}

impl LicenseService {
    pub fn is_live(&self) -> bool {
        !self.is_deleted
    }

    pub fn image_or_default(&self) -> &str {
        self.image_url.as_deref().unwrap_or(DEFAULT_IMAGE)
    }
}

/// A validated catalog entry ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewService {
    pub name: String,
    pub description: String,
    pub base_price: f64,
    pub license_type: LicenseType,
}

/// Sparse update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServicePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub base_price: Option<f64>,
    pub license_type: Option<String>,
}

impl ServicePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.base_price.is_none()
            && self.license_type.is_none()
    }
}

/// A `ServicePatch` whose provided fields have passed validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub base_price: Option<f64>,
    pub license_type: Option<LicenseType>,
}

impl ServiceUpdate {
    pub fn apply_to(&self, service: &mut LicenseService) {
        if let Some(name) = &self.name {
            service.name = name.clone();
        }
        if let Some(description) = &self.description {
            service.description = description.clone();
        }
        if let Some(price) = self.base_price {
            service.base_price = price;
        }
        if let Some(license_type) = &self.license_type {
            service.license_type = license_type.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_license_types_parse_strictly() {
        assert_eq!("per_user".parse::<LicenseType>().unwrap(), LicenseType::PerUser);
        assert_eq!("per_core".parse::<LicenseType>().unwrap(), LicenseType::PerCore);
        assert_eq!(
            "subscription".parse::<LicenseType>().unwrap(),
            LicenseType::Subscription
        );
        assert!("site".parse::<LicenseType>().is_err());
    }

    #[test]
    fn test_legacy_license_type_is_preserved() {
        let legacy = LicenseType::from_stored("enterprise");
        assert_eq!(legacy, LicenseType::Other("enterprise".to_string()));
        assert_eq!(legacy.as_str(), "enterprise");
    }

    #[test]
    fn test_license_type_serializes_as_plain_string() {
        let json = serde_json::to_string(&LicenseType::PerCore).unwrap();
        assert_eq!(json, "\"per_core\"");
    }

    #[test]
    fn test_default_image_when_absent() {
        let service = LicenseService {
            id: 1,
            name: "Office".to_string(),
            description: String::new(),
            base_price: 100.0,
            license_type: LicenseType::PerUser,
            image_url: None,
            is_deleted: false,
        };
        assert_eq!(service.image_or_default(), DEFAULT_IMAGE);
    }
}
