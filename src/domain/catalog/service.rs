use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::errors::CatalogError;
use super::value_objects::{LicenseService, LicenseType, NewService, ServicePatch, ServiceUpdate};
use crate::domain::identity::Principal;
use crate::store::LicenseStore;

// ============================================================================
// Catalog Service - validation and role checks around the catalog store
// ============================================================================

const MAX_NAME_LEN: usize = 100;
const MAX_IMAGE_REF_LEN: usize = 255;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateService {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub base_price: f64,
    pub license_type: String,
}

pub struct CatalogService {
    store: Arc<dyn LicenseStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn LicenseStore>) -> Self {
        Self { store }
    }

    /// Live entries, optionally narrowed by a case-insensitive name substring.
    pub async fn list(&self, query: Option<&str>) -> Result<Vec<LicenseService>, CatalogError> {
        let query = query.map(str::trim).filter(|q| !q.is_empty());
        Ok(self.store.list_services(query).await?)
    }

    pub async fn get(&self, id: i64) -> Result<LicenseService, CatalogError> {
        match self.store.get_service(id).await? {
            Some(service) if service.is_live() => Ok(service),
            _ => Err(CatalogError::NotFound(id)),
        }
    }

    pub async fn create(
        &self,
        principal: &Principal,
        input: CreateService,
    ) -> Result<LicenseService, CatalogError> {
        require_moderator(principal)?;

        let new_service = NewService {
            name: validate_name(&input.name)?,
            description: input.description.trim().to_string(),
            base_price: validate_price(input.base_price)?,
            license_type: validate_license_type(&input.license_type)?,
        };

        let service = self.store.create_service(new_service).await?;
        info!(service_id = service.id, name = %service.name, "Created license service");
        Ok(service)
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: i64,
        patch: ServicePatch,
    ) -> Result<LicenseService, CatalogError> {
        require_moderator(principal)?;

        if patch.is_empty() {
            return self.get(id).await;
        }

        let update = ServiceUpdate {
            name: patch.name.as_deref().map(validate_name).transpose()?,
            description: patch.description.map(|d| d.trim().to_string()),
            base_price: patch.base_price.map(validate_price).transpose()?,
            license_type: patch
                .license_type
                .as_deref()
                .map(validate_license_type)
                .transpose()?,
        };

        let service = self
            .store
            .update_service(id, &update)
            .await?
            .ok_or(CatalogError::NotFound(id))?;
        info!(service_id = id, "Updated license service");
        Ok(service)
    }

    pub async fn delete(&self, principal: &Principal, id: i64) -> Result<(), CatalogError> {
        require_moderator(principal)?;

        if !self.store.delete_service(id).await? {
            return Err(CatalogError::NotFound(id));
        }
        info!(service_id = id, "Soft-deleted license service");
        Ok(())
    }

    /// Records (or clears, with `None`) the image reference. The upload
    /// itself happens elsewhere.
    pub async fn set_image(
        &self,
        principal: &Principal,
        id: i64,
        image_url: Option<String>,
    ) -> Result<LicenseService, CatalogError> {
        require_moderator(principal)?;

        let image_url = match image_url.map(|u| u.trim().to_string()) {
            Some(url) if url.is_empty() => {
                return Err(CatalogError::ValidationFailed(
                    "image reference cannot be empty".to_string(),
                ))
            }
            Some(url) if url.len() > MAX_IMAGE_REF_LEN => {
                return Err(CatalogError::ValidationFailed(format!(
                    "image reference exceeds {} characters",
                    MAX_IMAGE_REF_LEN
                )))
            }
            other => other,
        };

        if !self.store.set_service_image(id, image_url.as_deref()).await? {
            return Err(CatalogError::NotFound(id));
        }
        self.get(id).await
    }
}

fn require_moderator(principal: &Principal) -> Result<(), CatalogError> {
    if principal.is_moderator() {
        Ok(())
    } else {
        Err(CatalogError::Forbidden(
            "only managers and admins may change the catalog".to_string(),
        ))
    }
}

fn validate_name(name: &str) -> Result<String, CatalogError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CatalogError::ValidationFailed("name cannot be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(CatalogError::ValidationFailed(format!(
            "name exceeds {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

fn validate_price(price: f64) -> Result<f64, CatalogError> {
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(CatalogError::ValidationFailed(format!(
            "base price must be positive (got {})",
            price
        )))
    }
}

fn validate_license_type(raw: &str) -> Result<LicenseType, CatalogError> {
    raw.trim().parse().map_err(CatalogError::ValidationFailed)
}
