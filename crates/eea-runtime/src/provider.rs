//! A [`ProviderClient`] stand-in for deployments with no provider
//! integration wired in yet.
//!
//! Real provider API clients (GitHub, DockerHub, OCI registries) are an
//! external collaborator the core never specifies (spec.md §1); this
//! reference implementation only logs the calls the dispatcher would have
//! issued, so [`crate::Runtime`] is runnable end-to-end without one. It
//! mirrors [`eea_actions::LoggingRemediator`]'s role for the remediation
//! seam.

use async_trait::async_trait;
use eea_core::EntityId;
use eea_core::EntityType;
use eea_core::entity::PropertyMap;
use eea_core::interfaces::ProviderClient;
use eea_core::interfaces::ProviderError;

/// Logs every provider call it receives and returns a synthesized
/// identifier, rather than talking to any real upstream provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProviderClient;

#[async_trait]
impl ProviderClient for LoggingProviderClient {
    async fn register_entity(
        &self,
        entity_type: EntityType,
        properties: PropertyMap,
    ) -> Result<PropertyMap, ProviderError> {
        tracing::info!(?entity_type, "no provider integration configured, registering entity as-is");
        Ok(properties)
    }

    async fn deregister_entity(
        &self,
        entity_type: EntityType,
        _properties: &PropertyMap,
    ) -> Result<(), ProviderError> {
        tracing::info!(?entity_type, "no provider integration configured, deregistering entity as-is");
        Ok(())
    }

    async fn retrieve_all_properties(
        &self,
        entity_type: EntityType,
        properties: &PropertyMap,
    ) -> Result<PropertyMap, ProviderError> {
        tracing::info!(?entity_type, "no provider integration configured, returning stored properties");
        Ok(properties.clone())
    }

    async fn create_review(&self, entity_id: &EntityId, body: &str) -> Result<String, ProviderError> {
        tracing::info!(entity_id = %entity_id, %body, "no provider integration configured, logging review");
        Ok(format!("logged-review-{entity_id}"))
    }

    async fn dismiss_review(&self, entity_id: &EntityId, review_id: &str) -> Result<(), ProviderError> {
        tracing::info!(entity_id = %entity_id, review_id, "no provider integration configured, logging dismissal");
        Ok(())
    }

    async fn create_security_advisory(&self, entity_id: &EntityId, summary: &str) -> Result<String, ProviderError> {
        tracing::info!(entity_id = %entity_id, summary, "no provider integration configured, logging advisory");
        Ok(format!("logged-advisory-{entity_id}"))
    }

    async fn close_security_advisory(&self, entity_id: &EntityId, advisory_id: &str) -> Result<(), ProviderError> {
        tracing::info!(entity_id = %entity_id, advisory_id, "no provider integration configured, logging closure");
        Ok(())
    }
}
