//! Action-kind handlers (C6): the provider calls each action kind issues
//! once [`crate::dispatcher::ActionDispatcher`] has decided `on`/`off`
//! applies.
//!
//! Grounded on `decision-gate-broker::sink`'s one-trait-per-delivery-mode
//! shape (`LogSink`, `ChannelSink` both implement a narrow `Sink::deliver`
//! against a wrapped collaborator): each handler here wraps a provider
//! collaborator behind the one or two operations its action kind needs.

use std::sync::Arc;

use async_trait::async_trait;
use eea_core::EntityId;
use eea_core::RuleType;
use eea_core::interfaces::ProviderClient;
use eea_core::interfaces::ProviderError;
use serde::Deserialize;
use serde::Serialize;

use crate::context::AggregatingFlusher;

/// Opens and closes provider-side security advisories for the `advisory`
/// action kind.
pub struct AdvisoryHandler {
    /// The provider collaborator advisories are opened and closed against.
    provider: Arc<dyn ProviderClient>,
}

impl AdvisoryHandler {
    /// Wraps `provider` as an advisory handler.
    #[must_use]
    pub fn new(provider: Arc<dyn ProviderClient>) -> Self {
        Self { provider }
    }

    /// Opens an advisory, returning its opaque provider-assigned
    /// identifier.
    ///
    /// # Errors
    /// Returns a human-readable failure description.
    pub async fn open(&self, entity_id: &EntityId, summary: &str) -> Result<String, String> {
        self.provider.create_security_advisory(entity_id, summary).await.map_err(|error| error.to_string())
    }

    /// Closes a previously opened advisory. A [`ProviderError::NotFound`]
    /// result is treated as success, since the advisory is already closed
    /// externally (spec.md §4.6).
    ///
    /// # Errors
    /// Returns a human-readable failure description for any other
    /// provider failure.
    pub async fn close(&self, entity_id: &EntityId, advisory_id: &str) -> Result<(), String> {
        match self.provider.close_security_advisory(entity_id, advisory_id).await {
            Ok(()) | Err(ProviderError::NotFound) => Ok(()),
            Err(other) => Err(other.to_string()),
        }
    }
}

/// Applies a provider-defined remediation mutation (e.g. opening a fix
/// PR) for the `remediation` action kind.
///
/// Idempotency is this implementation's responsibility; the dispatcher's
/// role is only to record the returned metadata and avoid re-issuing
/// while a prior attempt's metadata is still present (spec.md §4.6). No
/// concrete remediation integration is specified by the core; this trait
/// is the seam an integration plugs into, mirroring how
/// [`eea_core::interfaces::ProviderClient`] is the seam provider clients
/// plug into.
#[async_trait]
pub trait Remediator: Send + Sync {
    /// Applies the remediation `rule_type` calls for against `entity_id`.
    ///
    /// # Errors
    /// Returns a human-readable failure description.
    async fn apply(&self, entity_id: &EntityId, rule_type: &RuleType) -> Result<serde_json::Value, String>;
}

/// A [`Remediator`] that only logs intent, for deployments that dispatch
/// alerts but have no remediation integration wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingRemediator;

#[async_trait]
impl Remediator for LoggingRemediator {
    async fn apply(&self, entity_id: &EntityId, rule_type: &RuleType) -> Result<serde_json::Value, String> {
        tracing::info!(
            entity_id = %entity_id,
            rule_type_id = %rule_type.id,
            "no remediation integration configured, logging intent only"
        );
        Ok(serde_json::json!({"status": "logged"}))
    }
}

/// One rule's contribution to an aggregated PR review, registered under
/// [`crate::context::PULL_REQUEST_COMMENT_KEY`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentFragment {
    /// The rule type's display name, used as the fragment's heading and
    /// as the aggregate review's sort key.
    pub title: String,
    /// The fragment's body, typically the rule's evaluation detail.
    pub body: String,
}

/// Coalesces every [`CommentFragment`] registered for one evaluation into
/// a single PR review, ordered lexicographically by title (spec.md §9:
/// severity-based ordering is a noted future refinement, not implemented
/// here).
pub struct PrCommentFlusher {
    /// The provider collaborator the aggregate review is posted through.
    provider: Arc<dyn ProviderClient>,
}

impl PrCommentFlusher {
    /// Wraps `provider` as a PR-comment flusher.
    #[must_use]
    pub fn new(provider: Arc<dyn ProviderClient>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl AggregatingFlusher for PrCommentFlusher {
    async fn flush(&self, entity_id: &EntityId, items: Vec<serde_json::Value>) -> Result<(), String> {
        let mut fragments: Vec<CommentFragment> =
            items.into_iter().filter_map(|item| serde_json::from_value(item).ok()).collect();
        fragments.sort_by(|left, right| left.title.cmp(&right.title));

        if fragments.is_empty() {
            return Ok(());
        }

        let body = fragments
            .iter()
            .map(|fragment| format!("### {}\n\n{}", fragment.title, fragment.body))
            .collect::<Vec<_>>()
            .join("\n\n");

        self.provider.create_review(entity_id, &body).await.map(|_review_id| ()).map_err(|error| error.to_string())
    }
}

#[cfg(test)]
#[allow(
    clippy::missing_docs_in_private_items,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only helpers keep documentation concise and use expect for setup assertions."
)]
mod tests {
    use std::sync::Mutex;

    use eea_core::EntityType;
    use eea_core::entity::PropertyMap;

    use super::*;

    #[derive(Default)]
    struct RecordingProvider {
        reviews: Mutex<Vec<String>>,
        advisories: Mutex<Vec<String>>,
        closed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProviderClient for RecordingProvider {
        async fn register_entity(
            &self,
            _entity_type: EntityType,
            properties: PropertyMap,
        ) -> Result<PropertyMap, ProviderError> {
            Ok(properties)
        }

        async fn deregister_entity(
            &self,
            _entity_type: EntityType,
            _properties: &PropertyMap,
        ) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn retrieve_all_properties(
            &self,
            _entity_type: EntityType,
            properties: &PropertyMap,
        ) -> Result<PropertyMap, ProviderError> {
            Ok(properties.clone())
        }

        async fn create_review(&self, _entity_id: &EntityId, body: &str) -> Result<String, ProviderError> {
            self.reviews.lock().expect("lock").push(body.to_owned());
            Ok("review-1".to_owned())
        }

        async fn dismiss_review(&self, _entity_id: &EntityId, _review_id: &str) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn create_security_advisory(
            &self,
            _entity_id: &EntityId,
            summary: &str,
        ) -> Result<String, ProviderError> {
            self.advisories.lock().expect("lock").push(summary.to_owned());
            Ok("advisory-1".to_owned())
        }

        async fn close_security_advisory(
            &self,
            _entity_id: &EntityId,
            advisory_id: &str,
        ) -> Result<(), ProviderError> {
            self.closed.lock().expect("lock").push(advisory_id.to_owned());
            Ok(())
        }
    }

    #[tokio::test]
    async fn advisory_handler_close_treats_not_found_as_success() {
        struct NotFoundProvider;

        #[async_trait]
        impl ProviderClient for NotFoundProvider {
            async fn register_entity(
                &self,
                _entity_type: EntityType,
                properties: PropertyMap,
            ) -> Result<PropertyMap, ProviderError> {
                Ok(properties)
            }
            async fn deregister_entity(
                &self,
                _entity_type: EntityType,
                _properties: &PropertyMap,
            ) -> Result<(), ProviderError> {
                Ok(())
            }
            async fn retrieve_all_properties(
                &self,
                _entity_type: EntityType,
                properties: &PropertyMap,
            ) -> Result<PropertyMap, ProviderError> {
                Ok(properties.clone())
            }
            async fn create_review(&self, _entity_id: &EntityId, _body: &str) -> Result<String, ProviderError> {
                Err(ProviderError::Rejected("unused".to_owned()))
            }
            async fn dismiss_review(&self, _entity_id: &EntityId, _review_id: &str) -> Result<(), ProviderError> {
                Ok(())
            }
            async fn create_security_advisory(
                &self,
                _entity_id: &EntityId,
                _summary: &str,
            ) -> Result<String, ProviderError> {
                Err(ProviderError::Rejected("unused".to_owned()))
            }
            async fn close_security_advisory(
                &self,
                _entity_id: &EntityId,
                _advisory_id: &str,
            ) -> Result<(), ProviderError> {
                Err(ProviderError::NotFound)
            }
        }

        let handler = AdvisoryHandler::new(Arc::new(NotFoundProvider));
        let entity_id = EntityId::new("e1").expect("non-empty");
        handler.close(&entity_id, "advisory-1").await.expect("not_found is treated as success");
    }

    #[tokio::test]
    async fn pr_comment_flusher_orders_fragments_lexicographically_by_title() {
        let provider = Arc::new(RecordingProvider::default());
        let flusher = PrCommentFlusher::new(Arc::clone(&provider) as Arc<dyn ProviderClient>);
        let entity_id = EntityId::new("e1").expect("non-empty");

        let items = vec![
            serde_json::to_value(CommentFragment { title: "zebra".to_owned(), body: "z".to_owned() })
                .expect("serializes"),
            serde_json::to_value(CommentFragment { title: "apple".to_owned(), body: "a".to_owned() })
                .expect("serializes"),
        ];

        flusher.flush(&entity_id, items).await.expect("flushes");

        let reviews = provider.reviews.lock().expect("lock");
        assert_eq!(reviews.len(), 1);
        let apple_pos = reviews[0].find("apple").expect("apple present");
        let zebra_pos = reviews[0].find("zebra").expect("zebra present");
        assert!(apple_pos < zebra_pos);
    }

    #[tokio::test]
    async fn pr_comment_flusher_is_a_no_op_for_an_empty_batch() {
        let provider = Arc::new(RecordingProvider::default());
        let flusher = PrCommentFlusher::new(Arc::clone(&provider) as Arc<dyn ProviderClient>);
        let entity_id = EntityId::new("e1").expect("non-empty");

        flusher.flush(&entity_id, Vec::new()).await.expect("flushes");

        assert!(provider.reviews.lock().expect("lock").is_empty());
    }
}
