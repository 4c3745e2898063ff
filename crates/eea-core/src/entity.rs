//! Entities, their property maps, and the Entity Envelope (C1).

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::error::CoreError;
use crate::identifiers::CorrelationId;
use crate::identifiers::EntityId;
use crate::identifiers::ProjectId;
use crate::identifiers::ProviderId;
use crate::identifiers::SequenceNumber;

/// The closed set of entity kinds the core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A source code repository.
    Repository,
    /// A built artifact (container image, package, binary).
    Artifact,
    /// A pull (merge) request against a repository.
    PullRequest,
}

impl EntityType {
    /// Returns the wire tag used in serialized envelopes.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Artifact => "artifact",
            Self::PullRequest => "pull_request",
        }
    }

    /// Parses the wire tag back into an `EntityType`, returning `None` for
    /// any unrecognized value.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "repository" => Some(Self::Repository),
            "artifact" => Some(Self::Artifact),
            "pull_request" => Some(Self::PullRequest),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A scalar or composite value stored in an entity's properties map.
///
/// Serializes as plain JSON at rest; `entity_properties` in the abstract
/// persisted layout collapses to one JSON document per entity keyed by
/// entity id, since the per-key-row layout and a single-document layout are
/// observationally equivalent for every operation the core performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// A boolean scalar.
    Bool(bool),
    /// A signed 64-bit integer scalar.
    Int(i64),
    /// A UTF-8 string scalar.
    Str(String),
    /// An ordered list of values.
    List(Vec<PropertyValue>),
    /// A nested, ordered map of values.
    Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Converts this value into its `serde_json::Value` representation, the
    /// form handed to the predicate sandbox's implicit input document.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(value) => serde_json::Value::Bool(*value),
            Self::Int(value) => serde_json::Value::Number((*value).into()),
            Self::Str(value) => serde_json::Value::String(value.clone()),
            Self::List(values) => {
                serde_json::Value::Array(values.iter().map(Self::to_json).collect())
            }
            Self::Map(values) => serde_json::Value::Object(
                values.iter().map(|(key, value)| (key.clone(), value.to_json())).collect(),
            ),
        }
    }
}

/// The full property map carried by an entity: string keys to typed values.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// A software-supply-chain entity: a repository, artifact, or pull request,
/// identified by an opaque id and described by its property map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// The entity's globally unique identifier.
    pub id: EntityId,
    /// The entity's kind.
    pub entity_type: EntityType,
    /// The administrative project that owns this entity.
    pub project_id: ProjectId,
    /// The upstream provider this entity was registered from.
    pub provider_id: ProviderId,
    /// The full, authoritative property map.
    pub properties: PropertyMap,
}

impl Entity {
    /// Returns the named property, if present.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

/// A serialized message carrying an entity's identifying properties plus
/// bus routing metadata. The only payload type that travels between C2 and
/// C4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEnvelope {
    /// The entity's kind.
    pub entity_type: EntityType,
    /// The entity's globally unique identifier.
    pub entity_id: EntityId,
    /// The entity's identifying properties (name, upstream-id, owner, ...).
    pub identifying_properties: PropertyMap,
    /// The administrative project that owns this entity.
    pub project_id: ProjectId,
    /// The upstream provider this entity was registered from.
    pub provider_id: ProviderId,
    /// Set once an Evaluation Lock has been acquired for this envelope.
    pub correlation_id: Option<CorrelationId>,
    /// The originating upstream event's monotonic sequence number.
    pub sequence_number: SequenceNumber,
}

impl EntityEnvelope {
    /// Builds a serialized envelope message. Total: every field is
    /// supplied by the caller, so construction cannot fail.
    #[must_use]
    pub fn build_message(
        entity_type: EntityType,
        entity_id: EntityId,
        identifying_properties: PropertyMap,
        project_id: ProjectId,
        provider_id: ProviderId,
        sequence_number: SequenceNumber,
    ) -> Self {
        Self {
            entity_type,
            entity_id,
            identifying_properties,
            project_id,
            provider_id,
            correlation_id: None,
            sequence_number,
        }
    }

    /// Returns a copy of this envelope with the execution-correlation
    /// identifier attached, as performed by the aggregator on lock grant.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Serializes the envelope to its bus wire format.
    ///
    /// # Errors
    /// Returns [`CoreError::MalformedEnvelope`] if serialization fails,
    /// which cannot happen for a well-formed in-memory envelope but is
    /// surfaced rather than panicking.
    pub fn to_wire(&self) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec(self)
            .map_err(|source| CoreError::MalformedEnvelope { reason: source.to_string() })
    }

    /// Parses a wire-format envelope.
    ///
    /// # Errors
    /// Returns [`CoreError::MalformedEnvelope`] if any required field is
    /// absent or the entity-type tag is unrecognized.
    pub fn parse(bytes: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(bytes)
            .map_err(|source| CoreError::MalformedEnvelope { reason: source.to_string() })
    }
}
