//! # Audit Event
//!
//! One immutable record describing an audited business mutation.
//!
//! ## Wire Shape
//!
//! ```text
//! {
//!   "spec_version": "1.0",
//!   "id": "<uuid>",
//!   "source": "backend.api",
//!   "type": "audit.event",
//!   "subject": "event:account:<id>",
//!   "timestamp": "<RFC3339, UTC>",
//!   "actor": { "id": "<uuid>" },
//!   "action": "PATCH",
//!   "resource": { "id": ..., "type": ..., "attributes": { ... } },
//!   "metadata": { "request_id": ..., "response_status": ..., "protocol": ... }
//! }
//! ```
//!
//! `actor`, `resource` and `metadata` are optional and encode as `null`
//! when absent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::{DEFAULT_EVENT_TYPE, DEFAULT_SOURCE, SPEC_VERSION};

/// Errors from decoding an event off the wire.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not a valid JSON audit event.
    #[error("malformed audit event: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// An audit record.
///
/// Fields are private: once built, only the id may be filled in (see
/// [`AuditEvent::ensure_id`]). Builder methods consume `self` so they can
/// only run while the value is still owned by its constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    spec_version: String,
    #[serde(default)]
    id: String,
    source: String,
    #[serde(rename = "type")]
    event_type: String,
    subject: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    actor: Option<BTreeMap<String, String>>,
    action: String,
    #[serde(default)]
    resource: Option<Map<String, Value>>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
}

impl AuditEvent {
    /// Create an event with a fresh id, the default source/type and the
    /// current UTC time.
    pub fn new(subject: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            spec_version: SPEC_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            source: DEFAULT_SOURCE.to_string(),
            event_type: DEFAULT_EVENT_TYPE.to_string(),
            subject: subject.into(),
            timestamp: Utc::now(),
            actor: None,
            action: action.into(),
            resource: None,
            metadata: None,
        }
    }

    /// Build the event emitted for a mutation of `resource_type`/`resource_id`.
    ///
    /// `compact_body` is the compacted JSON request body; it is stored as a
    /// string under `resource.attributes.attributes`.
    pub fn resource_change(
        resource_type: &str,
        resource_id: &str,
        action: impl Into<String>,
        compact_body: impl Into<String>,
    ) -> Self {
        let mut subject = format!("event:{resource_type}");
        if !resource_type.is_empty() {
            subject.push(':');
            subject.push_str(resource_id);
        }

        let mut attributes = Map::new();
        attributes.insert("id".into(), Value::from(resource_id));
        attributes.insert("type".into(), Value::from(resource_type));
        attributes.insert("attributes".into(), Value::from(compact_body.into()));

        let mut resource = Map::new();
        resource.insert("id".into(), Value::from(resource_id));
        resource.insert("type".into(), Value::from(resource_type));
        resource.insert("attributes".into(), Value::Object(attributes));

        Self::new(subject, action).with_resource(resource)
    }

    /// Decode an event from its JSON wire bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode the event into its JSON wire bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_actor(mut self, actor: BTreeMap<String, String>) -> Self {
        self.actor = Some(actor);
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: Map<String, Value>) -> Self {
        self.resource = Some(resource);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Assign a fresh UUID if the id is empty. Returns `true` if one was assigned.
    pub fn ensure_id(&mut self) -> bool {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
            return true;
        }
        false
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spec_version(&self) -> &str {
        &self.spec_version
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn actor(&self) -> Option<&BTreeMap<String, String>> {
        self.actor.as_ref()
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn resource(&self) -> Option<&Map<String, Value>> {
        self.resource.as_ref()
    }

    pub fn metadata(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata.as_ref()
    }
}
