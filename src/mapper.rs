//! Turning raw response bodies into navigable objects.
//!
//! A [`MappedObject`] keeps two containers apart: the payload exactly as the
//! server sent it, and annotations added on the client side. Accessors read
//! the payload and never change it, so [`MappedObject::strip`] gives back
//! exactly what was parsed, ready to be sent to the server again.

use crate::registry::{Accessor, ConvenienceRegistry, Kind};
use crate::transport::{RawResponse, RequestDescriptor};
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Annotation holding the response status code.
pub const STATUS_ANNOTATION: &str = "status";
/// Annotation holding the `Location` response header.
pub const LOCATION_ANNOTATION: &str = "location";
/// Annotation holding the `X-Entity-Id` response header.
pub const ENTITY_ID_ANNOTATION: &str = "entity_id";

/// A payload plus the accessors that applied to its kind when it was mapped.
#[derive(Clone)]
pub struct MappedObject {
    kind: Kind,
    payload: Value,
    accessors: Vec<Accessor>,
    annotations: Map<String, Value>,
}

impl MappedObject {
    /// The kind the object was mapped as.
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// The payload as parsed.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// A top-level payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// Runs the accessor called `name`.
    ///
    /// Returns `None` if no such accessor was attached or it found nothing.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.accessors
            .iter()
            .rev()
            .find(|accessor| accessor.name() == name)?
            .apply(&self.payload)
    }

    /// Whether an accessor called `name` is attached.
    pub fn has_accessor(&self, name: &str) -> bool {
        self.accessors.iter().any(|accessor| accessor.name() == name)
    }

    /// Names of the attached accessors, without duplicates.
    pub fn accessor_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for accessor in self.accessors.iter().rev() {
            if !names.contains(&accessor.name()) {
                names.push(accessor.name());
            }
        }
        names
    }

    /// A client-side annotation.
    pub fn annotation(&self, key: &str) -> Option<&Value> {
        self.annotations.get(key)
    }

    /// All client-side annotations.
    pub fn annotations(&self) -> &Map<String, Value> {
        &self.annotations
    }

    /// Adds or replaces a client-side annotation. Annotations never reach
    /// the payload.
    pub fn annotate(&mut self, key: impl Into<String>, value: Value) {
        self.annotations.insert(key.into(), value);
    }

    /// The payload with every client-side addition removed.
    pub fn strip(&self) -> Value {
        self.payload.clone()
    }

    /// Consumes the object, returning the stripped payload.
    pub fn into_payload(self) -> Value {
        self.payload
    }

    pub(crate) fn payload_mut(&mut self) -> &mut Value {
        &mut self.payload
    }
}

impl fmt::Debug for MappedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedObject")
            .field("kind", &self.kind)
            .field("payload", &self.payload)
            .field("accessors", &self.accessor_names())
            .field("annotations", &self.annotations)
            .finish()
    }
}

/// Builds [`MappedObject`]s using a registry.
#[derive(Debug, Clone)]
pub struct ResponseMapper {
    registry: Arc<ConvenienceRegistry>,
}

impl ResponseMapper {
    /// Creates a mapper reading accessors from `registry`.
    pub fn new(registry: Arc<ConvenienceRegistry>) -> Self {
        Self { registry }
    }

    /// The registry consulted at mapping time.
    pub fn registry(&self) -> &Arc<ConvenienceRegistry> {
        &self.registry
    }

    /// Parses a successful response and maps it as `kind`.
    ///
    /// An empty body maps to `null`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] with the raw body if the body is
    /// not valid JSON.
    pub fn map(&self, raw: &RawResponse, kind: &Kind, request: &RequestDescriptor) -> Result<MappedObject> {
        let payload = if raw.body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&raw.body).map_err(|e| {
                tracing::error!(
                    error = %e,
                    raw_response = %raw.body,
                    kind = %kind,
                    "Failed to parse response body"
                );
                Error::MalformedResponse {
                    raw_response: raw.body.clone(),
                    serde_error: e.to_string(),
                    status: raw.status,
                    headers: raw.headers.clone(),
                    request: Box::new(request.clone()),
                }
            })?
        };

        let mut object = self.map_value(payload, kind);
        object.annotate(STATUS_ANNOTATION, Value::from(raw.status.as_u16()));
        if let Some(location) = raw.header("location") {
            object.annotate(LOCATION_ANNOTATION, Value::from(location));
        }
        if let Some(entity_id) = raw.header("x-entity-id") {
            object.annotate(ENTITY_ID_ANNOTATION, Value::from(entity_id));
        }
        Ok(object)
    }

    /// Maps an already parsed value as `kind`, e.g. an entity pulled out of a
    /// larger response by an accessor.
    pub fn map_value(&self, payload: Value, kind: &Kind) -> MappedObject {
        MappedObject {
            kind: kind.clone(),
            payload,
            accessors: self.registry.snapshot(kind),
            annotations: Map::new(),
        }
    }
}
