//! Create, update and delete for objects the API lets callers change.
//!
//! A [`ChangeObject`] wraps a [`MappedObject`] with the state needed to
//! persist it: which fields changed, whether the server knows it yet, and
//! where it lives. The [`Endpoint`] it is bound to says how the server
//! expects updates to look.
//!
//! ```text
//! New ──save──▶ Saving ──▶ Persisted ──set──▶ Dirty ──save──▶ Saving ──▶ Persisted
//!                              │                 │
//!                              └──────delete─────┴──▶ Deleting ──▶ Deleted
//! ```
//!
//! Failed operations put the object back where it was.

use crate::client::Client;
use crate::mapper::{MappedObject, ENTITY_ID_ANNOTATION, LOCATION_ANNOTATION};
use crate::metadata::RequestMetadata;
use crate::registry::Kind;
use crate::{Error, Result};
use http::Method;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// Header carrying the reason for a deletion.
pub const REASON_HEADER: &str = "X-Reason";

/// Where a [`ChangeObject`] is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not yet known to the server.
    New,
    /// Persisted, with local changes.
    Dirty,
    /// A save is in flight.
    Saving,
    /// In sync with the server.
    Persisted,
    /// A delete is in flight.
    Deleting,
    /// Removed from the server. Terminal.
    Deleted,
}

/// What an update sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// The id plus the changed fields.
    #[default]
    Delta,
    /// The whole object.
    Full,
}

/// How a type of object is persisted.
///
/// # Examples
///
/// ```
/// use lineage::{Endpoint, Kind, UpdateMode};
///
/// let persons = Endpoint::new("/platform/tree/persons", Kind::PERSON_RESPONSE)
///     .envelope("persons")
///     .change_messages(true)
///     .require("gender");
///
/// assert_eq!(persons.update_mode(), UpdateMode::Delta);
/// assert_eq!(persons.update_method(), http::Method::POST);
/// ```
#[derive(Debug, Clone)]
pub struct Endpoint {
    collection: String,
    response_kind: Kind,
    update_mode: UpdateMode,
    update_method: Option<Method>,
    envelope: Option<String>,
    change_messages: bool,
    required: Vec<String>,
    id_field: String,
}

impl Endpoint {
    /// An endpoint creating objects by POSTing to `collection`. Refreshed
    /// objects are read back as `response_kind`.
    pub fn new(collection: impl Into<String>, response_kind: Kind) -> Self {
        Self {
            collection: collection.into(),
            response_kind,
            update_mode: UpdateMode::default(),
            update_method: None,
            envelope: None,
            change_messages: false,
            required: Vec::new(),
            id_field: "id".to_string(),
        }
    }

    /// Sets whether updates send changes only or the whole object.
    pub fn with_update_mode(mut self, mode: UpdateMode) -> Self {
        self.update_mode = mode;
        self
    }

    /// Overrides the update method (POST for delta updates, PUT for full
    /// ones otherwise).
    pub fn with_update_method(mut self, method: Method) -> Self {
        self.update_method = Some(method);
        self
    }

    /// Wraps bodies as `{key: [object]}`.
    pub fn envelope(mut self, key: impl Into<String>) -> Self {
        self.envelope = Some(key.into());
        self
    }

    /// Sets whether change messages are sent.
    pub fn change_messages(mut self, supported: bool) -> Self {
        self.change_messages = supported;
        self
    }

    /// Requires `field` to be present before saving.
    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }

    /// Uses `field` as the object's id field (`id` by default).
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Path new objects are POSTed to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Kind used when reading an object back.
    pub fn response_kind(&self) -> &Kind {
        &self.response_kind
    }

    /// Whether updates send changes only or the whole object.
    pub fn update_mode(&self) -> UpdateMode {
        self.update_mode
    }

    /// The method used for updates.
    pub fn update_method(&self) -> Method {
        match (&self.update_method, self.update_mode) {
            (Some(method), _) => method.clone(),
            (None, UpdateMode::Delta) => Method::POST,
            (None, UpdateMode::Full) => Method::PUT,
        }
    }

    fn resource_for(&self, id: &str) -> String {
        format!("{}/{}", self.collection.trim_end_matches('/'), id)
    }

    fn wrap(&self, body: Value) -> Value {
        match &self.envelope {
            Some(key) => {
                let mut wrapped = Map::new();
                wrapped.insert(key.clone(), Value::Array(vec![body]));
                Value::Object(wrapped)
            }
            None => body,
        }
    }

    fn unwrap(&self, payload: &Value) -> Option<Value> {
        match &self.envelope {
            Some(key) => payload.get(key)?.get(0).cloned(),
            None => Some(payload.clone()),
        }
    }
}

/// Options for [`ChangeObject::save`].
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Read the object back from the server after saving.
    pub refresh: bool,
    /// Why the change was made, for endpoints that record it.
    pub change_message: Option<String>,
}

/// Options for [`ChangeObject::delete`].
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Why the object was deleted.
    pub change_message: Option<String>,
}

#[derive(Debug)]
struct Inner {
    object: MappedObject,
    state: LifecycleState,
    dirty: BTreeSet<String>,
    id: Option<String>,
    resource: Option<String>,
}

/// Puts a [`ChangeObject`] back into the state it had before an operation
/// started, unless disarmed. Covers both failures and dropped futures.
struct Revert<'a> {
    inner: &'a Mutex<Inner>,
    previous: LifecycleState,
    taken: BTreeSet<String>,
    armed: bool,
}

impl<'a> Revert<'a> {
    fn new(inner: &'a Mutex<Inner>, previous: LifecycleState, taken: BTreeSet<String>) -> Self {
        Self {
            inner,
            previous,
            taken,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Revert<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.inner.lock();
        inner.state = self.previous;
        inner.dirty.extend(std::mem::take(&mut self.taken));
        tracing::debug!(state = ?self.previous, "Operation did not complete; state restored");
    }
}

/// An object that can be saved to and deleted from the server.
///
/// Saves and deletes on one instance run one at a time; a caller that had
/// to wait sees the outcome of the operation before it.
///
/// # Examples
///
/// ```no_run
/// use lineage::{ChangeObject, Client, Endpoint, Kind, SaveOptions};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), lineage::Error> {
/// let client = Client::builder().access_token("token").build()?;
/// let endpoint = Endpoint::new("/platform/tree/persons", Kind::PERSON_RESPONSE).envelope("persons");
///
/// let person = client.mapper().map_value(json!({"gender": {"type": "http://gedcomx.org/Female"}}), &Kind::PERSON);
/// let person = ChangeObject::new(endpoint, person);
/// person.save(&client, SaveOptions { refresh: true, ..Default::default() }).await?;
/// println!("Created {:?}", person.id());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ChangeObject {
    endpoint: Endpoint,
    inner: Mutex<Inner>,
    op_lock: tokio::sync::Mutex<()>,
}

impl ChangeObject {
    /// Wraps an object the server does not know yet.
    pub fn new(endpoint: Endpoint, object: MappedObject) -> Self {
        Self::with_state(endpoint, object, LifecycleState::New, None)
    }

    /// Wraps an object read from the server.
    pub fn persisted(endpoint: Endpoint, object: MappedObject, id: impl Into<String>) -> Self {
        Self::with_state(endpoint, object, LifecycleState::Persisted, Some(id.into()))
    }

    fn with_state(
        endpoint: Endpoint,
        object: MappedObject,
        state: LifecycleState,
        id: Option<String>,
    ) -> Self {
        let resource = id.as_deref().map(|id| endpoint.resource_for(id));
        Self {
            endpoint,
            inner: Mutex::new(Inner {
                object,
                state,
                dirty: BTreeSet::new(),
                id,
                resource,
            }),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// How this object is persisted.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    /// The server-assigned id, once known.
    pub fn id(&self) -> Option<String> {
        self.inner.lock().id.clone()
    }

    /// Where the object lives on the server, once known.
    pub fn resource(&self) -> Option<String> {
        self.inner.lock().resource.clone()
    }

    /// Fields changed since the last save, in name order.
    pub fn dirty_fields(&self) -> Vec<String> {
        self.inner.lock().dirty.iter().cloned().collect()
    }

    /// A copy of the wrapped object.
    pub fn object(&self) -> MappedObject {
        self.inner.lock().object.clone()
    }

    /// A top-level field of the payload.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.inner.lock().object.field(field).cloned()
    }

    /// Changes a top-level field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDeleted`] once the object is deleted, and
    /// [`Error::Validation`] if the payload is not a JSON object.
    pub fn set(&self, field: impl Into<String>, value: Value) -> Result<()> {
        let field = field.into();
        let mut inner = self.inner.lock();
        if inner.state == LifecycleState::Deleted {
            return Err(Error::ObjectDeleted);
        }

        let payload = inner.object.payload_mut();
        if payload.is_null() {
            *payload = Value::Object(Map::new());
        }
        match payload.as_object_mut() {
            Some(map) => {
                map.insert(field.clone(), value);
            }
            None => {
                return Err(Error::Validation(
                    "Only JSON objects have fields".to_string(),
                ))
            }
        }

        inner.dirty.insert(field);
        if inner.state == LifecycleState::Persisted {
            inner.state = LifecycleState::Dirty;
        }
        Ok(())
    }

    /// Sends the object to the server.
    ///
    /// New objects are created in the endpoint's collection; changed ones are
    /// updated in place. Saving an unchanged persisted object does nothing.
    ///
    /// # Errors
    ///
    /// - [`Error::ObjectDeleted`] if the object was deleted
    /// - [`Error::Validation`] if a required field is missing
    /// - any error from [`Client::execute`], after which the object is back
    ///   in its previous state with its changes kept
    pub async fn save(&self, client: &Client, options: SaveOptions) -> Result<()> {
        let _op = self.op_lock.lock().await;

        let (previous, taken, metadata, body) = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            match previous {
                LifecycleState::Deleted => return Err(Error::ObjectDeleted),
                LifecycleState::Persisted => {
                    tracing::debug!(id = ?inner.id, "Nothing to save");
                    return Ok(());
                }
                _ => {}
            }
            self.validate(inner.object.payload())?;

            let (metadata, body) = match (previous, &inner.resource) {
                (LifecycleState::New, _) => (
                    RequestMetadata::new(Method::POST, self.endpoint.collection.clone()),
                    inner.object.strip(),
                ),
                (_, Some(resource)) => (
                    RequestMetadata::new(self.endpoint.update_method(), resource.clone()),
                    self.update_body(&inner),
                ),
                (_, None) => {
                    return Err(Error::Validation(
                        "Object has no server location".to_string(),
                    ))
                }
            };
            let body = self
                .endpoint
                .wrap(self.attribute(body, options.change_message.as_deref()));

            inner.state = LifecycleState::Saving;
            let taken = std::mem::take(&mut inner.dirty);
            (previous, taken, metadata, body)
        };

        tracing::debug!(
            method = %metadata.method,
            path = %metadata.path,
            previous = ?previous,
            "Saving object"
        );

        let revert = Revert::new(&self.inner, previous, taken);
        let response = match client.execute(metadata, Some(body), &Kind::EMPTY).await {
            Ok(response) => {
                revert.disarm();
                response
            }
            Err(e) => {
                drop(revert);
                tracing::warn!(error = %e, state = ?previous, "Save failed; state restored");
                return Err(e);
            }
        };

        let resource = {
            let mut inner = self.inner.lock();
            if previous == LifecycleState::New {
                let location = response
                    .annotation(LOCATION_ANNOTATION)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let id = response
                    .annotation(ENTITY_ID_ANNOTATION)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| location.as_deref().and_then(last_segment))
                    .or_else(|| {
                        self.endpoint
                            .unwrap(response.payload())
                            .and_then(|body| self.id_of(&body))
                    })
                    .or_else(|| self.id_of(inner.object.payload()));

                match &id {
                    Some(id) => {
                        let id_field = self.endpoint.id_field.clone();
                        if let Some(map) = inner.object.payload_mut().as_object_mut() {
                            map.entry(id_field).or_insert_with(|| Value::from(id.as_str()));
                        }
                    }
                    None => tracing::warn!("Server did not report an id for the new object"),
                }
                inner.resource = location.or_else(|| id.as_deref().map(|id| self.endpoint.resource_for(id)));
                inner.id = id;
            }

            inner.state = if inner.dirty.is_empty() {
                LifecycleState::Persisted
            } else {
                LifecycleState::Dirty
            };
            tracing::info!(id = ?inner.id, state = ?inner.state, "Object saved");
            inner.resource.clone()
        };

        if options.refresh {
            match resource {
                Some(resource) => self.refresh(client, resource).await?,
                None => {
                    return Err(Error::Validation(
                        "Cannot refresh an object without a server location".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Removes the object from the server.
    ///
    /// # Errors
    ///
    /// - [`Error::ObjectDeleted`] if it is already deleted (nothing is sent)
    /// - [`Error::Validation`] if it was never saved
    /// - any error from [`Client::execute`], after which the object is back
    ///   in its previous state
    pub async fn delete(&self, client: &Client, options: DeleteOptions) -> Result<()> {
        let _op = self.op_lock.lock().await;

        let (previous, metadata) = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            match previous {
                LifecycleState::Deleted => return Err(Error::ObjectDeleted),
                LifecycleState::New => {
                    return Err(Error::Validation(
                        "Cannot delete an object that was never saved".to_string(),
                    ))
                }
                _ => {}
            }
            let resource = inner.resource.clone().ok_or_else(|| {
                Error::Validation("Object has no server location".to_string())
            })?;
            let mut metadata = RequestMetadata::new(Method::DELETE, resource);
            if let Some(message) = &options.change_message {
                metadata = metadata.with_header(REASON_HEADER, message)?;
            }
            inner.state = LifecycleState::Deleting;
            (previous, metadata)
        };

        tracing::debug!(path = %metadata.path, "Deleting object");

        let revert = Revert::new(&self.inner, previous, BTreeSet::new());
        match client.execute(metadata, None, &Kind::EMPTY).await {
            Ok(_) => {
                revert.disarm();
                let mut inner = self.inner.lock();
                inner.state = LifecycleState::Deleted;
                inner.dirty.clear();
                tracing::info!(id = ?inner.id, "Object deleted");
                Ok(())
            }
            Err(e) => {
                drop(revert);
                tracing::warn!(error = %e, state = ?previous, "Delete failed; state restored");
                Err(e)
            }
        }
    }

    async fn refresh(&self, client: &Client, resource: String) -> Result<()> {
        let response = client.get(resource, &self.endpoint.response_kind).await?;
        let Some(entity) = self.endpoint.unwrap(response.payload()) else {
            tracing::warn!("Refresh response did not contain the object");
            return Ok(());
        };

        let mut inner = self.inner.lock();
        let mut refreshed = client.mapper().map_value(entity, inner.object.kind());
        for (key, value) in inner.object.annotations() {
            refreshed.annotate(key.clone(), value.clone());
        }
        inner.object = refreshed;
        tracing::debug!(id = ?inner.id, "Object refreshed");
        Ok(())
    }

    fn validate(&self, payload: &Value) -> Result<()> {
        for field in &self.endpoint.required {
            if payload.get(field).map_or(true, Value::is_null) {
                return Err(Error::Validation(format!(
                    "Missing required field `{}`",
                    field
                )));
            }
        }
        Ok(())
    }

    fn update_body(&self, inner: &Inner) -> Value {
        match self.endpoint.update_mode {
            UpdateMode::Full => inner.object.strip(),
            UpdateMode::Delta => {
                let mut body = Map::new();
                if let Some(id) = &inner.id {
                    body.insert(self.endpoint.id_field.clone(), Value::from(id.as_str()));
                }
                for field in &inner.dirty {
                    if let Some(value) = inner.object.field(field) {
                        body.insert(field.clone(), value.clone());
                    }
                }
                Value::Object(body)
            }
        }
    }

    fn attribute(&self, mut body: Value, message: Option<&str>) -> Value {
        let Some(message) = message else {
            return body;
        };
        if !self.endpoint.change_messages {
            tracing::debug!("Endpoint does not record change messages; message dropped");
            return body;
        }
        if let Some(map) = body.as_object_mut() {
            map.insert(
                "attribution".to_string(),
                json!({ "changeMessage": message }),
            );
        }
        body
    }

    fn id_of(&self, value: &Value) -> Option<String> {
        value
            .get(&self.endpoint.id_field)?
            .as_str()
            .map(str::to_string)
    }
}

/// The last path segment of a URL or path, ignoring query and fragment.
fn last_segment(location: &str) -> Option<String> {
    let path = location.split(['?', '#']).next()?;
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}
