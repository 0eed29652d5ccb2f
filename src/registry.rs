//! Convenience accessors, keyed by response kind.
//!
//! A [`ConvenienceRegistry`] maps each [`Kind`] to an ordered list of named,
//! read-only functions over the JSON payload. The response mapper copies the
//! current list into every object it builds, so an accessor registered later
//! shows up on objects mapped afterwards and never on ones that already exist.
//!
//! The registry only grows. Readers take a snapshot under a read lock and
//! always see a prefix of what has been appended.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Tag identifying the shape of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Kind(Cow<'static, str>);

impl Kind {
    /// A GEDCOM X document (persons, relationships and sources together).
    pub const GEDCOMX: Kind = Kind::from_static("gedcomx");
    /// A response holding a single person.
    pub const PERSON_RESPONSE: Kind = Kind::from_static("person-response");
    /// A person.
    pub const PERSON: Kind = Kind::from_static("person");
    /// A response holding relationships (couples or child-and-parents).
    pub const RELATIONSHIP_RESPONSE: Kind = Kind::from_static("relationship-response");
    /// A response holding source descriptions.
    pub const SOURCE_RESPONSE: Kind = Kind::from_static("source-response");
    /// A response holding the current user.
    pub const USER_RESPONSE: Kind = Kind::from_static("user-response");
    /// A response with no meaningful body.
    pub const EMPTY: Kind = Kind::from_static("empty");

    /// Creates a kind from a static name.
    pub const fn from_static(name: &'static str) -> Self {
        Kind(Cow::Borrowed(name))
    }

    /// Creates a kind from any name.
    pub fn new(name: impl Into<String>) -> Self {
        Kind(Cow::Owned(name.into()))
    }

    /// The kind's name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A read-only accessor function.
pub type AccessorFn = dyn Fn(&Value) -> Option<Value> + Send + Sync;

/// A named accessor over a payload.
#[derive(Clone)]
pub struct Accessor {
    name: Arc<str>,
    func: Arc<AccessorFn>,
}

impl Accessor {
    /// Wraps `func` under `name`.
    pub fn new<F>(name: impl Into<Arc<str>>, func: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// The accessor's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the accessor over `payload`.
    pub fn apply(&self, payload: &Value) -> Option<Value> {
        (self.func)(payload)
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Accessor").field(&self.name).finish()
    }
}

static GLOBAL: Lazy<Arc<ConvenienceRegistry>> = Lazy::new(|| {
    let registry = ConvenienceRegistry::new();
    crate::builtins::install(&registry);
    Arc::new(registry)
});

/// Append-only store of accessors per kind.
///
/// # Examples
///
/// ```
/// use lineage::{ConvenienceRegistry, Kind};
/// use serde_json::json;
///
/// let registry = ConvenienceRegistry::new();
/// let kind = Kind::new("memory");
/// registry.register(&kind, "title", |payload| payload.get("title").cloned());
///
/// let accessors = registry.snapshot(&kind);
/// assert_eq!(accessors[0].apply(&json!({"title": "Grandma"})), Some(json!("Grandma")));
/// ```
#[derive(Debug, Default)]
pub struct ConvenienceRegistry {
    accessors: RwLock<HashMap<Kind, Vec<Accessor>>>,
    related: RwLock<HashMap<Kind, Vec<Kind>>>,
}

impl ConvenienceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in FamilySearch accessors.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::builtins::install(&registry);
        registry
    }

    /// The process-wide registry, populated with the built-in accessors on
    /// first use. Clients use it unless given their own.
    pub fn global() -> Arc<ConvenienceRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Appends an accessor for `kind`.
    ///
    /// Registering a name twice is allowed; the later one wins on lookup.
    pub fn register<F>(&self, kind: &Kind, name: impl Into<Arc<str>>, func: F)
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.register_accessor(kind, Accessor::new(name, func));
    }

    /// Appends an already built accessor for `kind`.
    pub fn register_accessor(&self, kind: &Kind, accessor: Accessor) {
        tracing::debug!(kind = %kind, accessor = accessor.name(), "Registering accessor");
        self.accessors
            .write()
            .entry(kind.clone())
            .or_default()
            .push(accessor);
    }

    /// Declares that payloads of `kind` also embed `related` entities, so
    /// `related`'s accessors apply to `kind` as well.
    pub fn relate(&self, kind: &Kind, related: &Kind) {
        if kind == related {
            return;
        }
        let mut relations = self.related.write();
        let entry = relations.entry(kind.clone()).or_default();
        if !entry.contains(related) {
            entry.push(related.clone());
        }
    }

    /// The kinds declared as related to `kind`, in declaration order.
    pub fn related_kinds(&self, kind: &Kind) -> Vec<Kind> {
        self.related.read().get(kind).cloned().unwrap_or_default()
    }

    /// Copies the accessors applying to `kind`.
    ///
    /// The result is ordered so that a reverse search by name finds `kind`'s
    /// own latest registration first, then the related kinds in declaration
    /// order.
    pub fn snapshot(&self, kind: &Kind) -> Vec<Accessor> {
        let related = self.related_kinds(kind);
        let accessors = self.accessors.read();

        let mut snapshot = Vec::new();
        for other in related.iter().rev() {
            if let Some(list) = accessors.get(other) {
                snapshot.extend(list.iter().cloned());
            }
        }
        if let Some(list) = accessors.get(kind) {
            snapshot.extend(list.iter().cloned());
        }
        snapshot
    }

    /// Names of the accessors applying to `kind`, without duplicates.
    pub fn accessor_names(&self, kind: &Kind) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for accessor in self.snapshot(kind).iter().rev() {
            if !names.iter().any(|n| n == accessor.name()) {
                names.push(accessor.name().to_string());
            }
        }
        names
    }
}
