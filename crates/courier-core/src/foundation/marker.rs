//! Markers: typed configuration tags that bind decorators and observers.
//!
//! A [`Marker`] names a binding kind and carries JSON parameters. Markers are
//! attached to an entry point, a receiver type, a module prefix or the whole
//! dispatcher; the binding resolver turns them into decorator and observer
//! chains by looking the kind up in the dispatcher's provider registry.

use std::borrow::Cow;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The kind of a marker, used as the binding lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerKind(Cow<'static, str>);

impl MarkerKind {
    /// Marks an entry point as ordered (see [`OrderedDispatch`](crate::OrderedDispatch)).
    pub const ORDERED: MarkerKind = MarkerKind::from_static("ordered");

    /// Creates a kind from a static name.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Creates a kind from any name.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Returns the kind name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for MarkerKind {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

impl From<String> for MarkerKind {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

/// A configuration tag bound to one decorator or observer implementation.
///
/// ```rust,ignore
/// let marker = Marker::new("timed").with("warn_after_ms", 50);
/// assert_eq!(marker.param::<u64>("warn_after_ms"), Some(50));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    kind: MarkerKind,
    #[serde(default)]
    params: Map<String, Value>,
}

impl Marker {
    /// Creates a marker without parameters.
    pub fn new(kind: impl Into<MarkerKind>) -> Self {
        Self {
            kind: kind.into(),
            params: Map::new(),
        }
    }

    /// The marker flagging an entry point as ordered.
    pub fn ordered() -> Self {
        Self::new(MarkerKind::ORDERED)
    }

    /// Adds a parameter. Values that fail to serialize are stored as `null`.
    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.params.insert(key.into(), value);
        self
    }

    /// Returns the marker kind.
    pub fn kind(&self) -> &MarkerKind {
        &self.kind
    }

    /// Returns all parameters.
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Reads a typed parameter. Returns `None` when absent or of another type.
    pub fn param<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.params
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Renders the marker as a tag string, e.g. `@timed(warn_after_ms=50)`.
    pub fn tag(&self) -> String {
        if self.params.is_empty() {
            return format!("@{}", self.kind);
        }
        let params = self
            .params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("@{}({params})", self.kind)
    }
}

impl std::fmt::Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.tag())
    }
}

/// The scope a marker was declared at, from broadest to narrowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerScope {
    /// Applies to every dispatch.
    Global,
    /// Applies to receivers whose module path starts with a prefix.
    Module,
    /// Declared on the receiver type.
    Receiver,
    /// Declared on one entry point.
    Entry,
}
