use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A view addressed by its group and name, e.g. `progress/by-deck`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewName {
    pub group: &'static str,
    pub name: &'static str,
}

impl ViewName {
    #[must_use]
    pub const fn new(group: &'static str, name: &'static str) -> Self {
        Self { group, name }
    }
}

impl fmt::Display for ViewName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.name)
    }
}

/// Lookup key for a view.
///
/// Composite keys are ordered JSON arrays, so components are never quoted or
/// escaped by hand.
///
/// ```
/// # use storage::keys::ViewKey;
/// let key = ViewKey::tuple(["U1", "D1"]);
/// assert_eq!(key.canonical(), r#"["U1","D1"]"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewKey(Value);

impl ViewKey {
    #[must_use]
    pub fn scalar(component: impl Into<Value>) -> Self {
        Self(component.into())
    }

    #[must_use]
    pub fn tuple<I>(components: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Self(Value::Array(components.into_iter().map(Into::into).collect()))
    }

    /// Compact JSON encoding used wherever keys are stored as text.
    #[must_use]
    pub fn canonical(&self) -> String {
        self.0.to_string()
    }

    #[must_use]
    pub fn matches(&self, emitted: &Value) -> bool {
        &self.0 == emitted
    }
}

/// A single row returned by a view query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRow {
    pub id: String,
    pub key: Value,
    pub value: Value,
}
