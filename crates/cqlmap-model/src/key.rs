//! Entity keys
//!
//! A key names one entity: its kind (the logical type, which also selects the
//! table) and an identifier unique within that kind. Keys travel through the
//! store in their URL-safe string form `"<kind>-<id>"`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Unique key of an entity (kind + identifier).
///
/// Kinds are restricted to ASCII alphanumerics and `_`, identifiers to ASCII
/// alphanumerics, `_` and `-`. The first `-` of the URL-safe form therefore
/// always separates kind from id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Key {
    kind: String,
    id: String,
}

impl Key {
    /// Create a key with a freshly generated identifier.
    pub fn generate(kind: impl Into<String>) -> ModelResult<Self> {
        Key::new(kind, uuid::Uuid::new_v4().simple().to_string())
    }

    /// Create a key from explicit parts, validating both.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> ModelResult<Self> {
        let kind = kind.into();
        let id = id.into();

        if !is_valid_kind(&kind) {
            return Err(ModelError::InvalidKey {
                key: format!("{kind}-{id}"),
                reason: "kind must be non-empty [A-Za-z0-9_]".to_string(),
            });
        }
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ModelError::InvalidKey {
                key: format!("{kind}-{id}"),
                reason: "id must be non-empty [A-Za-z0-9_-]".to_string(),
            });
        }

        Ok(Key { kind, id })
    }

    /// Parse the URL-safe form produced by [`Key::urlsafe`].
    pub fn from_urlsafe(s: &str) -> ModelResult<Self> {
        let (kind, id) = s.split_once('-').ok_or_else(|| ModelError::InvalidKey {
            key: s.to_string(),
            reason: "missing '-' separator".to_string(),
        })?;
        Key::new(kind, id)
    }

    /// Logical entity type name.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Identifier within the kind.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Canonical URL-safe string form.
    pub fn urlsafe(&self) -> String {
        format!("{}-{}", self.kind, self.id)
    }
}

/// Kinds are non-empty `[A-Za-z0-9_]`, so they never contain the separator.
fn is_valid_kind(kind: &str) -> bool {
    !kind.is_empty() && kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.id)
    }
}

impl FromStr for Key {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Key::from_urlsafe(s)
    }
}

impl TryFrom<String> for Key {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Key::from_urlsafe(&s)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.urlsafe()
    }
}
