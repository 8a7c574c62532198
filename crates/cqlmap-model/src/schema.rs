//! Declared field schemas
//!
//! Every entity type registers an explicit, ordered table of field
//! descriptors. The store walks this table (never runtime reflection) to
//! type decoded rows and to find reference fields for the edge index.

use chrono::SubsecRound;

use crate::value::Value;

/// What a declared field holds
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    DateTime,
    /// Key of another entity, optionally restricted to one kind
    Reference { kind: Option<String> },
    /// Nested structure with its own declared fields
    Composite(Schema),
}

/// One declared field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Field holds a list of `kind` values
    pub repeated: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        FieldDescriptor {
            name: name.into(),
            kind,
            repeated: false,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    /// Reference to an entity of the given kind
    pub fn reference(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Reference {
                kind: Some(kind.into()),
            },
        )
    }

    /// Reference to an entity of any kind
    pub fn any_reference(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Reference { kind: None })
    }

    pub fn composite(name: impl Into<String>, schema: Schema) -> Self {
        Self::new(name, FieldKind::Composite(schema))
    }

    /// Mark the field as holding a list
    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, FieldKind::Reference { .. })
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.kind, FieldKind::Composite(_))
    }

    /// Whether `value` may be stored in this field.
    ///
    /// Null is always accepted. Repeated fields take a list whose every
    /// element matches the element kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::List(items) if self.repeated => {
                items.iter().all(|item| self.kind.accepts(item))
            }
            _ if self.repeated => false,
            other => self.kind.accepts(other),
        }
    }

    /// Canonical stored form of an accepted value.
    pub fn normalize(&self, value: Value) -> Value {
        match value {
            Value::List(items) if self.repeated => Value::List(
                items.into_iter().map(|item| self.kind.normalize(item)).collect(),
            ),
            other => self.kind.normalize(other),
        }
    }
}

impl FieldKind {
    /// Whether a single (non-list) value matches this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldKind::Text, Value::Text(_)) => true,
            (FieldKind::Integer, Value::Int(_)) => true,
            (FieldKind::Float, Value::Float(_) | Value::Int(_)) => true,
            (FieldKind::Boolean, Value::Bool(_)) => true,
            (FieldKind::DateTime, Value::Timestamp(_)) => true,
            (FieldKind::Reference { kind }, Value::Key(key)) => {
                kind.as_deref().map_or(true, |k| k == key.kind())
            }
            (FieldKind::Composite(schema), Value::Map(fields)) => {
                fields.iter().all(|(name, v)| match schema.get(name) {
                    Some(descriptor) => descriptor.accepts(v),
                    None => false,
                })
            }
            _ => false,
        }
    }

    /// Widen integers in float fields and cut timestamps to microseconds,
    /// recursing into composites.
    pub fn normalize(&self, value: Value) -> Value {
        match (self, value) {
            (FieldKind::Float, Value::Int(i)) => Value::Float(i as f64),
            (_, Value::Timestamp(ts)) => Value::Timestamp(ts.trunc_subsecs(6)),
            (FieldKind::Composite(schema), Value::Map(fields)) => Value::Map(
                fields
                    .into_iter()
                    .map(|(name, v)| {
                        let v = match schema.get(&name) {
                            Some(descriptor) => descriptor.normalize(v),
                            None => v,
                        };
                        (name, v)
                    })
                    .collect(),
            ),
            (_, other) => other,
        }
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            FieldKind::Text => "text".to_string(),
            FieldKind::Integer => "integer".to_string(),
            FieldKind::Float => "float".to_string(),
            FieldKind::Boolean => "boolean".to_string(),
            FieldKind::DateTime => "datetime".to_string(),
            FieldKind::Reference { kind: Some(k) } => format!("reference to {k}"),
            FieldKind::Reference { kind: None } => "reference".to_string(),
            FieldKind::Composite(_) => "structure".to_string(),
        }
    }
}

/// Ordered table of field descriptors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<FieldDescriptor>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field (declaration order is preserved)
    pub fn field(mut self, descriptor: FieldDescriptor) -> Self {
        self.fields.push(descriptor);
        self
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
