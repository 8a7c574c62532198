//! The entity contract consumed by the store, plus a generic implementation

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{ModelError, ModelResult};
use crate::key::Key;
use crate::schema::Schema;
use crate::value::{Fields, Value};

/// A keyed record with declared, typed fields.
///
/// The store reads fields through [`Entity::fields`] and writes decoded rows
/// back through [`Entity::populate`]; the key never appears in `fields`.
pub trait Entity: Send + Sync + Debug {
    /// Identity of this entity
    fn key(&self) -> &Key;

    /// Declared field table for this entity type
    fn schema(&self) -> &Schema;

    /// Current field values (set fields only, key excluded)
    fn fields(&self) -> Fields;

    /// Replace field values with ones loaded from the store
    fn populate(&mut self, fields: Fields) -> ModelResult<()>;

    /// Value of a single field, if set
    fn field(&self, name: &str) -> Option<Value> {
        self.fields().remove(name)
    }

    /// Dot-joined reference paths resolved on read when the caller names none
    fn default_references(&self) -> Vec<String> {
        Vec::new()
    }

    /// Runs before the row is built on insert and update
    fn pre_put(&mut self) {}

    /// Runs after the primary write succeeded
    fn post_put(&mut self) {}
}

impl<T: Entity + ?Sized> Entity for Box<T> {
    fn key(&self) -> &Key {
        (**self).key()
    }

    fn schema(&self) -> &Schema {
        (**self).schema()
    }

    fn fields(&self) -> Fields {
        (**self).fields()
    }

    fn populate(&mut self, fields: Fields) -> ModelResult<()> {
        (**self).populate(fields)
    }

    fn field(&self, name: &str) -> Option<Value> {
        (**self).field(name)
    }

    fn default_references(&self) -> Vec<String> {
        (**self).default_references()
    }

    fn pre_put(&mut self) {
        (**self).pre_put()
    }

    fn post_put(&mut self) {
        (**self).post_put()
    }
}

/// Schema-checked entity usable for any kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    key: Key,
    schema: Arc<Schema>,
    fields: Fields,
    references: Vec<String>,
}

impl Record {
    /// New record of `kind` with a generated key
    pub fn new(kind: impl Into<String>, schema: Arc<Schema>) -> ModelResult<Self> {
        Ok(Self::with_key(Key::generate(kind)?, schema))
    }

    /// Record for an existing key (e.g. to `get` it)
    pub fn with_key(key: Key, schema: Arc<Schema>) -> Self {
        Record {
            key,
            schema,
            fields: Fields::new(),
            references: Vec::new(),
        }
    }

    /// Set reference paths resolved by default on read
    pub fn with_default_references<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.references = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style [`Record::set`]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> ModelResult<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Set a declared field, checking the value against its descriptor.
    ///
    /// The value is stored in the form the store reads back: timestamps are
    /// cut to microseconds and integers in float fields become floats.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> ModelResult<&mut Self> {
        let value = value.into();
        let descriptor = self
            .schema
            .get(name)
            .ok_or_else(|| ModelError::UnknownField(name.to_string()))?;

        if !descriptor.accepts(&value) {
            return Err(ModelError::FieldType {
                field: name.to_string(),
                expected: if descriptor.repeated {
                    format!("list of {}", descriptor.kind.describe())
                } else {
                    descriptor.kind.describe()
                },
                found: value.type_name().to_string(),
            });
        }

        let value = descriptor.normalize(value);
        self.fields.insert(name.to_string(), value);
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Mutable access to a field value, bypassing the schema check
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.get_mut(name)
    }
}

impl Entity for Record {
    fn key(&self) -> &Key {
        &self.key
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn fields(&self) -> Fields {
        self.fields.clone()
    }

    /// Keeps declared fields only; columns the schema does not declare
    /// (extra primary-key parts, bookkeeping columns) are dropped.
    fn populate(&mut self, fields: Fields) -> ModelResult<()> {
        self.fields = fields
            .into_iter()
            .filter(|(name, _)| self.schema.contains(name))
            .collect();
        Ok(())
    }

    fn field(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }

    fn default_references(&self) -> Vec<String> {
        self.references.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDescriptor;
    use chrono::{TimeZone, Utc};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new()
                .field(FieldDescriptor::text("title"))
                .field(FieldDescriptor::integer("num")),
        )
    }

    #[test]
    fn test_set_checks_schema() {
        let mut record = Record::new("Book", schema()).unwrap();

        assert!(record.set("title", "A storm of swords").is_ok());
        assert!(matches!(
            record.set("title", 3),
            Err(ModelError::FieldType { .. })
        ));
        assert!(matches!(
            record.set("bogus", 3),
            Err(ModelError::UnknownField(_))
        ));
    }

    #[test]
    fn test_set_stores_canonical_values() {
        let schema = Arc::new(
            Schema::new()
                .field(FieldDescriptor::float("ratio"))
                .field(FieldDescriptor::float("samples").repeated())
                .field(FieldDescriptor::datetime("created")),
        );
        let created = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);

        let record = Record::new("Reading", schema)
            .unwrap()
            .with("ratio", 2)
            .unwrap()
            .with("samples", vec![Value::Int(1), Value::Float(1.5)])
            .unwrap()
            .with("created", created)
            .unwrap();

        assert_eq!(record.get("ratio"), Some(&Value::Float(2.0)));
        assert_eq!(
            record.get("samples"),
            Some(&Value::List(vec![Value::Float(1.0), Value::Float(1.5)]))
        );
        let Some(Value::Timestamp(stored)) = record.get("created") else {
            panic!("created not stored as a timestamp");
        };
        assert_eq!(stored.timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    fn test_new_rejects_invalid_kind() {
        assert!(matches!(
            Record::new("Image-Asset", schema()),
            Err(ModelError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_populate_drops_undeclared_columns() {
        let mut record = Record::new("Book", schema()).unwrap();
        let mut fields = Fields::new();
        fields.insert("title".into(), Value::from("Lorem"));
        fields.insert("revision".into(), Value::from("1"));

        record.populate(fields).unwrap();

        assert_eq!(record.get("title"), Some(&Value::from("Lorem")));
        assert!(record.get("revision").is_none());
    }

    #[test]
    fn test_boxed_entity_forwards() {
        let record = Record::new("Book", schema()).unwrap().with("num", 2).unwrap();
        let boxed: Box<dyn Entity> = Box::new(record.clone());

        assert_eq!(boxed.key(), record.key());
        assert_eq!(boxed.field("num"), Some(Value::Int(2)));
    }
}
