//! Model bindings
//!
//! Each entity kind is registered once with its table, storage codec and
//! primary-key description. The repository resolves everything it needs for
//! a write from the binding; nothing is inspected per call.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use cqlmap_model::{Entity, Filter, Key, Value};

use crate::codec::{format_timestamp, StorageType, KEY_COLUMN};
use crate::error::{StoreError, StoreResult};
use crate::transport::Row;

/// CQL type of a primary-key column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Int,
}

impl ColumnType {
    /// Convert a field value to what this column stores.
    pub fn coerce(&self, column: &str, value: Value) -> StoreResult<Value> {
        match (self, value) {
            (ColumnType::Text, Value::Text(s)) => Ok(Value::Text(s)),
            (ColumnType::Text, Value::Key(key)) => Ok(Value::Text(key.urlsafe())),
            (ColumnType::Text, Value::Int(i)) => Ok(Value::Text(i.to_string())),
            (ColumnType::Text, Value::Bool(b)) => Ok(Value::Text(b.to_string())),
            (ColumnType::Text, Value::Timestamp(ts)) => Ok(Value::Text(format_timestamp(&ts))),
            (ColumnType::Int, Value::Int(i)) => Ok(Value::Int(i)),
            (ColumnType::Int, Value::Text(s)) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                StoreError::Codec(format!("column {column} expects int, got {s:?}"))
            }),
            (_, other) => Err(StoreError::Codec(format!(
                "column {column} of type {self} cannot hold a {} value",
                other.type_name()
            ))),
        }
    }
}

impl FromStr for ColumnType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "varchar" | "ascii" => Ok(ColumnType::Text),
            "int" | "bigint" | "smallint" | "varint" => Ok(ColumnType::Int),
            other => Err(StoreError::Schema(format!(
                "unsupported primary key column type {other:?}"
            ))),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Text => f.write_str("text"),
            ColumnType::Int => f.write_str("int"),
        }
    }
}

/// One primary-key column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumn {
    pub name: String,
    pub column_type: ColumnType,
}

impl KeyColumn {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        KeyColumn {
            name: name.into(),
            column_type,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Int)
    }
}

/// Where a binding's primary-key columns come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKeySource {
    /// Fixed at registration
    Declared(Vec<KeyColumn>),
    /// Read from the transport's table metadata on every write
    Live,
}

impl Default for PrimaryKeySource {
    fn default() -> Self {
        PrimaryKeySource::Declared(vec![KeyColumn::text(KEY_COLUMN)])
    }
}

/// Builds an empty entity of a bound kind for a key read from the store
pub type EntityFactory = Arc<dyn Fn(Key) -> Box<dyn Entity> + Send + Sync>;

/// Storage registration of one entity kind
#[derive(Clone)]
pub struct ModelBinding {
    kind: String,
    table: String,
    storage: StorageType,
    primary_key: PrimaryKeySource,
    factory: EntityFactory,
}

impl ModelBinding {
    /// Binding for `kind` stored in the lower-cased kind's table, simple
    /// codec, primary key `key text`.
    pub fn new<F>(kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Key) -> Box<dyn Entity> + Send + Sync + 'static,
    {
        let kind = kind.into();
        ModelBinding {
            table: kind.to_ascii_lowercase(),
            kind,
            storage: StorageType::Simple,
            primary_key: PrimaryKeySource::default(),
            factory: Arc::new(factory),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_storage(mut self, storage: StorageType) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_primary_key(mut self, columns: Vec<KeyColumn>) -> Self {
        self.primary_key = PrimaryKeySource::Declared(columns);
        self
    }

    /// Look the primary key up in table metadata at write time.
    pub fn with_live_primary_key(mut self) -> Self {
        self.primary_key = PrimaryKeySource::Live;
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn storage(&self) -> &StorageType {
        &self.storage
    }

    pub fn primary_key(&self) -> &PrimaryKeySource {
        &self.primary_key
    }

    /// Empty entity for `key`, ready to be populated.
    pub fn instantiate(&self, key: Key) -> Box<dyn Entity> {
        (self.factory)(key)
    }
}

impl fmt::Debug for ModelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBinding")
            .field("kind", &self.kind)
            .field("table", &self.table)
            .field("storage", &self.storage)
            .field("primary_key", &self.primary_key)
            .finish_non_exhaustive()
    }
}

/// Kind → binding lookup
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    bindings: HashMap<String, ModelBinding>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding, replacing any previous one for the same kind.
    pub fn register(&mut self, binding: ModelBinding) -> Option<ModelBinding> {
        self.bindings.insert(binding.kind.clone(), binding)
    }

    /// Builder-style [`ModelRegistry::register`]
    pub fn with(mut self, binding: ModelBinding) -> Self {
        self.register(binding);
        self
    }

    /// Binding for `kind`, or `ModelValidation` when the kind is unbound.
    pub fn binding(&self, kind: &str) -> StoreResult<&ModelBinding> {
        self.bindings
            .get(kind)
            .ok_or_else(|| StoreError::ModelValidation {
                kind: kind.to_string(),
            })
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.bindings.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Resolve every primary-key column from `entity`.
///
/// The `key` column comes from the entity's key, any other column from the
/// field of the same name. Absent or null parts fail with `PrimaryKey`.
pub fn construct_primary_key(entity: &dyn Entity, columns: &[KeyColumn]) -> StoreResult<Row> {
    let mut row = Row::new();
    for column in columns {
        let value = if column.name == KEY_COLUMN {
            Value::Key(entity.key().clone())
        } else {
            entity.field(&column.name).unwrap_or(Value::Null)
        };

        if value.is_null() {
            return Err(StoreError::PrimaryKey {
                column: column.name.clone(),
            });
        }

        let value = column.column_type.coerce(&column.name, value)?;
        row.insert(column.name.clone(), value);
    }
    Ok(row)
}

/// Equality filters selecting exactly the row identified by `primary_key`.
pub fn primary_key_filters(primary_key: &Row) -> StoreResult<Vec<Filter>> {
    primary_key
        .iter()
        .map(|(name, value)| Filter::eq(name.as_str(), value.clone()).map_err(StoreError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cqlmap_model::{FieldDescriptor, Record, Schema};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new()
                .field(FieldDescriptor::text("title"))
                .field(FieldDescriptor::integer("revision")),
        )
    }

    #[test]
    fn test_column_type_parsing() {
        assert_eq!("varchar".parse::<ColumnType>().unwrap(), ColumnType::Text);
        assert_eq!("BIGINT".parse::<ColumnType>().unwrap(), ColumnType::Int);
        assert!(matches!(
            "blob".parse::<ColumnType>(),
            Err(StoreError::Schema(_))
        ));
    }

    #[test]
    fn test_default_primary_key_uses_entity_key() {
        let record = Record::new("ImageAsset", schema()).unwrap();
        let row = construct_primary_key(&record, &[KeyColumn::text(KEY_COLUMN)]).unwrap();

        assert_eq!(row.len(), 1);
        assert_eq!(row[KEY_COLUMN], Value::Text(record.key().urlsafe()));
    }

    #[test]
    fn test_compound_primary_key_coerces_fields() {
        let record = Record::new("ImageAsset", schema())
            .unwrap()
            .with("title", "Lorem")
            .unwrap()
            .with("revision", 3)
            .unwrap();
        let columns = [KeyColumn::text(KEY_COLUMN), KeyColumn::text("revision")];

        let row = construct_primary_key(&record, &columns).unwrap();

        assert_eq!(row["revision"], Value::Text("3".to_string()));
    }

    #[test]
    fn test_missing_primary_key_part() {
        let record = Record::new("ImageAsset", schema()).unwrap();
        let columns = [KeyColumn::text(KEY_COLUMN), KeyColumn::int("revision")];

        let err = construct_primary_key(&record, &columns).unwrap_err();

        assert!(matches!(err, StoreError::PrimaryKey { column } if column == "revision"));
    }

    #[test]
    fn test_unbound_kind_fails_validation() {
        let registry = ModelRegistry::new().with(ModelBinding::new("ImageAsset", |key| {
            Box::new(Record::with_key(key, schema()))
        }));

        assert_eq!(registry.binding("ImageAsset").unwrap().table(), "imageasset");
        assert!(matches!(
            registry.binding("AudioAsset"),
            Err(StoreError::ModelValidation { kind }) if kind == "AudioAsset"
        ));
    }
}
