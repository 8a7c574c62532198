//! Storage codec
//!
//! [`StorageType`] decides how an entity's fields become a row: flattened one
//! column per field (`Simple`) or serialized whole into one JSON text column
//! (`Blob`). Both directions are guided by the entity's declared schema.

use chrono::{DateTime, Utc};
use cqlmap_model::{Entity, FieldDescriptor, FieldKind, Fields, Key, Schema, Value};
use serde_json::{Map, Number};

use crate::error::{StoreError, StoreResult};
use crate::transport::Row;

/// Column holding the entity's URL-safe key
pub const KEY_COLUMN: &str = "key";

/// Blob column used when none is configured
pub const DEFAULT_BLOB_COLUMN: &str = "blob";

/// `YYYY-MM-DDTHH:MM:SS.ffffff+0000`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%z";

const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_str(s, TIMESTAMP_PARSE_FORMAT)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Codec(format!("invalid timestamp {s:?}: {e}")))
}

/// How an entity kind is laid out in its table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StorageType {
    /// One column per declared field
    #[default]
    Simple,
    /// Whole entity as JSON in `column`
    Blob { column: String },
}

impl StorageType {
    /// Blob storage in the default `blob` column
    pub fn blob() -> Self {
        StorageType::Blob {
            column: DEFAULT_BLOB_COLUMN.to_string(),
        }
    }

    /// Row for `entity`, including the key column.
    pub fn encode(&self, entity: &dyn Entity) -> StoreResult<Row> {
        let key = entity.key().urlsafe();
        let fields = entity.fields();

        let mut row = Row::new();
        match self {
            StorageType::Simple => {
                for (name, value) in fields {
                    row.insert(name, to_storage(value));
                }
            }
            StorageType::Blob { column } => {
                let mut object = Map::new();
                for (name, value) in fields {
                    object.insert(name, to_json(value)?);
                }
                object.insert(KEY_COLUMN.to_string(), serde_json::Value::String(key.clone()));
                let blob = serde_json::to_string(&serde_json::Value::Object(object))?;
                row.insert(column.clone(), Value::Text(blob));
            }
        }
        row.insert(KEY_COLUMN.to_string(), Value::Text(key));
        Ok(row)
    }

    /// Field mapping for a stored row (key excluded).
    pub fn decode(&self, row: &Row, schema: &Schema) -> StoreResult<Fields> {
        match self {
            StorageType::Simple => {
                let fields = row
                    .iter()
                    .filter(|(name, _)| name.as_str() != KEY_COLUMN)
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                decode_fields(schema, fields)
            }
            StorageType::Blob { column } => {
                let blob = match row.get(column) {
                    Some(Value::Text(blob)) if !blob.is_empty() => blob,
                    _ => {
                        return Err(StoreError::MissingColumn {
                            column: column.clone(),
                        })
                    }
                };

                let object = match serde_json::from_str::<serde_json::Value>(blob)? {
                    serde_json::Value::Object(object) => object,
                    other => {
                        return Err(StoreError::Codec(format!(
                            "blob column {column} holds {other}, expected an object"
                        )))
                    }
                };

                let fields = object
                    .into_iter()
                    .filter(|(name, _)| name.as_str() != KEY_COLUMN)
                    .map(|(name, json)| (name, from_json(json)))
                    .collect();
                decode_fields(schema, fields)
            }
        }
    }
}

/// Bind-ready column value: keys and timestamps become text.
fn to_storage(value: Value) -> Value {
    match value {
        Value::Key(key) => Value::Text(key.urlsafe()),
        Value::Timestamp(ts) => Value::Text(format_timestamp(&ts)),
        Value::List(items) => Value::List(items.into_iter().map(to_storage).collect()),
        Value::Map(fields) => Value::Map(
            fields
                .into_iter()
                .map(|(name, v)| (name, to_storage(v)))
                .collect(),
        ),
        other => other,
    }
}

fn to_json(value: Value) -> StoreResult<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(b),
        Value::Int(i) => serde_json::Value::Number(i.into()),
        Value::Float(f) => Number::from_f64(f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| StoreError::Codec(format!("cannot encode non-finite float {f}")))?,
        Value::Text(s) => serde_json::Value::String(s),
        Value::Timestamp(ts) => serde_json::Value::String(format_timestamp(&ts)),
        Value::Key(key) => serde_json::Value::String(key.urlsafe()),
        Value::List(items) => serde_json::Value::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<StoreResult<Vec<_>>>()?,
        ),
        Value::Map(fields) => serde_json::Value::Object(
            fields
                .into_iter()
                .map(|(name, v)| Ok((name, to_json(v)?)))
                .collect::<StoreResult<Map<_, _>>>()?,
        ),
    })
}

fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::Text(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(object) => Value::Map(
            object
                .into_iter()
                .map(|(name, v)| (name, from_json(v)))
                .collect(),
        ),
    }
}

/// Restore declared types; undeclared names pass through.
fn decode_fields(schema: &Schema, fields: Fields) -> StoreResult<Fields> {
    fields
        .into_iter()
        .map(|(name, value)| {
            let value = match schema.get(&name) {
                Some(descriptor) => decode_field(descriptor, value)?,
                None => value,
            };
            Ok((name, value))
        })
        .collect()
}

fn decode_field(descriptor: &FieldDescriptor, value: Value) -> StoreResult<Value> {
    match value {
        Value::List(items) if descriptor.repeated => items
            .into_iter()
            .map(|item| decode_kind(&descriptor.kind, item))
            .collect::<StoreResult<Vec<_>>>()
            .map(Value::List),
        other => decode_kind(&descriptor.kind, other),
    }
}

fn decode_kind(kind: &FieldKind, value: Value) -> StoreResult<Value> {
    match (kind, value) {
        (_, Value::Null) => Ok(Value::Null),
        (FieldKind::DateTime, Value::Text(s)) => parse_timestamp(&s).map(Value::Timestamp),
        (FieldKind::Reference { .. }, Value::Text(s)) => {
            Key::from_urlsafe(&s).map(Value::Key).map_err(StoreError::from)
        }
        (FieldKind::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
        (FieldKind::Composite(schema), Value::Map(fields)) => {
            decode_fields(schema, fields).map(Value::Map)
        }
        (_, other) => Ok(other),
    }
}
