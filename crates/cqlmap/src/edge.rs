//! Edge index
//!
//! Wide-column stores have no joins, so every reference an entity holds is
//! mirrored as a row in the edge table: `(source, label, target)` plus
//! timestamps. The label is the dot-joined path from the entity root to the
//! reference field (`attributes.imageFormat`). Edges are identified by
//! `(label, target)` within one source.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use cqlmap_model::{Entity, FieldKind, Fields, Filter, Key, Query, Schema, Value};
use tracing::warn;

use crate::codec::{format_timestamp, parse_timestamp, KEY_COLUMN};
use crate::error::{StoreError, StoreResult};
use crate::statement::{Statement, StatementBuilder};
use crate::transport::Row;

/// Edge table used when none is configured
pub const DEFAULT_EDGE_TABLE: &str = "edge";

pub const SOURCE_COLUMN: &str = "source";
pub const LABEL_COLUMN: &str = "label";
pub const TARGET_COLUMN: &str = "target";
pub const CREATED_COLUMN: &str = "created";
pub const UPDATED_COLUMN: &str = "updated";

/// One stored reference from `source` to `target`
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub label: String,
    pub source: Key,
    pub target: Key,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(label: impl Into<String>, source: Key, target: Key, at: DateTime<Utc>) -> Self {
        Edge {
            label: label.into(),
            source,
            target,
            created_at: at,
            updated_at: at,
        }
    }

    /// Identity used by reconciliation
    pub fn identity(&self) -> (&str, &Key) {
        (&self.label, &self.target)
    }

    /// Row for the edge table
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert(SOURCE_COLUMN.to_string(), Value::Text(self.source.urlsafe()));
        row.insert(LABEL_COLUMN.to_string(), Value::Text(self.label.clone()));
        row.insert(TARGET_COLUMN.to_string(), Value::Text(self.target.urlsafe()));
        row.insert(
            CREATED_COLUMN.to_string(),
            Value::Text(format_timestamp(&self.created_at)),
        );
        row.insert(
            UPDATED_COLUMN.to_string(),
            Value::Text(format_timestamp(&self.updated_at)),
        );
        row
    }

    /// Parse an edge-table row.
    pub fn from_row(row: &Row) -> StoreResult<Self> {
        let label = match required(row, LABEL_COLUMN)? {
            Value::Text(label) => label.clone(),
            other => {
                return Err(StoreError::Codec(format!(
                    "edge label must be text, got {}",
                    other.type_name()
                )))
            }
        };

        Ok(Edge {
            label,
            source: key_value(required(row, SOURCE_COLUMN)?)?,
            target: key_value(required(row, TARGET_COLUMN)?)?,
            created_at: timestamp_value(required(row, CREATED_COLUMN)?)?,
            updated_at: timestamp_value(required(row, UPDATED_COLUMN)?)?,
        })
    }

    /// Equality filters on the full edge primary key
    pub fn key_filters(&self) -> StoreResult<Vec<Filter>> {
        Ok(vec![
            Filter::eq(SOURCE_COLUMN, self.source.clone())?,
            Filter::eq(LABEL_COLUMN, self.label.as_str())?,
            Filter::eq(TARGET_COLUMN, self.target.clone())?,
        ])
    }
}

/// Query listing every stored edge of `source` (no LIMIT).
pub fn edges_from(table: &str, source: &Key) -> StoreResult<Query> {
    Ok(Query::new(table)
        .with_filter(Filter::eq(SOURCE_COLUMN, source.clone())?)
        .with_limit(0))
}

fn required<'a>(row: &'a Row, column: &str) -> StoreResult<&'a Value> {
    match row.get(column) {
        Some(Value::Null) | None => Err(StoreError::MissingColumn {
            column: column.to_string(),
        }),
        Some(value) => Ok(value),
    }
}

fn key_value(value: &Value) -> StoreResult<Key> {
    match value {
        Value::Key(key) => Ok(key.clone()),
        Value::Text(s) => Ok(Key::from_urlsafe(s)?),
        other => Err(StoreError::Codec(format!(
            "expected a key, got {}",
            other.type_name()
        ))),
    }
}

fn timestamp_value(value: &Value) -> StoreResult<DateTime<Utc>> {
    match value {
        Value::Timestamp(ts) => Ok(*ts),
        Value::Text(s) => parse_timestamp(s),
        other => Err(StoreError::Codec(format!(
            "expected a timestamp, got {}",
            other.type_name()
        ))),
    }
}

/// Every edge `entity` currently declares, in schema order.
///
/// Walks reference fields through composites and repeated composites. When
/// two edges share `(label, target)` the one found last is kept, at the
/// position it was found.
pub fn discover_edges(entity: &dyn Entity) -> Vec<Edge> {
    let now = Utc::now();
    let fields = entity.fields();

    let mut found = Vec::new();
    walk(entity.schema(), &fields, None, &mut found);

    let mut seen = HashSet::new();
    let mut kept: Vec<(String, Key)> = found
        .into_iter()
        .rev()
        .filter(|(label, target)| seen.insert((label.clone(), target.clone())))
        .collect();
    kept.reverse();

    kept.into_iter()
        .map(|(label, target)| Edge::new(label, entity.key().clone(), target, now))
        .collect()
}

fn walk(schema: &Schema, fields: &Fields, prefix: Option<&str>, out: &mut Vec<(String, Key)>) {
    for descriptor in schema.fields() {
        if prefix.is_none() && descriptor.name == KEY_COLUMN {
            continue;
        }
        let Some(value) = fields.get(&descriptor.name) else {
            continue;
        };

        let label = match prefix {
            Some(prefix) => format!("{prefix}.{}", descriptor.name),
            None => descriptor.name.clone(),
        };

        match &descriptor.kind {
            FieldKind::Reference { .. } => {
                if descriptor.name.contains('.') {
                    warn!(label = %label, "reference field name contains '.', label is ambiguous");
                }
                for item in elements(value) {
                    if let Some(target) = reference_target(&label, item) {
                        out.push((label.clone(), target));
                    }
                }
            }
            FieldKind::Composite(nested) => {
                for item in elements(value) {
                    if let Value::Map(inner) = item {
                        walk(nested, inner, Some(&label), out);
                    }
                }
            }
            _ => {}
        }
    }
}

fn elements(value: &Value) -> &[Value] {
    match value {
        Value::List(items) => items,
        other => std::slice::from_ref(other),
    }
}

fn reference_target(label: &str, value: &Value) -> Option<Key> {
    match value {
        Value::Null => None,
        Value::Key(key) => Some(key.clone()),
        Value::Text(s) => match Key::from_urlsafe(s) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(label, value = %s, error = %e, "skipping unparseable reference");
                None
            }
        },
        other => {
            warn!(label, kind = other.type_name(), "skipping non-key reference value");
            None
        }
    }
}

/// One pending edge-table write
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeWrite {
    Insert(Edge),
    Delete(Edge),
}

impl EdgeWrite {
    pub fn edge(&self) -> &Edge {
        match self {
            EdgeWrite::Insert(edge) | EdgeWrite::Delete(edge) => edge,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, EdgeWrite::Insert(_))
    }

    /// The write that undoes this one
    pub fn inverse(&self) -> EdgeWrite {
        match self {
            EdgeWrite::Insert(edge) => EdgeWrite::Delete(edge.clone()),
            EdgeWrite::Delete(edge) => EdgeWrite::Insert(edge.clone()),
        }
    }

    pub fn statement(&self, table: &str) -> StoreResult<Statement> {
        match self {
            EdgeWrite::Insert(edge) => StatementBuilder::insert(table, &edge.to_row()),
            EdgeWrite::Delete(edge) => {
                StatementBuilder::delete(&Query::new(table).with_filters(edge.key_filters()?))
            }
        }
    }
}

/// Writes moving the stored edges of `source` from `existing` to `desired`.
///
/// Inserts (desired but not stored, carrying `source`) come first, then
/// deletes (stored but no longer desired). Edges in both produce nothing.
/// An empty `desired` is rejected: removing every edge of an entity goes
/// through explicit deletion.
pub fn reconcile(source: &Key, desired: &[Edge], existing: &[Edge]) -> StoreResult<Vec<EdgeWrite>> {
    if desired.is_empty() {
        return Err(StoreError::Query(
            "cannot reconcile an empty desired edge set; delete the edges instead".to_string(),
        ));
    }

    let stored: HashSet<(&str, &Key)> = existing.iter().map(Edge::identity).collect();
    let wanted: HashSet<(&str, &Key)> = desired.iter().map(Edge::identity).collect();

    let mut writes = Vec::new();
    let mut inserted = HashSet::new();
    for edge in desired {
        let identity = edge.identity();
        if !stored.contains(&identity) && inserted.insert(identity) {
            let mut edge = edge.clone();
            edge.source = source.clone();
            writes.push(EdgeWrite::Insert(edge));
        }
    }
    for edge in existing {
        if !wanted.contains(&edge.identity()) {
            writes.push(EdgeWrite::Delete(edge.clone()));
        }
    }

    Ok(writes)
}
