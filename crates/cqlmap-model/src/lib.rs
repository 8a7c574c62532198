//! cqlmap-model: entity and query contracts
//!
//! The types the store consumes without owning them:
//!
//! - `Key`: entity identity with a URL-safe string form
//! - `Value` / `Fields`: typed field values
//! - `Schema`: explicit per-type field-descriptor table
//! - `Entity`: the record contract (fields, populate, put hooks)
//! - `Query` / `Filter`: backend-agnostic query description

mod entity;
mod error;
mod key;
mod query;
mod schema;
mod value;

pub use entity::{Entity, Record};
pub use error::{ModelError, ModelResult};
pub use key::Key;
pub use query::{Filter, Operator, Query, DEFAULT_LIMIT};
pub use schema::{FieldDescriptor, FieldKind, Schema};
pub use value::{Fields, Value};
