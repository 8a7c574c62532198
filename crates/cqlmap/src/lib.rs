//! cqlmap: entity repository over wide-column (CQL) stores
//!
//! Maps typed entities onto tables through parameterized statements and keeps
//! a derived edge index so references can be followed without joins.
//!
//! ## Key Components
//!
//! - `StatementBuilder`: query descriptions → statement text + named params
//! - `StorageType`: simple (column per field) or blob (JSON column) codec
//! - `discover_edges` / `reconcile`: edge index maintenance
//! - `Repository`: insert / update / delete / get / fetch orchestration
//! - `Transport`: the store seam; `fakes::MemoryTransport` for tests

mod binding;
mod codec;
mod config;
mod edge;
mod error;
pub mod fakes;
mod repository;
mod resolver;
mod statement;
pub mod telemetry;
mod transport;

pub use binding::{
    construct_primary_key, primary_key_filters, ColumnType, EntityFactory, KeyColumn,
    ModelBinding, ModelRegistry, PrimaryKeySource,
};
pub use codec::{
    format_timestamp, parse_timestamp, StorageType, DEFAULT_BLOB_COLUMN, KEY_COLUMN,
    TIMESTAMP_FORMAT,
};
pub use config::{EdgeFallback, StoreConfig};
pub use edge::{
    discover_edges, edges_from, reconcile, Edge, EdgeWrite, CREATED_COLUMN, DEFAULT_EDGE_TABLE,
    LABEL_COLUMN, SOURCE_COLUMN, TARGET_COLUMN, UPDATED_COLUMN,
};
pub use error::{StoreError, StoreResult, TransportError};
pub use repository::Repository;
pub use resolver::{ReferenceResolver, SkipReferences};
pub use statement::{stringify, Batch, Param, Params, Statement, StatementBuilder};
pub use transport::{
    Row, SerialConsistency, TableMetadata, Transport, APPLIED_COLUMN, MIN_BATCH_PROTOCOL_VERSION,
};

pub use cqlmap_model as model;
