//! Storage transport contract
//!
//! The repository never talks to a cluster directly. A [`Transport`] executes
//! built statements and batches and reports table metadata; connection
//! pooling, timeouts and retries are its business. An in-memory
//! implementation lives in [`crate::fakes`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use cqlmap_model::Value;
use serde::{Deserialize, Serialize};

use crate::binding::KeyColumn;
use crate::error::TransportError;
use crate::statement::{Batch, Statement};

/// A result row, column name → value
pub type Row = BTreeMap<String, Value>;

/// Column a lightweight transaction reports its outcome in
pub const APPLIED_COLUMN: &str = "[applied]";

/// First native protocol version that supports `BATCH`
pub const MIN_BATCH_PROTOCOL_VERSION: u8 = 2;

/// Consistency for the Paxos phase of conditional writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialConsistency {
    Serial,
    LocalSerial,
}

impl std::str::FromStr for SerialConsistency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(SerialConsistency::Serial),
            "local_serial" | "localserial" => Ok(SerialConsistency::LocalSerial),
            other => Err(format!("unknown serial consistency {other:?}")),
        }
    }
}

/// Declared primary key of a table, as reported by the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub name: String,
    pub primary_key: Vec<KeyColumn>,
}

/// Executes statements against a wide-column store.
///
/// Guarantees expected by the repository:
/// - rows come back in store order
/// - a conditional write (`IF ...`) returns a first row carrying
///   [`APPLIED_COLUMN`]
/// - a batch applies all of its statements or none of them
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute one statement with its bound parameters.
    async fn execute(
        &self,
        statement: &Statement,
        serial_consistency: Option<SerialConsistency>,
    ) -> Result<Vec<Row>, TransportError>;

    /// Execute a batch atomically.
    async fn execute_batch(&self, batch: &Batch) -> Result<Vec<Row>, TransportError>;

    /// Primary-key metadata for a table.
    async fn table_metadata(&self, table: &str) -> Result<TableMetadata, TransportError>;

    /// Negotiated native protocol version.
    fn protocol_version(&self) -> u8;

    /// Whether `BATCH` is available on the negotiated protocol.
    fn supports_batch(&self) -> bool {
        self.protocol_version() >= MIN_BATCH_PROTOCOL_VERSION
    }
}
