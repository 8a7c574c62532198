//! Repository: entity persistence over a [`Transport`]
//!
//! Runs the write path (hooks, row building, primary write, edge
//! maintenance), single-row reads, multi-kind fetches, and reports
//! conditional writes that were not applied as [`StoreError::OptimisticLock`].
//!
//! The repository holds no mutable state; concurrent calls for different
//! entities are independent. Racing writers on one key are only arbitrated
//! by the store's conditional writes.

use std::sync::Arc;

use cqlmap_model::{Entity, Key, Query, Value};
use tracing::{debug, info, instrument, warn};

use crate::binding::{
    construct_primary_key, primary_key_filters, KeyColumn, ModelBinding, ModelRegistry,
    PrimaryKeySource,
};
use crate::codec::KEY_COLUMN;
use crate::config::{EdgeFallback, StoreConfig};
use crate::edge::{discover_edges, edges_from, reconcile, Edge, EdgeWrite};
use crate::error::{StoreError, StoreResult};
use crate::resolver::{ReferenceResolver, SkipReferences};
use crate::statement::{Batch, Statement, StatementBuilder};
use crate::transport::{Row, SerialConsistency, Transport, APPLIED_COLUMN};

/// Entity store over one keyspace
#[derive(Clone)]
pub struct Repository {
    config: StoreConfig,
    transport: Arc<dyn Transport>,
    registry: ModelRegistry,
    resolver: Arc<dyn ReferenceResolver>,
}

impl Repository {
    /// Validate `config` and bind the repository to `transport`.
    pub fn new(
        config: StoreConfig,
        transport: Arc<dyn Transport>,
        registry: ModelRegistry,
    ) -> StoreResult<Self> {
        config.validate()?;

        if transport.protocol_version() != config.protocol_version {
            warn!(
                configured = config.protocol_version,
                negotiated = transport.protocol_version(),
                "transport negotiated a different protocol version"
            );
        }
        info!(
            keyspace = %config.keyspace,
            kinds = registry.len(),
            edge_table = %config.edge_table,
            "repository ready"
        );

        Ok(Self {
            config,
            transport,
            registry,
            resolver: Arc::new(SkipReferences),
        })
    }

    /// Use `resolver` to load references after reads.
    pub fn with_resolver(mut self, resolver: Arc<dyn ReferenceResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Execute one statement; a not-applied conditional write is an error.
    #[instrument(skip_all, fields(statement = %statement.text()))]
    pub async fn execute(
        &self,
        statement: &Statement,
        serial_consistency: Option<SerialConsistency>,
    ) -> StoreResult<Vec<Row>> {
        debug!(params = statement.params().len(), ?serial_consistency, "executing");
        let rows = self.transport.execute(statement, serial_consistency).await?;
        check_applied(&rows, statement.text())?;
        Ok(rows)
    }

    /// Execute a batch atomically; a not-applied conditional batch is an error.
    #[instrument(skip_all, fields(statements = batch.len()))]
    pub async fn execute_batch(&self, batch: &Batch) -> StoreResult<Vec<Row>> {
        debug!(serial_consistency = ?batch.serial_consistency(), "executing batch");
        let rows = self.transport.execute_batch(batch).await?;
        check_applied(&rows, "batch")?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Load the stored row for `entity`'s primary key into it.
    ///
    /// `references` names the reference paths to resolve; `None` uses the
    /// entity's defaults.
    #[instrument(skip_all, fields(key = %entity.key()))]
    pub async fn get<E: Entity>(
        &self,
        mut entity: E,
        references: Option<&[String]>,
    ) -> StoreResult<E> {
        let binding = self.registry.binding(entity.key().kind())?;
        let columns = self.primary_key_columns(binding).await?;
        let primary_key = construct_primary_key(&entity, &columns)?;

        let query = Query::new(binding.table())
            .with_filters(primary_key_filters(&primary_key)?)
            .with_limit(1);
        let rows = self
            .execute(&StatementBuilder::select(&query, None)?, None)
            .await?;
        let row = rows.into_iter().next().ok_or_else(|| StoreError::NotFound {
            table: binding.table().to_string(),
            key: entity.key().urlsafe(),
        })?;

        let fields = binding.storage().decode(&row, entity.schema())?;
        entity.populate(fields)?;
        self.resolve(&mut entity, references).await?;
        Ok(entity)
    }

    /// Run `query` and build one entity per row, typed by the row's key.
    ///
    /// Rows of a shared table may belong to different kinds; each kind must
    /// be registered. Store order is preserved.
    #[instrument(skip_all, fields(table = %query.table()))]
    pub async fn fetch(
        &self,
        query: &Query,
        references: Option<&[String]>,
    ) -> StoreResult<Vec<Box<dyn Entity>>> {
        let rows = self
            .execute(&StatementBuilder::select(query, None)?, None)
            .await?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let key = match row.get(KEY_COLUMN) {
                Some(Value::Text(key)) => Key::from_urlsafe(key)?,
                Some(Value::Key(key)) => key.clone(),
                _ => {
                    return Err(StoreError::MissingColumn {
                        column: KEY_COLUMN.to_string(),
                    })
                }
            };

            let binding = self.registry.binding(key.kind())?;
            let mut entity = binding.instantiate(key);
            let fields = binding.storage().decode(&row, entity.schema())?;
            entity.populate(fields)?;
            self.resolve(&mut entity, references).await?;
            entities.push(entity);
        }

        debug!(rows = entities.len(), "fetched");
        Ok(entities)
    }

    async fn resolve(
        &self,
        entity: &mut dyn Entity,
        references: Option<&[String]>,
    ) -> StoreResult<()> {
        let paths = match references {
            Some(paths) => paths.to_vec(),
            None => entity.default_references(),
        };
        if paths.is_empty() {
            return Ok(());
        }
        self.resolver.resolve(entity, &paths).await
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert `entity`, optionally only if its primary key is free.
    #[instrument(skip_all, fields(key = %entity.key(), if_not_exists = if_not_exists))]
    pub async fn insert<E: Entity>(&self, mut entity: E, if_not_exists: bool) -> StoreResult<E> {
        let binding = self.registry.binding(entity.key().kind())?;

        entity.pre_put();
        let (row, _) = self.build_row(binding, &entity).await?;

        let mut statement = StatementBuilder::insert(binding.table(), &row)?;
        let mut serial = None;
        if if_not_exists {
            statement = statement.if_not_exists();
            serial = Some(self.config.conditional_consistency());
        }
        self.execute(&statement, serial).await?;
        entity.post_put();

        let desired = discover_edges(&entity);
        if !desired.is_empty() {
            let writes = reconcile(entity.key(), &desired, &[])?;
            self.apply_edge_writes(&writes).await?;
        }

        info!(table = binding.table(), edges = desired.len(), "inserted");
        Ok(entity)
    }

    /// Insert several entities, their rows in one batch when supported.
    #[instrument(skip_all, fields(count = entities.len(), if_not_exists = if_not_exists))]
    pub async fn insert_multi<E: Entity>(
        &self,
        mut entities: Vec<E>,
        if_not_exists: bool,
    ) -> StoreResult<Vec<E>> {
        if entities.len() <= 1 || !self.transport.supports_batch() {
            if entities.len() > 1 {
                warn!(
                    protocol = self.transport.protocol_version(),
                    "batches unsupported; inserting one by one"
                );
            }
            let mut inserted = Vec::with_capacity(entities.len());
            for entity in entities {
                inserted.push(self.insert(entity, if_not_exists).await?);
            }
            return Ok(inserted);
        }

        let serial = if_not_exists.then(|| self.config.conditional_consistency());
        let mut batch = Batch::new().with_serial_consistency(serial);
        for entity in entities.iter_mut() {
            let binding = self.registry.binding(entity.key().kind())?;
            entity.pre_put();
            let (row, _) = self.build_row(binding, &*entity).await?;
            let statement = StatementBuilder::insert(binding.table(), &row)?;
            batch.add(if if_not_exists {
                statement.if_not_exists()
            } else {
                statement
            });
        }
        self.execute_batch(&batch).await?;

        let mut edge_writes = Vec::new();
        for entity in entities.iter_mut() {
            entity.post_put();
            let desired = discover_edges(&*entity);
            if !desired.is_empty() {
                edge_writes.extend(reconcile(entity.key(), &desired, &[])?);
            }
        }
        self.apply_edge_writes(&edge_writes).await?;

        info!(
            rows = entities.len(),
            edges = edge_writes.len(),
            "inserted batch"
        );
        Ok(entities)
    }

    /// Update `entity`'s row, optionally only if `field` currently equals
    /// `value`, then move its stored edges to match its references.
    #[instrument(skip_all, fields(key = %entity.key()))]
    pub async fn update<E: Entity>(
        &self,
        mut entity: E,
        condition: Option<(&str, Value)>,
    ) -> StoreResult<E> {
        let binding = self.registry.binding(entity.key().kind())?;

        entity.pre_put();
        let (mut row, primary_key) = self.build_row(binding, &entity).await?;
        for column in primary_key.keys() {
            row.remove(column);
        }

        let filters = primary_key_filters(&primary_key)?;
        let mut statement = StatementBuilder::update(binding.table(), &row, &filters)?;
        let mut serial = None;
        if let Some((field, value)) = condition {
            statement = statement.update_if(field, value)?;
            serial = Some(self.config.conditional_consistency());
        }
        self.execute(&statement, serial).await?;
        entity.post_put();

        let existing = self.edges_for(entity.key()).await?;
        let desired = discover_edges(&entity);
        let writes: Vec<EdgeWrite> = if desired.is_empty() {
            existing.into_iter().map(EdgeWrite::Delete).collect()
        } else {
            reconcile(entity.key(), &desired, &existing)?
        };
        self.apply_edge_writes(&writes).await?;

        info!(table = binding.table(), edge_writes = writes.len(), "updated");
        Ok(entity)
    }

    /// Delete every stored edge of `entity`, then its row. No put hooks run.
    #[instrument(skip_all, fields(key = %entity.key()))]
    pub async fn delete(&self, entity: &dyn Entity) -> StoreResult<()> {
        let binding = self.registry.binding(entity.key().kind())?;
        let columns = self.primary_key_columns(binding).await?;
        let primary_key = construct_primary_key(entity, &columns)?;

        let edges = self.edges_for(entity.key()).await?;
        let writes: Vec<EdgeWrite> = edges.into_iter().map(EdgeWrite::Delete).collect();
        self.apply_edge_writes(&writes).await?;

        let query = Query::new(binding.table()).with_filters(primary_key_filters(&primary_key)?);
        self.execute(&StatementBuilder::delete(&query)?, None).await?;

        info!(table = binding.table(), edges = writes.len(), "deleted");
        Ok(())
    }

    async fn primary_key_columns(&self, binding: &ModelBinding) -> StoreResult<Vec<KeyColumn>> {
        match binding.primary_key() {
            PrimaryKeySource::Declared(columns) => Ok(columns.clone()),
            PrimaryKeySource::Live => {
                let metadata = self.transport.table_metadata(binding.table()).await?;
                if metadata.primary_key.is_empty() {
                    return Err(StoreError::Schema(format!(
                        "table {} reports no primary key",
                        metadata.name
                    )));
                }
                Ok(metadata.primary_key)
            }
        }
    }

    /// Encoded row with the primary key merged in, plus the key alone.
    async fn build_row(
        &self,
        binding: &ModelBinding,
        entity: &dyn Entity,
    ) -> StoreResult<(Row, Row)> {
        let columns = self.primary_key_columns(binding).await?;
        let primary_key = construct_primary_key(entity, &columns)?;
        let mut row = binding.storage().encode(entity)?;
        row.extend(primary_key.clone());
        Ok((row, primary_key))
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    /// Every stored edge whose source is `source`.
    pub async fn edges_for(&self, source: &Key) -> StoreResult<Vec<Edge>> {
        let query = edges_from(&self.config.edge_table, source)?;
        let rows = self
            .execute(&StatementBuilder::select(&query, None)?, None)
            .await?;
        rows.iter().map(Edge::from_row).collect()
    }

    /// Reconcile `existing` towards `desired` and apply the result.
    pub async fn set_edges(
        &self,
        source: &Key,
        desired: &[Edge],
        existing: &[Edge],
    ) -> StoreResult<Vec<EdgeWrite>> {
        let writes = reconcile(source, desired, existing)?;
        self.apply_edge_writes(&writes).await?;
        Ok(writes)
    }

    /// Issue edge writes: one batch when there are several and the transport
    /// supports it, otherwise one by one under the configured fallback.
    #[instrument(skip_all, fields(writes = writes.len()))]
    pub async fn apply_edge_writes(&self, writes: &[EdgeWrite]) -> StoreResult<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let table = self.config.edge_table.as_str();
        let statements = writes
            .iter()
            .map(|write| write.statement(table))
            .collect::<StoreResult<Vec<_>>>()?;

        if statements.len() > 1 {
            if self.transport.supports_batch() {
                let batch: Batch = statements.into_iter().collect();
                self.execute_batch(&batch).await?;
                return Ok(());
            }
            warn!(
                protocol = self.transport.protocol_version(),
                policy = ?self.config.edge_fallback,
                "batches unsupported; applying edge writes individually"
            );
        }

        match self.config.edge_fallback {
            EdgeFallback::FailFast => {
                for statement in &statements {
                    self.execute(statement, None).await?;
                }
                Ok(())
            }
            EdgeFallback::BestEffort => {
                let mut first_error = None;
                for statement in &statements {
                    if let Err(err) = self.execute(statement, None).await {
                        warn!(statement = %statement.text(), error = %err, "edge write failed");
                        first_error.get_or_insert(err);
                    }
                }
                match first_error {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
            EdgeFallback::Compensate => {
                for (applied, statement) in statements.iter().enumerate() {
                    if let Err(err) = self.execute(statement, None).await {
                        warn!(applied, error = %err, "edge write failed; compensating");
                        self.compensate(&writes[..applied], table).await;
                        return Err(err);
                    }
                }
                Ok(())
            }
        }
    }

    /// Undo `applied` in reverse order. Failures are logged, not raised.
    async fn compensate(&self, applied: &[EdgeWrite], table: &str) {
        for write in applied.iter().rev() {
            let undo = match write.inverse().statement(table) {
                Ok(undo) => undo,
                Err(err) => {
                    warn!(error = %err, "cannot build compensating edge write");
                    continue;
                }
            };
            if let Err(err) = self.execute(&undo, None).await {
                warn!(statement = %undo.text(), error = %err, "compensating edge write failed");
            }
        }
    }
}

/// A first row with `[applied] = false` means the condition did not hold.
fn check_applied(rows: &[Row], context: &str) -> StoreResult<()> {
    match rows.first().and_then(|row| row.get(APPLIED_COLUMN)) {
        Some(Value::Bool(false)) => Err(StoreError::OptimisticLock(context.to_string())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(flag: bool) -> Vec<Row> {
        let mut row = Row::new();
        row.insert(APPLIED_COLUMN.to_string(), Value::Bool(flag));
        vec![row]
    }

    #[test]
    fn test_not_applied_is_optimistic_lock() {
        assert!(matches!(
            check_applied(&applied(false), "UPDATE t"),
            Err(StoreError::OptimisticLock(context)) if context == "UPDATE t"
        ));
    }

    #[test]
    fn test_applied_and_plain_rows_pass() {
        assert!(check_applied(&applied(true), "UPDATE t").is_ok());
        assert!(check_applied(&[], "SELECT").is_ok());

        let mut row = Row::new();
        row.insert("title".into(), Value::from("Lorem"));
        assert!(check_applied(&[row], "SELECT").is_ok());
    }
}
