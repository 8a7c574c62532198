//! In-memory transport (testing only)
//!
//! `MemoryTransport` understands the statement grammar [`StatementBuilder`]
//! emits, keeps rows per table keyed by their primary key, evaluates
//! lightweight transactions and atomic batches, and records everything it
//! was asked to run.
//!
//! [`StatementBuilder`]: crate::StatementBuilder

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cqlmap_model::{Operator, Value};

use crate::binding::KeyColumn;
use crate::codec::KEY_COLUMN;
use crate::edge::{DEFAULT_EDGE_TABLE, LABEL_COLUMN, SOURCE_COLUMN, TARGET_COLUMN};
use crate::error::TransportError;
use crate::statement::{Batch, Param, Params, Statement};
use crate::transport::{
    Row, SerialConsistency, TableMetadata, Transport, APPLIED_COLUMN, MIN_BATCH_PROTOCOL_VERSION,
};

// ---------------------------------------------------------------------------
// MemoryTransport
// ---------------------------------------------------------------------------

/// One request the transport received, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum Executed {
    Statement {
        statement: Statement,
        serial_consistency: Option<SerialConsistency>,
    },
    Batch(Batch),
}

#[derive(Debug, Clone)]
struct Table {
    primary_key: Vec<KeyColumn>,
    rows: Vec<Row>,
}

impl Table {
    fn new(primary_key: Vec<KeyColumn>) -> Self {
        Table {
            primary_key,
            rows: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Failure {
    fragment: String,
    skip: usize,
    error: TransportError,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Table>,
    log: Vec<Executed>,
    failures: Vec<Failure>,
}

/// In-memory wide-column store.
///
/// The edge table is preconfigured with primary key
/// `(source, label, target)`. Tables written before being configured get
/// the primary key `(key)`.
#[derive(Debug)]
pub struct MemoryTransport {
    protocol_version: u8,
    state: Mutex<State>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Store speaking protocol v2 (batches available)
    pub fn new() -> Self {
        let mut state = State::default();
        state.tables.insert(
            DEFAULT_EDGE_TABLE.to_string(),
            Table::new(vec![
                KeyColumn::text(SOURCE_COLUMN),
                KeyColumn::text(LABEL_COLUMN),
                KeyColumn::text(TARGET_COLUMN),
            ]),
        );
        Self {
            protocol_version: MIN_BATCH_PROTOCOL_VERSION,
            state: Mutex::new(state),
        }
    }

    pub fn with_protocol_version(mut self, version: u8) -> Self {
        self.protocol_version = version;
        self
    }

    /// Configure (or reset) `name` with the given primary key.
    pub fn with_table(self, name: &str, primary_key: Vec<KeyColumn>) -> Self {
        self.lock()
            .tables
            .insert(name.to_ascii_lowercase(), Table::new(primary_key));
        self
    }

    /// Fail the `skip + 1`-th statement whose text contains `fragment`, once.
    ///
    /// A batch fails as a whole when one of its members matches.
    pub fn inject_failure(&self, fragment: impl Into<String>, skip: usize, error: TransportError) {
        self.lock().failures.push(Failure {
            fragment: fragment.into(),
            skip,
            error,
        });
    }

    /// Everything received so far
    pub fn executed(&self) -> Vec<Executed> {
        self.lock().log.clone()
    }

    /// Text of every statement received, batch members flattened in order
    pub fn statements(&self) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .flat_map(|executed| match executed {
                Executed::Statement { statement, .. } => vec![statement.text().to_string()],
                Executed::Batch(batch) => batch
                    .statements()
                    .iter()
                    .map(|s| s.text().to_string())
                    .collect(),
            })
            .collect()
    }

    /// Batches received so far
    pub fn batches(&self) -> Vec<Batch> {
        self.lock()
            .log
            .iter()
            .filter_map(|executed| match executed {
                Executed::Batch(batch) => Some(batch.clone()),
                Executed::Statement { .. } => None,
            })
            .collect()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Stored rows of `table`, in insertion order
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(&table.to_ascii_lowercase())
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Store `row` directly, bypassing the statement path.
    pub fn seed(&self, table: &str, row: Row) -> Result<(), TransportError> {
        let mut state = self.lock();
        let table = table_mut(&mut state.tables, &table.to_ascii_lowercase());
        upsert(table, row, false).map(|_| ())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn execute(
        &self,
        statement: &Statement,
        serial_consistency: Option<SerialConsistency>,
    ) -> Result<Vec<Row>, TransportError> {
        let mut state = self.lock();
        state.log.push(Executed::Statement {
            statement: statement.clone(),
            serial_consistency,
        });
        if let Some(err) = take_failure(&mut state, statement.text()) {
            return Err(err);
        }

        let command = parse(statement.text(), statement.params())?;
        if command.is_conditional() && serial_consistency.is_none() {
            return Err(TransportError::Rejected(format!(
                "conditional statement without serial consistency: {}",
                statement.text()
            )));
        }
        apply(&mut state.tables, command)
    }

    async fn execute_batch(&self, batch: &Batch) -> Result<Vec<Row>, TransportError> {
        let mut state = self.lock();
        state.log.push(Executed::Batch(batch.clone()));

        if self.protocol_version < MIN_BATCH_PROTOCOL_VERSION {
            return Err(TransportError::Rejected(format!(
                "BATCH needs protocol v{MIN_BATCH_PROTOCOL_VERSION}, negotiated v{}",
                self.protocol_version
            )));
        }
        for statement in batch.statements() {
            if let Some(err) = take_failure(&mut state, statement.text()) {
                return Err(err);
            }
        }

        let mut tables = state.tables.clone();
        let mut conditional = false;
        for statement in batch.statements() {
            let command = parse(statement.text(), statement.params())?;
            if matches!(command, Command::Select { .. }) {
                return Err(TransportError::Rejected(
                    "SELECT is not allowed in a batch".to_string(),
                ));
            }
            if command.is_conditional() && batch.serial_consistency().is_none() {
                return Err(TransportError::Rejected(
                    "conditional batch without serial consistency".to_string(),
                ));
            }
            conditional |= command.is_conditional();

            let rows = apply(&mut tables, command)?;
            if is_rejected_condition(&rows) {
                return Ok(rows);
            }
        }

        state.tables = tables;
        Ok(if conditional {
            vec![applied_row(true)]
        } else {
            Vec::new()
        })
    }

    async fn table_metadata(&self, table: &str) -> Result<TableMetadata, TransportError> {
        let name = table.to_ascii_lowercase();
        self.lock()
            .tables
            .get(&name)
            .map(|t| TableMetadata {
                name: name.clone(),
                primary_key: t.primary_key.clone(),
            })
            .ok_or_else(|| TransportError::Rejected(format!("unconfigured table {name}")))
    }

    fn protocol_version(&self) -> u8 {
        self.protocol_version
    }
}

fn take_failure(state: &mut State, text: &str) -> Option<TransportError> {
    let index = state
        .failures
        .iter()
        .position(|f| text.contains(f.fragment.as_str()))?;
    if state.failures[index].skip > 0 {
        state.failures[index].skip -= 1;
        return None;
    }
    Some(state.failures.remove(index).error)
}

// ---------------------------------------------------------------------------
// Statement parsing
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Condition {
    column: String,
    op: Operator,
    value: Param,
}

#[derive(Debug)]
enum Command {
    Select {
        table: String,
        columns: Option<Vec<String>>,
        conditions: Vec<Condition>,
        limit: Option<usize>,
        offset: usize,
    },
    Insert {
        table: String,
        row: Row,
        if_not_exists: bool,
    },
    Update {
        table: String,
        assignments: Row,
        conditions: Vec<Condition>,
        guard: Option<(String, Value)>,
    },
    Delete {
        table: String,
        conditions: Vec<Condition>,
    },
}

impl Command {
    fn is_conditional(&self) -> bool {
        match self {
            Command::Insert { if_not_exists, .. } => *if_not_exists,
            Command::Update { guard, .. } => guard.is_some(),
            _ => false,
        }
    }
}

struct Parser<'a> {
    tokens: Vec<String>,
    pos: usize,
    params: &'a Params,
    used: BTreeSet<String>,
}

fn rejected(message: impl Into<String>) -> TransportError {
    TransportError::Rejected(message.into())
}

impl<'a> Parser<'a> {
    fn new(text: &str, params: &'a Params) -> Self {
        let spaced = text
            .replace('(', " ( ")
            .replace(')', " ) ")
            .replace(',', " , ");
        Parser {
            tokens: spaced.split_whitespace().map(str::to_string).collect(),
            pos: 0,
            params,
            used: BTreeSet::new(),
        }
    }

    fn next(&mut self) -> Result<String, TransportError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| rejected("unexpected end of statement"))?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, keyword: &str) -> bool {
        match self.tokens.get(self.pos) {
            Some(token) if token.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, keyword: &str) -> Result<(), TransportError> {
        if self.eat(keyword) {
            Ok(())
        } else {
            Err(rejected(format!(
                "expected {keyword}, found {:?}",
                self.tokens.get(self.pos)
            )))
        }
    }

    fn identifiers(&mut self) -> Result<Vec<String>, TransportError> {
        let mut names = vec![self.next()?];
        while self.eat(",") {
            names.push(self.next()?);
        }
        Ok(names)
    }

    fn number(&mut self) -> Result<usize, TransportError> {
        let token = self.next()?;
        token
            .parse()
            .map_err(|_| rejected(format!("expected a number, found {token:?}")))
    }

    fn placeholder(&mut self) -> Result<Param, TransportError> {
        let token = self.next()?;
        let name = token
            .strip_prefix(':')
            .ok_or_else(|| rejected(format!("expected a placeholder, found {token:?}")))?;
        let param = self
            .params
            .get(name)
            .cloned()
            .ok_or_else(|| rejected(format!("unbound placeholder :{name}")))?;
        self.used.insert(name.to_string());
        Ok(param)
    }

    fn scalar(&mut self) -> Result<Value, TransportError> {
        match self.placeholder()? {
            Param::Value(value) => Ok(value),
            Param::Sequence(_) => Err(rejected("sequence bound where a single value is expected")),
        }
    }

    fn where_clause(&mut self) -> Result<Vec<Condition>, TransportError> {
        let mut conditions = Vec::new();
        if !self.eat("WHERE") {
            return Ok(conditions);
        }
        loop {
            let column = self.next()?;
            let symbol = self.next()?;
            let op = Operator::from_symbol(&symbol)
                .ok_or_else(|| rejected(format!("unknown operator {symbol:?}")))?;
            let value = self.placeholder()?;
            if matches!((op, &value), (Operator::In, Param::Value(_))) {
                return Err(rejected(format!("IN on {column} needs a sequence")));
            }
            conditions.push(Condition { column, op, value });
            if !self.eat("AND") {
                return Ok(conditions);
            }
        }
    }

    fn finish(self) -> Result<(), TransportError> {
        if let Some(token) = self.tokens.get(self.pos) {
            return Err(rejected(format!("unexpected token {token:?}")));
        }
        if let Some(unused) = self.params.keys().find(|k| !self.used.contains(*k)) {
            return Err(rejected(format!("parameter {unused} is never referenced")));
        }
        Ok(())
    }
}

fn parse(text: &str, params: &Params) -> Result<Command, TransportError> {
    let mut p = Parser::new(text, params);
    let verb = p.next()?.to_ascii_uppercase();

    let command = match verb.as_str() {
        "SELECT" => {
            let columns = if p.eat("*") {
                None
            } else {
                Some(p.identifiers()?)
            };
            p.expect("FROM")?;
            let table = p.next()?;
            let conditions = p.where_clause()?;
            let limit = if p.eat("LIMIT") {
                Some(p.number()?)
            } else {
                None
            };
            let offset = if p.eat("OFFSET") { p.number()? } else { 0 };
            Command::Select {
                table,
                columns,
                conditions,
                limit,
                offset,
            }
        }
        "INSERT" => {
            p.expect("INTO")?;
            let table = p.next()?;
            p.expect("(")?;
            let columns = p.identifiers()?;
            p.expect(")")?;
            p.expect("VALUES")?;
            p.expect("(")?;
            let mut values = vec![p.scalar()?];
            while p.eat(",") {
                values.push(p.scalar()?);
            }
            p.expect(")")?;
            if columns.len() != values.len() {
                return Err(rejected("column and value counts differ"));
            }
            let if_not_exists = if p.eat("IF") {
                p.expect("NOT")?;
                p.expect("EXISTS")?;
                true
            } else {
                false
            };
            Command::Insert {
                table,
                row: columns.into_iter().zip(values).collect(),
                if_not_exists,
            }
        }
        "UPDATE" => {
            let table = p.next()?;
            p.expect("SET")?;
            let mut assignments = Row::new();
            loop {
                let column = p.next()?;
                p.expect("=")?;
                assignments.insert(column, p.scalar()?);
                if !p.eat(",") {
                    break;
                }
            }
            let conditions = p.where_clause()?;
            let guard = if p.eat("IF") {
                let column = p.next()?;
                p.expect("=")?;
                Some((column, p.scalar()?))
            } else {
                None
            };
            Command::Update {
                table,
                assignments,
                conditions,
                guard,
            }
        }
        "DELETE" => {
            p.expect("FROM")?;
            let table = p.next()?;
            let conditions = p.where_clause()?;
            Command::Delete { table, conditions }
        }
        other => return Err(rejected(format!("unsupported statement {other}"))),
    };

    p.finish()?;
    Ok(command)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn table_mut<'a>(tables: &'a mut HashMap<String, Table>, name: &str) -> &'a mut Table {
    tables
        .entry(name.to_string())
        .or_insert_with(|| Table::new(vec![KeyColumn::text(KEY_COLUMN)]))
}

fn applied_row(applied: bool) -> Row {
    let mut row = Row::new();
    row.insert(APPLIED_COLUMN.to_string(), Value::Bool(applied));
    row
}

fn is_rejected_condition(rows: &[Row]) -> bool {
    rows.first().and_then(|r| r.get(APPLIED_COLUMN)) == Some(&Value::Bool(false))
}

fn primary_key_of(table: &Table, row: &Row) -> Result<Vec<Value>, TransportError> {
    table
        .primary_key
        .iter()
        .map(|column| match row.get(&column.name) {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ => Err(rejected(format!(
                "missing primary key column {}",
                column.name
            ))),
        })
        .collect()
}

fn position_of(table: &Table, key: &[Value]) -> Option<usize> {
    table
        .rows
        .iter()
        .position(|row| primary_key_of(table, row).map_or(false, |k| k == key))
}

/// Insert or merge `row`; with `if_not_exists` an existing row is left alone.
fn upsert(table: &mut Table, row: Row, if_not_exists: bool) -> Result<Vec<Row>, TransportError> {
    let key = primary_key_of(table, &row)?;
    match position_of(table, &key) {
        Some(index) if if_not_exists => {
            let mut current = table.rows[index].clone();
            current.insert(APPLIED_COLUMN.to_string(), Value::Bool(false));
            Ok(vec![current])
        }
        Some(index) => {
            assign(&mut table.rows[index], row);
            Ok(Vec::new())
        }
        None => {
            let mut stored = Row::new();
            assign(&mut stored, row);
            table.rows.push(stored);
            Ok(if if_not_exists {
                vec![applied_row(true)]
            } else {
                Vec::new()
            })
        }
    }
}

fn assign(target: &mut Row, values: Row) {
    for (column, value) in values {
        if value.is_null() {
            target.remove(&column);
        } else {
            target.insert(column, value);
        }
    }
}

fn apply(tables: &mut HashMap<String, Table>, command: Command) -> Result<Vec<Row>, TransportError> {
    match command {
        Command::Select {
            table,
            columns,
            conditions,
            limit,
            offset,
        } => {
            let Some(table) = tables.get(&table) else {
                return Ok(Vec::new());
            };
            let matching = table
                .rows
                .iter()
                .filter(|row| conditions.iter().all(|c| holds(row, c)))
                .skip(offset)
                .take(limit.unwrap_or(usize::MAX));
            Ok(matching
                .map(|row| match &columns {
                    Some(columns) => columns
                        .iter()
                        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                        .collect(),
                    None => row.clone(),
                })
                .collect())
        }
        Command::Insert {
            table,
            row,
            if_not_exists,
        } => upsert(table_mut(tables, &table), row, if_not_exists),
        Command::Update {
            table,
            assignments,
            conditions,
            guard,
        } => {
            let table = table_mut(tables, &table);

            let mut key_row = Row::new();
            for condition in &conditions {
                match (&condition.op, &condition.value) {
                    (Operator::Eq, Param::Value(value)) => {
                        key_row.insert(condition.column.clone(), value.clone());
                    }
                    _ => {
                        return Err(rejected(format!(
                            "UPDATE only restricts primary key columns by equality, got {} {}",
                            condition.column, condition.op
                        )))
                    }
                }
            }
            let key = primary_key_of(table, &key_row)?;
            let index = position_of(table, &key);

            if let Some((column, expected)) = &guard {
                let current = index.and_then(|i| table.rows[i].get(column));
                if current != Some(expected) {
                    let mut row = applied_row(false);
                    if let Some(value) = current {
                        row.insert(column.clone(), value.clone());
                    }
                    return Ok(vec![row]);
                }
            }

            match index {
                Some(i) => assign(&mut table.rows[i], assignments),
                None => {
                    let mut stored = key_row;
                    assign(&mut stored, assignments);
                    table.rows.push(stored);
                }
            }
            Ok(if guard.is_some() {
                vec![applied_row(true)]
            } else {
                Vec::new()
            })
        }
        Command::Delete { table, conditions } => {
            if let Some(table) = tables.get_mut(&table) {
                table
                    .rows
                    .retain(|row| !conditions.iter().all(|c| holds(row, c)));
            }
            Ok(Vec::new())
        }
    }
}

fn holds(row: &Row, condition: &Condition) -> bool {
    let actual = row.get(&condition.column).unwrap_or(&Value::Null);
    match (condition.op, &condition.value) {
        (Operator::In, Param::Sequence(items)) => items.contains(actual),
        (op, Param::Value(expected)) => compare(actual, expected).map_or(false, |ord| match op {
            Operator::Eq => ord == Ordering::Equal,
            Operator::Ne => ord != Ordering::Equal,
            Operator::Lt => ord == Ordering::Less,
            Operator::Le => ord != Ordering::Greater,
            Operator::Gt => ord == Ordering::Greater,
            Operator::Ge => ord != Ordering::Less,
            Operator::In => false,
        }),
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Timestamp(x), Value::Timestamp(y)) => Some(x.cmp(y)),
        (x, y) if x == y => Some(Ordering::Equal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::StatementBuilder;
    use cqlmap_model::{Filter, Query};

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_insert_then_select() {
        let store = MemoryTransport::new();
        let insert = StatementBuilder::insert(
            "book",
            &row(&[("key", Value::from("Book-1")), ("num", Value::Int(1))]),
        )
        .unwrap();
        store.execute(&insert, None).await.unwrap();

        let query = Query::new("book").with_filter(Filter::ge("num", 1).unwrap());
        let rows = store
            .execute(&StatementBuilder::select(&query, None).unwrap(), None)
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["num"], Value::Int(1));
    }

    #[tokio::test]
    async fn test_if_not_exists_reports_existing_row() {
        let store = MemoryTransport::new();
        let insert = StatementBuilder::insert("book", &row(&[("key", Value::from("Book-1"))]))
            .unwrap()
            .if_not_exists();
        let serial = Some(SerialConsistency::Serial);

        let first = store.execute(&insert, serial).await.unwrap();
        let second = store.execute(&insert, serial).await.unwrap();

        assert_eq!(first[0][APPLIED_COLUMN], Value::Bool(true));
        assert_eq!(second[0][APPLIED_COLUMN], Value::Bool(false));
        assert_eq!(store.rows("book").len(), 1);
    }

    #[tokio::test]
    async fn test_conditional_requires_serial_consistency() {
        let store = MemoryTransport::new();
        let insert = StatementBuilder::insert("book", &row(&[("key", Value::from("Book-1"))]))
            .unwrap()
            .if_not_exists();

        assert!(matches!(
            store.execute(&insert, None).await,
            Err(TransportError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_unbound_and_unused_params_rejected() {
        let store = MemoryTransport::new();

        let unbound = Statement::new("SELECT * FROM book WHERE key = :key", Params::new());
        assert!(store.execute(&unbound, None).await.is_err());

        let mut params = Params::new();
        params.insert("extra".into(), Param::Value(Value::Int(1)));
        let unused = Statement::new("SELECT * FROM book", params);
        assert!(store.execute(&unused, None).await.is_err());
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let store = MemoryTransport::new();
        let good = StatementBuilder::insert("book", &row(&[("key", Value::from("Book-1"))])).unwrap();
        let bad = StatementBuilder::insert("book", &row(&[("title", Value::from("no key"))])).unwrap();
        let batch: Batch = vec![good, bad].into_iter().collect();

        assert!(store.execute_batch(&batch).await.is_err());
        assert!(store.rows("book").is_empty());
    }

    #[tokio::test]
    async fn test_batch_needs_protocol_v2() {
        let store = MemoryTransport::new().with_protocol_version(1);
        let insert = StatementBuilder::insert("book", &row(&[("key", Value::from("Book-1"))])).unwrap();
        let batch: Batch = std::iter::once(insert).collect();

        assert!(!store.supports_batch());
        assert!(matches!(
            store.execute_batch(&batch).await,
            Err(TransportError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = MemoryTransport::new();
        store.inject_failure("FROM book", 1, TransportError::Timeout("slow".into()));
        let select = StatementBuilder::select(&Query::new("book"), None).unwrap();

        assert!(store.execute(&select, None).await.is_ok());
        assert_eq!(
            store.execute(&select, None).await,
            Err(TransportError::Timeout("slow".into()))
        );
        assert!(store.execute(&select, None).await.is_ok());
    }
}
