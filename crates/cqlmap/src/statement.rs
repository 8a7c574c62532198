//! CQL statement building
//!
//! Translates [`Query`] descriptions and column mappings into statement text
//! with `:name` placeholders plus the matching parameter map. Values never
//! enter the text; identifiers are validated before they do.
//!
//! Every placeholder in a built statement has exactly one parameter and every
//! parameter is referenced by exactly one placeholder.

use std::collections::BTreeMap;
use std::fmt;

use cqlmap_model::{Filter, Operator, Query, Value};

use crate::error::{StoreError, StoreResult};
use crate::transport::{Row, SerialConsistency};

/// A bound parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Single value bound as-is
    Value(Value),
    /// Ordered values the driver expands as a literal set (`IN :name`)
    Sequence(Vec<Value>),
}

/// Named parameters of a statement
pub type Params = BTreeMap<String, Param>;

/// Statement text plus its named parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    text: String,
    params: Params,
}

impl Statement {
    /// Wrap pre-built text and parameters.
    pub fn new(text: impl Into<String>, params: Params) -> Self {
        Statement {
            text: text.into(),
            params,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.get(name)
    }

    pub fn into_parts(self) -> (String, Params) {
        (self.text, self.params)
    }

    /// Guard an insert with ` IF NOT EXISTS`.
    pub fn if_not_exists(mut self) -> Self {
        self.text.push_str(" IF NOT EXISTS");
        self
    }

    /// Guard an update with ` IF <field> = :if_<field>`.
    ///
    /// The parameter is prefixed so it cannot collide with the same column
    /// bound in the SET list.
    pub fn update_if(mut self, field: &str, value: impl Into<Value>) -> StoreResult<Self> {
        let column = identifier(field)?;
        let name = format!("if_{column}");
        self.text.push_str(&format!(" IF {column} = :{name}"));
        self.params.insert(name, Param::Value(stringify(value.into())));
        Ok(self)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Stateless translator from query descriptions to [`Statement`]s
pub struct StatementBuilder;

impl StatementBuilder {
    /// `SELECT <fields|*> FROM <table> [WHERE ...] [LIMIT n] [OFFSET n]`
    pub fn select(query: &Query, fields: Option<&[&str]>) -> StoreResult<Statement> {
        let columns = match fields {
            Some(fields) if !fields.is_empty() => fields
                .iter()
                .map(|field| identifier(field))
                .collect::<StoreResult<Vec<_>>>()?
                .join(", "),
            _ => "*".to_string(),
        };

        let mut params = Params::new();
        let mut text = format!("SELECT {columns} FROM {}", table_name(query.table())?);
        text.push_str(&where_clause(query.filters(), &mut params)?);

        if query.limit() > 0 {
            text.push_str(&format!(" LIMIT {}", query.limit()));
        }
        if query.offset() > 0 {
            text.push_str(&format!(" OFFSET {}", query.offset()));
        }

        Ok(Statement { text, params })
    }

    /// `DELETE FROM <table> WHERE ...`
    ///
    /// Refuses a query without filters rather than clearing the table.
    pub fn delete(query: &Query) -> StoreResult<Statement> {
        if query.filters().is_empty() {
            return Err(StoreError::Query(
                "a delete statement must have filters".to_string(),
            ));
        }

        let mut params = Params::new();
        let mut text = format!("DELETE FROM {}", table_name(query.table())?);
        text.push_str(&where_clause(query.filters(), &mut params)?);

        Ok(Statement { text, params })
    }

    /// `INSERT INTO <table> (c1, c2, ...) VALUES (:c1, :c2, ...)`
    ///
    /// Columns follow the row's (sorted) iteration order.
    pub fn insert(table: &str, row: &Row) -> StoreResult<Statement> {
        if row.is_empty() {
            return Err(StoreError::Query(
                "an insert statement needs at least one column".to_string(),
            ));
        }

        let mut columns = Vec::with_capacity(row.len());
        let mut placeholders = Vec::with_capacity(row.len());
        let mut params = Params::new();

        for (name, value) in row {
            let column = identifier(name)?;
            columns.push(column);
            placeholders.push(format!(":{column}"));
            params.insert(column.to_string(), Param::Value(stringify(value.clone())));
        }

        let text = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table_name(table)?,
            columns.join(", "),
            placeholders.join(", ")
        );

        Ok(Statement { text, params })
    }

    /// `UPDATE <table> SET c1 = :c1, ... WHERE ...`
    ///
    /// A single filter is passed as a one-element slice. Where- and
    /// set-parameters share one map, so a column may not appear in both.
    pub fn update(table: &str, row: &Row, filters: &[Filter]) -> StoreResult<Statement> {
        if row.is_empty() {
            return Err(StoreError::Query(
                "an update statement needs at least one SET column".to_string(),
            ));
        }
        if filters.is_empty() {
            return Err(StoreError::Query(
                "an update statement must have filters".to_string(),
            ));
        }
        if let Some(filter) = filters.iter().find(|f| row.contains_key(f.name())) {
            return Err(StoreError::Query(format!(
                "column {} appears in both SET and WHERE",
                filter.name()
            )));
        }

        let mut params = Params::new();
        let mut assignments = Vec::with_capacity(row.len());
        for (name, value) in row {
            let column = identifier(name)?;
            assignments.push(format!("{column} = :{column}"));
            params.insert(column.to_string(), Param::Value(stringify(value.clone())));
        }

        let mut text = format!(
            "UPDATE {} SET {}",
            table_name(table)?,
            assignments.join(", ")
        );
        text.push_str(&where_clause(filters, &mut params)?);

        Ok(Statement { text, params })
    }
}

/// Statements executed atomically as one `BATCH`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    statements: Vec<Statement>,
    serial_consistency: Option<SerialConsistency>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serial consistency for conditional statements inside the batch
    pub fn with_serial_consistency(mut self, serial: Option<SerialConsistency>) -> Self {
        self.serial_consistency = serial;
        self
    }

    pub fn add(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn serial_consistency(&self) -> Option<SerialConsistency> {
        self.serial_consistency
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl FromIterator<Statement> for Batch {
    fn from_iter<I: IntoIterator<Item = Statement>>(iter: I) -> Self {
        Batch {
            statements: iter.into_iter().collect(),
            serial_consistency: None,
        }
    }
}

/// Bind-ready form of a value: keys become their URL-safe string, lists and
/// maps are converted element-wise, everything else passes through.
pub fn stringify(value: Value) -> Value {
    match value {
        Value::Key(key) => Value::Text(key.urlsafe()),
        Value::List(items) => Value::List(items.into_iter().map(stringify).collect()),
        Value::Map(fields) => Value::Map(
            fields
                .into_iter()
                .map(|(name, v)| (name, stringify(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`.
fn identifier(name: &str) -> StoreResult<&str> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(name)
    } else {
        Err(StoreError::Query(format!("invalid identifier {name:?}")))
    }
}

fn table_name(table: &str) -> StoreResult<String> {
    identifier(table).map(str::to_ascii_lowercase)
}

fn where_clause(filters: &[Filter], params: &mut Params) -> StoreResult<String> {
    if filters.is_empty() {
        return Ok(String::new());
    }

    let mut clauses = Vec::with_capacity(filters.len());
    for filter in filters {
        let column = identifier(filter.name())?;
        let param = match (filter.operator(), filter.value()) {
            (Operator::In, Value::List(items)) => {
                Param::Sequence(items.iter().cloned().map(stringify).collect())
            }
            (Operator::In, other) => {
                return Err(StoreError::Query(format!(
                    "IN filter on {column} needs a list value, got {}",
                    other.type_name()
                )));
            }
            (_, value) => Param::Value(stringify(value.clone())),
        };

        let placeholder = unique_placeholder(column, params);
        clauses.push(format!(
            "{column} {} :{placeholder}",
            filter.operator().symbol()
        ));
        params.insert(placeholder, param);
    }

    Ok(format!(" WHERE {}", clauses.join(" AND ")))
}

/// `column`, or `column_N` when a previous filter already bound `column`.
fn unique_placeholder(column: &str, params: &Params) -> String {
    if !params.contains_key(column) {
        return column.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{column}_{n}");
        if !params.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
