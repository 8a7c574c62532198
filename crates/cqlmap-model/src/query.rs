//! Backend-agnostic query description
//!
//! A [`Query`] is a table plus an ordered list of ANDed [`Filter`]s and
//! limit/offset. Filters are validated on construction, so anything that
//! reaches a statement builder is already well-formed.

use crate::error::{ModelError, ModelResult};
use crate::value::Value;

/// Default row limit for a query that sets none
pub const DEFAULT_LIMIT: u32 = 50;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

impl Operator {
    /// CQL symbol for the operator
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::In => "IN",
        }
    }

    /// Parse a CQL symbol (`IN` is case-insensitive)
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "=" => Some(Operator::Eq),
            "!=" => Some(Operator::Ne),
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::Le),
            ">" => Some(Operator::Gt),
            ">=" => Some(Operator::Ge),
            s if s.eq_ignore_ascii_case("in") => Some(Operator::In),
            _ => None,
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One `field op value` condition
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    name: String,
    op: Operator,
    value: Value,
}

impl Filter {
    /// Build a filter.
    ///
    /// `IN` takes a list value; every other operator takes a single value.
    /// A list compared with `=` (or any other scalar operator) is rejected.
    pub fn new(name: impl Into<String>, op: Operator, value: impl Into<Value>) -> ModelResult<Self> {
        let name = name.into();
        let value = value.into();

        match (op, &value) {
            (Operator::In, Value::List(_)) => {}
            (Operator::In, other) => {
                return Err(ModelError::Query(format!(
                    "IN filter on {name} needs a list value, got {}",
                    other.type_name()
                )));
            }
            (op, Value::List(_)) => {
                return Err(ModelError::Query(format!(
                    "multi-valued filter on {name} requires IN, not {op}"
                )));
            }
            _ => {}
        }

        Ok(Filter { name, op, value })
    }

    pub fn eq(name: impl Into<String>, value: impl Into<Value>) -> ModelResult<Self> {
        Self::new(name, Operator::Eq, value)
    }

    pub fn ne(name: impl Into<String>, value: impl Into<Value>) -> ModelResult<Self> {
        Self::new(name, Operator::Ne, value)
    }

    pub fn lt(name: impl Into<String>, value: impl Into<Value>) -> ModelResult<Self> {
        Self::new(name, Operator::Lt, value)
    }

    pub fn le(name: impl Into<String>, value: impl Into<Value>) -> ModelResult<Self> {
        Self::new(name, Operator::Le, value)
    }

    pub fn gt(name: impl Into<String>, value: impl Into<Value>) -> ModelResult<Self> {
        Self::new(name, Operator::Gt, value)
    }

    pub fn ge(name: impl Into<String>, value: impl Into<Value>) -> ModelResult<Self> {
        Self::new(name, Operator::Ge, value)
    }

    /// Membership filter; always valid since the value is a list.
    pub fn is_in<I, V>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter {
            name: name.into(),
            op: Operator::In,
            value: Value::List(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operator(&self) -> Operator {
        self.op
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Select/delete description against one table
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    filters: Vec<Filter>,
    limit: u32,
    offset: u32,
}

impl Query {
    /// Query over `table` with no filters, limit 50 and offset 0
    pub fn new(table: impl Into<String>) -> Self {
        Query {
            table: table.into(),
            filters: Vec::new(),
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }

    /// Append a filter (ANDed, order preserved)
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    /// Row limit; zero means unlimited
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Rows to skip; zero means none
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let query = Query::new("imageasset");

        assert_eq!(query.limit(), DEFAULT_LIMIT);
        assert_eq!(query.offset(), 0);
        assert!(query.filters().is_empty());
    }

    #[test]
    fn test_equality_rejects_list() {
        let err = Filter::eq("titles", vec!["Here", "There"]).unwrap_err();

        assert!(matches!(err, ModelError::Query(_)));
    }

    #[test]
    fn test_in_requires_list() {
        assert!(Filter::new("titles", Operator::In, "Here").is_err());
        assert!(Filter::new("titles", Operator::In, vec!["Here"]).is_ok());
    }

    #[test]
    fn test_operator_symbols_round_trip() {
        for op in [
            Operator::Eq,
            Operator::Ne,
            Operator::Lt,
            Operator::Le,
            Operator::Gt,
            Operator::Ge,
            Operator::In,
        ] {
            assert_eq!(Operator::from_symbol(op.symbol()), Some(op));
        }
    }
}
