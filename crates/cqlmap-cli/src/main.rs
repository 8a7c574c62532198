//! cqlmap - statement and configuration inspector
//!
//! Renders the CQL a repository would send for a given query, without
//! touching a cluster.
//!
//! ## Commands
//!
//! - `select`: Render a SELECT for a table and a set of filters
//! - `delete`: Render a DELETE for a table and a set of filters
//! - `edges`: Render the edge index lookup for a source key
//! - `config`: Show the store configuration resolved from the environment

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use cqlmap::{
    edges_from, format_timestamp, Param, Statement, StatementBuilder, StoreConfig,
    DEFAULT_EDGE_TABLE,
};
use cqlmap_model::{Filter, Key, Operator, Query, Value};
use serde::Serialize;
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "cqlmap")]
#[command(author = "cqlmap contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect cqlmap statements and store configuration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a SELECT statement
    Select {
        #[command(flatten)]
        target: TargetArgs,

        /// Column to project (repeatable; default: all columns)
        #[arg(short, long = "field")]
        fields: Vec<String>,

        /// Maximum number of rows (0 drops the LIMIT clause)
        #[arg(short, long, default_value_t = 50)]
        limit: u32,

        /// Rows to skip (0 drops the OFFSET clause)
        #[arg(short, long, default_value_t = 0)]
        offset: u32,
    },

    /// Render a DELETE statement
    Delete {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Render the edge index lookup for a source entity
    Edges {
        /// Source key in url-safe form
        source: String,

        /// Edge table (default: CQLMAP_EDGE_TABLE or "edge")
        #[arg(long)]
        table: Option<String>,
    },

    /// Show the store configuration resolved from the environment
    Config,
}

#[derive(clap::Args)]
struct TargetArgs {
    /// Table (or entity kind) to address
    #[arg(short, long)]
    table: String,

    /// Filter, either `column<op>value` (op one of = != < <= > >=) or
    /// `column in a,b,c`. Filters keep their command-line order.
    #[arg(short = 'w', long = "where")]
    filters: Vec<String>,
}

impl TargetArgs {
    fn query(&self) -> Result<Query> {
        let filters = self
            .filters
            .iter()
            .map(|raw| parse_filter(raw))
            .collect::<Result<Vec<_>>>()?;
        Ok(Query::new(&self.table).with_filters(filters))
    }
}

/// Rendered statement, as printed to stdout
#[derive(Debug, Serialize)]
struct Rendered {
    statement: String,
    params: BTreeMap<String, Json>,
}

impl From<Statement> for Rendered {
    fn from(statement: Statement) -> Self {
        let (text, params) = statement.into_parts();
        Rendered {
            statement: text,
            params: params
                .into_iter()
                .map(|(name, param)| (name, param_to_json(&param)))
                .collect(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    cqlmap::telemetry::init_tracing(cli.json, level);

    let rendered = match cli.command {
        Commands::Select {
            target,
            fields,
            limit,
            offset,
        } => cmd_select(&target, &fields, limit, offset)?,
        Commands::Delete { target } => cmd_delete(&target)?,
        Commands::Edges { source, table } => cmd_edges(&source, table.as_deref())?,
        Commands::Config => cmd_config()?,
    };

    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}

fn cmd_select(target: &TargetArgs, fields: &[String], limit: u32, offset: u32) -> Result<Json> {
    let query = target.query()?.with_limit(limit).with_offset(offset);
    let projection: Vec<&str> = fields.iter().map(String::as_str).collect();
    let projection = (!projection.is_empty()).then_some(projection.as_slice());

    let statement = StatementBuilder::select(&query, projection)?;
    debug!(table = %target.table, text = statement.text(), "rendered select");
    Ok(serde_json::to_value(Rendered::from(statement))?)
}

fn cmd_delete(target: &TargetArgs) -> Result<Json> {
    let query = target.query()?;
    let statement = StatementBuilder::delete(&query)?;
    debug!(table = %target.table, text = statement.text(), "rendered delete");
    Ok(serde_json::to_value(Rendered::from(statement))?)
}

fn cmd_edges(source: &str, table: Option<&str>) -> Result<Json> {
    let source = Key::from_urlsafe(source).context("Invalid source key")?;
    let table = match table {
        Some(table) => table.to_string(),
        None => std::env::var("CQLMAP_EDGE_TABLE").unwrap_or_else(|_| DEFAULT_EDGE_TABLE.into()),
    };

    let statement = StatementBuilder::select(&edges_from(&table, &source)?, None)?;
    Ok(serde_json::to_value(Rendered::from(statement))?)
}

fn cmd_config() -> Result<Json> {
    dotenvy::dotenv().ok();
    let config = StoreConfig::from_env().context("Failed to load store configuration")?;
    Ok(serde_json::to_value(&config)?)
}

// ---------------------------------------------------------------------------
// Argument parsing
// ---------------------------------------------------------------------------

/// `column in a,b` when ` in ` comes before any comparison operator,
/// otherwise a comparison.
fn parse_filter(raw: &str) -> Result<Filter> {
    let comparison = raw.find(|c| matches!(c, '=' | '!' | '<' | '>'));
    let membership = raw.to_ascii_lowercase().find(" in ");

    match (membership, comparison) {
        (Some(at), Some(op)) if at < op => parse_membership(&raw[..at], &raw[at + 4..]),
        (Some(at), None) => parse_membership(&raw[..at], &raw[at + 4..]),
        _ => parse_condition(raw),
    }
}

/// Split `column<op>value` at the first comparison operator.
fn parse_condition(raw: &str) -> Result<Filter> {
    let start = raw
        .find(|c| matches!(c, '=' | '!' | '<' | '>'))
        .ok_or_else(|| anyhow!("no comparison operator in condition {raw:?}"))?;
    let rest = &raw[start..];
    let width = if rest.len() > 1 && rest.as_bytes()[1] == b'=' { 2 } else { 1 };

    let column = raw[..start].trim();
    let symbol = &rest[..width];
    let value = rest[width..].trim();
    if column.is_empty() {
        bail!("missing column in condition {raw:?}");
    }

    let op = Operator::from_symbol(symbol)
        .ok_or_else(|| anyhow!("unknown operator {symbol:?} in condition {raw:?}"))?;
    Ok(Filter::new(column, op, parse_value(value))?)
}

fn parse_membership(column: &str, values: &str) -> Result<Filter> {
    let column = column.trim();
    if column.is_empty() {
        bail!("missing column in membership on {values:?}");
    }

    let values: Vec<Value> = values
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(parse_value)
        .collect();
    if values.is_empty() {
        bail!("membership on {column} has no values");
    }
    Ok(Filter::is_in(column, values))
}

/// Integers and booleans are typed; everything else binds as text.
fn parse_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Int(i);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::Text(raw.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn param_to_json(param: &Param) -> Json {
    match param {
        Param::Value(value) => value_to_json(value),
        Param::Sequence(values) => Json::Array(values.iter().map(value_to_json).collect()),
    }
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Text(s) => json!(s),
        Value::Timestamp(ts) => json!(format_timestamp(ts)),
        Value::Key(key) => json!(key.urlsafe()),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Map(fields) => Json::Object(
            fields
                .iter()
                .map(|(name, v)| (name.clone(), value_to_json(v)))
                .collect::<Map<_, _>>(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(table: &str, filters: &[&str]) -> TargetArgs {
        TargetArgs {
            table: table.to_string(),
            filters: filters.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_condition_operators() {
        let cases = [
            ("num=5", Operator::Eq, Value::Int(5)),
            ("num != 5", Operator::Ne, Value::Int(5)),
            ("num<=5", Operator::Le, Value::Int(5)),
            ("num>=5", Operator::Ge, Value::Int(5)),
            ("num<5", Operator::Lt, Value::Int(5)),
            ("title>abc", Operator::Gt, Value::Text("abc".into())),
            ("done=true", Operator::Eq, Value::Bool(true)),
        ];

        for (raw, op, value) in cases {
            let filter = parse_condition(raw).unwrap();
            assert_eq!(filter.operator(), op, "{raw}");
            assert_eq!(filter.value(), &value, "{raw}");
        }
    }

    #[test]
    fn test_parse_condition_keeps_operator_chars_in_value() {
        let filter = parse_condition("expr=a=b").unwrap();
        assert_eq!(filter.name(), "expr");
        assert_eq!(filter.value(), &Value::Text("a=b".into()));
    }

    #[test]
    fn test_parse_condition_rejects_malformed() {
        assert!(parse_condition("title").is_err());
        assert!(parse_condition("=5").is_err());
        assert!(parse_condition("num!5").is_err());
    }

    #[test]
    fn test_parse_membership() {
        let filter = parse_filter("num IN 1, 2,3").unwrap();
        assert_eq!(filter.name(), "num");
        assert_eq!(filter.operator(), Operator::In);
        assert_eq!(
            filter.value(),
            &Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert!(parse_filter("num in ").is_err());
        assert!(parse_filter(" in 1,2").is_err());
    }

    #[test]
    fn test_parse_filter_prefers_leading_comparison() {
        let filter = parse_filter("title=made in china").unwrap();
        assert_eq!(filter.operator(), Operator::Eq);
        assert_eq!(filter.value(), &Value::Text("made in china".into()));
    }

    #[test]
    fn test_filters_keep_command_line_order() {
        let args = target("ImageAsset", &["title in a,b", "num>3"]);
        let rendered = cmd_select(&args, &[], 0, 0).unwrap();

        assert_eq!(
            rendered["statement"],
            "SELECT * FROM imageasset WHERE title IN :title AND num > :num"
        );
    }

    #[test]
    fn test_select_renders_params() {
        let args = target("ImageAsset", &["num>3", "title in a,b"]);
        let rendered = cmd_select(&args, &["title".to_string()], 10, 0).unwrap();

        assert_eq!(
            rendered["statement"],
            "SELECT title FROM imageasset WHERE num > :num AND title IN :title LIMIT 10"
        );
        assert_eq!(rendered["params"]["num"], json!(3));
        assert_eq!(rendered["params"]["title"], json!(["a", "b"]));
    }

    #[test]
    fn test_delete_requires_filter() {
        assert!(cmd_delete(&target("ImageAsset", &[])).is_err());

        let rendered = cmd_delete(&target("ImageAsset", &["key=abc"])).unwrap();
        assert_eq!(rendered["statement"], "DELETE FROM imageasset WHERE key = :key");
    }

    #[test]
    fn test_edges_lookup_uses_table_override() {
        let source = Key::generate("ImageAsset").unwrap();
        let rendered = cmd_edges(&source.urlsafe(), Some("links")).unwrap();

        assert_eq!(rendered["statement"], "SELECT * FROM links WHERE source = :source");
        assert_eq!(rendered["params"]["source"], json!(source.urlsafe()));
    }

    #[tokio::test]
    async fn test_value_to_json_nested() {
        let key = Key::generate("Format").unwrap();
        let mut fields = cqlmap_model::Fields::new();
        fields.insert("imageFormat".to_string(), Value::Key(key.clone()));
        let value = Value::List(vec![Value::Map(fields), Value::Null]);

        assert_eq!(
            value_to_json(&value),
            json!([{ "imageFormat": key.urlsafe() }, null])
        );
    }
}
