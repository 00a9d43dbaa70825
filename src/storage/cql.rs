//! CQL statement rendering for the wide-column backend
//!
//! Values travel as JSON text and are decoded server-side with `fromJson()`,
//! and rows come back through `SELECT JSON`, so the driver only ever binds
//! and reads strings whatever the native column types are.

use crate::core::error::{ManagerError, ManagerResult};
use crate::core::field::{FieldType, FieldValue};
use crate::core::filter::{Comparator, Condition};
use crate::core::registry::FilterTable;
use crate::storage::sql::quote_ident;
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Filter table
// ---------------------------------------------------------------------------

use Comparator::*;

/// Operator aliases understood by the wide-column backend
pub const CQL_FILTER_NAMES: &[(Comparator, Option<&str>)] = &[
    (Equal, None),
    (Equal, Some("eq")),
    (LessThan, Some("lt")),
    (LessThanEqual, Some("lte")),
    (GreaterThan, Some("gt")),
    (GreaterThanEqual, Some("gte")),
    (In, Some("in")),
    (Contains, Some("contains")),
];

const EQUALITY: &[Comparator] = &[Equal, In];
const ORDERED: &[Comparator] = &[
    Equal,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    In,
];
const RANGES: &[Comparator] = &[Equal, LessThan, LessThanEqual, GreaterThan, GreaterThanEqual];

/// CQL has no `!=`, no `LIKE` without SASI indexes and no `BETWEEN`
pub const CQL_FILTERS: FilterTable = FilterTable {
    by_type: &[
        (FieldType::Boolean, EQUALITY),
        (FieldType::Integer, ORDERED),
        (FieldType::Number, ORDERED),
        (FieldType::String, EQUALITY),
        (FieldType::Date, ORDERED),
        (FieldType::DateTime, RANGES),
        (FieldType::DateString, ORDERED),
        (FieldType::DateTimeString, RANGES),
        (FieldType::Uuid, EQUALITY),
        (FieldType::Array, &[Contains]),
    ],
    names: CQL_FILTER_NAMES,
};

// ---------------------------------------------------------------------------
// Native types
// ---------------------------------------------------------------------------

/// Map a `system_schema.columns` type to a field type and element type
pub fn field_type(native: &str) -> ManagerResult<(FieldType, Option<FieldType>)> {
    let native = native.trim();
    let native = native
        .strip_prefix("frozen<")
        .and_then(|inner| inner.strip_suffix('>'))
        .unwrap_or(native);

    let scalar = |name: &str| -> Option<FieldType> {
        Some(match name {
            "boolean" => FieldType::Boolean,
            "counter" | "int" | "bigint" | "smallint" | "tinyint" | "varint" => FieldType::Integer,
            "decimal" | "double" | "float" => FieldType::Number,
            "inet" | "text" | "ascii" | "varchar" => FieldType::String,
            "uuid" | "timeuuid" => FieldType::Uuid,
            "timestamp" => FieldType::DateTime,
            "date" => FieldType::Date,
            _ => return None,
        })
    };

    if let Some(field_type) = scalar(native) {
        return Ok((field_type, None));
    }

    let collection = native
        .strip_prefix("list<")
        .or_else(|| native.strip_prefix("set<"))
        .and_then(|inner| inner.strip_suffix('>'));
    if let Some(inner) = collection {
        let item_type = scalar(inner.trim()).unwrap_or(FieldType::Object);
        return Ok((FieldType::Array, Some(item_type)));
    }
    if native.starts_with("map<") {
        return Ok((FieldType::Object, None));
    }

    Err(ManagerError::Config(format!(
        "no field type for CQL column type '{}'",
        native
    )))
}

/// JSON text accepted by `fromJson()` for a value
///
/// Timestamps are sent as epoch milliseconds, the one encoding every
/// server version accepts.
pub fn to_cql_json(value: &FieldValue) -> String {
    cql_json(value).to_string()
}

fn cql_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::DateTime(dt) => json!(dt.timestamp_millis()),
        FieldValue::Array(items) => Value::Array(items.iter().map(cql_json).collect()),
        other => other.to_json(),
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// A CQL statement with its JSON-encoded positional values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CqlExpr {
    pub cql: String,
    pub values: Vec<String>,
}

impl CqlExpr {
    pub fn new(cql: impl Into<String>) -> Self {
        Self {
            cql: cql.into(),
            values: Vec::new(),
        }
    }

    pub fn push(&mut self, cql: &str) -> &mut Self {
        self.cql.push_str(cql);
        self
    }

    /// Append a `fromJson(?)` marker and remember its value
    pub fn push_value(&mut self, value: &FieldValue) -> &mut Self {
        self.values.push(to_cql_json(value));
        self.cql.push_str("fromJson(?)");
        self
    }

    pub fn debug_info(&self) -> Value {
        json!({
            "statement": self.cql,
            "params": self.values,
        })
    }

    fn push_restriction(&mut self, condition: &Condition) -> ManagerResult<()> {
        let column = quote_ident(condition.attribute())?;
        let value = &condition.value;
        if value.is_null() {
            return Err(ManagerError::validation(
                condition.attribute(),
                "CQL cannot filter on null",
            ));
        }

        let operator = match condition.comparator() {
            Equal => "=",
            LessThan => "<",
            LessThanEqual => "<=",
            GreaterThan => ">",
            GreaterThanEqual => ">=",
            In => {
                self.push(&format!("{} IN (", column));
                for (i, v) in value.as_array().unwrap_or_default().iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.push_value(v);
                }
                self.push(")");
                return Ok(());
            }
            Contains => "CONTAINS",
            other => {
                return Err(ManagerError::UnsupportedComparator {
                    field: condition.filter.field.name.clone(),
                    operator: format!("{:?}", other),
                });
            }
        };

        self.push(&format!("{} {} ", column, operator));
        self.push_value(value);
        Ok(())
    }
}

/// `"keyspace"."table"`
pub fn table_ref(keyspace: &str, table: &str) -> ManagerResult<String> {
    Ok(format!("{}.{}", quote_ident(keyspace)?, quote_ident(table)?))
}

/// `SELECT JSON *` restricted by every condition
///
/// Returns `None` when a condition can never match (an empty `$in`), since
/// CQL cannot express `IN ()`.
pub fn select(
    keyspace: &str,
    table: &str,
    conditions: &[Condition],
    scope: Option<(&str, &FieldValue)>,
) -> ManagerResult<Option<CqlExpr>> {
    if conditions.iter().any(Condition::matches_nothing) {
        return Ok(None);
    }

    let mut expr = CqlExpr::new(format!("SELECT JSON * FROM {}", table_ref(keyspace, table)?));
    let mut restricted = false;

    if let Some((column, parent)) = scope {
        expr.push(&format!(" WHERE {} = ", quote_ident(column)?));
        expr.push_value(parent);
        restricted = true;
    }
    for condition in conditions {
        expr.push(if restricted { " AND " } else { " WHERE " });
        expr.push_restriction(condition)?;
        restricted = true;
    }
    if restricted {
        expr.push(" ALLOW FILTERING");
    }
    Ok(Some(expr))
}

pub fn select_by_id(
    keyspace: &str,
    table: &str,
    id_column: &str,
    id: &FieldValue,
) -> ManagerResult<CqlExpr> {
    let mut expr = CqlExpr::new(format!(
        "SELECT JSON * FROM {} WHERE {} = ",
        table_ref(keyspace, table)?,
        quote_ident(id_column)?
    ));
    expr.push_value(id);
    Ok(expr)
}

/// `INSERT ... JSON ? IF NOT EXISTS`
pub fn insert(
    keyspace: &str,
    table: &str,
    values: &[(String, FieldValue)],
) -> ManagerResult<CqlExpr> {
    let mut row = serde_json::Map::with_capacity(values.len());
    for (column, value) in values {
        quote_ident(column)?;
        row.insert(column.clone(), cql_json(value));
    }
    let mut expr = CqlExpr::new(format!(
        "INSERT INTO {} JSON ? IF NOT EXISTS",
        table_ref(keyspace, table)?
    ));
    expr.values.push(Value::Object(row).to_string());
    Ok(expr)
}

/// `UPDATE ... IF EXISTS`
pub fn update(
    keyspace: &str,
    table: &str,
    id_column: &str,
    id: &FieldValue,
    changes: &[(String, FieldValue)],
) -> ManagerResult<CqlExpr> {
    if changes.is_empty() {
        return Err(ManagerError::validation(id_column, "nothing to update"));
    }
    let mut expr = CqlExpr::new(format!("UPDATE {} SET ", table_ref(keyspace, table)?));
    for (i, (column, value)) in changes.iter().enumerate() {
        if i > 0 {
            expr.push(", ");
        }
        expr.push(&format!("{} = ", quote_ident(column)?));
        expr.push_value(value);
    }
    expr.push(&format!(" WHERE {} = ", quote_ident(id_column)?));
    expr.push_value(id);
    expr.push(" IF EXISTS");
    Ok(expr)
}

/// `DELETE ... IF EXISTS`
pub fn delete(
    keyspace: &str,
    table: &str,
    id_column: &str,
    id: &FieldValue,
) -> ManagerResult<CqlExpr> {
    let mut expr = CqlExpr::new(format!(
        "DELETE FROM {} WHERE {} = ",
        table_ref(keyspace, table)?,
        quote_ident(id_column)?
    ));
    expr.push_value(id);
    expr.push(" IF EXISTS");
    Ok(expr)
}

/// Null out `column` on one row, only while it still points at `parent`
pub fn clear_reference(
    keyspace: &str,
    table: &str,
    id_column: &str,
    id: &FieldValue,
    column: &str,
    parent: &FieldValue,
) -> ManagerResult<CqlExpr> {
    let column = quote_ident(column)?;
    let mut expr = CqlExpr::new(format!(
        "UPDATE {} SET {} = null WHERE {} = ",
        table_ref(keyspace, table)?,
        column,
        quote_ident(id_column)?
    ));
    expr.push_value(id);
    expr.push(&format!(" IF {} = ", column));
    expr.push_value(parent);
    Ok(expr)
}
