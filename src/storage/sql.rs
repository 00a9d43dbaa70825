//! SQL statement rendering for the relational backend
//!
//! Everything here is pure string building: conditions, sort keys and
//! column values become a statement with `$n` placeholders plus the ordered
//! list of values to bind. The `postgres` module executes the result.
//!
//! Rows are selected as `to_jsonb(<table>.*)` so a manager never has to
//! decode native column types itself.

use crate::core::error::{ManagerError, ManagerResult};
use crate::core::field::{FieldType, FieldValue};
use crate::core::filter::{Comparator, Condition};
use crate::core::manager::SortKey;
use regex::Regex;
use serde_json::{Value, json};
use std::sync::OnceLock;

/// Escape character used in every rendered `LIKE` pattern
pub const LIKE_ESCAPE: char = '\\';

// ---------------------------------------------------------------------------
// Identifiers and patterns
// ---------------------------------------------------------------------------

/// Validate and double-quote an identifier
pub fn quote_ident(name: &str) -> ManagerResult<String> {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    let regex = IDENTIFIER
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

    if regex.is_match(name) {
        Ok(format!("\"{}\"", name))
    } else {
        Err(ManagerError::Config(format!("invalid SQL identifier '{}'", name)))
    }
}

/// `"table"."column"`
pub fn qualified(table: &str, column: &str) -> ManagerResult<String> {
    Ok(format!("{}.{}", quote_ident(table)?, quote_ident(column)?))
}

/// Escape `LIKE` metacharacters so user input only matches literally
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

// ---------------------------------------------------------------------------
// Native types
// ---------------------------------------------------------------------------

fn scalar_type(name: &str) -> Option<FieldType> {
    Some(match name {
        "boolean" | "bool" => FieldType::Boolean,
        "smallint" | "integer" | "bigint" | "int2" | "int4" | "int8" => FieldType::Integer,
        "real" | "double precision" | "numeric" | "float4" | "float8" => FieldType::Number,
        "text" | "character varying" | "character" | "varchar" | "bpchar" => FieldType::String,
        "uuid" => FieldType::Uuid,
        "date" => FieldType::Date,
        "timestamp without time zone"
        | "timestamp with time zone"
        | "timestamp"
        | "timestamptz" => FieldType::DateTime,
        "json" | "jsonb" => FieldType::Object,
        _ => return None,
    })
}

/// Map an `information_schema.columns` type to a field type and element type
///
/// Arrays report `data_type = 'ARRAY'`; their element type comes from the
/// `udt_name`, which is the element type name prefixed with `_`.
pub fn native_field_type(
    data_type: &str,
    udt_name: &str,
) -> ManagerResult<(FieldType, Option<FieldType>)> {
    if data_type == "ARRAY" {
        let element = udt_name.strip_prefix('_').unwrap_or(udt_name);
        return Ok((FieldType::Array, Some(scalar_type(element).unwrap_or(FieldType::Object))));
    }
    scalar_type(data_type)
        .map(|field_type| (field_type, None))
        .ok_or_else(|| {
            ManagerError::Config(format!("no field type for SQL column type '{}'", data_type))
        })
}

// ---------------------------------------------------------------------------
// SqlExpr
// ---------------------------------------------------------------------------

/// A statement, or fragment, with its positional parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlExpr {
    pub sql: String,
    pub binds: Vec<FieldValue>,
}

impl SqlExpr {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            binds: Vec::new(),
        }
    }

    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append a `$n` placeholder and remember its value
    pub fn push_bind(&mut self, value: FieldValue) -> &mut Self {
        self.binds.push(value);
        self.sql.push_str(&format!("${}", self.binds.len()));
        self
    }

    /// `{"statement": ..., "params": [...]}` attached to conflicts in debug mode
    pub fn debug_info(&self) -> Value {
        json!({
            "statement": self.sql,
            "params": self.binds.iter().map(FieldValue::to_json).collect::<Vec<_>>(),
        })
    }

    fn push_condition(&mut self, column: &str, condition: &Condition) -> ManagerResult<()> {
        let value = &condition.value;
        match condition.comparator() {
            Comparator::Equal if value.is_null() => {
                self.push(&format!("{} IS NULL", column));
            }
            Comparator::NotEqual if value.is_null() => {
                self.push(&format!("{} IS NOT NULL", column));
            }
            Comparator::Equal => self.push_binary(column, "=", value),
            // nulls count as different, as they do in memory
            Comparator::NotEqual => self.push_binary(column, "IS DISTINCT FROM", value),
            Comparator::LessThan => self.push_binary(column, "<", value),
            Comparator::LessThanEqual => self.push_binary(column, "<=", value),
            Comparator::GreaterThan => self.push_binary(column, ">", value),
            Comparator::GreaterThanEqual => self.push_binary(column, ">=", value),
            Comparator::In => {
                let values = value.as_array().unwrap_or_default();
                if values.is_empty() {
                    self.push("FALSE");
                } else {
                    self.push(&format!("{} IN (", column));
                    for (i, v) in values.iter().enumerate() {
                        if i > 0 {
                            self.push(", ");
                        }
                        self.push_bind(v.clone());
                    }
                    self.push(")");
                }
            }
            Comparator::Contains => {
                self.push_bind(value.clone());
                self.push(&format!(" = ANY({})", column));
            }
            Comparator::Between => match value.as_array() {
                Some([lower, upper]) => {
                    self.push(&format!("{} BETWEEN ", column));
                    self.push_bind(lower.clone());
                    self.push(" AND ");
                    self.push_bind(upper.clone());
                }
                _ => {
                    return Err(ManagerError::validation(
                        condition.attribute(),
                        "expected a list of exactly two values",
                    ));
                }
            },
            comparator => {
                let operand = value.as_string().ok_or_else(|| {
                    ManagerError::validation(condition.attribute(), "expected a string")
                })?;
                let escaped = escape_like(operand);
                let (operator, pattern) = match comparator {
                    Comparator::StringContains => ("LIKE", format!("%{}%", escaped)),
                    Comparator::StringIContains => ("ILIKE", format!("%{}%", escaped)),
                    Comparator::StartsWith => ("LIKE", format!("{}%", escaped)),
                    Comparator::IStartsWith => ("ILIKE", format!("{}%", escaped)),
                    Comparator::EndsWith => ("LIKE", format!("%{}", escaped)),
                    _ => ("ILIKE", format!("%{}", escaped)),
                };
                self.push(&format!("{} {} ", column, operator));
                self.push_bind(FieldValue::String(pattern));
                self.push(&format!(" ESCAPE '{}'", LIKE_ESCAPE));
            }
        }
        Ok(())
    }

    fn push_binary(&mut self, column: &str, operator: &str, value: &FieldValue) {
        self.push(&format!("{} {} ", column, operator));
        self.push_bind(value.clone());
    }
}

// ---------------------------------------------------------------------------
// SELECT
// ---------------------------------------------------------------------------

/// A to-one relation usable for sorting with `<attribute>.<column>` keys
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Relation attribute, also used as the join alias
    pub attribute: String,
    pub table: String,
    /// Reference column on the base table
    pub column: String,
    /// Referenced column on the joined table
    pub target_column: String,
}

/// Restriction of a listing to the children of one parent
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    /// Child rows whose `column` holds the parent id
    Column { column: String, parent: FieldValue },
    /// Child rows paired with the parent in an association table
    Association {
        table: String,
        parent_column: String,
        child_column: String,
        parent: FieldValue,
    },
}

/// Builder for listing and counting statements
#[derive(Debug, Clone)]
pub struct Select<'a> {
    table: &'a str,
    id_column: &'a str,
    conditions: &'a [Condition],
    sort: &'a [SortKey],
    joins: &'a [Join],
    scope: Option<&'a Scope>,
}

impl<'a> Select<'a> {
    pub fn new(table: &'a str, id_column: &'a str) -> Self {
        Self {
            table,
            id_column,
            conditions: &[],
            sort: &[],
            joins: &[],
            scope: None,
        }
    }

    pub fn conditions(mut self, conditions: &'a [Condition]) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn sort(mut self, sort: &'a [SortKey]) -> Self {
        self.sort = sort;
        self
    }

    pub fn joins(mut self, joins: &'a [Join]) -> Self {
        self.joins = joins;
        self
    }

    pub fn scope(mut self, scope: &'a Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// `SELECT to_jsonb(t.*) ...`, optionally windowed with `LIMIT/OFFSET`
    pub fn rows(&self, window: Option<(usize, usize)>) -> ManagerResult<SqlExpr> {
        let table = quote_ident(self.table)?;
        let mut expr = SqlExpr::new(format!("SELECT to_jsonb({}.*) FROM {}", table, table));

        let mut order = Vec::with_capacity(self.sort.len() + 1);
        let mut joined: Vec<&Join> = Vec::new();
        for key in self.sort {
            let column = match key.attribute.split_once('.') {
                Some((relation, column)) => {
                    let join = self
                        .joins
                        .iter()
                        .find(|join| join.attribute == relation)
                        .ok_or_else(|| {
                            ManagerError::validation(
                                &key.field,
                                "cannot sort across an undeclared relation",
                            )
                        })?;
                    if !joined.contains(&join) {
                        joined.push(join);
                    }
                    qualified(&join.attribute, column)?
                }
                None => qualified(self.table, &key.attribute)?,
            };
            // nulls sort lowest on every backend
            order.push(if key.descending {
                format!("{} DESC NULLS LAST", column)
            } else {
                format!("{} ASC NULLS FIRST", column)
            });
        }
        order.push(format!("{} ASC", qualified(self.table, self.id_column)?));

        for join in joined {
            expr.push(&format!(
                " LEFT OUTER JOIN {} AS {} ON {} = {}",
                quote_ident(&join.table)?,
                quote_ident(&join.attribute)?,
                qualified(&join.attribute, &join.target_column)?,
                qualified(self.table, &join.column)?,
            ));
        }

        self.push_where(&mut expr)?;
        expr.push(&format!(" ORDER BY {}", order.join(", ")));

        if let Some((limit, offset)) = window {
            // postgres takes bigint windows
            let bigint = |n: usize| n.min(i64::MAX as usize);
            expr.push(&format!(" LIMIT {} OFFSET {}", bigint(limit), bigint(offset)));
        }
        Ok(expr)
    }

    /// `SELECT COUNT(*) ...` over the same restrictions
    pub fn count(&self) -> ManagerResult<SqlExpr> {
        let mut expr = SqlExpr::new(format!("SELECT COUNT(*) FROM {}", quote_ident(self.table)?));
        self.push_where(&mut expr)?;
        Ok(expr)
    }

    fn push_where(&self, expr: &mut SqlExpr) -> ManagerResult<()> {
        let mut first = true;
        let mut separator = |expr: &mut SqlExpr| {
            expr.push(if first { " WHERE " } else { " AND " });
            first = false;
        };

        match self.scope {
            Some(Scope::Column { column, parent }) => {
                separator(expr);
                expr.push(&format!("{} = ", qualified(self.table, column)?));
                expr.push_bind(parent.clone());
            }
            Some(Scope::Association {
                table,
                parent_column,
                child_column,
                parent,
            }) => {
                separator(expr);
                expr.push(&format!(
                    "{} IN (SELECT {} FROM {} WHERE {} = ",
                    qualified(self.table, self.id_column)?,
                    quote_ident(child_column)?,
                    quote_ident(table)?,
                    quote_ident(parent_column)?,
                ));
                expr.push_bind(parent.clone());
                expr.push(")");
            }
            None => {}
        }

        for condition in self.conditions {
            separator(expr);
            let column = qualified(self.table, condition.attribute())?;
            expr.push_condition(&column, condition)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// One assignment of an INSERT or UPDATE
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValue {
    pub column: String,
    pub value: FieldValue,
    /// Explicit cast for the placeholder (json and array columns)
    pub cast: Option<String>,
}

impl ColumnValue {
    pub fn new(column: impl Into<String>, value: FieldValue) -> Self {
        Self {
            column: column.into(),
            value,
            cast: None,
        }
    }

    pub fn cast(mut self, cast: impl Into<String>) -> Self {
        self.cast = Some(cast.into());
        self
    }

    fn push_value(&self, expr: &mut SqlExpr) -> ManagerResult<()> {
        if self.value.is_null() {
            expr.push("NULL");
            return Ok(());
        }
        expr.push_bind(self.value.clone());
        if let Some(cast) = &self.cast {
            expr.push(&format!("::{}", quote_ident(cast)?));
        }
        Ok(())
    }
}

fn returning(table: &str) -> ManagerResult<String> {
    let table = quote_ident(table)?;
    Ok(format!(" RETURNING to_jsonb({}.*)", table))
}

pub fn insert(table: &str, values: &[ColumnValue]) -> ManagerResult<SqlExpr> {
    let mut expr = SqlExpr::new(format!("INSERT INTO {}", quote_ident(table)?));
    if values.is_empty() {
        expr.push(" DEFAULT VALUES");
    } else {
        let columns = values
            .iter()
            .map(|v| quote_ident(&v.column))
            .collect::<ManagerResult<Vec<_>>>()?;
        expr.push(&format!(" ({}) VALUES (", columns.join(", ")));
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                expr.push(", ");
            }
            value.push_value(&mut expr)?;
        }
        expr.push(")");
    }
    expr.push(&returning(table)?);
    Ok(expr)
}

pub fn update(
    table: &str,
    id_column: &str,
    id: &FieldValue,
    values: &[ColumnValue],
) -> ManagerResult<SqlExpr> {
    if values.is_empty() {
        return Err(ManagerError::validation(id_column, "nothing to update"));
    }
    let mut expr = SqlExpr::new(format!("UPDATE {} SET ", quote_ident(table)?));
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            expr.push(", ");
        }
        expr.push(&format!("{} = ", quote_ident(&value.column)?));
        value.push_value(&mut expr)?;
    }
    expr.push(&format!(" WHERE {} = ", quote_ident(id_column)?));
    expr.push_bind(id.clone());
    expr.push(&returning(table)?);
    Ok(expr)
}

pub fn delete(table: &str, id_column: &str, id: &FieldValue) -> ManagerResult<SqlExpr> {
    let mut expr = SqlExpr::new(format!(
        "DELETE FROM {} WHERE {} = ",
        quote_ident(table)?,
        quote_ident(id_column)?
    ));
    expr.push_bind(id.clone());
    Ok(expr)
}

/// Clear a child's reference column, only while it points at `parent`
pub fn clear_reference(
    table: &str,
    id_column: &str,
    id: &FieldValue,
    column: &str,
    parent: &FieldValue,
) -> ManagerResult<SqlExpr> {
    let column = quote_ident(column)?;
    let mut expr = SqlExpr::new(format!(
        "UPDATE {} SET {} = NULL WHERE {} = ",
        quote_ident(table)?,
        column,
        quote_ident(id_column)?
    ));
    expr.push_bind(id.clone());
    expr.push(&format!(" AND {} = ", column));
    expr.push_bind(parent.clone());
    Ok(expr)
}

/// Insert a pair into an association table unless it is already there
pub fn associate(
    table: &str,
    parent_column: &str,
    child_column: &str,
    parent: &FieldValue,
    child: &FieldValue,
) -> ManagerResult<SqlExpr> {
    let table = quote_ident(table)?;
    let parent_column = quote_ident(parent_column)?;
    let child_column = quote_ident(child_column)?;

    let mut expr = SqlExpr::new(format!(
        "INSERT INTO {} ({}, {}) SELECT ",
        table, parent_column, child_column
    ));
    expr.push_bind(parent.clone());
    expr.push(", ");
    expr.push_bind(child.clone());
    expr.push(&format!(
        " WHERE NOT EXISTS (SELECT 1 FROM {} WHERE {} = $1 AND {} = $2)",
        table, parent_column, child_column
    ));
    Ok(expr)
}

pub fn dissociate(
    table: &str,
    parent_column: &str,
    child_column: &str,
    parent: &FieldValue,
    child: &FieldValue,
) -> ManagerResult<SqlExpr> {
    let mut expr = SqlExpr::new(format!(
        "DELETE FROM {} WHERE {} = ",
        quote_ident(table)?,
        quote_ident(parent_column)?
    ));
    expr.push_bind(parent.clone());
    expr.push(&format!(" AND {} = ", quote_ident(child_column)?));
    expr.push_bind(child.clone());
    Ok(expr)
}
