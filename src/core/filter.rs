//! Comparators, filters and conditions
//!
//! A [`Filter`] binds one [`Comparator`] to one resource field. Converting a
//! user-supplied operand through a filter yields a [`Condition`], which each
//! backend renders into its own native predicate:
//!
//! - in memory, [`Condition::matches`] evaluates the comparator directly
//! - `storage::sql` renders a parameterised SQL fragment
//! - `storage::cql` renders a CQL restriction
//!
//! Filters are named after the operator alias used in `where` clauses: a
//! named filter `lt` on field `age` is written `{"age": {"$lt": 30}}`, while
//! the unnamed equality filter is written `{"age": 30}`.

use crate::core::error::{ManagerError, ManagerResult};
use crate::core::field::{Field, FieldValue};
use crate::core::manager::{Item, get_value};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// Alias of the equality filter when written explicitly
pub const EQUALITY_FILTER_NAME: &str = "eq";

/// One variant per supported comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    In,
    /// Membership of a value in an array field
    Contains,
    StringContains,
    StringIContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Between,
}

/// Operator aliases; `None` is the bare `{"field": value}` form
pub const FILTER_NAMES: &[(Comparator, Option<&str>)] = &[
    (Comparator::Equal, None),
    (Comparator::Equal, Some("eq")),
    (Comparator::NotEqual, Some("ne")),
    (Comparator::LessThan, Some("lt")),
    (Comparator::LessThanEqual, Some("lte")),
    (Comparator::GreaterThan, Some("gt")),
    (Comparator::GreaterThanEqual, Some("gte")),
    (Comparator::In, Some("in")),
    (Comparator::Contains, Some("contains")),
    (Comparator::StringContains, Some("contains")),
    (Comparator::StringIContains, Some("icontains")),
    (Comparator::StartsWith, Some("startswith")),
    (Comparator::IStartsWith, Some("istartswith")),
    (Comparator::EndsWith, Some("endswith")),
    (Comparator::IEndsWith, Some("iendswith")),
    (Comparator::Between, Some("between")),
];

impl Comparator {
    /// All aliases this comparator is reachable under
    pub fn names(self) -> impl Iterator<Item = Option<&'static str>> {
        FILTER_NAMES
            .iter()
            .filter(move |(comparator, _)| *comparator == self)
            .map(|(_, name)| *name)
    }

    pub fn is_string_pattern(self) -> bool {
        matches!(
            self,
            Comparator::StringContains
                | Comparator::StringIContains
                | Comparator::StartsWith
                | Comparator::IStartsWith
                | Comparator::EndsWith
                | Comparator::IEndsWith
        )
    }

    /// Convert the operand of this comparator for `field`
    pub fn convert(self, field: &Field, raw: &Value) -> ManagerResult<FieldValue> {
        match self {
            Comparator::Equal | Comparator::NotEqual => field.convert(raw),
            Comparator::LessThan
            | Comparator::LessThanEqual
            | Comparator::GreaterThan
            | Comparator::GreaterThanEqual => {
                if raw.is_null() {
                    return Err(ManagerError::validation(&field.name, "expected a value, got null"));
                }
                field.convert(raw)
            }
            Comparator::In => {
                let items = raw
                    .as_array()
                    .ok_or_else(|| ManagerError::validation(&field.name, "expected a list"))?;
                items
                    .iter()
                    .map(|item| field.convert(item))
                    .collect::<ManagerResult<Vec<_>>>()
                    .map(FieldValue::Array)
            }
            Comparator::Between => match raw.as_array().map(Vec::as_slice) {
                Some([lower, upper]) => Ok(FieldValue::Array(vec![
                    field.convert(lower)?,
                    field.convert(upper)?,
                ])),
                _ => Err(ManagerError::validation(
                    &field.name,
                    "expected a list of exactly two values",
                )),
            },
            Comparator::Contains => field.convert_item(raw),
            _ => match raw.as_str() {
                Some(s) if !s.is_empty() => Ok(FieldValue::String(s.to_string())),
                _ => Err(ManagerError::validation(&field.name, "expected a non-empty string")),
            },
        }
    }

    /// Match an item's attribute `a` against the operand `b`
    pub fn op(self, a: &FieldValue, b: &FieldValue) -> bool {
        match self {
            Comparator::Equal => equal(a, b),
            Comparator::NotEqual => !equal(a, b),
            Comparator::LessThan => ordered(a, b, |o| o == Ordering::Less),
            Comparator::LessThanEqual => ordered(a, b, |o| o != Ordering::Greater),
            Comparator::GreaterThan => ordered(a, b, |o| o == Ordering::Greater),
            Comparator::GreaterThanEqual => ordered(a, b, |o| o != Ordering::Less),
            Comparator::In => b
                .as_array()
                .is_some_and(|values| values.iter().any(|v| equal(a, v))),
            Comparator::Contains => a
                .as_array()
                .is_some_and(|values| values.iter().any(|v| equal(v, b))),
            Comparator::StringContains => strings(a, b, |a, b| a.contains(b)),
            Comparator::StringIContains => {
                strings(a, b, |a, b| a.to_lowercase().contains(&b.to_lowercase()))
            }
            Comparator::StartsWith => strings(a, b, |a, b| a.starts_with(b)),
            Comparator::IStartsWith => {
                strings(a, b, |a, b| a.to_lowercase().starts_with(&b.to_lowercase()))
            }
            Comparator::EndsWith => strings(a, b, |a, b| a.ends_with(b)),
            Comparator::IEndsWith => {
                strings(a, b, |a, b| a.to_lowercase().ends_with(&b.to_lowercase()))
            }
            Comparator::Between => match b.as_array() {
                Some([lower, upper]) => {
                    ordered(a, lower, |o| o != Ordering::Less)
                        && ordered(a, upper, |o| o != Ordering::Greater)
                }
                _ => false,
            },
        }
    }
}

fn equal(a: &FieldValue, b: &FieldValue) -> bool {
    a.partial_cmp(b) == Some(Ordering::Equal)
}

fn ordered(a: &FieldValue, b: &FieldValue, accept: impl Fn(Ordering) -> bool) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    a.partial_cmp(b).is_some_and(accept)
}

fn strings(a: &FieldValue, b: &FieldValue, accept: impl Fn(&str, &str) -> bool) -> bool {
    match (a.as_string(), b.as_string()) {
        (Some(a), Some(b)) => accept(a, b),
        _ => false,
    }
}

/// A comparator bound to one field
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Operator alias, `None` for the bare equality form
    pub name: Option<String>,
    pub field: Field,
    pub comparator: Comparator,
}

impl Filter {
    pub fn new(name: Option<&str>, field: Field, comparator: Comparator) -> Self {
        Self {
            name: name.map(str::to_string),
            field,
            comparator,
        }
    }

    /// Backend attribute the filter applies to
    pub fn attribute(&self) -> &str {
        &self.field.attribute
    }

    /// Registry key: `"<field>$<operator>"`, or the bare field name
    pub fn key(&self) -> String {
        match &self.name {
            Some(name) => format!("{}${}", self.field.name, name),
            None => self.field.name.clone(),
        }
    }

    /// Turn a `where` operand into a condition
    ///
    /// Named filters expect `{"$<name>": operand}`; the unnamed filter takes
    /// the operand as-is.
    pub fn convert(self: &Arc<Self>, raw: &Value) -> ManagerResult<Condition> {
        let operand = match &self.name {
            None => raw,
            Some(name) => raw
                .as_object()
                .and_then(|obj| obj.get(&format!("${}", name)))
                .ok_or_else(|| {
                    ManagerError::validation(
                        &self.field.name,
                        format!("expected {{\"${}\": ...}}", name),
                    )
                })?,
        };

        Ok(Condition {
            filter: Arc::clone(self),
            value: self.comparator.convert(&self.field, operand)?,
        })
    }
}

/// A filter with its converted operand, ready to be applied to a query
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub filter: Arc<Filter>,
    pub value: FieldValue,
}

impl Condition {
    pub fn attribute(&self) -> &str {
        self.filter.attribute()
    }

    pub fn comparator(&self) -> Comparator {
        self.filter.comparator
    }

    /// `$in` with an empty list can never match
    pub fn matches_nothing(&self) -> bool {
        self.filter.comparator == Comparator::In
            && self.value.as_array().is_some_and(|values| values.is_empty())
    }

    /// In-memory predicate
    pub fn matches(&self, item: &Item) -> bool {
        let raw = get_value(item, self.attribute()).unwrap_or(&Value::Null);
        let actual = self.filter.field.coerce(raw);
        self.filter.comparator.op(&actual, &self.value)
    }
}
