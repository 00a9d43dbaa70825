//! Filter tables and per-resource filter registries
//!
//! A [`FilterTable`] says which comparators a backend supports for each
//! [`FieldType`]. At registration time a [`FilterRegistry`] instantiates one
//! [`Filter`] per (comparator, alias) pair for every filterable field,
//! restricted by the resource's [`FiltersExpression`].

use crate::core::error::{ManagerError, ManagerResult};
use crate::core::field::{Field, FieldType};
use crate::core::filter::{Comparator, Condition, EQUALITY_FILTER_NAME, FILTER_NAMES, Filter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Comparators supported per field type by one backend
#[derive(Debug, Clone, Copy)]
pub struct FilterTable {
    pub by_type: &'static [(FieldType, &'static [Comparator])],
    pub names: &'static [(Comparator, Option<&'static str>)],
}

use Comparator::*;

const EQUALITY: &[Comparator] = &[Equal, NotEqual, In];
const ORDERED: &[Comparator] = &[
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    In,
];
const TEXT: &[Comparator] = &[
    Equal,
    NotEqual,
    StringContains,
    StringIContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    In,
];
const DATES: &[Comparator] = &[
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Between,
    In,
];
const DATETIMES: &[Comparator] = &[
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Between,
];

/// Table used by the in-memory and relational backends
pub const DEFAULT_FILTERS: FilterTable = FilterTable {
    by_type: &[
        (FieldType::Boolean, EQUALITY),
        (FieldType::Integer, ORDERED),
        (FieldType::Number, ORDERED),
        (FieldType::String, TEXT),
        (FieldType::Date, DATES),
        (FieldType::DateTime, DATETIMES),
        (FieldType::DateString, DATES),
        (FieldType::DateTimeString, DATETIMES),
        (FieldType::Uuid, EQUALITY),
        (FieldType::Array, &[Contains]),
        (FieldType::ToOne, EQUALITY),
        (FieldType::ToMany, &[Contains]),
    ],
    names: FILTER_NAMES,
};

impl FilterTable {
    /// Comparators available for a field type, empty when unfilterable
    pub fn comparators(&self, field_type: FieldType) -> &'static [Comparator] {
        self.by_type
            .iter()
            .find(|(t, _)| *t == field_type)
            .map(|(_, comparators)| *comparators)
            .unwrap_or(&[])
    }

    /// Every (alias, comparator) pair usable on a field type
    fn aliases(&self, field_type: FieldType) -> Vec<(Option<&'static str>, Comparator)> {
        let comparators = self.comparators(field_type);
        self.names
            .iter()
            .filter(|(comparator, _)| comparators.contains(comparator))
            .map(|(comparator, name)| (*name, *comparator))
            .collect()
    }
}

/// Which filters a resource exposes
///
/// ```yaml
/// filters: true            # every filter on every field
/// filters:
///   first_name: [eq, ne]   # only these operators
///   is_staff: true
///   "*": false             # wildcard for the remaining fields
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FiltersExpression {
    All(bool),
    Fields(HashMap<String, FieldFilters>),
}

impl Default for FiltersExpression {
    fn default() -> Self {
        FiltersExpression::All(true)
    }
}

/// Per-field part of a [`FiltersExpression`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldFilters {
    All(bool),
    Only(Vec<String>),
}

static ALL_FIELD_FILTERS: FieldFilters = FieldFilters::All(true);

impl FiltersExpression {
    fn for_field(&self, name: &str) -> Option<&FieldFilters> {
        match self {
            FiltersExpression::All(true) => Some(&ALL_FIELD_FILTERS),
            FiltersExpression::All(false) => None,
            FiltersExpression::Fields(fields) => fields.get(name).or_else(|| fields.get("*")),
        }
    }
}

/// Filters of one field, by alias
#[derive(Debug, Clone, Default)]
struct FieldFilterSet {
    default: Option<Arc<Filter>>,
    named: BTreeMap<String, Arc<Filter>>,
}

/// Filters available on one resource
#[derive(Debug, Clone, Default)]
pub struct FilterRegistry {
    fields: BTreeMap<String, FieldFilterSet>,
}

impl FilterRegistry {
    /// Build the registry for `fields` from a backend table
    pub fn build<'a>(
        fields: impl IntoIterator<Item = &'a Field>,
        expression: &FiltersExpression,
        table: &FilterTable,
    ) -> Self {
        let mut registry = FilterRegistry::default();

        for field in fields {
            let Some(field_expression) = expression.for_field(&field.name) else {
                continue;
            };
            let allowed: Option<&[String]> = match field_expression {
                FieldFilters::All(false) => continue,
                FieldFilters::All(true) => None,
                FieldFilters::Only(names) => Some(names.as_slice()),
            };

            let mut set = FieldFilterSet::default();
            for (alias, comparator) in table.aliases(field.field_type) {
                // the bare form follows the explicit `eq` alias
                let alias_name = alias.unwrap_or(EQUALITY_FILTER_NAME);
                if allowed.is_some_and(|names| !names.iter().any(|n| n == alias_name)) {
                    continue;
                }
                let filter = Arc::new(Filter::new(alias, field.clone(), comparator));
                match alias {
                    None => set.default = Some(filter),
                    Some(name) => {
                        set.named.insert(name.to_string(), filter);
                    }
                }
            }

            if set.default.is_some() || !set.named.is_empty() {
                registry.fields.insert(field.name.clone(), set);
            }
        }

        registry
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Names of the filterable fields
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Look up by composite key: `"age$lt"`, or `"age"` for equality
    pub fn get(&self, key: &str) -> Option<&Arc<Filter>> {
        match key.split_once('$') {
            Some((field, operator)) => self.fields.get(field)?.named.get(operator),
            None => self.fields.get(key)?.default.as_ref(),
        }
    }

    /// Every registered filter keyed by its composite name
    pub fn keys(&self) -> Vec<String> {
        self.fields
            .values()
            .flat_map(|set| set.default.iter().chain(set.named.values()))
            .map(|filter| filter.key())
            .collect()
    }

    /// Resolve a decoded `where` object into conditions
    ///
    /// `{"field": {"$op": operand}}` selects the named filter `op`; any other
    /// value is compared for equality.
    pub fn conditions(&self, where_: &Value) -> ManagerResult<Vec<Condition>> {
        let clauses = match where_ {
            Value::Null => return Ok(Vec::new()),
            Value::Object(clauses) => clauses,
            _ => return Err(ManagerError::validation("where", "expected an object")),
        };

        clauses
            .iter()
            .map(|(field, value)| self.condition(field, value))
            .collect()
    }

    fn condition(&self, field: &str, value: &Value) -> ManagerResult<Condition> {
        let operator = match value {
            Value::Object(obj) if obj.len() == 1 => obj
                .keys()
                .next()
                .and_then(|key| key.strip_prefix('$'))
                .filter(|op| !op.is_empty()),
            _ => None,
        };

        let unsupported = |operator: &str| ManagerError::UnsupportedComparator {
            field: field.to_string(),
            operator: operator.to_string(),
        };

        let set = self
            .fields
            .get(field)
            .ok_or_else(|| unsupported(operator.unwrap_or(EQUALITY_FILTER_NAME)))?;

        let filter = match operator {
            Some(op) => set.named.get(op).ok_or_else(|| unsupported(op))?,
            None => set
                .default
                .as_ref()
                .ok_or_else(|| unsupported(EQUALITY_FILTER_NAME))?,
        };

        filter.convert(value)
    }
}
