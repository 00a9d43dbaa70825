//! Field declarations, semantic field types and typed field values

use crate::core::error::{ManagerError, ManagerResult};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use uuid::Uuid;

/// A polymorphic field value that can hold different types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Array(Vec<FieldValue>),
    Null,
}

impl FieldValue {
    /// Get the value as a string if possible
    pub fn as_string(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an integer if possible
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the value as a UUID if possible
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            FieldValue::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    /// Get the elements if this is an array
    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Untyped conversion of a stored JSON value
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => FieldValue::String(s.clone()),
            Value::Array(items) => FieldValue::Array(items.iter().map(Self::from_json).collect()),
            Value::Object(_) => FieldValue::String(value.to_string()),
        }
    }

    /// Render back to JSON; dates use ISO-8601 strings
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::Uuid(u) => Value::String(u.to_string()),
            FieldValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
            FieldValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            FieldValue::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            FieldValue::Null => Value::Null,
        }
    }
}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use FieldValue::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Null, _) => Some(Ordering::Less),
            (_, Null) => Some(Ordering::Greater),
            (String(a), String(b)) => a.partial_cmp(b),
            (Integer(a), Integer(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Integer(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Boolean(a), Boolean(b)) => a.partial_cmp(b),
            (Uuid(a), Uuid(b)) => a.partial_cmp(b),
            (DateTime(a), DateTime(b)) => a.partial_cmp(b),
            (Date(a), Date(b)) => a.partial_cmp(b),
            (Array(a), Array(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Semantic type of a resource field
///
/// Filter tables are keyed by this type, so every backend maps its native
/// column types onto one of these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Boolean,
    Integer,
    Number,
    String,
    Date,
    DateTime,
    DateString,
    DateTimeString,
    Uuid,
    Array,
    Object,
    ToOne,
    ToMany,
}

impl FieldType {
    /// Strict conversion of a user-supplied value into a typed value
    pub fn convert(self, field: &str, raw: &Value) -> ManagerResult<FieldValue> {
        let mismatch =
            || ManagerError::validation(field, format!("expected {:?}, got {}", self, raw));

        match self {
            FieldType::Boolean => raw.as_bool().map(FieldValue::Boolean).ok_or_else(mismatch),
            FieldType::Integer => raw.as_i64().map(FieldValue::Integer).ok_or_else(mismatch),
            FieldType::Number => match raw.as_i64() {
                Some(i) => Ok(FieldValue::Integer(i)),
                None => raw.as_f64().map(FieldValue::Float).ok_or_else(mismatch),
            },
            FieldType::String | FieldType::DateString | FieldType::DateTimeString => raw
                .as_str()
                .map(|s| FieldValue::String(s.to_string()))
                .ok_or_else(mismatch),
            FieldType::Uuid => raw
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(FieldValue::Uuid)
                .ok_or_else(mismatch),
            FieldType::Date => parse_date(raw).map(FieldValue::Date).ok_or_else(mismatch),
            FieldType::DateTime => parse_datetime(raw)
                .map(FieldValue::DateTime)
                .ok_or_else(mismatch),
            FieldType::Array => match raw {
                Value::Array(_) => Ok(FieldValue::from_json(raw)),
                _ => Err(mismatch()),
            },
            FieldType::Object | FieldType::ToOne | FieldType::ToMany => {
                Ok(FieldValue::from_json(raw))
            }
        }
    }

    /// Lenient conversion of a stored value, falling back to an untyped value
    pub fn coerce(self, raw: &Value) -> FieldValue {
        if raw.is_null() {
            return FieldValue::Null;
        }
        match self {
            FieldType::Date => parse_date(raw)
                .map(FieldValue::Date)
                .unwrap_or_else(|| FieldValue::from_json(raw)),
            FieldType::DateTime => parse_datetime(raw)
                .map(FieldValue::DateTime)
                .unwrap_or_else(|| FieldValue::from_json(raw)),
            FieldType::Uuid => raw
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(FieldValue::Uuid)
                .unwrap_or_else(|| FieldValue::from_json(raw)),
            _ => FieldValue::from_json(raw),
        }
    }

    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            FieldType::Date
                | FieldType::DateTime
                | FieldType::DateString
                | FieldType::DateTimeString
        )
    }
}

fn parse_date(raw: &Value) -> Option<NaiveDate> {
    match raw {
        Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
        Value::Object(obj) => obj
            .get("$date")
            .and_then(Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(|dt| dt.date_naive()),
        _ => None,
    }
}

fn parse_datetime(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Object(obj) => obj
            .get("$date")
            .and_then(Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Read/write capability of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FieldIo {
    #[default]
    #[serde(rename = "rw")]
    ReadWrite,
    #[serde(rename = "r")]
    Read,
    #[serde(rename = "w")]
    Write,
}

impl FieldIo {
    /// Capability from the configured read-only / write-only lists
    pub fn from_lists(name: &str, read_only: &[String], write_only: &[String]) -> Self {
        if read_only.iter().any(|f| f == name) {
            FieldIo::Read
        } else if write_only.iter().any(|f| f == name) {
            FieldIo::Write
        } else {
            FieldIo::ReadWrite
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldIo::ReadWrite => "rw",
            FieldIo::Read => "r",
            FieldIo::Write => "w",
        }
    }
}

/// A resource field declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    /// Backend attribute or column, defaults to `name`
    pub attribute: String,
    pub field_type: FieldType,
    /// Element type for arrays and to-many relations, id type for to-one
    #[serde(default)]
    pub item_type: Option<FieldType>,
    #[serde(default)]
    pub io: FieldIo,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            attribute: name.clone(),
            name,
            field_type,
            item_type: None,
            io: FieldIo::ReadWrite,
            nullable: false,
            required: false,
            default: None,
        }
    }

    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = attribute.into();
        self
    }

    pub fn items(mut self, item_type: FieldType) -> Self {
        self.item_type = Some(item_type);
        self
    }

    pub fn io(mut self, io: FieldIo) -> Self {
        self.io = io;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn default_value(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Convert a user value for this field; null only passes on nullable fields
    pub fn convert(&self, raw: &Value) -> ManagerResult<FieldValue> {
        if raw.is_null() {
            return if self.nullable {
                Ok(FieldValue::Null)
            } else {
                Err(ManagerError::validation(&self.name, "may not be null"))
            };
        }
        match (self.field_type, self.item_type) {
            (FieldType::ToOne, Some(id_type)) => id_type.convert(&self.name, raw),
            (field_type, _) => field_type.convert(&self.name, raw),
        }
    }

    /// Convert a single element of this field's container
    pub fn convert_item(&self, raw: &Value) -> ManagerResult<FieldValue> {
        match self.item_type {
            Some(item_type) => item_type.convert(&self.name, raw),
            None => Ok(FieldValue::from_json(raw)),
        }
    }

    /// Typed view of the value stored in an item
    pub fn coerce(&self, raw: &Value) -> FieldValue {
        match (self.field_type, self.item_type) {
            (FieldType::Array | FieldType::ToMany, Some(item_type)) => match raw {
                Value::Array(items) => {
                    FieldValue::Array(items.iter().map(|v| item_type.coerce(v)).collect())
                }
                other => FieldValue::from_json(other),
            },
            (FieldType::ToOne, Some(id_type)) => id_type.coerce(raw),
            (field_type, _) => field_type.coerce(raw),
        }
    }
}
