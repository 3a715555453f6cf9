//! Value model shared by the registry and the engine.
//!
//! `FieldDef` declares a column, `FieldVal` carries one named value, `Record`
//! is an ordered row and `WhereClause` is one AND-joined filter term.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SqliteError};

/// Text layout used when binding a `Value::Date`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Text layout used when binding a `Value::DateTime`. The fraction is omitted when zero.
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const DATE_TIME_INPUTS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => f.write_str(s),
            Value::Blob(b) => f.write_str(&String::from_utf8_lossy(b)),
            Value::Boolean(b) => write!(f, "{}", i64::from(*b)),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::DateTime(dt) => write!(f, "{}", dt.format(DATE_TIME_FORMAT)),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Owned(SqlValue::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Boolean(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Date(d) => ToSqlOutput::Owned(SqlValue::Text(d.format(DATE_FORMAT).to_string())),
            Value::DateTime(dt) => {
                ToSqlOutput::Owned(SqlValue::Text(dt.format(DATE_TIME_FORMAT).to_string()))
            }
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value_ref: ValueRef<'_>) -> Self {
        match value_ref {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Column affinity used for DDL generation and value coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Text,
    Integer,
    Real,
    Blob,
    /// Date only; time of day is discarded on coercion.
    Date,
    DateTime,
}

impl DataType {
    /// The column type keyword used in `CREATE TABLE` / `ALTER TABLE`.
    pub fn sql_type(self) -> &'static str {
        match self {
            DataType::Text => "TEXT",
            DataType::Integer => "INTEGER",
            DataType::Real => "REAL",
            DataType::Blob => "BLOB",
            DataType::Date => "DATE",
            DataType::DateTime => "DATETIME",
        }
    }

    /// Coerces a raw value into this type.
    ///
    /// Only the date kinds transform values; every other kind passes the
    /// value through untouched. `Null` always stays `Null`.
    pub fn coerce(self, value: Value) -> Result<Value> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (DataType::Date, Value::Date(d)) => Ok(Value::Date(d)),
            (DataType::Date, Value::DateTime(dt)) => Ok(Value::Date(dt.date())),
            (DataType::Date, Value::Text(text)) => match parse_date_time(&text) {
                Some(dt) => Ok(Value::Date(dt.date())),
                None => Err(self.coercion_error(Value::Text(text))),
            },
            (DataType::DateTime, Value::DateTime(dt)) => Ok(Value::DateTime(dt)),
            (DataType::DateTime, Value::Date(d)) => match d.and_hms_opt(0, 0, 0) {
                Some(dt) => Ok(Value::DateTime(dt)),
                None => Err(self.coercion_error(Value::Date(d))),
            },
            (DataType::DateTime, Value::Text(text)) => match parse_date_time(&text) {
                Some(dt) => Ok(Value::DateTime(dt)),
                None => Err(self.coercion_error(Value::Text(text))),
            },
            (DataType::Date | DataType::DateTime, other) => Err(self.coercion_error(other)),
            (_, other) => Ok(other),
        }
    }

    fn coercion_error(self, value: Value) -> SqliteError {
        SqliteError::Coercion {
            value,
            data_type: self,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_type())
    }
}

fn parse_date_time(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in DATE_TIME_INPUTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Declaration of one column: table, field name and type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDef {
    table: String,
    field: String,
    #[serde(rename = "type")]
    data_type: DataType,
}

impl FieldDef {
    pub fn new(table: impl Into<String>, field: impl Into<String>, data_type: DataType) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
            data_type,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

/// A field name paired with its runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldVal {
    field: String,
    value: Value,
    data_type: Option<DataType>,
}

impl FieldVal {
    /// Untyped value, stored as-is. Read results are built this way.
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            data_type: None,
        }
    }

    /// Value coerced by `data_type` at construction.
    pub fn typed(
        field: impl Into<String>,
        value: impl Into<Value>,
        data_type: DataType,
    ) -> Result<Self> {
        Ok(Self {
            field: field.into(),
            value: data_type.coerce(value.into())?,
            data_type: Some(data_type),
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn data_type(&self) -> Option<DataType> {
        self.data_type
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

/// One row: an ordered list of field values.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    field_vals: Vec<FieldVal>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field_val: FieldVal) {
        self.field_vals.push(field_val);
    }

    pub fn add_field(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.push(FieldVal::new(field, value));
    }

    pub fn add_typed_field(
        &mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
        data_type: DataType,
    ) -> Result<()> {
        self.push(FieldVal::typed(field, value, data_type)?);
        Ok(())
    }

    /// Builder form of [`Record::add_field`].
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_field(field, value);
        self
    }

    pub fn field_vals(&self) -> &[FieldVal] {
        &self.field_vals
    }

    /// First value named `field`.
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.field_vals
            .iter()
            .find(|fv| fv.field == field)
            .map(|fv| &fv.value)
    }

    /// First value named `field`, rendered as text. `Null` renders as "".
    pub fn field_val(&self, field: &str) -> Option<String> {
        self.value(field).map(ToString::to_string)
    }

    pub fn len(&self) -> usize {
        self.field_vals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.field_vals.is_empty()
    }
}

impl FromIterator<FieldVal> for Record {
    fn from_iter<I: IntoIterator<Item = FieldVal>>(iter: I) -> Self {
        Self {
            field_vals: iter.into_iter().collect(),
        }
    }
}

/// Comparison operators accepted in a [`WhereClause`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhereCondition {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    NotLike,
}

impl WhereCondition {
    pub fn as_sql(self) -> &'static str {
        match self {
            WhereCondition::Equal => "=",
            WhereCondition::NotEqual => "!=",
            WhereCondition::GreaterThan => ">",
            WhereCondition::GreaterThanOrEqual => ">=",
            WhereCondition::LessThan => "<",
            WhereCondition::LessThanOrEqual => "<=",
            WhereCondition::Like => "LIKE",
            WhereCondition::NotLike => "NOT LIKE",
        }
    }
}

impl fmt::Display for WhereCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for WhereCondition {
    type Err = SqliteError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_uppercase().as_str() {
            "=" => Ok(WhereCondition::Equal),
            "!=" => Ok(WhereCondition::NotEqual),
            ">" => Ok(WhereCondition::GreaterThan),
            ">=" => Ok(WhereCondition::GreaterThanOrEqual),
            "<" => Ok(WhereCondition::LessThan),
            "<=" => Ok(WhereCondition::LessThanOrEqual),
            "LIKE" => Ok(WhereCondition::Like),
            "NOT LIKE" => Ok(WhereCondition::NotLike),
            _ => Err(SqliteError::InvalidArgument(format!(
                "unknown where condition: {s}"
            ))),
        }
    }
}

/// A `field <op> value` filter term. Clauses passed together are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    field: String,
    condition: WhereCondition,
    value: Value,
}

impl WhereClause {
    pub fn new(field: impl Into<String>, condition: WhereCondition, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            condition,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, WhereCondition::Equal, value)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn condition(&self) -> WhereCondition {
        self.condition
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}
