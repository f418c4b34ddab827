//! Conversion between wire JSON and native values.
//!
//! The Close API transmits timestamps as ISO-8601 strings. [`to_native`] promotes such strings
//! to chrono types, but only when formatting the parsed value back reproduces the input exactly,
//! so an incidental date-like string such as `"order-1988-11-19-draft"` stays a string.
//! [`to_wire`] is the mirror image, which makes `to_wire(&to_native(x)) == x` hold for every
//! wire value.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use futures::{Stream, TryStreamExt};
use serde::{Serialize, Serializer};
use serde_json::{Number, Value};

use crate::errors::Result;

/// A JSON value with ISO-8601 strings promoted to temporal types.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTime<FixedOffset>),
    /// A datetime sent without a UTC offset
    NaiveDateTime(NaiveDateTime),
    Array(Vec<NativeValue>),
    Object(BTreeMap<String, NativeValue>),
}

impl NativeValue {
    /// Member `key` of an object. `None` when absent or when `self` is not an object.
    pub fn get(&self, key: &str) -> Option<&NativeValue> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Shorthand for `get(key)` followed by [`as_str`](Self::as_str).
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Self::as_str)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_naive_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::NaiveDateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[NativeValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, NativeValue>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<Value> for NativeValue {
    fn from(value: Value) -> Self {
        to_native(value)
    }
}

impl From<NativeValue> for Value {
    fn from(value: NativeValue) -> Self {
        to_wire(&value)
    }
}

impl From<&str> for NativeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for NativeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for NativeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for NativeValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<NaiveDate> for NativeValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<DateTime<FixedOffset>> for NativeValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::DateTime(value)
    }
}

impl Serialize for NativeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        to_wire(self).serialize(serializer)
    }
}

/// Convert a wire value to its native form, promoting exact ISO-8601 strings.
pub fn to_native(value: Value) -> NativeValue {
    match value {
        Value::Null => NativeValue::Null,
        Value::Bool(b) => NativeValue::Bool(b),
        Value::Number(n) => NativeValue::Number(n),
        Value::String(s) => promote(&s).unwrap_or(NativeValue::String(s)),
        Value::Array(items) => NativeValue::Array(items.into_iter().map(to_native).collect()),
        Value::Object(map) => NativeValue::Object(map.into_iter().map(|(k, v)| (k, to_native(v))).collect()),
    }
}

/// Convert a native value back to wire JSON. Temporal values become ISO-8601 strings.
pub fn to_wire(value: &NativeValue) -> Value {
    match value {
        NativeValue::Null => Value::Null,
        NativeValue::Bool(b) => Value::Bool(*b),
        NativeValue::Number(n) => Value::Number(n.clone()),
        NativeValue::String(s) => Value::String(s.clone()),
        NativeValue::Date(d) => Value::String(iso_date(d)),
        NativeValue::Time(t) => Value::String(iso_time(t)),
        NativeValue::DateTime(dt) => Value::String(iso_datetime(dt)),
        NativeValue::NaiveDateTime(dt) => Value::String(iso_naive_datetime(dt)),
        NativeValue::Array(items) => Value::Array(items.iter().map(to_wire).collect()),
        NativeValue::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), to_wire(v))).collect()),
    }
}

/// Lazily convert each element of `values`. Elements are converted as they are pulled.
pub fn to_native_iter<I>(values: I) -> impl Iterator<Item = NativeValue>
where
    I: IntoIterator<Item = Value>,
{
    values.into_iter().map(to_native)
}

/// Lazily convert each successful element of a fallible stream, passing errors through.
pub fn to_native_stream<S>(values: S) -> impl Stream<Item = Result<NativeValue>>
where
    S: Stream<Item = Result<Value>>,
{
    values.map_ok(to_native)
}

/// Try each temporal shape in turn; keep the first whose canonical form equals `s`.
fn promote(s: &str) -> Option<NativeValue> {
    // Shortest candidate is "HH:MM:SS"; every candidate starts with a digit
    if s.len() < 8 || !s.as_bytes()[0].is_ascii_digit() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%:z")
        && iso_datetime(&dt) == s
    {
        return Some(NativeValue::DateTime(dt));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        && iso_naive_datetime(&dt) == s
    {
        return Some(NativeValue::NaiveDateTime(dt));
    }

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        && iso_date(&d) == s
    {
        return Some(NativeValue::Date(d));
    }

    if let Ok(t) = NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        && iso_time(&t) == s
    {
        return Some(NativeValue::Time(t));
    }

    None
}

fn iso_date(d: &NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// `HH:MM:SS`, with `.ffffff` appended only when the microsecond is non-zero.
fn iso_time(t: &NaiveTime) -> String {
    let base = t.format("%H:%M:%S").to_string();
    match t.nanosecond() / 1_000 {
        0 => base,
        micros => format!("{base}.{micros:06}"),
    }
}

fn iso_naive_datetime(dt: &NaiveDateTime) -> String {
    format!("{}T{}", iso_date(&dt.date()), iso_time(&dt.time()))
}

fn iso_datetime(dt: &DateTime<FixedOffset>) -> String {
    format!("{}{}", iso_naive_datetime(&dt.naive_local()), dt.format("%:z"))
}
