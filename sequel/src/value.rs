//! # Values
//!
//! Bound arguments travel through the expander as a [`Param`] tree. Leaves are scalar
//! [`Value`]s, which is all the database ever sees; sequences and records are flattened
//! away during expansion.
//!
//! Types opt into being bound with [`ToParam`] and into being scanned out of a result
//! column with [`FromValue`]. The `Any` driver has no native date/time or UUID types, so
//! those travel as text.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::{error::DecodeError, record::Record};

// ============================================================================
// Scalar Values
// ============================================================================

/// A single bindable scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL, typed as the column it stands in for.
    Null(ValueKind),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// Column type of a NULL. PostgreSQL types every parameter, so a NULL bound as text
/// cannot be assigned to an integer column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    #[default]
    Text,
    Bytes,
}

impl Value {
    /// NULL of no particular type. Bound as text.
    pub const NULL: Value = Value::Null(ValueKind::Text);

    /// Short name of the variant, used in decode errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null(_) => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }
}

macro_rules! impl_value_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Int(i64::from(v))
                }
            }
        )*
    };
}

impl_value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::NULL, Into::into)
    }
}

// ============================================================================
// Parameter Tree
// ============================================================================

/// A bound argument as seen by the expander.
pub enum Param<'a> {
    /// A scalar, including NULL. Expands to exactly one placeholder.
    Value(Value),
    /// An ordered sequence. Elements are expanded in order and joined with `", "`.
    Seq(Vec<Param<'a>>),
    /// A record. Expands to its columns in parentheses.
    Record(&'a dyn Record),
    /// A value with no expansion; carries the offending type name.
    Unsupported(&'static str),
}

impl fmt::Debug for Param<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Param::Seq(items) => f.debug_tuple("Seq").field(items).finish(),
            Param::Record(r) => f.debug_tuple("Record").field(&r.record_shape().type_name()).finish(),
            Param::Unsupported(ty) => f.debug_tuple("Unsupported").field(ty).finish(),
        }
    }
}

/// Conversion of a bound argument into the [`Param`] tree.
///
/// Implemented for the usual scalars, `Option`, references and boxes, sequences
/// (`Vec`, slices, arrays, tuples) and, through `#[derive(Record)]`, records.
/// `Vec<u8>` and `[u8]` are byte blobs, not sequences.
pub trait ToParam: Send + Sync {
    fn to_param(&self) -> Param<'_>;

    /// Type of the NULL bound for `None::<Self>`.
    fn null_kind() -> ValueKind
    where
        Self: Sized,
    {
        ValueKind::Text
    }
}

macro_rules! impl_to_param_scalar {
    ($kind:ident: $($t:ty),*) => {
        $(
            impl ToParam for $t {
                fn to_param(&self) -> Param<'_> {
                    Param::Value(Value::from(*self))
                }

                fn null_kind() -> ValueKind {
                    ValueKind::$kind
                }
            }
        )*
    };
}

impl_to_param_scalar!(Bool: bool);
impl_to_param_scalar!(Int: i8, i16, i32, i64, u16, u32);
impl_to_param_scalar!(Float: f32, f64);

// Values past i64::MAX have no column to go into.
macro_rules! impl_to_param_wide_int {
    ($($t:ty),*) => {
        $(
            impl ToParam for $t {
                fn to_param(&self) -> Param<'_> {
                    match i64::try_from(*self) {
                        Ok(v) => Param::Value(Value::Int(v)),
                        Err(_) => Param::Unsupported(concat!(stringify!($t), " out of i64 range")),
                    }
                }

                fn null_kind() -> ValueKind {
                    ValueKind::Int
                }
            }
        )*
    };
}

impl_to_param_wide_int!(u64, usize);

/// Binds a `u8` or `Option<u8>`.
///
/// `u8` has no [`ToParam`] impl so that `Vec<u8>` can stay a byte blob;
/// `#[derive(Record)]` routes `u8` members through here instead.
pub fn byte_param(value: impl Into<Option<u8>>) -> Param<'static> {
    match value.into() {
        Some(v) => Param::Value(Value::from(v)),
        None => Param::Value(Value::Null(ValueKind::Int)),
    }
}

impl ToParam for str {
    fn to_param(&self) -> Param<'_> {
        Param::Value(Value::Text(self.to_owned()))
    }
}

impl ToParam for String {
    fn to_param(&self) -> Param<'_> {
        Param::Value(Value::Text(self.clone()))
    }
}

impl ToParam for char {
    fn to_param(&self) -> Param<'_> {
        Param::Value(Value::Text(self.to_string()))
    }
}

impl ToParam for [u8] {
    fn to_param(&self) -> Param<'_> {
        Param::Value(Value::Bytes(self.to_vec()))
    }
}

impl ToParam for Vec<u8> {
    fn to_param(&self) -> Param<'_> {
        Param::Value(Value::Bytes(self.clone()))
    }

    fn null_kind() -> ValueKind {
        ValueKind::Bytes
    }
}

impl ToParam for Value {
    fn to_param(&self) -> Param<'_> {
        Param::Value(self.clone())
    }
}

impl<T: ToParam> ToParam for Option<T> {
    fn to_param(&self) -> Param<'_> {
        match self {
            Some(v) => v.to_param(),
            None => Param::Value(Value::Null(T::null_kind())),
        }
    }

    fn null_kind() -> ValueKind {
        T::null_kind()
    }
}

impl<T: ToParam + ?Sized> ToParam for &T {
    fn to_param(&self) -> Param<'_> {
        (**self).to_param()
    }
}

impl<T: ToParam + ?Sized> ToParam for Box<T> {
    fn to_param(&self) -> Param<'_> {
        (**self).to_param()
    }
}

impl<T: ToParam + ?Sized> ToParam for Arc<T> {
    fn to_param(&self) -> Param<'_> {
        (**self).to_param()
    }
}

impl<T: ToParam> ToParam for [T] {
    fn to_param(&self) -> Param<'_> {
        Param::Seq(self.iter().map(ToParam::to_param).collect())
    }
}

impl<T: ToParam> ToParam for Vec<T> {
    fn to_param(&self) -> Param<'_> {
        self.as_slice().to_param()
    }
}

impl<T: ToParam, const N: usize> ToParam for [T; N] {
    fn to_param(&self) -> Param<'_> {
        self.as_slice().to_param()
    }
}

impl<T: ToParam> ToParam for VecDeque<T> {
    fn to_param(&self) -> Param<'_> {
        Param::Seq(self.iter().map(ToParam::to_param).collect())
    }
}

macro_rules! impl_to_param_tuple {
    ($($T:ident),+) => {
        impl<$($T: ToParam),+> ToParam for ($($T,)+) {
            #[allow(non_snake_case)]
            fn to_param(&self) -> Param<'_> {
                let ($($T,)+) = self;
                Param::Seq(vec![$($T.to_param()),+])
            }
        }
    };
}

impl_to_param_tuple!(T1);
impl_to_param_tuple!(T1, T2);
impl_to_param_tuple!(T1, T2, T3);
impl_to_param_tuple!(T1, T2, T3, T4);
impl_to_param_tuple!(T1, T2, T3, T4, T5);
impl_to_param_tuple!(T1, T2, T3, T4, T5, T6);
impl_to_param_tuple!(T1, T2, T3, T4, T5, T6, T7);
impl_to_param_tuple!(T1, T2, T3, T4, T5, T6, T7, T8);

// Maps have no ordering or shape to expand against.
impl<K: Send + Sync, V: Send + Sync, S: Send + Sync> ToParam for HashMap<K, V, S> {
    fn to_param(&self) -> Param<'_> {
        Param::Unsupported(std::any::type_name::<Self>())
    }
}

impl<K: Send + Sync, V: Send + Sync> ToParam for BTreeMap<K, V> {
    fn to_param(&self) -> Param<'_> {
        Param::Unsupported(std::any::type_name::<Self>())
    }
}

impl ToParam for DateTime<Utc> {
    fn to_param(&self) -> Param<'_> {
        Param::Value(Value::Text(self.to_rfc3339()))
    }
}

impl ToParam for NaiveDateTime {
    fn to_param(&self) -> Param<'_> {
        Param::Value(Value::Text(self.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
    }
}

impl ToParam for NaiveDate {
    fn to_param(&self) -> Param<'_> {
        Param::Value(Value::Text(self.format("%Y-%m-%d").to_string()))
    }
}

impl ToParam for NaiveTime {
    fn to_param(&self) -> Param<'_> {
        Param::Value(Value::Text(self.format("%H:%M:%S%.f").to_string()))
    }
}

impl ToParam for Uuid {
    fn to_param(&self) -> Param<'_> {
        Param::Value(Value::Text(self.hyphenated().to_string()))
    }
}

// A JSON document is one column whatever its shape.
impl ToParam for serde_json::Value {
    fn to_param(&self) -> Param<'_> {
        Param::Value(Value::Text(self.to_string()))
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Conversion of a result column value into a record field.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, DecodeError>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Null(_) => Ok(None),
            v => T::from_value(v).map(Some),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Bool(b) => Ok(b),
            // SQLite and MySQL hand booleans back as integers.
            Value::Int(i) => Ok(i != 0),
            other => Err(DecodeError::new("bool", other.kind())),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Int(i) => Ok(i),
            Value::Bool(b) => Ok(i64::from(b)),
            other => Err(DecodeError::new("i64", other.kind())),
        }
    }
}

macro_rules! impl_from_value_narrow_int {
    ($($t:ty),*) => {
        $(
            impl FromValue for $t {
                fn from_value(value: Value) -> Result<Self, DecodeError> {
                    let wide = i64::from_value(value).map_err(|e| DecodeError::new(stringify!($t), e.found))?;
                    <$t>::try_from(wide).map_err(|_| DecodeError::new(stringify!($t), format!("out of range integer {wide}")))
                }
            }
        )*
    };
}

impl_from_value_narrow_int!(i8, i16, i32, u8, u16, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => Err(DecodeError::new("f64", other.kind())),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        f64::from_value(value).map(|f| f as f32).map_err(|e| DecodeError::new("f32", e.found))
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(DecodeError::new("text", other.kind())),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Bytes(b) => Ok(b),
            Value::Text(s) => Ok(s.into_bytes()),
            other => Err(DecodeError::new("bytes", other.kind())),
        }
    }
}

fn parse_text<T, E: fmt::Display>(
    value: Value,
    expected: &'static str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> Result<T, DecodeError> {
    match value {
        Value::Text(s) => parse(&s).map_err(|e| DecodeError::new(expected, format!("{s:?} ({e})"))),
        other => Err(DecodeError::new(expected, other.kind())),
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        parse_text(value, "timestamp", |s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                // CURRENT_TIMESTAMP style, no offset.
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").map(|dt| dt.and_utc()))
        })
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        parse_text(value, "datetime", |s| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        })
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        parse_text(value, "date", |s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        parse_text(value, "time", |s| NaiveTime::parse_from_str(s, "%H:%M:%S%.f"))
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Bytes(b) => Uuid::from_slice(&b).map_err(|e| DecodeError::new("uuid", e.to_string())),
            other => parse_text(other, "uuid", Uuid::parse_str),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        use serde_json::Value as Json;
        Ok(match value {
            Value::Null(_) => Json::Null,
            Value::Bool(b) => Json::Bool(b),
            Value::Int(i) => Json::from(i),
            Value::Float(f) => Json::from(f),
            Value::Text(s) => return serde_json::from_str(&s).map_err(|e| DecodeError::new("json", e.to_string())),
            Value::Bytes(b) => {
                return serde_json::from_slice(&b).map_err(|e| DecodeError::new("json", e.to_string()));
            }
        })
    }
}
