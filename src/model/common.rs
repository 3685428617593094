use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use indexmap::IndexMap;
use itertools::Itertools;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

use crate::model::EnumMember;

/// Native value of a scalar field after type-directed coercion
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    DateTime(NaiveDateTime),
    DateTimeTz(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
    TimeTz(NaiveTime, FixedOffset),
    Duration(TimeDelta),
    Bytes(Vec<u8>),
    Enum(EnumMember),
    Uuid(Uuid),
    Map(IndexMap<String, String>),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    /// Compare two values of compatible kinds; numbers compare across int/float/decimal
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::DateTimeTz(a), Value::DateTimeTz(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::Enum(a), Value::Enum(b)) => Some(a.name.cmp(&b.name)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "{}", s),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::DateTimeTz(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}", t),
            Value::TimeTz(t, offset) => write!(f, "{}{}", t, offset),
            Value::Duration(d) => write!(f, "{}", d),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Enum(member) => write!(f, "{}", member.name),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::Map(m) => write!(
                f,
                "{{{}}}",
                m.iter().map(|(k, v)| format!("{}={}", k, v)).join(",")
            ),
            Value::Array(items) => write!(f, "[{}]", items.iter().join(",")),
        }
    }
}

/// Primary-key tuple of an entity, in the order declared by its type
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrimaryKey(pub Vec<Value>);

impl PrimaryKey {
    pub fn new(parts: Vec<Value>) -> Self {
        Self(parts)
    }

    pub fn single(value: Value) -> Self {
        Self(vec![value])
    }

    /// A key with any null component belongs to a transient (not yet persisted) entity
    pub fn is_complete(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|part| !part.is_null())
    }

    pub fn parts(&self) -> &[Value] {
        &self.0
    }

    /// Readable form for messages; not unique when text parts contain commas
    pub fn key_text(&self) -> String {
        self.0.iter().join(",")
    }

    /// Canonical text used to index entities by identity. Every part is
    /// tagged with its kind and length-prefixed, and decimals are normalized.
    pub fn identity_text(&self) -> String {
        self.0.iter().map(identity_part).collect()
    }
}

fn identity_part(value: &Value) -> String {
    let (tag, text) = match value {
        Value::Null => ('n', String::new()),
        Value::Bool(b) => ('b', b.to_string()),
        Value::Int(i) => ('i', i.to_string()),
        Value::Float(x) => ('f', x.to_string()),
        Value::Decimal(d) => ('d', d.normalize().to_string()),
        Value::Text(s) => ('s', s.clone()),
        Value::DateTime(_) => ('t', value.to_string()),
        Value::DateTimeTz(dt) => ('z', dt.to_rfc3339()),
        Value::Date(d) => ('D', d.to_string()),
        Value::Time(t) => ('T', t.to_string()),
        Value::TimeTz(..) => ('Z', value.to_string()),
        Value::Duration(d) => ('u', d.to_string()),
        Value::Bytes(bytes) => ('x', STANDARD.encode(bytes)),
        Value::Enum(member) => ('e', member.name.clone()),
        Value::Uuid(u) => ('g', u.to_string()),
        Value::Map(m) => (
            'm',
            m.iter()
                .map(|(k, v)| format!("{}:{}{}:{}", k.len(), k, v.len(), v))
                .collect(),
        ),
        Value::Array(items) => ('a', items.iter().map(identity_part).collect()),
    };
    format!("{}{}:{}", tag, text.len(), text)
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key_text())
    }
}

/// Identity of an entity across a unit of work: root type plus canonical key text
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub root_type: String,
    pub key: String,
}

impl IdentityKey {
    pub fn new(root_type: &str, key: &PrimaryKey) -> Self {
        Self {
            root_type: root_type.to_string(),
            key: key.identity_text(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_key_completeness() {
        assert!(PrimaryKey::single(Value::Int(1)).is_complete());
        assert!(!PrimaryKey::single(Value::Null).is_complete());
        assert!(!PrimaryKey::new(vec![Value::Int(1), Value::Null]).is_complete());
        assert!(!PrimaryKey::default().is_complete());
    }

    #[test]
    fn test_numeric_compare_across_kinds() {
        assert_eq!(
            Value::Int(2).compare(&Value::Float(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Decimal(Decimal::new(150, 2)).compare(&Value::Float(1.5)),
            Some(Ordering::Equal)
        );
        assert_eq!(Value::Text("a".into()).compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_identity_key_text() {
        let key = PrimaryKey::new(vec![Value::Int(4), Value::Text("x".into())]);
        let identity = IdentityKey::new("Parent", &key);
        assert_eq!(identity.key, "i1:4s1:x");
        assert_eq!(identity.root_type, "Parent");
        assert_eq!(key.key_text(), "4,x");
    }

    #[test]
    fn test_identity_of_text_parts_with_commas() {
        let text = |s: &str| Value::Text(s.into());
        let left = PrimaryKey::new(vec![text("x,y"), text("z")]);
        let right = PrimaryKey::new(vec![text("x"), text("y,z")]);
        assert_eq!(left.key_text(), right.key_text());
        assert_ne!(
            IdentityKey::new("Pair", &left),
            IdentityKey::new("Pair", &right)
        );

        let number = PrimaryKey::single(Value::Int(12));
        let string = PrimaryKey::single(text("12"));
        assert_ne!(number.identity_text(), string.identity_text());
    }

    #[test]
    fn test_identity_ignores_decimal_scale() {
        let one = PrimaryKey::single(Value::Decimal(Decimal::new(10, 1)));
        let same = PrimaryKey::single(Value::Decimal(Decimal::new(100, 2)));
        assert_eq!(
            IdentityKey::new("Price", &one),
            IdentityKey::new("Price", &same)
        );
    }
}
