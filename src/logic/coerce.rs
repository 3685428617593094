use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{FixedOffset, Offset, TimeDelta, TimeZone, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use crate::codec::{parse_datetime, parse_duration, parse_time};
use crate::error::{LiantError, Result};
use crate::model::{FieldDescriptor, FieldKind, ScalarType, Value};

const TRUE_TOKENS: &[&str] = &["true", "t", "yes", "y", "on", "1"];
const FALSE_TOKENS: &[&str] = &["false", "f", "no", "n", "off", "0"];

/// Convert a raw JSON value to the native value of a scalar field.
///
/// `size_check` enforces text length limits; filter parsing turns it off.
pub fn coerce_value(
    entity_type: &str,
    field: &FieldDescriptor,
    value: &serde_json::Value,
    size_check: bool,
) -> Result<Value> {
    if value.is_null() {
        if !field.nullable {
            return Err(LiantError::NullNotAllowed {
                entity_type: entity_type.to_string(),
                field: field.name.clone(),
            });
        }
        return Ok(Value::Null);
    }

    let FieldKind::Scalar(scalar) = &field.kind else {
        return Err(LiantError::coercion(
            entity_type,
            &field.name,
            "not a scalar field",
        ));
    };

    let limit = if size_check { field.max_length } else { None };
    coerce_scalar(scalar, value, limit)
        .map_err(|reason| LiantError::coercion(entity_type, &field.name, reason))
}

fn text_of(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce_scalar(
    scalar: &ScalarType,
    value: &serde_json::Value,
    max_length: Option<usize>,
) -> std::result::Result<Value, String> {
    use serde_json::Value as Json;

    match scalar {
        ScalarType::Text => {
            let text = text_of(value).ok_or("expected text")?;
            if let Some(limit) = max_length {
                if text.chars().count() > limit {
                    return Err(format!("text value too large, limit {}", limit));
                }
            }
            Ok(Value::Text(text))
        }
        ScalarType::Integer => match value {
            Json::Number(n) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| f as i64)
                })
                .map(Value::Int)
                .ok_or_else(|| "expected an integral number".to_string()),
            Json::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| e.to_string()),
            _ => Err("expected an integer".to_string()),
        },
        ScalarType::Decimal => {
            let text = match value {
                Json::Number(n) => n.to_string(),
                Json::String(s) => s.trim().to_string(),
                _ => return Err("expected a decimal".to_string()),
            };
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map(Value::Decimal)
                .map_err(|e| e.to_string())
        }
        ScalarType::Float => match value {
            Json::Number(n) => n.as_f64().map(Value::Float).ok_or_else(|| "expected a number".to_string()),
            Json::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| e.to_string()),
            _ => Err("expected a number".to_string()),
        },
        ScalarType::Boolean => match value {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err("expected boolean value".to_string()),
            },
            Json::String(s) => {
                let token = s.trim().to_lowercase();
                if TRUE_TOKENS.contains(&token.as_str()) {
                    Ok(Value::Bool(true))
                } else if FALSE_TOKENS.contains(&token.as_str()) {
                    Ok(Value::Bool(false))
                } else {
                    Err(format!("expected boolean value, received '{}'", s))
                }
            }
            _ => Err("expected boolean value".to_string()),
        },
        ScalarType::DateTime { timezone } => {
            let text = value.as_str().ok_or("expected datetime text")?;
            let (naive, offset) = parse_datetime(text).ok_or("unrecognized datetime")?;
            if *timezone {
                let offset = offset.unwrap_or_else(utc);
                offset
                    .from_local_datetime(&naive)
                    .single()
                    .map(Value::DateTimeTz)
                    .ok_or_else(|| "ambiguous local datetime".to_string())
            } else {
                Ok(Value::DateTime(naive))
            }
        }
        ScalarType::Date => {
            let text = value.as_str().ok_or("expected date text")?;
            parse_datetime(text)
                .map(|(naive, _)| Value::Date(naive.date()))
                .ok_or_else(|| "unrecognized date".to_string())
        }
        ScalarType::Time { timezone } => {
            let text = value.as_str().ok_or("expected time text")?;
            let (time, offset) = parse_time(text).ok_or("unrecognized time")?;
            Ok(if *timezone {
                Value::TimeTz(time, offset.unwrap_or_else(utc))
            } else {
                Value::Time(time)
            })
        }
        ScalarType::Duration => match value {
            Json::String(s) => parse_duration(s)
                .map(Value::Duration)
                .ok_or_else(|| "unrecognized duration".to_string()),
            Json::Number(n) => n
                .as_f64()
                .map(|seconds| Value::Duration(TimeDelta::microseconds((seconds * 1_000_000.0).round() as i64)))
                .ok_or_else(|| "expected seconds".to_string()),
            _ => Err("expected a duration".to_string()),
        },
        ScalarType::Bytes => {
            let text = value.as_str().ok_or("expected base64 text")?;
            STANDARD
                .decode(text)
                .map(Value::Bytes)
                .map_err(|e| e.to_string())
        }
        ScalarType::Enum(def) => {
            let text = text_of(value).ok_or("expected enum member")?;
            def.lookup(&text)
                .map(|member| Value::Enum(member.clone()))
                .ok_or_else(|| format!("'{}' is not a member of {}", text, def.name))
        }
        ScalarType::Uuid => match value {
            Json::String(s) => Uuid::parse_str(s.trim())
                .map(Value::Uuid)
                .map_err(|e| e.to_string()),
            Json::Number(n) => n
                .as_u64()
                .map(|i| Value::Uuid(Uuid::from_u128(i as u128)))
                .ok_or_else(|| "expected a non-negative integer".to_string()),
            _ => Err("expected a uuid".to_string()),
        },
        ScalarType::Map => match value {
            Json::Object(entries) => Ok(Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), text_of(v).unwrap_or_else(|| v.to_string())))
                    .collect::<IndexMap<_, _>>(),
            )),
            _ => Err("expected an object".to_string()),
        },
        ScalarType::Array(inner) => match value {
            Json::Array(items) => items
                .iter()
                .map(|item| {
                    if item.is_null() {
                        Ok(Value::Null)
                    } else {
                        coerce_scalar(inner, item, max_length)
                    }
                })
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => Err("expected an array".to_string()),
        },
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EnumDef;
    use serde_json::json;
    use std::sync::Arc;

    fn coerce(scalar: ScalarType, value: serde_json::Value) -> Result<Value> {
        coerce_value("T", &FieldDescriptor::scalar("f", scalar), &value, true)
    }

    #[test]
    fn test_null_handling() {
        assert_eq!(coerce(ScalarType::Integer, json!(null)).unwrap(), Value::Null);
        let field = FieldDescriptor::scalar("f", ScalarType::Integer).not_null();
        let err = coerce_value("T", &field, &json!(null), true).unwrap_err();
        assert!(matches!(err, LiantError::NullNotAllowed { .. }));
    }

    #[test]
    fn test_text_rules() {
        assert_eq!(coerce(ScalarType::Text, json!(12)).unwrap(), Value::Text("12".into()));
        assert_eq!(coerce(ScalarType::Text, json!(true)).unwrap(), Value::Text("true".into()));
        assert!(coerce(ScalarType::Text, json!({"a": 1})).is_err());

        let limited = FieldDescriptor::text("f", Some(3));
        assert!(coerce_value("T", &limited, &json!("abcd"), true).is_err());
        assert!(coerce_value("T", &limited, &json!("abcd"), false).is_ok());
    }

    #[test]
    fn test_numbers() {
        assert_eq!(coerce(ScalarType::Integer, json!("42")).unwrap(), Value::Int(42));
        assert_eq!(coerce(ScalarType::Integer, json!(3.0)).unwrap(), Value::Int(3));
        assert!(coerce(ScalarType::Integer, json!(3.5)).is_err());
        assert!(coerce(ScalarType::Integer, json!("x")).is_err());
        assert_eq!(
            coerce(ScalarType::Decimal, json!("1.25")).unwrap(),
            Value::Decimal(Decimal::new(125, 2))
        );
        assert_eq!(coerce(ScalarType::Float, json!("2.5")).unwrap(), Value::Float(2.5));
    }

    #[test]
    fn test_boolean_tokens() {
        for token in ["true", "T", "Yes", "y", "on", "1"] {
            assert_eq!(coerce(ScalarType::Boolean, json!(token)).unwrap(), Value::Bool(true));
        }
        for token in ["false", "F", "no", "N", "off", "0"] {
            assert_eq!(coerce(ScalarType::Boolean, json!(token)).unwrap(), Value::Bool(false));
        }
        assert_eq!(coerce(ScalarType::Boolean, json!(1)).unwrap(), Value::Bool(true));
        assert!(coerce(ScalarType::Boolean, json!(2)).is_err());
        assert!(coerce(ScalarType::Boolean, json!("maybe")).is_err());
    }

    #[test]
    fn test_temporal_fields() {
        let naive = coerce(ScalarType::DateTime { timezone: false }, json!("2024-05-01T10:00:00+03:00")).unwrap();
        assert_eq!(naive.to_string(), "2024-05-01T10:00:00");

        let aware = coerce(ScalarType::DateTime { timezone: true }, json!("2024-05-01 10:00:00")).unwrap();
        assert_eq!(aware.to_string(), "2024-05-01T10:00:00+00:00");

        let date = coerce(ScalarType::Date, json!("2024-05-01T23:59:00")).unwrap();
        assert_eq!(date.to_string(), "2024-05-01");

        let duration = coerce(ScalarType::Duration, json!(90)).unwrap();
        assert_eq!(duration, Value::Duration(TimeDelta::seconds(90)));
    }

    #[test]
    fn test_enum_uuid_bytes_map_array() {
        let def = Arc::new(EnumDef::new("Kind", &[("first", "A"), ("second", "B")]));
        match coerce(ScalarType::Enum(def.clone()), json!("B")).unwrap() {
            Value::Enum(member) => assert_eq!(member.name, "second"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(coerce(ScalarType::Enum(def), json!("third")).is_err());

        assert_eq!(
            coerce(ScalarType::Uuid, json!(1)).unwrap(),
            Value::Uuid(Uuid::from_u128(1))
        );
        assert_eq!(
            coerce(ScalarType::Bytes, json!("aGk=")).unwrap(),
            Value::Bytes(b"hi".to_vec())
        );

        match coerce(ScalarType::Map, json!({"a": 1, "b": "x"})).unwrap() {
            Value::Map(map) => {
                assert_eq!(map.get("a").map(String::as_str), Some("1"));
                assert_eq!(map.get("b").map(String::as_str), Some("x"));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(
            coerce(ScalarType::Array(Box::new(ScalarType::Integer)), json!(["1", 2])).unwrap(),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_failure_names_field() {
        let err = coerce(ScalarType::Integer, json!([1])).unwrap_err();
        match err {
            LiantError::TypeCoercionFailed { entity_type, field, .. } => {
                assert_eq!(entity_type, "T");
                assert_eq!(field, "f");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
