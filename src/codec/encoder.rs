use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::codec::format_duration;
use crate::error::{LiantError, Result};
use crate::logic::Guard;
use crate::model::{EntityId, FieldKind, FieldValue, IdentityKey, Value};
use crate::store::UnitOfWork;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncoderOptions {
    /// Sort object fields by name (`_id` stays last)
    #[serde(default)]
    pub sort_keys: bool,
    /// Pretty-print with this many spaces per level
    #[serde(default)]
    pub indent: Option<usize>,
}

/// Something the encoder can serialize
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Json(serde_json::Value),
    Entity(EntityId),
    Entities(Vec<EntityId>),
    List(Vec<Output>),
    Map(IndexMap<String, Output>),
}

/// Serializes entity graphs, emitting each identity once and `{"_ref": n}` afterwards.
/// Synthetic ids start at 1 for every call to [`JsonEncoder::encode`].
pub struct JsonEncoder<'a> {
    uow: &'a UnitOfWork,
    guard: &'a dyn Guard,
    options: EncoderOptions,
    seen: HashMap<IdentityKey, u64>,
    next_id: u64,
    expanding: HashSet<EntityId>,
}

impl<'a> JsonEncoder<'a> {
    pub fn new(uow: &'a UnitOfWork, guard: &'a dyn Guard, options: EncoderOptions) -> Self {
        Self {
            uow,
            guard,
            options,
            seen: HashMap::new(),
            next_id: 0,
            expanding: HashSet::new(),
        }
    }

    pub fn encode(&mut self, output: &Output) -> Result<String> {
        let value = self.to_value(output)?;
        Ok(match self.options.indent {
            None => serde_json::to_string(&value)?,
            Some(width) => {
                let indent = " ".repeat(width);
                let mut buf = Vec::new();
                let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
                let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
                value.serialize(&mut serializer)?;
                String::from_utf8_lossy(&buf).into_owned()
            }
        })
    }

    pub fn to_value(&mut self, output: &Output) -> Result<serde_json::Value> {
        self.seen.clear();
        self.expanding.clear();
        self.next_id = 0;
        self.output(output)
    }

    fn output(&mut self, output: &Output) -> Result<serde_json::Value> {
        Ok(match output {
            Output::Json(value) => value.clone(),
            Output::Entity(id) => self.entity(*id)?,
            Output::Entities(ids) => serde_json::Value::Array(
                ids.iter()
                    .map(|id| self.entity(*id))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Output::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| self.output(item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Output::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (key, item) in entries {
                    map.insert(key.clone(), self.output(item)?);
                }
                serde_json::Value::Object(self.ordered(map))
            }
        })
    }

    fn ordered(&self, map: serde_json::Map<String, serde_json::Value>) -> serde_json::Map<String, serde_json::Value> {
        if !self.options.sort_keys {
            return map;
        }
        let mut entries: Vec<_> = map.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().collect()
    }

    fn entity(&mut self, id: EntityId) -> Result<serde_json::Value> {
        let uow = self.uow;
        let entity = uow.entity(id);
        let et = uow.entity_type(id)?;

        let synthetic = match uow.identity_of(id)? {
            Some(identity) => {
                if let Some(existing) = self.seen.get(&identity) {
                    return Ok(serde_json::json!({ "_ref": existing }));
                }
                self.next_id += 1;
                self.seen.insert(identity, self.next_id);
                Some(self.next_id)
            }
            None => {
                if !self.expanding.insert(id) {
                    return Err(LiantError::EncodeCycle(et.name.clone()));
                }
                None
            }
        };

        let parts = et.composite_parts();
        let mut map = serde_json::Map::new();
        for (name, field) in &et.fields {
            if field.internal || parts.contains(&name.as_str()) {
                continue;
            }
            let value = match &field.kind {
                FieldKind::Scalar(_) => match entity.scalar(name) {
                    Some(value) => encode_scalar(value),
                    None => continue,
                },
                FieldKind::Computed {
                    getter: Some(getter),
                    ..
                } => getter(entity),
                FieldKind::Computed { getter: None, .. } => continue,
                FieldKind::Composite { parts } => {
                    let mut object = serde_json::Map::new();
                    for part in parts {
                        match entity.scalar(part) {
                            Some(value) => object.insert(part.clone(), encode_scalar(value)),
                            None => continue,
                        };
                    }
                    if object.len() != parts.len() {
                        continue;
                    }
                    serde_json::Value::Object(object)
                }
                FieldKind::Synonym(target) => match entity.scalar(target) {
                    Some(value) => encode_scalar(value),
                    None => continue,
                },
                FieldKind::Relation(_) => match entity.get(name) {
                    Some(FieldValue::One(None)) => serde_json::Value::Null,
                    Some(FieldValue::One(Some(target))) => self.entity(*target)?,
                    Some(FieldValue::Many(members)) => serde_json::Value::Array(
                        members
                            .iter()
                            .map(|member| self.entity(*member))
                            .collect::<Result<Vec<_>>>()?,
                    ),
                    _ => continue,
                },
                FieldKind::AssociationProxy => continue,
            };
            map.insert(name.clone(), value);
        }

        self.guard.filter_serialized_fields(entity, &mut map);
        let mut map = self.ordered(map);

        match synthetic {
            Some(n) => {
                map.insert("_id".to_string(), serde_json::Value::from(n));
            }
            None => {
                self.expanding.remove(&id);
            }
        }
        Ok(serde_json::Value::Object(map))
    }
}

/// Wire form of a scalar value
pub fn encode_scalar(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Decimal(d) => serde_json::Value::String(d.to_string()),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::DateTime(dt) => {
            serde_json::Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }
        Value::DateTimeTz(dt) => serde_json::Value::String(dt.to_rfc3339()),
        Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => serde_json::Value::String(t.format("%H:%M:%S%.f").to_string()),
        Value::TimeTz(t, offset) => {
            serde_json::Value::String(format!("{}{}", t.format("%H:%M:%S%.f"), offset))
        }
        Value::Duration(d) => serde_json::Value::String(format_duration(d)),
        Value::Bytes(bytes) => serde_json::Value::String(STANDARD.encode(bytes)),
        Value::Enum(member) => serde_json::Value::String(member.name.clone()),
        Value::Uuid(u) => serde_json::Value::String(u.hyphenated().to_string()),
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        ),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(encode_scalar).collect()),
    }
}
