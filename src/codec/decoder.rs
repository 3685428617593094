use indexmap::IndexMap;
use std::collections::HashMap;

use crate::error::{LiantError, Result};
use crate::model::{DecodedDocument, DecodedNode, DecodedValue, NodeId};

/// Decodes JSON text into a [`DecodedDocument`], resolving `_id` / `_ref` pairs.
///
/// Objects are handled after all of their members, so a `_ref` may appear
/// before or after the object declaring the matching `_id`. The reference
/// tables live only for the duration of one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

struct DecodeState {
    nodes: Vec<DecodedNode>,
    resolved: HashMap<String, NodeId>,
    unresolved: IndexMap<String, NodeId>,
}

impl DecodeState {
    fn alloc(&mut self, node: DecodedNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    fn value(&mut self, value: serde_json::Value) -> Result<DecodedValue> {
        Ok(match value {
            serde_json::Value::Null => DecodedValue::Null,
            serde_json::Value::Bool(b) => DecodedValue::Bool(b),
            serde_json::Value::Number(n) => DecodedValue::Number(n),
            serde_json::Value::String(s) => DecodedValue::String(s),
            serde_json::Value::Array(items) => DecodedValue::List(
                items
                    .into_iter()
                    .map(|item| self.value(item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            serde_json::Value::Object(map) => DecodedValue::Node(self.object(map)?),
        })
    }

    fn object(&mut self, map: serde_json::Map<String, serde_json::Value>) -> Result<NodeId> {
        if map.len() == 1 {
            if let Some(reference) = map.get("_ref") {
                return Ok(self.reference(identity_text(reference)));
            }
        }

        let mut identity = None;
        let mut fields = IndexMap::with_capacity(map.len());
        for (key, member) in map {
            if key == "_id" {
                identity = Some(identity_text(&member));
                continue;
            }
            fields.insert(key, self.value(member)?);
        }

        let Some(identity) = identity else {
            return Ok(self.alloc(DecodedNode {
                fields,
                identity: None,
            }));
        };

        if self.resolved.contains_key(&identity) {
            return Err(LiantError::DuplicateIdentity(identity));
        }

        let id = match self.unresolved.shift_remove(&identity) {
            Some(placeholder) => {
                let node = &mut self.nodes[placeholder.0];
                node.fields.extend(fields);
                node.identity = Some(identity.clone());
                placeholder
            }
            None => self.alloc(DecodedNode {
                fields,
                identity: Some(identity.clone()),
            }),
        };
        self.resolved.insert(identity, id);
        Ok(id)
    }

    fn reference(&mut self, identity: String) -> NodeId {
        if let Some(id) = self.resolved.get(&identity) {
            return *id;
        }
        if let Some(id) = self.unresolved.get(&identity) {
            return *id;
        }
        let id = self.alloc(DecodedNode::default());
        self.unresolved.insert(identity, id);
        id
    }
}

/// Identity values compare by their JSON text, so `1` and `"1"` are distinct.
/// Integral numbers are canonicalized first, so `1` and `1.0` are the same identity.
fn identity_text(value: &serde_json::Value) -> String {
    if let serde_json::Value::Number(n) = value {
        if n.as_i64().is_none() && n.as_u64().is_none() {
            if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    return (f as i64).to_string();
                }
            }
        }
    }
    value.to_string()
}

impl JsonDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, text: &str) -> Result<DecodedDocument> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        self.decode_value(value)
    }

    pub fn decode_value(&self, value: serde_json::Value) -> Result<DecodedDocument> {
        let mut state = DecodeState {
            nodes: Vec::new(),
            resolved: HashMap::new(),
            unresolved: IndexMap::new(),
        };

        let root = state.value(value)?;

        if !state.unresolved.is_empty() {
            return Err(LiantError::DanglingReference(
                state.unresolved.keys().cloned().collect(),
            ));
        }

        Ok(DecodedDocument {
            nodes: state.nodes,
            root,
        })
    }
}
