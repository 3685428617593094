use indexmap::IndexMap;
use std::collections::HashSet;

/// Index of a decoded object inside a [`DecodedDocument`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Default, PartialEq)]
pub enum DecodedValue {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Node(NodeId),
    List(Vec<DecodedValue>),
}

impl DecodedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DecodedValue::Null)
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            DecodedValue::Node(id) => Some(*id),
            _ => None,
        }
    }
}

/// One JSON object after reference resolution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedNode {
    pub fields: IndexMap<String, DecodedValue>,
    /// Canonical text of the `_id` this object was declared with
    pub identity: Option<String>,
}

impl DecodedNode {
    pub fn get(&self, field: &str) -> Option<&DecodedValue> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }
}

/// Arena of decoded objects; references between objects are `NodeId`s so cycles are plain data
#[derive(Debug, Clone, Default)]
pub struct DecodedDocument {
    pub nodes: Vec<DecodedNode>,
    pub root: DecodedValue,
}

impl DecodedDocument {
    pub fn root_node(&self) -> Option<NodeId> {
        self.root.as_node()
    }

    pub fn node(&self, id: NodeId) -> &DecodedNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId, field: &str) -> Option<&DecodedValue> {
        self.node(id).get(field)
    }

    /// Plain JSON view of a value; a node met again on its own path becomes `{"_ref": id}`
    pub fn to_json(&self, value: &DecodedValue) -> serde_json::Value {
        let mut path = HashSet::new();
        self.to_json_inner(value, &mut path)
    }

    fn to_json_inner(&self, value: &DecodedValue, path: &mut HashSet<NodeId>) -> serde_json::Value {
        match value {
            DecodedValue::Null => serde_json::Value::Null,
            DecodedValue::Bool(b) => serde_json::Value::Bool(*b),
            DecodedValue::Number(n) => serde_json::Value::Number(n.clone()),
            DecodedValue::String(s) => serde_json::Value::String(s.clone()),
            DecodedValue::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| self.to_json_inner(item, path))
                    .collect(),
            ),
            DecodedValue::Node(id) => {
                let node = self.node(*id);
                if !path.insert(*id) {
                    let identity = node
                        .identity
                        .as_deref()
                        .and_then(|text| serde_json::from_str(text).ok())
                        .unwrap_or(serde_json::Value::Null);
                    return serde_json::json!({ "_ref": identity });
                }
                let mut map = serde_json::Map::new();
                for (key, field) in &node.fields {
                    map.insert(key.clone(), self.to_json_inner(field, path));
                }
                path.remove(id);
                serde_json::Value::Object(map)
            }
        }
    }
}
