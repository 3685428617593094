use indexmap::IndexMap;
use std::collections::BTreeSet;

use crate::model::Value;

/// Index of an entity inside a unit of work arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub usize);

/// Loaded value of a field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    One(Option<EntityId>),
    Many(Vec<EntityId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Created in this unit of work, not yet in the store
    Transient,
    Persistent,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct Entity {
    /// Concrete type name
    pub entity_type: String,
    /// Only loaded fields are present
    pub values: IndexMap<String, FieldValue>,
    pub state: EntityState,
    pub dirty: BTreeSet<String>,
    /// Store version the entity was loaded at
    pub version: u64,
}

impl Entity {
    pub fn new(entity_type: &str, state: EntityState) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            values: IndexMap::new(),
            state,
            dirty: BTreeSet::new(),
            version: 0,
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    /// Scalar value of a loaded field; relations and unloaded fields yield None
    pub fn scalar(&self, field: &str) -> Option<&Value> {
        match self.values.get(field) {
            Some(FieldValue::Scalar(value)) => Some(value),
            _ => None,
        }
    }

    pub fn set_scalar(&mut self, field: &str, value: Value) {
        if self.scalar(field) != Some(&value) {
            self.dirty.insert(field.to_string());
        }
        self.values
            .insert(field.to_string(), FieldValue::Scalar(value));
    }

    pub fn is_loaded(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn is_transient(&self) -> bool {
        self.state == EntityState::Transient
    }
}
