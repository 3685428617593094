use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{LiantError, Result};
use crate::logic::{coerce_value, Guard};
use crate::model::{
    DecodedDocument, DecodedValue, EntityId, EntityState, EntityType, EntityTypeRegistry,
    FieldDescriptor, FieldKind, NodeId, PrimaryKey, RelationDescriptor, Value,
};
use crate::store::UnitOfWork;

/// What to build when a polymorphic entity must be created from a payload
/// that does not carry the discriminator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscriminatorPolicy {
    /// Build the requested base type
    #[default]
    FallbackToBase,
    /// Fail with `InvalidCast`
    Strict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    #[serde(default)]
    pub discriminator_policy: DiscriminatorPolicy,
}

/// Decoded node to entity mapping for one reconciliation call
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<NodeId, EntityId>,
}

impl IdentityMap {
    pub fn get(&self, node: NodeId) -> Option<EntityId> {
        self.entries.get(&node).copied()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.entries.contains_key(&node)
    }

    pub fn insert(&mut self, node: NodeId, entity: EntityId) {
        self.entries.insert(node, entity);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Merges a decoded payload into the entity graph of a unit of work.
///
/// Related objects are looked up by primary key, created when they have no
/// complete key yet, and collections are rewritten to exactly the members the
/// payload lists. The unit of work is the write boundary: on error the caller
/// drops it and nothing reaches the store.
pub struct Reconciler<'a> {
    doc: &'a DecodedDocument,
    guard: Option<&'a dyn Guard>,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        doc: &'a DecodedDocument,
        guard: Option<&'a dyn Guard>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            doc,
            guard,
            options,
        }
    }

    pub fn apply(
        &self,
        uow: &mut UnitOfWork,
        entity: EntityId,
        node: NodeId,
        identity_map: &mut IdentityMap,
        is_update: bool,
    ) -> Result<()> {
        if identity_map.contains(node) {
            return Ok(());
        }
        identity_map.insert(node, entity);

        let registry: Arc<EntityTypeRegistry> = uow.registry().clone();
        let et = registry.get(&uow.entity(entity).entity_type)?;
        let data = self.doc.node(node);

        if let Some(guard) = self.guard {
            let touches_fields = data.fields.keys().any(|name| !et.is_primary_key(name));
            if touches_fields
                && !guard.authorize_update(uow, entity, self.doc, node, is_update)
            {
                return Ok(());
            }
        }

        for (name, field) in &et.fields {
            let Some(raw) = data.get(name) else {
                continue;
            };
            match &field.kind {
                FieldKind::Scalar(_) => self.apply_scalar(uow, et, entity, field, raw)?,
                FieldKind::Computed { setter, .. } => {
                    let Some(setter) = setter else {
                        continue;
                    };
                    let json = self.doc.to_json(raw);
                    setter(uow.entity_mut(entity), &json)?;
                }
                FieldKind::Composite { parts } => {
                    self.apply_composite(uow, et, entity, field, parts, raw)?
                }
                FieldKind::Synonym(_) => return Err(LiantError::Unsupported("synonym")),
                FieldKind::AssociationProxy => {
                    return Err(LiantError::Unsupported("associationProxy"))
                }
                FieldKind::Relation(relation) if relation.many => {
                    self.apply_many(uow, et, entity, name, relation, raw, identity_map)?
                }
                FieldKind::Relation(relation) => {
                    self.apply_one(uow, et, entity, name, relation, raw, identity_map)?
                }
            }
        }
        Ok(())
    }

    fn apply_scalar(
        &self,
        uow: &mut UnitOfWork,
        et: &EntityType,
        entity: EntityId,
        field: &FieldDescriptor,
        raw: &DecodedValue,
    ) -> Result<()> {
        let json = self.doc.to_json(raw);
        let persistent = uow.entity(entity).state == EntityState::Persistent;

        if et.is_primary_key(&field.name) {
            if persistent || (et.autoincrement && json.is_null()) {
                return Ok(());
            }
        }

        if et.version_field.as_deref() == Some(field.name.as_str()) {
            if persistent && !json.is_null() {
                let claimed = coerce_value(&et.name, field, &json, true)?;
                let current = uow.entity(entity).version as i64;
                if claimed.as_i64() != Some(current) {
                    return Err(LiantError::Conflict {
                        entity_type: et.name.clone(),
                        key: uow.key_of(entity)?.key_text(),
                    });
                }
            }
            return Ok(());
        }

        let value = coerce_value(&et.name, field, &json, true)?;
        uow.set_scalar(entity, &field.name, value);
        Ok(())
    }

    fn apply_composite(
        &self,
        uow: &mut UnitOfWork,
        et: &EntityType,
        entity: EntityId,
        field: &FieldDescriptor,
        parts: &[String],
        raw: &DecodedValue,
    ) -> Result<()> {
        let json = self.doc.to_json(raw);
        let values: Vec<(String, serde_json::Value)> = match json {
            serde_json::Value::Object(map) => parts
                .iter()
                .filter_map(|part| map.get(part).map(|v| (part.clone(), v.clone())))
                .collect(),
            serde_json::Value::Array(items) if items.len() == parts.len() => {
                parts.iter().cloned().zip(items).collect()
            }
            serde_json::Value::Null => parts
                .iter()
                .map(|part| (part.clone(), serde_json::Value::Null))
                .collect(),
            _ => {
                return Err(LiantError::coercion(
                    &et.name,
                    &field.name,
                    format!("expected object or array of {} parts", parts.len()),
                ))
            }
        };

        for (part, json) in values {
            let descriptor = et
                .field(&part)
                .ok_or_else(|| LiantError::unknown_field(&et.name, &part))?;
            let value = coerce_value(&et.name, descriptor, &json, true)?;
            uow.set_scalar(entity, &part, value);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_one(
        &self,
        uow: &mut UnitOfWork,
        et: &EntityType,
        entity: EntityId,
        name: &str,
        relation: &RelationDescriptor,
        raw: &DecodedValue,
        identity_map: &mut IdentityMap,
    ) -> Result<()> {
        if raw.is_null() {
            return uow.set_one(entity, name, None);
        }
        let child_node = raw
            .as_node()
            .ok_or_else(|| LiantError::coercion(&et.name, name, "expected object"))?;

        if let Some(mapped) = identity_map.get(child_node) {
            return uow.set_one(entity, name, Some(mapped));
        }

        let key = self.child_key(uow, &relation.target, child_node, relation, entity)?;
        let current = uow.one(entity, name)?;
        let current_key = match current {
            Some(current) => Some(uow.key_of(current)?),
            None => None,
        };

        match current {
            Some(current) if key.is_complete() && current_key.as_ref() == Some(&key) => {
                self.apply(uow, current, child_node, identity_map, true)
            }
            _ => {
                let (child, found) = self.resolve_child(uow, &relation.target, child_node, &key)?;
                self.apply(uow, child, child_node, identity_map, found)?;
                uow.register(child)?;
                uow.set_one(entity, name, Some(child))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_many(
        &self,
        uow: &mut UnitOfWork,
        et: &EntityType,
        entity: EntityId,
        name: &str,
        relation: &RelationDescriptor,
        raw: &DecodedValue,
        identity_map: &mut IdentityMap,
    ) -> Result<()> {
        let items = match raw {
            DecodedValue::Null => return uow.clear(entity, name),
            DecodedValue::List(items) if items.is_empty() => return uow.clear(entity, name),
            DecodedValue::List(items) => items,
            _ => return Err(LiantError::coercion(&et.name, name, "expected array")),
        };

        let mut existing = Vec::new();
        for member in uow.many(entity, name)? {
            let key = uow.key_of(member)?;
            if key.is_complete() {
                existing.push((key, member));
            }
        }

        let mut resolved: Vec<EntityId> = Vec::with_capacity(items.len());
        for item in items {
            let child_node = item
                .as_node()
                .ok_or_else(|| LiantError::coercion(&et.name, name, "expected array of objects"))?;

            let child = match identity_map.get(child_node) {
                Some(mapped) => mapped,
                None => {
                    let key = self.child_key(uow, &relation.target, child_node, relation, entity)?;
                    let member = existing
                        .iter()
                        .find(|(existing_key, _)| key.is_complete() && *existing_key == key)
                        .map(|(_, member)| *member);
                    match member {
                        Some(member) => {
                            self.apply(uow, member, child_node, identity_map, true)?;
                            member
                        }
                        None => {
                            let (child, found) =
                                self.resolve_child(uow, &relation.target, child_node, &key)?;
                            self.apply(uow, child, child_node, identity_map, found)?;
                            uow.register(child)?;
                            child
                        }
                    }
                }
            };
            if !resolved.contains(&child) {
                resolved.push(child);
            }
        }

        for child in &resolved {
            uow.append(entity, name, *child)?;
        }
        for member in uow.many(entity, name)? {
            if !resolved.contains(&member) {
                uow.remove(entity, name, member)?;
            }
        }
        if relation.ordering.is_some() {
            uow.reorder(entity, name, resolved)?;
        }
        Ok(())
    }

    /// Key of a related object: its own key fields, else values inherited
    /// from the parent through the relation's foreign key pairs
    fn child_key(
        &self,
        uow: &mut UnitOfWork,
        target: &str,
        child_node: NodeId,
        relation: &RelationDescriptor,
        parent: EntityId,
    ) -> Result<PrimaryKey> {
        let registry = uow.registry().clone();
        let target = registry.get(target)?;
        let data = self.doc.node(child_node);

        let mut parts = Vec::with_capacity(target.primary_key.len());
        for pk in &target.primary_key {
            let value = match data.get(pk) {
                Some(raw) => {
                    let field = registry.field_of(&target.name, pk)?;
                    coerce_value(&target.name, field, &self.doc.to_json(raw), true)?
                }
                None => match relation.foreign_keys.iter().find(|(_, remote)| remote == pk) {
                    Some((local, _)) => {
                        uow.load_field(parent, local)?;
                        uow.entity(parent).scalar(local).cloned().unwrap_or(Value::Null)
                    }
                    None => Value::Null,
                },
            };
            parts.push(value);
        }
        Ok(PrimaryKey::new(parts))
    }

    /// Entity a related object refers to, and whether it already existed
    fn resolve_child(
        &self,
        uow: &mut UnitOfWork,
        target: &str,
        child_node: NodeId,
        key: &PrimaryKey,
    ) -> Result<(EntityId, bool)> {
        if !key.is_complete() {
            return Ok((self.construct(uow, target, Some(child_node))?, false));
        }
        if let Some(found) = uow.get(target, key)? {
            return Ok((found, true));
        }
        if uow.registry().get(target)?.autoincrement {
            return Err(LiantError::DanglingEntityReference {
                entity_type: target.to_string(),
                key: key.key_text(),
            });
        }
        Ok((self.construct(uow, target, Some(child_node))?, false))
    }

    /// New transient entity of `entity_type`, or of the subtype the node's
    /// discriminator selects
    pub fn construct(
        &self,
        uow: &mut UnitOfWork,
        entity_type: &str,
        node: Option<NodeId>,
    ) -> Result<EntityId> {
        let registry = uow.registry().clone();
        let et = registry.get(entity_type)?;
        let Some(discriminator) = et.discriminator_field() else {
            return uow.create(entity_type);
        };

        let raw = node
            .and_then(|node| self.doc.get(node, &discriminator.name))
            .filter(|raw| !raw.is_null());
        let Some(raw) = raw else {
            return match self.options.discriminator_policy {
                DiscriminatorPolicy::FallbackToBase => uow.create(entity_type),
                DiscriminatorPolicy::Strict => Err(LiantError::invalid_cast(
                    &et.name,
                    &format!("<missing {}>", discriminator.name),
                )),
            };
        };

        let json = self.doc.to_json(raw);
        let value = coerce_value(&et.name, discriminator, &json, true)?;
        match registry.subtype_of(&et.name, &value) {
            Some(subtype) if registry.is_same_or_subtype(&subtype.name, &et.name) => {
                uow.create(&subtype.name)
            }
            _ => Err(LiantError::invalid_cast(&et.name, &value.to_string())),
        }
    }
}

/// Apply `node` of `doc` to `entity` with a fresh identity map
pub fn apply_changes(
    uow: &mut UnitOfWork,
    entity: EntityId,
    doc: &DecodedDocument,
    node: NodeId,
    guard: Option<&dyn Guard>,
    options: ReconcileOptions,
    is_update: bool,
) -> Result<()> {
    let mut identity_map = IdentityMap::default();
    Reconciler::new(doc, guard, options).apply(uow, entity, node, &mut identity_map, is_update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonDecoder;
    use crate::model::{
        EntityTypeBuilder, FieldValue, RelationDescriptor, ScalarType,
    };
    use crate::store::{EntityStore, MemoryStore};
    use itertools::Itertools;
    use proptest::prelude::*;

    fn registry() -> Arc<EntityTypeRegistry> {
        EntityTypeRegistry::builder()
            .entity(
                EntityTypeBuilder::new("Parent")
                    .primary_key(&["id"])
                    .autoincrement()
                    .version("version")
                    .field(FieldDescriptor::scalar("id", ScalarType::Integer))
                    .field(FieldDescriptor::scalar("version", ScalarType::Integer))
                    .field(FieldDescriptor::text("data", Some(20)))
                    .field(FieldDescriptor::scalar("width", ScalarType::Integer))
                    .field(FieldDescriptor::scalar("height", ScalarType::Integer))
                    .field(FieldDescriptor::composite("size", &["width", "height"]))
                    .field(FieldDescriptor::synonym("info", "data"))
                    .field(FieldDescriptor::relation(
                        "children",
                        RelationDescriptor::many("Child")
                            .back_populates("parent")
                            .foreign_key("id", "parent_id")
                            .ordered_by("position")
                            .delete_orphan(),
                    ))
                    .field(FieldDescriptor::relation("tags", RelationDescriptor::many("Tag")))
                    .field(FieldDescriptor::relation("pairs", RelationDescriptor::many("Pair")))
                    .field(FieldDescriptor::relation(
                        "vehicle",
                        RelationDescriptor::one("Vehicle"),
                    )),
            )
            .entity(
                EntityTypeBuilder::new("Child")
                    .primary_key(&["id"])
                    .autoincrement()
                    .field(FieldDescriptor::scalar("id", ScalarType::Integer))
                    .field(FieldDescriptor::scalar("parent_id", ScalarType::Integer))
                    .field(FieldDescriptor::scalar("position", ScalarType::Integer))
                    .field(FieldDescriptor::text("data", None))
                    .field(FieldDescriptor::relation(
                        "parent",
                        RelationDescriptor::one("Parent")
                            .back_populates("children")
                            .foreign_key("parent_id", "id"),
                    )),
            )
            .entity(
                EntityTypeBuilder::new("Tag")
                    .primary_key(&["code"])
                    .field(FieldDescriptor::text("code", None))
                    .field(FieldDescriptor::text("label", None)),
            )
            .entity(
                EntityTypeBuilder::new("Pair")
                    .primary_key(&["a", "b"])
                    .field(FieldDescriptor::text("a", None))
                    .field(FieldDescriptor::text("b", None))
                    .field(FieldDescriptor::text("label", None)),
            )
            .entity(
                EntityTypeBuilder::new("Vehicle")
                    .primary_key(&["id"])
                    .autoincrement()
                    .field(FieldDescriptor::scalar("id", ScalarType::Integer))
                    .field(FieldDescriptor::text("kind", None))
                    .polymorphic_on("kind")
                    .subtype("car", "Car"),
            )
            .entity(
                EntityTypeBuilder::new("Car")
                    .extends("Vehicle")
                    .field(FieldDescriptor::scalar("seats", ScalarType::Integer)),
            )
            .build()
            .unwrap()
    }

    fn begin(store: &Arc<MemoryStore>) -> UnitOfWork {
        UnitOfWork::begin(registry(), store.clone() as Arc<dyn EntityStore>)
    }

    fn apply_text(
        uow: &mut UnitOfWork,
        entity: EntityId,
        text: &str,
        guard: Option<&dyn Guard>,
        options: ReconcileOptions,
        is_update: bool,
    ) -> Result<()> {
        let doc = JsonDecoder::new().decode(text)?;
        let root = doc.root_node().unwrap();
        apply_changes(uow, entity, &doc, root, guard, options, is_update)
    }

    fn apply(uow: &mut UnitOfWork, entity: EntityId, text: &str) -> Result<()> {
        apply_text(uow, entity, text, None, ReconcileOptions::default(), true)
    }

    /// Parent 1 with children 1 and 2, committed
    fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let mut uow = begin(&store);
        let parent = uow.create("Parent").unwrap();
        apply(
            &mut uow,
            parent,
            r#"{"data": "parent value", "children": [{"data": "a"}, {"data": "b"}]}"#,
        )
        .unwrap();
        uow.commit().unwrap();
        store
    }

    fn load_parent(uow: &mut UnitOfWork) -> EntityId {
        uow.get("Parent", &PrimaryKey::single(Value::Int(1)))
            .unwrap()
            .unwrap()
    }

    fn child_data(uow: &mut UnitOfWork, parent: EntityId) -> Vec<String> {
        uow.many(parent, "children")
            .unwrap()
            .into_iter()
            .map(|child| uow.entity(child).scalar("data").unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_insert_nested_graph() {
        let store = seeded();
        let mut uow = begin(&store);
        let parent = load_parent(&mut uow);
        assert_eq!(uow.entity(parent).scalar("data"), Some(&Value::Text("parent value".into())));
        assert_eq!(child_data(&mut uow, parent), vec!["a", "b"]);

        let children = uow.many(parent, "children").unwrap();
        for (index, child) in children.iter().enumerate() {
            assert_eq!(uow.one(*child, "parent").unwrap(), Some(parent));
            assert_eq!(uow.entity(*child).scalar("position"), Some(&Value::Int(index as i64)));
            assert_eq!(uow.entity(*child).scalar("parent_id"), Some(&Value::Int(1)));
        }
    }

    #[test]
    fn test_noop_payload_does_not_mutate() {
        let store = seeded();
        let mut uow = begin(&store);
        let parent = load_parent(&mut uow);
        apply(&mut uow, parent, "{}").unwrap();
        apply(&mut uow, parent, r#"{"id": 1}"#).unwrap();
        apply(&mut uow, parent, r#"{"id": 99}"#).unwrap();
        assert!(uow.entity(parent).dirty.is_empty());
        assert_eq!(uow.key_of(parent).unwrap(), PrimaryKey::single(Value::Int(1)));
    }

    #[test]
    fn test_members_matched_by_key_keep_identity() {
        let store = seeded();
        let mut uow = begin(&store);
        let parent = load_parent(&mut uow);
        let before = uow.many(parent, "children").unwrap();

        apply(
            &mut uow,
            parent,
            r#"{"children": [{"id": 2, "data": "b2"}, {"data": "c"}, {"id": 1}]}"#,
        )
        .unwrap();

        let after = uow.many(parent, "children").unwrap();
        assert_eq!(after.len(), 3);
        assert_eq!(after[0], before[1]);
        assert_eq!(after[2], before[0]);
        assert_eq!(child_data(&mut uow, parent), vec!["b2", "c", "a"]);
        assert_eq!(uow.entity(after[0]).scalar("position"), Some(&Value::Int(0)));
        assert_eq!(uow.entity(after[2]).scalar("position"), Some(&Value::Int(2)));

        uow.commit().unwrap();
        let mut uow = begin(&store);
        let parent = load_parent(&mut uow);
        assert_eq!(child_data(&mut uow, parent), vec!["b2", "c", "a"]);
    }

    #[test]
    fn test_empty_list_clears_collection() {
        let store = seeded();
        let mut uow = begin(&store);
        let parent = load_parent(&mut uow);
        assert_eq!(uow.many(parent, "children").unwrap().len(), 2);

        apply(&mut uow, parent, r#"{"children": []}"#).unwrap();
        assert!(uow.many(parent, "children").unwrap().is_empty());
        uow.commit().unwrap();

        assert_eq!(store.len("Child"), 0);
    }

    #[test]
    fn test_removed_member_is_orphan_deleted() {
        let store = seeded();
        let mut uow = begin(&store);
        let parent = load_parent(&mut uow);
        apply(&mut uow, parent, r#"{"children": [{"id": 2}]}"#).unwrap();
        uow.commit().unwrap();
        assert_eq!(store.len("Child"), 1);
    }

    #[test]
    fn test_cycle_links_both_ends() {
        let store = Arc::new(MemoryStore::new());
        let mut uow = begin(&store);
        let parent = uow.create("Parent").unwrap();
        apply_text(
            &mut uow,
            parent,
            r#"{"_id": 1, "data": "parent value",
                "children": [{"_id": 2, "data": "child value", "parent": {"_ref": 1}}]}"#,
            None,
            ReconcileOptions::default(),
            false,
        )
        .unwrap();

        let children = uow.many(parent, "children").unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(uow.one(children[0], "parent").unwrap(), Some(parent));
        uow.commit().unwrap();
        assert_eq!(store.len("Child"), 1);
    }

    #[test]
    fn test_single_relation_lookup_and_dangling() {
        let store = seeded();
        let mut uow = begin(&store);
        let parent = load_parent(&mut uow);
        let children = uow.many(parent, "children").unwrap();

        // child 2 moved to point at a parent that does not exist
        let err = apply(&mut uow, children[1], r#"{"parent": {"id": 7}}"#).unwrap_err();
        assert!(matches!(err, LiantError::DanglingEntityReference { .. }));

        let mut uow = begin(&store);
        let parent = load_parent(&mut uow);
        let child = uow.many(parent, "children").unwrap()[0];
        apply(&mut uow, child, r#"{"parent": {"data": "renamed"}}"#).unwrap();
        assert_eq!(uow.one(child, "parent").unwrap(), Some(parent));
        assert_eq!(uow.entity(parent).scalar("data"), Some(&Value::Text("renamed".into())));

        apply(&mut uow, child, r#"{"parent": null}"#).unwrap();
        assert_eq!(uow.one(child, "parent").unwrap(), None);
        assert!(!uow.many(parent, "children").unwrap().contains(&child));
    }

    #[test]
    fn test_natural_key_target_is_created() {
        let store = seeded();
        let mut uow = begin(&store);
        let parent = load_parent(&mut uow);
        apply(
            &mut uow,
            parent,
            r#"{"tags": [{"code": "red", "label": "Red"}, {"code": "blue"}, {"code": "red"}]}"#,
        )
        .unwrap();
        assert_eq!(uow.many(parent, "tags").unwrap().len(), 2);
        uow.commit().unwrap();
        assert_eq!(store.len("Tag"), 2);

        let mut uow = begin(&store);
        let parent = load_parent(&mut uow);
        apply(&mut uow, parent, r#"{"tags": [{"code": "blue", "label": "Blue"}]}"#).unwrap();
        uow.commit().unwrap();
        assert_eq!(store.len("Tag"), 2);
    }

    #[test]
    fn test_composite_text_keys_with_commas_stay_distinct() {
        let store = seeded();
        let mut uow = begin(&store);
        let parent = load_parent(&mut uow);
        apply(
            &mut uow,
            parent,
            r#"{"pairs": [{"a": "x,y", "b": "z", "label": "first"},
                          {"a": "x", "b": "y,z", "label": "second"}]}"#,
        )
        .unwrap();

        let pairs = uow.many(parent, "pairs").unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(uow.entity(pairs[0]).scalar("label"), Some(&Value::Text("first".into())));
        assert_eq!(uow.entity(pairs[1]).scalar("label"), Some(&Value::Text("second".into())));
        uow.commit().unwrap();
        assert_eq!(store.len("Pair"), 2);

        let mut uow = begin(&store);
        let parent = load_parent(&mut uow);
        let labels: Vec<String> = uow
            .many(parent, "pairs")
            .unwrap()
            .into_iter()
            .map(|pair| uow.entity(pair).scalar("label").unwrap().to_string())
            .collect();
        assert_eq!(labels, vec!["first", "second"]);
    }

    #[test]
    fn test_polymorphic_construction() {
        let store = Arc::new(MemoryStore::new());
        let mut uow = begin(&store);
        let parent = uow.create("Parent").unwrap();
        apply(&mut uow, parent, r#"{"vehicle": {"kind": "car", "seats": 4}}"#).unwrap();
        let vehicle = uow.one(parent, "vehicle").unwrap().unwrap();
        assert_eq!(uow.entity(vehicle).entity_type, "Car");
        assert_eq!(uow.entity(vehicle).scalar("seats"), Some(&Value::Int(4)));

        let parent = uow.create("Parent").unwrap();
        apply(&mut uow, parent, r#"{"vehicle": {}}"#).unwrap();
        let vehicle = uow.one(parent, "vehicle").unwrap().unwrap();
        assert_eq!(uow.entity(vehicle).entity_type, "Vehicle");

        let strict = ReconcileOptions {
            discriminator_policy: DiscriminatorPolicy::Strict,
        };
        let parent = uow.create("Parent").unwrap();
        let err = apply_text(&mut uow, parent, r#"{"vehicle": {}}"#, None, strict, false);
        assert!(matches!(err, Err(LiantError::InvalidCast { .. })));

        let err = apply(&mut uow, parent, r#"{"vehicle": {"kind": "boat"}}"#);
        assert!(matches!(err, Err(LiantError::InvalidCast { .. })));
    }

    #[test]
    fn test_scalar_rules() {
        let store = seeded();
        let mut uow = begin(&store);
        let parent = load_parent(&mut uow);

        let err = apply(&mut uow, parent, r#"{"data": "far too long for twenty"}"#).unwrap_err();
        assert!(matches!(err, LiantError::TypeCoercionFailed { .. }));

        apply(&mut uow, parent, r#"{"size": {"width": 3, "height": 4}, "unknown": 1}"#).unwrap();
        assert_eq!(uow.entity(parent).scalar("width"), Some(&Value::Int(3)));
        apply(&mut uow, parent, r#"{"size": [5, 6]}"#).unwrap();
        assert_eq!(uow.entity(parent).scalar("height"), Some(&Value::Int(6)));

        let err = apply(&mut uow, parent, r#"{"info": "x"}"#).unwrap_err();
        assert!(matches!(err, LiantError::Unsupported("synonym")));
    }

    #[test]
    fn test_stale_version_conflicts() {
        let store = seeded();
        let mut uow = begin(&store);
        let parent = load_parent(&mut uow);
        assert_eq!(uow.entity(parent).get("version"), Some(&FieldValue::Scalar(Value::Int(1))));

        apply(&mut uow, parent, r#"{"version": 1, "data": "ok"}"#).unwrap();
        let err = apply(&mut uow, parent, r#"{"version": 0, "data": "stale"}"#).unwrap_err();
        assert!(matches!(err, LiantError::Conflict { .. }));
    }

    struct ReadOnlyChildren;

    impl Guard for ReadOnlyChildren {
        fn authorize_update(
            &self,
            uow: &UnitOfWork,
            entity: EntityId,
            _doc: &DecodedDocument,
            _node: NodeId,
            is_update: bool,
        ) -> bool {
            !(is_update && uow.entity(entity).entity_type == "Child")
        }
    }

    #[test]
    fn test_guard_skips_whole_node() {
        let store = seeded();
        let mut uow = begin(&store);
        let parent = load_parent(&mut uow);
        apply_text(
            &mut uow,
            parent,
            r#"{"data": "changed", "children": [{"id": 1, "data": "blocked"}, {"id": 2}]}"#,
            Some(&ReadOnlyChildren as &dyn Guard),
            ReconcileOptions::default(),
            true,
        )
        .unwrap();
        assert_eq!(uow.entity(parent).scalar("data"), Some(&Value::Text("changed".into())));
        assert_eq!(child_data(&mut uow, parent), vec!["a", "b"]);
    }

    fn tags_payload(codes: &[String]) -> String {
        let tags: Vec<serde_json::Value> = codes
            .iter()
            .map(|code| serde_json::json!({"code": code}))
            .collect();
        serde_json::json!({ "tags": tags }).to_string()
    }

    fn tag_codes(uow: &mut UnitOfWork, parent: EntityId) -> Vec<String> {
        uow.many(parent, "tags")
            .unwrap()
            .into_iter()
            .map(|tag| uow.entity(tag).scalar("code").unwrap().to_string())
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn collection_members_match_payload(
            before in prop::collection::vec("[a-d]", 0..5),
            after in prop::collection::vec("[a-d]", 0..6),
        ) {
            let store = seeded();
            let mut uow = begin(&store);
            let parent = load_parent(&mut uow);
            apply(&mut uow, parent, &tags_payload(&before)).unwrap();
            uow.commit().unwrap();

            let mut uow = begin(&store);
            let parent = load_parent(&mut uow);
            apply(&mut uow, parent, &tags_payload(&after)).unwrap();
            let expected: Vec<String> = after.iter().unique().cloned().collect();
            prop_assert_eq!(tag_codes(&mut uow, parent), expected.clone());
            uow.commit().unwrap();

            let mut uow = begin(&store);
            let parent = load_parent(&mut uow);
            let stored: Vec<String> = tag_codes(&mut uow, parent).into_iter().sorted().collect();
            prop_assert_eq!(stored, expected.into_iter().sorted().collect::<Vec<_>>());
        }
    }
}
