use indexmap::IndexMap;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{LiantError, Result};
use crate::model::{
    Entity, EntityId, EntityState, EntityType, EntityTypeRegistry, FieldKind, FieldValue,
    IdentityKey, LoadDirective, LoadPlan, PrimaryKey, RelationDescriptor, Value,
};
use crate::store::{
    ChangeSet, EntityStore, Record, RecordWrite, StoredRef, StoredValue, WriteKind,
};

/// Arena of entities loaded or created for one logical operation.
///
/// Nothing reaches the store until [`UnitOfWork::commit`]; dropping the unit
/// of work discards every change. Entities are addressed by [`EntityId`] and
/// indexed by identity so that each stored record is materialized at most once.
pub struct UnitOfWork {
    registry: Arc<EntityTypeRegistry>,
    store: Arc<dyn EntityStore>,
    entities: Vec<Entity>,
    index: HashMap<IdentityKey, EntityId>,
    /// (owner, relation, child) triples whose child may have lost its owner
    orphans: Vec<(EntityId, String, EntityId)>,
}

impl UnitOfWork {
    pub fn begin(registry: Arc<EntityTypeRegistry>, store: Arc<dyn EntityStore>) -> Self {
        Self {
            registry,
            store,
            entities: Vec::new(),
            index: HashMap::new(),
            orphans: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<EntityTypeRegistry> {
        &self.registry
    }

    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id.0]
    }

    pub fn entity_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.entities[id.0]
    }

    pub fn entity_type(&self, id: EntityId) -> Result<&EntityType> {
        self.registry.get(&self.entity(id).entity_type)
    }

    /// Primary key read from the entity's key fields; missing parts are null
    pub fn key_of(&self, id: EntityId) -> Result<PrimaryKey> {
        let entity = self.entity(id);
        let et = self.registry.get(&entity.entity_type)?;
        Ok(PrimaryKey::new(
            et.primary_key
                .iter()
                .map(|field| entity.scalar(field).cloned().unwrap_or(Value::Null))
                .collect(),
        ))
    }

    /// Identity of an entity with a complete key
    pub fn identity_of(&self, id: EntityId) -> Result<Option<IdentityKey>> {
        let key = self.key_of(id)?;
        if !key.is_complete() {
            return Ok(None);
        }
        let root = self.registry.root_of(&self.entity(id).entity_type);
        Ok(Some(IdentityKey::new(root, &key)))
    }

    /// Index a transient entity whose key has become complete, so later lookups in
    /// this unit of work find it instead of building a duplicate
    pub fn register(&mut self, id: EntityId) -> Result<()> {
        if let Some(identity) = self.identity_of(id)? {
            self.index.entry(identity).or_insert(id);
        }
        Ok(())
    }

    /// Look up an entity by type and key, from this unit of work first, then the store.
    /// Entities of an unrelated type under the same root are not returned.
    pub fn get(&mut self, entity_type: &str, key: &PrimaryKey) -> Result<Option<EntityId>> {
        if !key.is_complete() {
            return Ok(None);
        }
        let registry = self.registry.clone();
        let root = registry.root_of(entity_type).to_string();

        let id = match self.index.get(&IdentityKey::new(&root, key)) {
            Some(id) => *id,
            None => match self.store.fetch(&root, key)? {
                Some(record) => self.materialize(record)?,
                None => return Ok(None),
            },
        };

        let entity = self.entity(id);
        if entity.state == EntityState::Deleted
            || !registry.is_same_or_subtype(&entity.entity_type, entity_type)
        {
            return Ok(None);
        }
        Ok(Some(id))
    }

    /// All live entities of a type (subtypes included), in store order
    pub fn scan(&mut self, entity_type: &str) -> Result<Vec<EntityId>> {
        let registry = self.registry.clone();
        let root = registry.root_of(entity_type).to_string();
        let mut ids = Vec::new();
        for record in self.store.scan(&root)? {
            if !registry.is_same_or_subtype(&record.entity_type, entity_type) {
                continue;
            }
            let id = match self.index.get(&IdentityKey::new(&root, &record.key)) {
                Some(id) => *id,
                None => self.materialize(record)?,
            };
            if self.entity(id).state != EntityState::Deleted {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Build an entity from a stored record; deferred scalars and relations stay unloaded
    pub fn materialize(&mut self, record: Record) -> Result<EntityId> {
        let registry = self.registry.clone();
        let et = registry.get(&record.entity_type)?;
        let mut entity = Entity::new(&et.name, EntityState::Persistent);
        entity.version = record.version;

        for (name, field) in &et.fields {
            if !matches!(field.kind, FieldKind::Scalar(_)) {
                continue;
            }
            if field.deferred && !et.is_primary_key(name) {
                continue;
            }
            let value = match record.values.get(name) {
                Some(StoredValue::Scalar(value)) => value.clone(),
                _ => Value::Null,
            };
            entity.values.insert(name.clone(), FieldValue::Scalar(value));
        }
        if let Some(version_field) = &et.version_field {
            entity.values.insert(
                version_field.clone(),
                FieldValue::Scalar(Value::Int(record.version as i64)),
            );
        }

        let id = EntityId(self.entities.len());
        self.entities.push(entity);
        self.index.insert(
            IdentityKey::new(registry.root_of(&et.name), &record.key),
            id,
        );
        Ok(id)
    }

    /// New transient entity with every field loaded and empty
    pub fn create(&mut self, entity_type: &str) -> Result<EntityId> {
        let registry = self.registry.clone();
        let et = registry.get(entity_type)?;
        let mut entity = Entity::new(&et.name, EntityState::Transient);

        for (name, field) in &et.fields {
            let value = match &field.kind {
                FieldKind::Scalar(_) => FieldValue::Scalar(Value::Null),
                FieldKind::Relation(relation) if relation.many => FieldValue::Many(Vec::new()),
                FieldKind::Relation(_) => FieldValue::One(None),
                _ => continue,
            };
            entity.values.insert(name.clone(), value);
        }
        if let (Some(poly), Some(identity)) = (&et.polymorphism, &et.identity) {
            entity.set_scalar(&poly.discriminator, identity.clone());
        }

        let id = EntityId(self.entities.len());
        self.entities.push(entity);
        Ok(id)
    }

    /// Load a field that is not loaded yet
    pub fn load_field(&mut self, id: EntityId, field: &str) -> Result<()> {
        if self.entity(id).is_loaded(field) {
            return Ok(());
        }
        let registry = self.registry.clone();
        let et = registry.get(&self.entity(id).entity_type)?;
        let descriptor = et
            .field(field)
            .ok_or_else(|| LiantError::unknown_field(&et.name, field))?;

        let stored = if self.entity(id).is_transient() {
            None
        } else {
            let key = self.key_of(id)?;
            self.store
                .fetch(registry.root_of(&et.name), &key)?
                .and_then(|mut record| record.values.shift_remove(field))
        };

        let value = match &descriptor.kind {
            FieldKind::Scalar(_) => match stored {
                Some(StoredValue::Scalar(value)) => FieldValue::Scalar(value),
                _ => FieldValue::Scalar(Value::Null),
            },
            FieldKind::Relation(relation) if relation.many => {
                let mut members = Vec::new();
                if let Some(StoredValue::Many(refs)) = stored {
                    for reference in refs {
                        if let Some(member) = self.get(&reference.entity_type, &reference.key)? {
                            members.push(member);
                        }
                    }
                }
                FieldValue::Many(members)
            }
            FieldKind::Relation(_) => match stored {
                Some(StoredValue::One(Some(reference))) => {
                    FieldValue::One(self.get(&reference.entity_type, &reference.key)?)
                }
                _ => FieldValue::One(None),
            },
            _ => return Ok(()),
        };

        debug!("Lazy loaded {}.{}", et.name, field);
        self.entity_mut(id).values.insert(field.to_string(), value);
        Ok(())
    }

    /// Shape an entity (and eagerly loaded relatives) according to a load plan
    pub fn load(&mut self, id: EntityId, plan: &LoadPlan) -> Result<()> {
        let registry = self.registry.clone();
        let concrete = self.entity(id).entity_type.clone();
        let et = registry.get(&concrete)?;

        for name in et.fields.keys() {
            match plan.directive_for(&concrete, name) {
                Some(LoadDirective::Undefer) => self.load_field(id, name)?,
                Some(LoadDirective::Defer) => {
                    let entity = self.entity_mut(id);
                    if !entity.dirty.contains(name) && !et.is_primary_key(name) {
                        entity.values.shift_remove(name);
                    }
                }
                Some(LoadDirective::Eager(nested)) => {
                    self.load_field(id, name)?;
                    if let Some(nested) = nested {
                        for related in self.related(id, name) {
                            self.load(related, nested)?;
                        }
                    }
                }
                Some(LoadDirective::Lazy) | None => {}
            }
        }
        Ok(())
    }

    /// Entities a loaded relation currently points at; empty when unloaded
    pub fn related(&self, id: EntityId, field: &str) -> Vec<EntityId> {
        match self.entity(id).get(field) {
            Some(FieldValue::One(Some(target))) => vec![*target],
            Some(FieldValue::Many(members)) => members.clone(),
            _ => Vec::new(),
        }
    }

    pub fn relation_of(&self, id: EntityId, field: &str) -> Result<RelationDescriptor> {
        let et = self.entity_type(id)?;
        et.field(field)
            .and_then(|f| f.relation_descriptor())
            .cloned()
            .ok_or_else(|| LiantError::unknown_field(&et.name, field))
    }

    pub fn set_scalar(&mut self, id: EntityId, field: &str, value: Value) {
        self.entity_mut(id).set_scalar(field, value);
    }

    pub fn one(&mut self, id: EntityId, field: &str) -> Result<Option<EntityId>> {
        self.load_field(id, field)?;
        Ok(match self.entity(id).get(field) {
            Some(FieldValue::One(target)) => *target,
            _ => None,
        })
    }

    pub fn many(&mut self, id: EntityId, field: &str) -> Result<Vec<EntityId>> {
        self.load_field(id, field)?;
        Ok(match self.entity(id).get(field) {
            Some(FieldValue::Many(members)) => members.clone(),
            _ => Vec::new(),
        })
    }

    fn put(&mut self, id: EntityId, field: &str, value: FieldValue) {
        let entity = self.entity_mut(id);
        if entity.get(field) != Some(&value) {
            entity.dirty.insert(field.to_string());
        }
        entity.values.insert(field.to_string(), value);
    }

    /// Point the back side of a relation at `member`, without further syncing
    fn link(&mut self, owner: EntityId, field: &str, member: EntityId) -> Result<()> {
        self.load_field(owner, field)?;
        match self.entity(owner).get(field).cloned() {
            Some(FieldValue::Many(mut members)) => {
                if !members.contains(&member) {
                    members.push(member);
                    self.put(owner, field, FieldValue::Many(members));
                }
            }
            Some(FieldValue::One(_)) => self.put(owner, field, FieldValue::One(Some(member))),
            _ => {}
        }
        Ok(())
    }

    /// Drop `member` from the back side of a relation, without further syncing
    fn unlink(&mut self, owner: EntityId, field: &str, member: EntityId) -> Result<()> {
        self.load_field(owner, field)?;
        match self.entity(owner).get(field).cloned() {
            Some(FieldValue::Many(mut members)) => {
                if members.contains(&member) {
                    members.retain(|m| *m != member);
                    self.put(owner, field, FieldValue::Many(members));
                }
            }
            Some(FieldValue::One(Some(current))) if current == member => {
                self.put(owner, field, FieldValue::One(None))
            }
            _ => {}
        }
        Ok(())
    }

    /// Assign a single-valued relation, keeping a back-populated side in sync
    pub fn set_one(&mut self, id: EntityId, field: &str, target: Option<EntityId>) -> Result<()> {
        let relation = self.relation_of(id, field)?;
        let old = self.one(id, field)?;
        if old == target {
            return Ok(());
        }
        self.put(id, field, FieldValue::One(target));

        if let Some(back) = &relation.back_populates {
            if let Some(old) = old {
                self.unlink(old, back, id)?;
            }
            if let Some(new) = target {
                self.link(new, back, id)?;
            }
        }
        if relation.delete_orphan {
            if let Some(old) = old {
                self.orphans.push((id, field.to_string(), old));
            }
        }
        Ok(())
    }

    /// Append to a collection; a child moved from another owner is removed there
    pub fn append(&mut self, owner: EntityId, field: &str, child: EntityId) -> Result<()> {
        let relation = self.relation_of(owner, field)?;
        let mut members = self.many(owner, field)?;
        if members.contains(&child) {
            return Ok(());
        }
        members.push(child);
        self.put(owner, field, FieldValue::Many(members));

        if let Some(back) = &relation.back_populates {
            if self.relation_of(child, back)?.many {
                self.link(child, back, owner)?;
            } else {
                let previous = self.one(child, back)?;
                if previous != Some(owner) {
                    if let Some(previous) = previous {
                        self.unlink(previous, field, child)?;
                    }
                    self.put(child, back, FieldValue::One(Some(owner)));
                }
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, owner: EntityId, field: &str, child: EntityId) -> Result<()> {
        let relation = self.relation_of(owner, field)?;
        let mut members = self.many(owner, field)?;
        if !members.contains(&child) {
            return Ok(());
        }
        members.retain(|m| *m != child);
        self.put(owner, field, FieldValue::Many(members));

        if let Some(back) = &relation.back_populates {
            self.unlink(child, back, owner)?;
        }
        if relation.delete_orphan {
            self.orphans.push((owner, field.to_string(), child));
        }
        Ok(())
    }

    /// Replace the member order of a collection and renumber its ordering field
    pub fn reorder(&mut self, owner: EntityId, field: &str, order: Vec<EntityId>) -> Result<()> {
        let relation = self.relation_of(owner, field)?;
        self.load_field(owner, field)?;
        if let Some(position) = &relation.ordering {
            for (index, child) in order.iter().enumerate() {
                self.set_scalar(*child, position, Value::Int(index as i64));
            }
        }
        self.put(owner, field, FieldValue::Many(order));
        Ok(())
    }

    pub fn clear(&mut self, owner: EntityId, field: &str) -> Result<()> {
        if self.relation_of(owner, field)?.many {
            for child in self.many(owner, field)? {
                self.remove(owner, field, child)?;
            }
            Ok(())
        } else {
            self.set_one(owner, field, None)
        }
    }

    /// Mark an entity deleted, detach it from back-populated relations and
    /// cascade to delete-orphan children
    pub fn delete(&mut self, id: EntityId) -> Result<()> {
        if self.entity(id).state == EntityState::Deleted {
            return Ok(());
        }
        let registry = self.registry.clone();
        let et = registry.get(&self.entity(id).entity_type)?;

        for (name, field) in &et.fields {
            let FieldKind::Relation(relation) = &field.kind else {
                continue;
            };
            self.load_field(id, name)?;
            let related = self.related(id, name);
            if let Some(back) = &relation.back_populates {
                for other in &related {
                    self.unlink(*other, back, id)?;
                }
            }
            if relation.delete_orphan {
                self.entity_mut(id).state = EntityState::Deleted;
                for other in related {
                    self.delete(other)?;
                }
            }
        }

        self.entity_mut(id).state = EntityState::Deleted;
        Ok(())
    }

    fn stored_ref(&self, id: EntityId) -> Result<Option<StoredRef>> {
        let entity = self.entity(id);
        if entity.state == EntityState::Deleted {
            return Ok(None);
        }
        Ok(Some(StoredRef {
            entity_type: self.registry.root_of(&entity.entity_type).to_string(),
            key: self.key_of(id)?,
        }))
    }

    fn stored_value(&self, value: &FieldValue) -> Result<StoredValue> {
        Ok(match value {
            FieldValue::Scalar(value) => StoredValue::Scalar(value.clone()),
            FieldValue::One(target) => StoredValue::One(match target {
                Some(target) => self.stored_ref(*target)?,
                None => None,
            }),
            FieldValue::Many(members) => {
                let mut refs = Vec::with_capacity(members.len());
                for member in members {
                    if let Some(reference) = self.stored_ref(*member)? {
                        refs.push(reference);
                    }
                }
                StoredValue::Many(refs)
            }
        })
    }

    fn assign_foreign_key(&mut self, id: EntityId, field: &str, value: Value) -> Result<()> {
        let entity = self.entity(id);
        let et = self.registry.get(&entity.entity_type)?;
        if entity.state == EntityState::Persistent && et.is_primary_key(field) {
            return Ok(());
        }
        if entity.scalar(field) != Some(&value) {
            self.set_scalar(id, field, value);
        }
        Ok(())
    }

    fn sync_foreign_keys(&mut self, id: EntityId) -> Result<()> {
        let registry = self.registry.clone();
        let et = registry.get(&self.entity(id).entity_type)?;

        for (name, field) in &et.fields {
            let Some(relation) = field.relation_descriptor() else {
                continue;
            };
            if relation.foreign_keys.is_empty() {
                continue;
            }
            match self.entity(id).get(name).cloned() {
                Some(FieldValue::One(Some(target))) => {
                    for (local, remote) in &relation.foreign_keys {
                        let value = self
                            .entity(target)
                            .scalar(remote)
                            .cloned()
                            .unwrap_or(Value::Null);
                        self.assign_foreign_key(id, local, value)?;
                    }
                }
                Some(FieldValue::One(None)) if self.entity(id).dirty.contains(name) => {
                    for (local, _) in &relation.foreign_keys {
                        self.assign_foreign_key(id, local, Value::Null)?;
                    }
                }
                Some(FieldValue::Many(members)) => {
                    for (local, remote) in &relation.foreign_keys {
                        let value = self
                            .entity(id)
                            .scalar(local)
                            .cloned()
                            .unwrap_or(Value::Null);
                        for member in &members {
                            if self.entity(*member).state != EntityState::Deleted {
                                self.assign_foreign_key(*member, remote, value.clone())?;
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn resolve_orphans(&mut self) -> Result<()> {
        for (owner, field, child) in std::mem::take(&mut self.orphans) {
            if self.entity(owner).state == EntityState::Deleted
                || self.entity(child).state == EntityState::Deleted
            {
                continue;
            }
            let relation = self.relation_of(owner, &field)?;
            let still_owned = self.related(owner, &field).contains(&child);
            let adopted = relation.back_populates.as_ref().is_some_and(|back| {
                matches!(self.entity(child).get(back), Some(FieldValue::One(Some(_))))
            });
            if !still_owned && !adopted {
                debug!("Deleting orphan {}", self.entity(child).entity_type);
                self.delete(child)?;
            }
        }
        Ok(())
    }

    fn live_ids(&self) -> Vec<EntityId> {
        (0..self.entities.len())
            .map(EntityId)
            .filter(|id| self.entity(*id).state != EntityState::Deleted)
            .collect()
    }

    /// Flush every change to the store in one atomic change set
    pub fn commit(&mut self) -> Result<()> {
        self.resolve_orphans()?;
        let registry = self.registry.clone();

        for id in self.live_ids() {
            let entity = self.entity(id);
            if entity.state != EntityState::Transient {
                continue;
            }
            let et = registry.get(&entity.entity_type)?;
            if !et.autoincrement || et.primary_key.len() != 1 {
                continue;
            }
            let pk = &et.primary_key[0];
            if entity.scalar(pk).map_or(true, Value::is_null) {
                let next = self.store.next_key(registry.root_of(&et.name))?;
                self.set_scalar(id, pk, Value::Int(next));
            }
        }

        for id in self.live_ids() {
            self.sync_foreign_keys(id)?;
        }

        for id in self.live_ids() {
            if !self.key_of(id)?.is_complete() {
                return Err(LiantError::IncompleteKey(
                    self.entity(id).entity_type.clone(),
                ));
            }
        }

        let mut writes = Vec::new();
        let mut written = Vec::new();
        for (index, entity) in self.entities.iter().enumerate() {
            let id = EntityId(index);
            let et = registry.get(&entity.entity_type)?;
            let expected_version = et.version_field.as_ref().map(|_| entity.version);

            let (kind, values) = match entity.state {
                // version 0 means the entity never reached the store
                EntityState::Deleted if entity.version > 0 => (WriteKind::Delete, IndexMap::new()),
                EntityState::Deleted => continue,
                EntityState::Transient => {
                    let mut values = IndexMap::new();
                    for (name, value) in &entity.values {
                        values.insert(name.clone(), self.stored_value(value)?);
                    }
                    (WriteKind::Insert, values)
                }
                EntityState::Persistent if entity.dirty.is_empty() => continue,
                EntityState::Persistent => {
                    let mut values = IndexMap::new();
                    for name in &entity.dirty {
                        if Some(name) == et.version_field.as_ref() {
                            continue;
                        }
                        if let Some(value) = entity.get(name) {
                            values.insert(name.clone(), self.stored_value(value)?);
                        }
                    }
                    (WriteKind::Update, values)
                }
            };

            writes.push(RecordWrite {
                root_type: registry.root_of(&et.name).to_string(),
                kind,
                record: Record {
                    entity_type: et.name.clone(),
                    key: self.key_of(id)?,
                    version: entity.version,
                    values,
                },
                expected_version: match kind {
                    WriteKind::Insert => None,
                    _ => expected_version,
                },
            });
            written.push((id, kind));
        }

        let changes = ChangeSet { writes };
        if !changes.is_empty() {
            self.store.write(changes)?;
        }

        let (mut inserted, mut updated, mut deleted) = (0, 0, 0);
        for (id, kind) in written {
            let identity = self.identity_of(id)?;
            let version_field = self.entity_type(id)?.version_field.clone();
            let entity = self.entity_mut(id);
            match kind {
                WriteKind::Insert => {
                    entity.state = EntityState::Persistent;
                    entity.version = 1;
                    inserted += 1;
                }
                WriteKind::Update => {
                    entity.version += 1;
                    updated += 1;
                }
                WriteKind::Delete => {
                    deleted += 1;
                }
            }
            entity.dirty.clear();
            if let Some(version_field) = version_field {
                entity.values.insert(
                    version_field,
                    FieldValue::Scalar(Value::Int(entity.version as i64)),
                );
            }
            if let Some(identity) = identity {
                if kind == WriteKind::Delete {
                    self.index.remove(&identity);
                } else {
                    self.index.insert(identity, id);
                }
            }
        }

        info!(
            "Committed unit of work: {} inserted, {} updated, {} deleted",
            inserted, updated, deleted
        );
        Ok(())
    }
}
