use indexmap::IndexMap;
use std::sync::Arc;

use crate::error::{LiantError, Result};
use crate::logic::coerce_value;
use crate::model::{
    EntityType, EntityTypeBuilder, FieldDescriptor, FieldKind, Polymorphism, Value,
};

/// Immutable catalogue of entity types, built once and shared
#[derive(Debug, Clone, Default)]
pub struct EntityTypeRegistry {
    types: IndexMap<String, EntityType>,
}

impl EntityTypeRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Result<&EntityType> {
        self.types
            .get(name)
            .ok_or_else(|| LiantError::UnknownEntityType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &EntityType> {
        self.types.values()
    }

    pub fn fields_of(&self, name: &str) -> Result<&IndexMap<String, FieldDescriptor>> {
        Ok(&self.get(name)?.fields)
    }

    pub fn field_of(&self, name: &str, field: &str) -> Result<&FieldDescriptor> {
        self.get(name)?
            .field(field)
            .ok_or_else(|| LiantError::unknown_field(name, field))
    }

    pub fn primary_key_of(&self, name: &str) -> Result<&[String]> {
        Ok(&self.get(name)?.primary_key)
    }

    pub fn discriminator_of(&self, name: &str) -> Option<&FieldDescriptor> {
        self.types.get(name)?.discriminator_field()
    }

    /// Concrete subtype for a coerced discriminator value, if the value is mapped
    pub fn subtype_of(&self, name: &str, value: &Value) -> Option<&EntityType> {
        let poly = self.types.get(name)?.polymorphism.as_ref()?;
        let subtype = poly.subtypes.get(&value.to_string())?;
        self.types.get(subtype)
    }

    /// Root of the single-level hierarchy the type belongs to
    pub fn root_of<'a>(&'a self, name: &'a str) -> &'a str {
        self.types
            .get(name)
            .and_then(|et| et.base.as_deref())
            .unwrap_or(name)
    }

    pub fn is_same_or_subtype(&self, candidate: &str, base: &str) -> bool {
        candidate == base
            || self
                .types
                .get(candidate)
                .and_then(|et| et.base.as_deref())
                == Some(base)
    }
}

/// Collects entity type declarations and validates them into a registry
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    declarations: Vec<EntityTypeBuilder>,
}

impl RegistryBuilder {
    pub fn entity(mut self, declaration: EntityTypeBuilder) -> Self {
        self.declarations.push(declaration);
        self
    }

    pub fn build(self) -> Result<Arc<EntityTypeRegistry>> {
        let mut types: IndexMap<String, EntityType> = IndexMap::new();

        let (bases, subtypes): (Vec<_>, Vec<_>) =
            self.declarations.into_iter().partition(|d| d.base.is_none());

        for decl in bases {
            let et = build_base(decl)?;
            types.insert(et.name.clone(), et);
        }

        for decl in subtypes {
            let base_name = decl.base.clone().unwrap_or_default();
            let base = types
                .get(&base_name)
                .ok_or_else(|| LiantError::UnknownEntityType(base_name.clone()))?;
            if base.base.is_some() {
                return Err(LiantError::invalid_cast(&decl.name, &base_name));
            }
            let et = build_subtype(decl, base)?;
            types.insert(et.name.clone(), et);
        }

        validate(&types)?;

        Ok(Arc::new(EntityTypeRegistry { types }))
    }
}

fn build_base(decl: EntityTypeBuilder) -> Result<EntityType> {
    let fields: IndexMap<String, FieldDescriptor> = decl
        .fields
        .into_iter()
        .map(|f| (f.name.clone(), f))
        .collect();

    let polymorphism = match decl.discriminator {
        Some(discriminator) => {
            let field = fields
                .get(&discriminator)
                .ok_or_else(|| LiantError::unknown_field(&decl.name, &discriminator))?;
            let mut table = IndexMap::new();
            for (identity, subtype) in &decl.subtypes {
                let value = coerce_value(
                    &decl.name,
                    field,
                    &serde_json::Value::String(identity.clone()),
                    true,
                )?;
                table.insert(value.to_string(), subtype.clone());
            }
            Some(Polymorphism {
                discriminator,
                subtypes: table,
            })
        }
        None => None,
    };

    Ok(EntityType {
        json_name: decl
            .json_name
            .unwrap_or_else(|| decl.name.to_lowercase()),
        name: decl.name,
        primary_key: decl.primary_key,
        fields,
        polymorphism,
        base: None,
        identity: None,
        autoincrement: decl.autoincrement,
        version_field: decl.version_field,
    })
}

fn build_subtype(decl: EntityTypeBuilder, base: &EntityType) -> Result<EntityType> {
    let poly = base
        .polymorphism
        .as_ref()
        .ok_or_else(|| LiantError::invalid_cast(&base.name, &decl.name))?;

    let identity_text = poly
        .subtypes
        .iter()
        .find(|(_, subtype)| **subtype == decl.name)
        .map(|(identity, _)| identity.clone())
        .ok_or_else(|| LiantError::invalid_cast(&base.name, &decl.name))?;

    let discriminator = base
        .discriminator_field()
        .ok_or_else(|| LiantError::unknown_field(&base.name, &poly.discriminator))?;
    let identity = coerce_value(
        &base.name,
        discriminator,
        &serde_json::Value::String(identity_text),
        true,
    )?;

    let mut fields = base.fields.clone();
    for field in decl.fields {
        fields.insert(field.name.clone(), field);
    }

    Ok(EntityType {
        name: decl.name,
        json_name: decl.json_name.unwrap_or_else(|| base.json_name.clone()),
        primary_key: base.primary_key.clone(),
        fields,
        polymorphism: base.polymorphism.clone(),
        base: Some(base.name.clone()),
        identity: Some(identity),
        autoincrement: base.autoincrement,
        version_field: base.version_field.clone(),
    })
}

fn validate(types: &IndexMap<String, EntityType>) -> Result<()> {
    for et in types.values() {
        for pk in &et.primary_key {
            match et.field(pk).map(|f| &f.kind) {
                Some(FieldKind::Scalar(_)) => {}
                _ => return Err(LiantError::unknown_field(&et.name, pk)),
            }
        }
        if let Some(version) = &et.version_field {
            if et.field(version).and_then(|f| f.scalar_type()).is_none() {
                return Err(LiantError::unknown_field(&et.name, version));
            }
        }
        if let Some(poly) = &et.polymorphism {
            for subtype in poly.subtypes.values() {
                if !types.contains_key(subtype) {
                    return Err(LiantError::UnknownEntityType(subtype.clone()));
                }
            }
        }

        for field in et.fields.values() {
            match &field.kind {
                FieldKind::Relation(relation) => {
                    let target = types
                        .get(&relation.target)
                        .ok_or_else(|| LiantError::UnknownEntityType(relation.target.clone()))?;
                    if let Some(back) = &relation.back_populates {
                        if !target.field(back).is_some_and(|f| f.is_relation()) {
                            return Err(LiantError::unknown_field(&target.name, back));
                        }
                    }
                    for (local, remote) in &relation.foreign_keys {
                        if et.field(local).is_none() {
                            return Err(LiantError::unknown_field(&et.name, local));
                        }
                        if target.field(remote).is_none() {
                            return Err(LiantError::unknown_field(&target.name, remote));
                        }
                    }
                    if let Some(ordering) = &relation.ordering {
                        if target.field(ordering).is_none() {
                            return Err(LiantError::unknown_field(&target.name, ordering));
                        }
                    }
                }
                FieldKind::Composite { parts } => {
                    for part in parts {
                        if et.field(part).and_then(|f| f.scalar_type()).is_none() {
                            return Err(LiantError::unknown_field(&et.name, part));
                        }
                    }
                }
                FieldKind::Synonym(target) => {
                    if et.field(target).is_none() {
                        return Err(LiantError::unknown_field(&et.name, target));
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}
