use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{Entity, Value};

/// One member of an enumerated scalar type: symbolic name plus underlying value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumMember {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub members: Vec<EnumMember>,
}

impl EnumDef {
    /// Build an enum whose members are given as (name, value) pairs
    pub fn new(name: &str, members: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            members: members
                .iter()
                .map(|(name, value)| EnumMember {
                    name: name.to_string(),
                    value: value.to_string(),
                })
                .collect(),
        }
    }

    /// Match either the symbolic name or the underlying value
    pub fn lookup(&self, text: &str) -> Option<&EnumMember> {
        self.members
            .iter()
            .find(|member| member.name == text || member.value == text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScalarType {
    Text,
    Integer,
    Decimal,
    Float,
    Boolean,
    DateTime { timezone: bool },
    Date,
    Time { timezone: bool },
    Duration,
    Bytes,
    Enum(Arc<EnumDef>),
    Uuid,
    /// String to string mapping (key/value store column)
    Map,
    Array(Box<ScalarType>),
}

pub type ComputedGetter = Arc<dyn Fn(&Entity) -> serde_json::Value + Send + Sync>;
pub type ComputedSetter =
    Arc<dyn Fn(&mut Entity, &serde_json::Value) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct RelationDescriptor {
    pub target: String,
    pub many: bool,
    /// Field on the target that points back at the owner
    pub back_populates: Option<String>,
    /// (field on owner, field on target) pairs joining the two sides
    pub foreign_keys: Vec<(String, String)>,
    /// Position field on the target rewritten whenever the collection is reordered
    pub ordering: Option<String>,
    pub delete_orphan: bool,
}

impl RelationDescriptor {
    pub fn one(target: &str) -> Self {
        Self {
            target: target.to_string(),
            many: false,
            back_populates: None,
            foreign_keys: Vec::new(),
            ordering: None,
            delete_orphan: false,
        }
    }

    pub fn many(target: &str) -> Self {
        Self {
            many: true,
            ..Self::one(target)
        }
    }

    pub fn back_populates(mut self, field: &str) -> Self {
        self.back_populates = Some(field.to_string());
        self
    }

    pub fn foreign_key(mut self, local: &str, remote: &str) -> Self {
        self.foreign_keys.push((local.to_string(), remote.to_string()));
        self
    }

    pub fn ordered_by(mut self, field: &str) -> Self {
        self.ordering = Some(field.to_string());
        self
    }

    pub fn delete_orphan(mut self) -> Self {
        self.delete_orphan = true;
        self
    }
}

#[derive(Clone)]
pub enum FieldKind {
    Scalar(ScalarType),
    Computed {
        getter: Option<ComputedGetter>,
        setter: Option<ComputedSetter>,
    },
    Composite {
        parts: Vec<String>,
    },
    Synonym(String),
    Relation(RelationDescriptor),
    AssociationProxy,
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Scalar(scalar) => f.debug_tuple("Scalar").field(scalar).finish(),
            FieldKind::Computed { getter, setter } => f
                .debug_struct("Computed")
                .field("getter", &getter.is_some())
                .field("setter", &setter.is_some())
                .finish(),
            FieldKind::Composite { parts } => {
                f.debug_struct("Composite").field("parts", parts).finish()
            }
            FieldKind::Synonym(target) => f.debug_tuple("Synonym").field(target).finish(),
            FieldKind::Relation(relation) => f.debug_tuple("Relation").field(relation).finish(),
            FieldKind::AssociationProxy => write!(f, "AssociationProxy"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub max_length: Option<usize>,
    /// Not loaded unless a hint undefers it
    pub deferred: bool,
    /// Never serialized
    pub internal: bool,
}

impl FieldDescriptor {
    fn with_kind(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            nullable: true,
            max_length: None,
            deferred: false,
            internal: false,
        }
    }

    pub fn scalar(name: &str, scalar: ScalarType) -> Self {
        Self::with_kind(name, FieldKind::Scalar(scalar))
    }

    pub fn text(name: &str, max_length: Option<usize>) -> Self {
        Self {
            max_length,
            ..Self::scalar(name, ScalarType::Text)
        }
    }

    pub fn computed(
        name: &str,
        getter: Option<ComputedGetter>,
        setter: Option<ComputedSetter>,
    ) -> Self {
        Self::with_kind(name, FieldKind::Computed { getter, setter })
    }

    pub fn composite(name: &str, parts: &[&str]) -> Self {
        Self::with_kind(
            name,
            FieldKind::Composite {
                parts: parts.iter().map(|p| p.to_string()).collect(),
            },
        )
    }

    pub fn synonym(name: &str, target: &str) -> Self {
        Self::with_kind(name, FieldKind::Synonym(target.to_string()))
    }

    pub fn relation(name: &str, relation: RelationDescriptor) -> Self {
        Self::with_kind(name, FieldKind::Relation(relation))
    }

    pub fn association_proxy(name: &str) -> Self {
        Self::with_kind(name, FieldKind::AssociationProxy)
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn scalar_type(&self) -> Option<&ScalarType> {
        match &self.kind {
            FieldKind::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    pub fn relation_descriptor(&self) -> Option<&RelationDescriptor> {
        match &self.kind {
            FieldKind::Relation(relation) => Some(relation),
            _ => None,
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.kind, FieldKind::Relation(_))
    }
}

/// Discriminator field plus the table from discriminator value to concrete subtype
#[derive(Debug, Clone, PartialEq)]
pub struct Polymorphism {
    pub discriminator: String,
    /// Keyed by the canonical text of the coerced discriminator value
    pub subtypes: IndexMap<String, String>,
}

/// Schema description of one entity kind
#[derive(Debug, Clone)]
pub struct EntityType {
    pub name: String,
    pub json_name: String,
    pub primary_key: Vec<String>,
    pub fields: IndexMap<String, FieldDescriptor>,
    pub polymorphism: Option<Polymorphism>,
    /// Base type this subtype extends (single level)
    pub base: Option<String>,
    /// Discriminator value identifying this subtype
    pub identity: Option<Value>,
    pub autoincrement: bool,
    pub version_field: Option<String>,
}

impl EntityType {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    pub fn is_polymorphic(&self) -> bool {
        self.polymorphism.is_some()
    }

    pub fn is_primary_key(&self, field: &str) -> bool {
        self.primary_key.iter().any(|pk| pk == field)
    }

    pub fn discriminator_field(&self) -> Option<&FieldDescriptor> {
        self.polymorphism
            .as_ref()
            .and_then(|poly| self.fields.get(&poly.discriminator))
    }

    /// Names of scalar fields that are parts of some composite field
    pub fn composite_parts(&self) -> Vec<&str> {
        self.fields
            .values()
            .filter_map(|field| match &field.kind {
                FieldKind::Composite { parts } => Some(parts),
                _ => None,
            })
            .flatten()
            .map(|part| part.as_str())
            .collect()
    }
}

/// Declarative builder used to describe an entity type before the registry is built
#[derive(Debug, Clone)]
pub struct EntityTypeBuilder {
    pub(crate) name: String,
    pub(crate) json_name: Option<String>,
    pub(crate) primary_key: Vec<String>,
    pub(crate) fields: Vec<FieldDescriptor>,
    pub(crate) discriminator: Option<String>,
    pub(crate) subtypes: Vec<(String, String)>,
    pub(crate) base: Option<String>,
    pub(crate) autoincrement: bool,
    pub(crate) version_field: Option<String>,
}

impl EntityTypeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            json_name: None,
            primary_key: Vec::new(),
            fields: Vec::new(),
            discriminator: None,
            subtypes: Vec::new(),
            base: None,
            autoincrement: false,
            version_field: None,
        }
    }

    pub fn json_name(mut self, name: &str) -> Self {
        self.json_name = Some(name.to_string());
        self
    }

    pub fn primary_key(mut self, fields: &[&str]) -> Self {
        self.primary_key = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn version(mut self, field: &str) -> Self {
        self.version_field = Some(field.to_string());
        self
    }

    pub fn polymorphic_on(mut self, field: &str) -> Self {
        self.discriminator = Some(field.to_string());
        self
    }

    pub fn subtype(mut self, identity: &str, type_name: &str) -> Self {
        self.subtypes
            .push((identity.to_string(), type_name.to_string()));
        self
    }

    pub fn extends(mut self, base: &str) -> Self {
        self.base = Some(base.to_string());
        self
    }
}
