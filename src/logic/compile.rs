use indexmap::IndexMap;

use crate::error::{LiantError, Result};
use crate::logic::{coerce_value, Guard};
use crate::model::{
    EntityType, EntityTypeRegistry, FieldKind, HintNode, LoadDirective, LoadPlan,
};

/// A hint as seen by [`Guard::filter_hints`]: operator plus nested hints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintRequest {
    /// One of `+`, `-`, `*`
    pub op: char,
    pub children: Vec<HintNode>,
}

/// Turns a parsed hints tree into a [`LoadPlan`] for a root entity type
pub struct HintCompiler<'a> {
    registry: &'a EntityTypeRegistry,
    guard: &'a dyn Guard,
}

impl<'a> HintCompiler<'a> {
    pub fn new(registry: &'a EntityTypeRegistry, guard: &'a dyn Guard) -> Self {
        Self { registry, guard }
    }

    pub fn compile(&self, hints: &[HintNode], root_type: &str) -> Result<LoadPlan> {
        let et = self.registry.get(root_type)?;
        let mut plan = LoadPlan::new(&et.name);
        let mut candidates: IndexMap<String, HintRequest> = IndexMap::new();

        for item in hints {
            match item {
                HintNode::Cast { cast, children } => {
                    let subtype = self.cast_target(et, cast)?;
                    let compiled = self.compile(children, &subtype.name)?;
                    plan.subtypes.insert(subtype.name.clone(), compiled);
                }
                HintNode::Field { name, include } => {
                    self.check_field(et, name)?;
                    candidates.insert(
                        name.clone(),
                        HintRequest {
                            op: if *include { '+' } else { '-' },
                            children: Vec::new(),
                        },
                    );
                }
                HintNode::Collection { name, children } => {
                    self.check_field(et, name)?;
                    candidates.insert(
                        name.clone(),
                        HintRequest {
                            op: '*',
                            children: children.clone(),
                        },
                    );
                }
            }
        }

        self.guard.filter_hints(et, &mut candidates)?;

        for (name, request) in candidates {
            let field = et
                .field(&name)
                .ok_or_else(|| LiantError::unknown_field(&et.name, &name))?;
            let directive = match (&field.kind, request.op) {
                (FieldKind::Relation(_), '-') => LoadDirective::Lazy,
                (FieldKind::Relation(_), '+') => LoadDirective::Eager(None),
                (FieldKind::Relation(relation), '*') => {
                    if request.children.is_empty() {
                        LoadDirective::Eager(None)
                    } else {
                        let nested = self.compile(&request.children, &relation.target)?;
                        LoadDirective::Eager(Some(Box::new(nested)))
                    }
                }
                (FieldKind::Relation(_), op) => return Err(invalid_hint(et, &name, op)),
                (_, '+') => LoadDirective::Undefer,
                (_, '-') => LoadDirective::Defer,
                (_, op) => return Err(invalid_hint(et, &name, op)),
            };
            plan.directives.insert(name, directive);
        }

        Ok(plan)
    }

    fn check_field(&self, et: &EntityType, name: &str) -> Result<()> {
        match et.field(name) {
            Some(_) => Ok(()),
            None => Err(LiantError::unknown_field(&et.name, name)),
        }
    }

    /// Subtype named by a cast token, which must map through the discriminator
    pub fn cast_target(&self, et: &EntityType, cast: &str) -> Result<&'a EntityType> {
        let invalid = || LiantError::invalid_cast(&et.name, cast);
        let discriminator = et.discriminator_field().ok_or_else(invalid)?;
        let value = coerce_value(
            &et.name,
            discriminator,
            &serde_json::Value::String(cast.to_string()),
            true,
        )
        .map_err(|_| invalid())?;
        let subtype = self.registry.subtype_of(&et.name, &value).ok_or_else(invalid)?;
        if !self.registry.is_same_or_subtype(&subtype.name, &et.name) {
            return Err(invalid());
        }
        Ok(subtype)
    }
}

fn invalid_hint(et: &EntityType, field: &str, op: char) -> LiantError {
    LiantError::InvalidHint {
        entity_type: et.name.clone(),
        field: field.to_string(),
        op,
    }
}
