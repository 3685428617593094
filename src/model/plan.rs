use indexmap::IndexMap;

/// How one field is loaded
#[derive(Debug, Clone, PartialEq)]
pub enum LoadDirective {
    Undefer,
    Defer,
    /// Relation loaded only on access
    Lazy,
    /// Relation loaded up front, optionally with a plan for the target
    Eager(Option<Box<LoadPlan>>),
}

/// Compiled hints for one entity type
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadPlan {
    pub entity_type: String,
    pub directives: IndexMap<String, LoadDirective>,
    /// Plans produced by casts, keyed by subtype name
    pub subtypes: IndexMap<String, LoadPlan>,
}

impl LoadPlan {
    pub fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty() && self.subtypes.is_empty()
    }

    /// Directive for a field of an entity whose concrete type is `concrete`;
    /// subtype plans take precedence over the base plan
    pub fn directive_for(&self, concrete: &str, field: &str) -> Option<&LoadDirective> {
        self.subtypes
            .get(concrete)
            .and_then(|plan| plan.directives.get(field))
            .or_else(|| self.directives.get(field))
    }
}
