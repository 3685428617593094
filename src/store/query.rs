use std::cmp::Ordering;

use crate::error::Result;
use crate::model::{EntityId, LoadPlan, PrimaryKey, Value};
use crate::store::UnitOfWork;

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq,
    /// Case-insensitive substring match on text
    Like,
    Gt,
    Ge,
    Lt,
    Le,
    IsNull(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: &str, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.to_string(),
            op,
            value,
        }
    }

    pub fn eq(field: &str, value: Value) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    fn accepts(&self, actual: &Value) -> bool {
        match &self.op {
            FilterOp::IsNull(expect_null) => actual.is_null() == *expect_null,
            FilterOp::Like => match (actual.as_str(), self.value.as_str()) {
                (Some(text), Some(pattern)) => {
                    text.to_lowercase().contains(&pattern.to_lowercase())
                }
                _ => false,
            },
            FilterOp::Eq => {
                actual == &self.value || actual.compare(&self.value) == Some(Ordering::Equal)
            }
            op => match actual.compare(&self.value) {
                Some(ordering) => match op {
                    FilterOp::Gt => ordering == Ordering::Greater,
                    FilterOp::Ge => ordering != Ordering::Less,
                    FilterOp::Lt => ordering == Ordering::Less,
                    FilterOp::Le => ordering != Ordering::Greater,
                    _ => false,
                },
                None => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderClause {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuerySource {
    All,
    /// Members of a relation of one owner entity
    Related {
        owner_type: String,
        key: PrimaryKey,
        field: String,
        /// Filters the owner itself must pass
        owner_filters: Vec<Filter>,
    },
}

/// Entity selection executed against a unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub entity_type: String,
    pub source: QuerySource,
    pub filters: Vec<Filter>,
    pub order: Vec<OrderClause>,
    pub plan: Option<LoadPlan>,
}

impl Query {
    pub fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            source: QuerySource::All,
            filters: Vec::new(),
            order: Vec::new(),
            plan: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Matching entities, filtered and ordered; load plans are not applied here
    pub fn execute(&self, uow: &mut UnitOfWork) -> Result<Vec<EntityId>> {
        let candidates = match &self.source {
            QuerySource::All => uow.scan(&self.entity_type)?,
            QuerySource::Related {
                owner_type,
                key,
                field,
                owner_filters,
            } => {
                let owner_query = Query {
                    filters: owner_filters.clone(),
                    ..Query::new(owner_type)
                };
                match uow.get(owner_type, key)? {
                    Some(owner) if owner_query.matches(uow, owner)? => {
                        uow.load_field(owner, field)?;
                        uow.related(owner, field)
                    }
                    _ => Vec::new(),
                }
            }
        };

        let mut selected = Vec::with_capacity(candidates.len());
        for id in candidates {
            let concrete = uow.entity(id).entity_type.clone();
            if !uow.registry().is_same_or_subtype(&concrete, &self.entity_type) {
                continue;
            }
            if self.matches(uow, id)? {
                selected.push(id);
            }
        }

        if !self.order.is_empty() {
            for clause in &self.order {
                for id in &selected {
                    uow.load_field(*id, &clause.field)?;
                }
            }
            let view: &UnitOfWork = uow;
            selected.sort_by(|a, b| self.compare(view, *a, *b));
        }

        Ok(selected)
    }

    /// Apply the attached load plan to the given results
    pub fn shape(&self, uow: &mut UnitOfWork, ids: &[EntityId]) -> Result<()> {
        if let Some(plan) = &self.plan {
            for id in ids {
                uow.load(*id, plan)?;
            }
        }
        Ok(())
    }

    pub fn matches(&self, uow: &mut UnitOfWork, id: EntityId) -> Result<bool> {
        for filter in &self.filters {
            uow.load_field(id, &filter.field)?;
            let actual = uow
                .entity(id)
                .scalar(&filter.field)
                .cloned()
                .unwrap_or(Value::Null);
            if !filter.accepts(&actual) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn compare(&self, uow: &UnitOfWork, a: EntityId, b: EntityId) -> Ordering {
        for clause in &self.order {
            let left = uow.entity(a).scalar(&clause.field).unwrap_or(&Value::Null);
            let right = uow.entity(b).scalar(&clause.field).unwrap_or(&Value::Null);
            let ordering = match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => left.compare(right).unwrap_or(Ordering::Equal),
            };
            let ordering = if clause.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}
