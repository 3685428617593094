use indexmap::IndexMap;
use log::debug;

use crate::error::{LiantError, Result};
use crate::logic::{coerce_value, parse_route, Guard, HintCompiler};
use crate::model::{EntityId, EntityTypeRegistry, PrimaryKey, RouteDirective, RouteSlice};
use crate::store::{Filter, Query, QuerySource, UnitOfWork};

/// Entity type addressed by a route verb, plus filters every access to it gets
#[derive(Debug, Clone)]
pub struct CatchallTarget {
    pub entity_type: String,
    pub filters: Vec<Filter>,
}

impl CatchallTarget {
    pub fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// Route verb -> target
pub type CatchallTargets = IndexMap<String, CatchallTarget>;

/// How a single item is picked from the route's query
#[derive(Debug, Clone, PartialEq)]
pub enum Getter {
    ByKey(PrimaryKey),
    /// The query must yield exactly one entity
    AssertOne,
    /// Position in the ordered result
    Index(i64),
}

/// A route resolved against the targets and the registry, ready to run
#[derive(Debug, Clone)]
pub struct DispatchedRoute {
    pub entity_type: String,
    pub query: Query,
    pub getter: Option<Getter>,
    /// Half-open range requested by the route itself
    pub slice: Option<(i64, i64)>,
}

impl DispatchedRoute {
    /// The single entity the getter selects, shaped by the load plan
    pub fn fetch_one(&self, uow: &mut UnitOfWork) -> Result<EntityId> {
        let id = match &self.getter {
            None => return Err(LiantError::NotFound),
            Some(Getter::ByKey(key)) => {
                let id = uow
                    .get(&self.query.entity_type, key)?
                    .ok_or(LiantError::NotFound)?;
                if !self.query.matches(uow, id)? {
                    return Err(LiantError::NotFound);
                }
                id
            }
            Some(Getter::AssertOne) => match self.query.execute(uow)?.as_slice() {
                [id] => *id,
                _ => return Err(LiantError::NotFound),
            },
            Some(Getter::Index(index)) => {
                let ids = self.query.execute(uow)?;
                usize::try_from(*index)
                    .ok()
                    .and_then(|index| ids.get(index).copied())
                    .ok_or(LiantError::NotFound)?
            }
        };
        self.query.shape(uow, &[id])?;
        Ok(id)
    }

    /// Matching entities within the route slice, or `pager` when the route has
    /// none, plus the count before slicing
    pub fn fetch_list(
        &self,
        uow: &mut UnitOfWork,
        pager: Option<(i64, i64)>,
    ) -> Result<(Vec<EntityId>, usize)> {
        let ids = self.query.execute(uow)?;
        let total = ids.len();
        let items = match self.slice.or(pager) {
            Some((start, stop)) => {
                let start = usize::try_from(start).unwrap_or(0).min(total);
                let stop = usize::try_from(stop).unwrap_or(0).clamp(start, total);
                ids[start..stop].to_vec()
            }
            None => ids,
        };
        self.query.shape(uow, &items)?;
        Ok((items, total))
    }
}

/// Resolves route strings to queries over the catch-all targets
pub struct Dispatcher<'a> {
    registry: &'a EntityTypeRegistry,
    targets: &'a CatchallTargets,
    guard: &'a dyn Guard,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        registry: &'a EntityTypeRegistry,
        targets: &'a CatchallTargets,
        guard: &'a dyn Guard,
    ) -> Self {
        Self {
            registry,
            targets,
            guard,
        }
    }

    /// Every failure is reported as `RouteNotFound`; the reason is only logged
    pub fn dispatch(&self, route: &str) -> Result<DispatchedRoute> {
        parse_route(route)
            .and_then(|directive| self.resolve(&directive))
            .map_err(|err| {
                debug!("Route '{}' rejected: {}", route, err);
                LiantError::RouteNotFound
            })
    }

    fn resolve(&self, route: &RouteDirective) -> Result<DispatchedRoute> {
        let compiler = HintCompiler::new(self.registry, self.guard);
        let target = self
            .targets
            .get(&route.verb)
            .ok_or_else(|| LiantError::UnknownEntityType(route.verb.clone()))?;

        let mut et = self.registry.get(&target.entity_type)?;
        if let Some(cast) = &route.cast {
            et = compiler.cast_target(et, cast)?;
        }

        let mut query = Query {
            filters: target.filters.clone(),
            ..Query::new(&et.name)
        };
        let mut getter = None;

        if let Some(parts) = &route.pkey {
            if parts.len() != et.primary_key.len() {
                return Err(LiantError::coercion(
                    &et.name,
                    "@",
                    format!(
                        "expected {} key parts, got {}",
                        et.primary_key.len(),
                        parts.len()
                    ),
                ));
            }
            let mut key = Vec::with_capacity(parts.len());
            for (field, text) in et.primary_key.iter().zip(parts) {
                let descriptor = self.registry.field_of(&et.name, field)?;
                key.push(coerce_value(
                    &et.name,
                    descriptor,
                    &serde_json::Value::String(text.clone()),
                    true,
                )?);
            }
            getter = Some(Getter::ByKey(PrimaryKey::new(key)));
        }

        if let Some(drilldown) = &route.drilldown {
            let Some(Getter::ByKey(key)) = getter.take() else {
                return Err(LiantError::Unsupported("drilldown from a list"));
            };
            let relation = et
                .field(drilldown)
                .and_then(|field| field.relation_descriptor())
                .ok_or_else(|| LiantError::unknown_field(&et.name, drilldown))?;
            if !self.guard.authorize_drilldown(et, drilldown) {
                return Err(LiantError::AuthorizationDenied(format!(
                    "{}.{}",
                    et.name, drilldown
                )));
            }

            query = Query {
                source: QuerySource::Related {
                    owner_type: et.name.clone(),
                    key,
                    field: drilldown.clone(),
                    owner_filters: query.filters,
                },
                ..Query::new(&relation.target)
            };
            getter = (!relation.many).then_some(Getter::AssertOne);
            et = self.registry.get(&relation.target)?;
        }

        let mut slice = None;
        match route.slice {
            Some(_) if getter.is_some() => {
                return Err(LiantError::Unsupported("slice of a single item"))
            }
            Some(RouteSlice::Index(index)) => getter = Some(Getter::Index(index)),
            Some(RouteSlice::Range(start, stop)) => {
                if start < 0 || stop < start {
                    return Err(LiantError::Unsupported("slice range"));
                }
                slice = Some((start, stop));
            }
            None => {}
        }

        if !route.hints.is_empty() {
            query.plan = Some(compiler.compile(&route.hints, &et.name)?);
        }

        Ok(DispatchedRoute {
            entity_type: et.name.clone(),
            query,
            getter,
            slice,
        })
    }
}
