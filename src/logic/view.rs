use indexmap::IndexMap;
use log::{debug, warn};
use std::sync::Arc;

use crate::codec::{EncoderOptions, JsonDecoder, JsonEncoder, Output};
use crate::error::{LiantError, Result};
use crate::logic::{
    auto_filters, order_clauses, pager_slice, CatchallTargets, DispatchedRoute, Dispatcher,
    Guard, IdentityMap, ReconcileOptions, Reconciler, Unrestricted,
};
use crate::model::{DecodedDocument, EntityTypeRegistry, NodeId};
use crate::store::{EntityStore, UnitOfWork};

/// What an update does when the store reports a version conflict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Surface the conflict to the caller
    #[default]
    Error,
    /// Re-run the whole update in a fresh unit of work, up to `attempts` more times
    Retry { attempts: u32 },
}

impl ConflictPolicy {
    pub fn from_retries(retries: u32) -> Self {
        if retries == 0 {
            ConflictPolicy::Error
        } else {
            ConflictPolicy::Retry { attempts: retries }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViewConfig {
    pub encoder: EncoderOptions,
    pub reconcile: ReconcileOptions,
    pub conflict: ConflictPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Delete,
    Other,
}

/// Transport-independent request for the catch-all view
#[derive(Debug, Clone)]
pub struct CatchallRequest {
    pub method: RequestMethod,
    /// Route text, e.g. `parent@1/children:+data`
    pub route: String,
    pub params: IndexMap<String, String>,
    pub body: Option<String>,
}

impl CatchallRequest {
    pub fn new(method: RequestMethod, route: &str) -> Self {
        Self {
            method,
            route: route.to_string(),
            params: IndexMap::new(),
            body: None,
        }
    }

    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }
}

/// CRUD over every catch-all target, addressed by route strings.
///
/// `GET` reads one entity or lists, `POST` updates the addressed entity or
/// inserts a new one, `DELETE` removes the addressed entity. Each request runs
/// in its own unit of work.
pub struct CatchallView {
    registry: Arc<EntityTypeRegistry>,
    store: Arc<dyn EntityStore>,
    targets: CatchallTargets,
    guard: Arc<dyn Guard>,
    config: ViewConfig,
}

impl CatchallView {
    pub fn new(
        registry: Arc<EntityTypeRegistry>,
        store: Arc<dyn EntityStore>,
        targets: CatchallTargets,
    ) -> Self {
        Self {
            registry,
            store,
            targets,
            guard: Arc::new(Unrestricted),
            config: ViewConfig::default(),
        }
    }

    pub fn with_guard(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_config(mut self, config: ViewConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<EntityTypeRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork::begin(self.registry.clone(), self.store.clone())
    }

    /// Handle one request and return the JSON response body
    pub fn process(&self, request: &CatchallRequest) -> Result<String> {
        let route = Dispatcher::new(&self.registry, &self.targets, self.guard.as_ref())
            .dispatch(&request.route)?;
        let route = self.refine(route, &request.params)?;
        let has_getter = route.getter.is_some();

        debug!(
            "{:?} {} -> {} ({})",
            request.method,
            request.route,
            route.entity_type,
            if has_getter { "item" } else { "list" }
        );

        match (request.method, has_getter) {
            (RequestMethod::Get, true) => self.get(&route),
            (RequestMethod::Get, false) => self.list(&route, &request.params),
            (RequestMethod::Post, true) => {
                self.with_conflict_policy(|| self.update(&route, request.body.as_deref()))
            }
            (RequestMethod::Post, false) => self.insert(&route, request.body.as_deref()),
            (RequestMethod::Delete, true) => self.with_conflict_policy(|| self.delete(&route)),
            _ => Err(LiantError::NotFound),
        }
    }

    /// Add query parameter filters and ordering to a dispatched route
    fn refine(
        &self,
        mut route: DispatchedRoute,
        params: &IndexMap<String, String>,
    ) -> Result<DispatchedRoute> {
        let et = self.registry.get(&route.entity_type)?;
        route.query.filters.extend(auto_filters(et, params)?);
        route.query.order = order_clauses(et, params)?;
        Ok(route)
    }

    fn target_name(&self, route: &DispatchedRoute) -> Result<String> {
        Ok(self.registry.get(&route.entity_type)?.json_name.clone())
    }

    fn encode(&self, uow: &UnitOfWork, output: &Output) -> Result<String> {
        JsonEncoder::new(uow, self.guard.as_ref(), self.config.encoder.clone()).encode(output)
    }

    fn get(&self, route: &DispatchedRoute) -> Result<String> {
        let mut uow = self.begin();
        let id = route.fetch_one(&mut uow)?;
        let mut body = IndexMap::new();
        body.insert(self.target_name(route)?, Output::Entity(id));
        self.encode(&uow, &Output::Map(body))
    }

    fn list(&self, route: &DispatchedRoute, params: &IndexMap<String, String>) -> Result<String> {
        let mut uow = self.begin();
        let (items, total) = route.fetch_list(&mut uow, pager_slice(params)?)?;
        let mut body = IndexMap::new();
        body.insert("items".to_string(), Output::Entities(items));
        body.insert("total".to_string(), Output::Json(serde_json::json!(total)));
        self.encode(&uow, &Output::Map(body))
    }

    /// Decoded request body and the node stored under the target's name
    fn payload(&self, route: &DispatchedRoute, body: Option<&str>) -> Result<(DecodedDocument, NodeId)> {
        let name = self.target_name(route)?;
        let doc = JsonDecoder::new().decode(body.unwrap_or(""))?;
        let node = doc
            .root_node()
            .and_then(|root| doc.get(root, &name))
            .and_then(|value| value.as_node())
            .ok_or_else(|| {
                LiantError::coercion(&route.entity_type, &name, "request body must hold an object under this key")
            })?;
        Ok((doc, node))
    }

    fn update(&self, route: &DispatchedRoute, body: Option<&str>) -> Result<String> {
        let (doc, node) = self.payload(route, body)?;
        let mut uow = self.begin();
        let id = route.fetch_one(&mut uow)?;

        let reconciler = Reconciler::new(&doc, Some(self.guard.as_ref()), self.config.reconcile);
        reconciler.apply(&mut uow, id, node, &mut IdentityMap::default(), true)?;
        uow.commit()?;
        self.encode(&uow, &Output::Entity(id))
    }

    fn insert(&self, route: &DispatchedRoute, body: Option<&str>) -> Result<String> {
        let (doc, node) = self.payload(route, body)?;
        let mut uow = self.begin();

        let reconciler = Reconciler::new(&doc, Some(self.guard.as_ref()), self.config.reconcile);
        let id = reconciler.construct(&mut uow, &route.entity_type, Some(node))?;
        reconciler.apply(&mut uow, id, node, &mut IdentityMap::default(), false)?;
        uow.commit()?;

        let mut body = IndexMap::new();
        body.insert(self.target_name(route)?, Output::Entity(id));
        self.encode(&uow, &Output::Map(body))
    }

    fn delete(&self, route: &DispatchedRoute) -> Result<String> {
        let mut uow = self.begin();
        let id = route.fetch_one(&mut uow)?;
        uow.delete(id)?;
        uow.commit()?;
        Ok("{}".to_string())
    }

    fn with_conflict_policy(&self, mut operation: impl FnMut() -> Result<String>) -> Result<String> {
        let attempts = match self.config.conflict {
            ConflictPolicy::Error => 0,
            ConflictPolicy::Retry { attempts } => attempts,
        };
        let mut retried = 0;
        loop {
            match operation() {
                Err(err @ LiantError::Conflict { .. }) if retried < attempts => {
                    retried += 1;
                    warn!("{}, retrying ({}/{})", err, retried, attempts);
                }
                Err(err @ LiantError::Conflict { .. }) => {
                    warn!("{}", err);
                    return Err(err);
                }
                other => return other,
            }
        }
    }
}
