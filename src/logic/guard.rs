use indexmap::IndexMap;

use crate::error::Result;
use crate::logic::HintRequest;
use crate::model::{DecodedDocument, Entity, EntityId, EntityType, NodeId};
use crate::store::UnitOfWork;

/// Authorization hook consulted at fixed points of reconciliation, hint
/// compilation, serialization and route dispatch. Every method allows by default.
pub trait Guard: Send + Sync {
    /// Called before a node carrying more than key fields is applied to an entity.
    /// Returning false skips the whole node.
    fn authorize_update(
        &self,
        _uow: &UnitOfWork,
        _entity: EntityId,
        _doc: &DecodedDocument,
        _node: NodeId,
        _is_update: bool,
    ) -> bool {
        true
    }

    /// May alter the requested hints for one entity type, or veto with `AuthorizationDenied`
    fn filter_hints(
        &self,
        _entity_type: &EntityType,
        _candidates: &mut IndexMap<String, HintRequest>,
    ) -> Result<()> {
        Ok(())
    }

    /// May remove or rewrite fields of an entity object before it is emitted
    fn filter_serialized_fields(
        &self,
        _entity: &Entity,
        _fields: &mut serde_json::Map<String, serde_json::Value>,
    ) {
    }

    fn authorize_drilldown(&self, _entity_type: &EntityType, _field: &str) -> bool {
        true
    }
}

/// Guard that allows everything
#[derive(Debug, Clone, Copy, Default)]
pub struct Unrestricted;

impl Guard for Unrestricted {}
