use anyhow::{anyhow, Result};
use log::info;
use serde_json::json;
use std::sync::Arc;

use crate::codec::JsonDecoder;
use crate::logic::{CatchallTarget, CatchallTargets, IdentityMap, ReconcileOptions, Reconciler};
use crate::model::{
    DecodedValue, Entity, EntityTypeBuilder, EntityTypeRegistry, EnumDef, FieldDescriptor,
    RelationDescriptor, ScalarType, Value,
};
use crate::store::{EntityStore, Filter, UnitOfWork};

fn vehicle_label(vehicle: &Entity) -> serde_json::Value {
    let kind = vehicle.scalar("kind").cloned().unwrap_or(Value::Null);
    let id = vehicle.scalar("id").cloned().unwrap_or(Value::Null);
    json!(format!("{} #{}", kind, id))
}

/// Entity types of the demo server: parents owning ordered children, vehicles
/// (cars and trucks) and shared tags
pub fn demo_registry() -> Result<Arc<EntityTypeRegistry>> {
    let status = Arc::new(EnumDef::new(
        "Status",
        &[("active", "A"), ("archived", "R")],
    ));

    let registry = EntityTypeRegistry::builder()
        .entity(
            EntityTypeBuilder::new("Parent")
                .json_name("parent")
                .primary_key(&["id"])
                .autoincrement()
                .version("version")
                .field(FieldDescriptor::scalar("id", ScalarType::Integer))
                .field(FieldDescriptor::scalar("version", ScalarType::Integer))
                .field(FieldDescriptor::text("data", Some(200)))
                .field(FieldDescriptor::synonym("title", "data"))
                .field(FieldDescriptor::scalar(
                    "when",
                    ScalarType::DateTime { timezone: true },
                ))
                .field(FieldDescriptor::scalar("interval", ScalarType::Duration))
                .field(FieldDescriptor::scalar("blob", ScalarType::Bytes).deferred())
                .field(FieldDescriptor::scalar("kind", ScalarType::Enum(status)))
                .field(FieldDescriptor::text("secret", Some(64)).deferred())
                .field(FieldDescriptor::relation(
                    "children",
                    RelationDescriptor::many("Child")
                        .back_populates("parent")
                        .foreign_key("id", "parent_id")
                        .ordered_by("position")
                        .delete_orphan(),
                ))
                .field(FieldDescriptor::relation(
                    "vehicles",
                    RelationDescriptor::many("Vehicle")
                        .back_populates("owner")
                        .foreign_key("id", "owner_id"),
                ))
                .field(FieldDescriptor::relation("tags", RelationDescriptor::many("Tag"))),
        )
        .entity(
            EntityTypeBuilder::new("Child")
                .primary_key(&["id"])
                .autoincrement()
                .field(FieldDescriptor::scalar("id", ScalarType::Integer))
                .field(FieldDescriptor::scalar("parent_id", ScalarType::Integer).internal())
                .field(FieldDescriptor::scalar("position", ScalarType::Integer))
                .field(FieldDescriptor::text("data", Some(200)))
                .field(FieldDescriptor::relation(
                    "parent",
                    RelationDescriptor::one("Parent")
                        .back_populates("children")
                        .foreign_key("parent_id", "id"),
                )),
        )
        .entity(
            EntityTypeBuilder::new("Vehicle")
                .primary_key(&["id"])
                .autoincrement()
                .field(FieldDescriptor::scalar("id", ScalarType::Integer))
                .field(FieldDescriptor::text("kind", Some(16)).not_null())
                .field(FieldDescriptor::scalar("owner_id", ScalarType::Integer).internal())
                .field(FieldDescriptor::scalar("length", ScalarType::Float))
                .field(FieldDescriptor::scalar("width", ScalarType::Float))
                .field(FieldDescriptor::composite("dimensions", &["length", "width"]))
                .field(FieldDescriptor::computed("label", Some(Arc::new(vehicle_label)), None))
                .field(FieldDescriptor::relation(
                    "owner",
                    RelationDescriptor::one("Parent")
                        .back_populates("vehicles")
                        .foreign_key("owner_id", "id"),
                ))
                .polymorphic_on("kind")
                .subtype("car", "Car")
                .subtype("truck", "Truck"),
        )
        .entity(
            EntityTypeBuilder::new("Car")
                .extends("Vehicle")
                .field(FieldDescriptor::scalar("seats", ScalarType::Integer)),
        )
        .entity(
            EntityTypeBuilder::new("Truck")
                .extends("Vehicle")
                .field(FieldDescriptor::scalar("payload", ScalarType::Decimal)),
        )
        .entity(
            EntityTypeBuilder::new("Tag")
                .primary_key(&["code"])
                .field(FieldDescriptor::text("code", Some(32)))
                .field(FieldDescriptor::text("label", Some(100))),
        )
        .build()?;

    Ok(registry)
}

/// Route verbs served by the demo server
pub fn demo_targets() -> CatchallTargets {
    let mut targets = CatchallTargets::new();
    targets.insert("parent".to_string(), CatchallTarget::new("Parent"));
    targets.insert("child".to_string(), CatchallTarget::new("Child"));
    targets.insert("vehicle".to_string(), CatchallTarget::new("Vehicle"));
    targets.insert("tag".to_string(), CatchallTarget::new("Tag"));
    targets.insert(
        "active".to_string(),
        CatchallTarget::new("Parent").filter(Filter::eq(
            "kind",
            Value::Enum(crate::model::EnumMember {
                name: "active".to_string(),
                value: "A".to_string(),
            }),
        )),
    );
    targets
}

const SEED_DATA: &str = r#"{
    "parents": [
        {
            "data": "first parent",
            "when": "2024-03-01T10:30:00+02:00",
            "interval": "PT1H30M",
            "blob": "aGVsbG8=",
            "kind": "active",
            "secret": "s3cret",
            "children": [{"data": "first child"}, {"data": "second child"}],
            "vehicles": [
                {"kind": "car", "seats": 5, "dimensions": {"length": 4.2, "width": 1.8}},
                {"kind": "truck", "payload": "3500.50", "dimensions": [7.5, 2.5]}
            ],
            "tags": [
                {"_id": 1, "code": "red", "label": "Red"},
                {"_id": 2, "code": "blue", "label": "Blue"}
            ]
        },
        {
            "data": "second parent",
            "kind": "archived",
            "children": [{"data": "only child"}],
            "tags": [{"_ref": 2}]
        }
    ]
}"#;

/// Insert the demo graph in one unit of work
pub fn load_seed_data(
    registry: Arc<EntityTypeRegistry>,
    store: Arc<dyn EntityStore>,
) -> Result<()> {
    let doc = JsonDecoder::new().decode(SEED_DATA)?;
    let parents = match doc.root_node().and_then(|root| doc.get(root, "parents")) {
        Some(DecodedValue::List(items)) => items.clone(),
        _ => return Err(anyhow!("seed data has no parents list")),
    };

    let mut uow = UnitOfWork::begin(registry, store);
    let reconciler = Reconciler::new(&doc, None, ReconcileOptions::default());
    let mut identity_map = IdentityMap::default();

    for item in &parents {
        let node = item
            .as_node()
            .ok_or_else(|| anyhow!("seed parent is not an object"))?;
        let parent = reconciler.construct(&mut uow, "Parent", Some(node))?;
        reconciler.apply(&mut uow, parent, node, &mut identity_map, false)?;
    }
    uow.commit()?;

    info!("Loaded {} seed parents", parents.len());
    Ok(())
}
