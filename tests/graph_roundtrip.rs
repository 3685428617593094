use liant::codec::{EncoderOptions, JsonDecoder, JsonEncoder, Output};
use liant::logic::{apply_changes, parse_hints, parse_route, HintCompiler, ReconcileOptions, Unrestricted};
use liant::model::{
    DecodedDocument, DecodedValue, EntityId, EntityTypeBuilder, EntityTypeRegistry,
    FieldDescriptor, HintNode, LoadDirective, NodeId, PrimaryKey, RelationDescriptor, RouteSlice,
    ScalarType, Value,
};
use liant::store::{MemoryStore, UnitOfWork};
use liant::LiantError;
use std::sync::Arc;

fn registry() -> Arc<EntityTypeRegistry> {
    EntityTypeRegistry::builder()
        .entity(
            EntityTypeBuilder::new("Parent")
                .primary_key(&["id"])
                .autoincrement()
                .field(FieldDescriptor::scalar("id", ScalarType::Integer))
                .field(FieldDescriptor::text("data", Some(100)))
                .field(FieldDescriptor::relation(
                    "children",
                    RelationDescriptor::many("Child")
                        .back_populates("parent")
                        .foreign_key("id", "parent_id")
                        .ordered_by("position")
                        .delete_orphan(),
                ))
                .field(FieldDescriptor::relation("tags", RelationDescriptor::many("Tag")))
                .field(FieldDescriptor::relation("favorite", RelationDescriptor::one("Tag"))),
        )
        .entity(
            EntityTypeBuilder::new("Child")
                .primary_key(&["id"])
                .autoincrement()
                .field(FieldDescriptor::scalar("id", ScalarType::Integer))
                .field(FieldDescriptor::scalar("parent_id", ScalarType::Integer).internal())
                .field(FieldDescriptor::scalar("position", ScalarType::Integer))
                .field(FieldDescriptor::text("data", Some(100)))
                .field(FieldDescriptor::text("secret", None).deferred())
                .field(FieldDescriptor::relation(
                    "parent",
                    RelationDescriptor::one("Parent")
                        .back_populates("children")
                        .foreign_key("parent_id", "id"),
                )),
        )
        .entity(
            EntityTypeBuilder::new("Tag")
                .primary_key(&["code"])
                .field(FieldDescriptor::text("code", Some(16))),
        )
        .entity(
            EntityTypeBuilder::new("Person")
                .primary_key(&["id"])
                .autoincrement()
                .field(FieldDescriptor::scalar("id", ScalarType::Integer))
                .field(FieldDescriptor::text("name", None))
                .field(FieldDescriptor::relation("friend", RelationDescriptor::one("Person"))),
        )
        .build()
        .unwrap()
}

fn node_of(value: Option<&DecodedValue>) -> NodeId {
    value.and_then(|value| value.as_node()).unwrap()
}

fn list_of(doc: &DecodedDocument, node: NodeId, field: &str) -> Vec<NodeId> {
    match doc.get(node, field) {
        Some(DecodedValue::List(items)) => items.iter().map(|item| item.as_node().unwrap()).collect(),
        other => panic!("{} is not a list: {:?}", field, other),
    }
}

/// Insert `payload` as a new entity of `entity_type` and commit
fn insert(store: &Arc<MemoryStore>, entity_type: &str, payload: &str) -> EntityId {
    let mut uow = UnitOfWork::begin(registry(), store.clone());
    let doc = JsonDecoder::new().decode(payload).unwrap();
    let id = uow.create(entity_type).unwrap();
    apply_changes(
        &mut uow,
        id,
        &doc,
        doc.root_node().unwrap(),
        None,
        ReconcileOptions::default(),
        false,
    )
    .unwrap();
    uow.commit().unwrap();
    id
}

#[test]
fn test_decode_resolves_back_reference_to_root() {
    let doc = JsonDecoder::new()
        .decode(r#"{"_id": 1, "data": "parent value", "children": [{"_id": 2, "data": "child value", "parent": {"_ref": 1}}]}"#)
        .unwrap();

    let root = doc.root_node().unwrap();
    let children = list_of(&doc, root, "children");
    assert_eq!(children.len(), 1);
    assert_eq!(node_of(doc.get(children[0], "parent")), root);
    assert!(!doc.node(root).contains("_id"));
}

#[test]
fn test_decode_reference_failures() {
    let decoder = JsonDecoder::new();

    let err = decoder
        .decode(r#"{"a": {"_ref": 1}, "b": {"_id": 2}}"#)
        .unwrap_err();
    assert!(matches!(err, LiantError::DanglingReference(ids) if ids == vec!["1".to_string()]));

    let err = decoder
        .decode(r#"[{"_id": 1}, {"_id": 1}]"#)
        .unwrap_err();
    assert!(matches!(err, LiantError::DuplicateIdentity(_)));

    // The same decoder keeps working after a failure
    let doc = decoder.decode(r#"[{"_ref": 7}, {"_id": 7, "x": 1}]"#).unwrap();
    match &doc.root {
        DecodedValue::List(items) => assert_eq!(items[0], items[1]),
        other => panic!("unexpected root {:?}", other),
    }
}

#[test]
fn test_hints_compile_into_nested_plan() {
    let registry = registry();
    let hints = parse_hints("*children(+data,-secret)").unwrap();
    let plan = HintCompiler::new(&registry, &Unrestricted)
        .compile(&hints, "Parent")
        .unwrap();

    let Some(LoadDirective::Eager(Some(children))) = plan.directives.get("children") else {
        panic!("children not eager: {:?}", plan);
    };
    assert_eq!(children.entity_type, "Child");
    assert_eq!(children.directives.get("data"), Some(&LoadDirective::Undefer));
    assert_eq!(children.directives.get("secret"), Some(&LoadDirective::Defer));
}

#[test]
fn test_route_parses_every_clause() {
    let route = parse_route("update@5/children[0:2]:+name").unwrap();
    assert_eq!(route.verb, "update");
    assert_eq!(route.pkey, Some(vec!["5".to_string()]));
    assert_eq!(route.drilldown.as_deref(), Some("children"));
    assert_eq!(route.slice, Some(RouteSlice::Range(0, 2)));
    assert_eq!(
        route.hints,
        vec![HintNode::Field {
            name: "name".to_string(),
            include: true
        }]
    );
}

#[test]
fn test_encode_then_decode_collapses_shared_identity() {
    let store = Arc::new(MemoryStore::new());
    insert(
        &store,
        "Parent",
        r#"{"data": "p", "tags": [{"_id": 1, "code": "red"}, {"code": "blue"}], "favorite": {"_ref": 1}}"#,
    );
    assert_eq!(store.len("Tag"), 2);

    let mut uow = UnitOfWork::begin(registry(), store.clone());
    let parent = uow
        .get("Parent", &PrimaryKey::single(Value::Int(1)))
        .unwrap()
        .unwrap();
    uow.many(parent, "tags").unwrap();
    uow.one(parent, "favorite").unwrap();

    let text = JsonEncoder::new(&uow, &Unrestricted, EncoderOptions::default())
        .encode(&Output::Entity(parent))
        .unwrap();
    assert_eq!(text.matches("\"red\"").count(), 1);

    let doc = JsonDecoder::new().decode(&text).unwrap();
    let root = doc.root_node().unwrap();
    let tags = list_of(&doc, root, "tags");
    assert_eq!(tags.len(), 2);
    assert_eq!(node_of(doc.get(root, "favorite")), tags[0]);
    assert_eq!(doc.node(root).identity.as_deref(), Some("1"));
}

#[test]
fn test_noop_payload_leaves_entity_clean() {
    let store = Arc::new(MemoryStore::new());
    insert(&store, "Parent", r#"{"data": "p", "children": [{"data": "a"}]}"#);

    for payload in ["{}", r#"{"id": 1}"#] {
        let mut uow = UnitOfWork::begin(registry(), store.clone());
        let parent = uow
            .get("Parent", &PrimaryKey::single(Value::Int(1)))
            .unwrap()
            .unwrap();
        let doc = JsonDecoder::new().decode(payload).unwrap();
        apply_changes(
            &mut uow,
            parent,
            &doc,
            doc.root_node().unwrap(),
            None,
            ReconcileOptions::default(),
            true,
        )
        .unwrap();
        assert!(uow.entity(parent).dirty.is_empty(), "{} mutated", payload);
    }
}

#[test]
fn test_collection_matches_members_by_key() {
    let store = Arc::new(MemoryStore::new());
    insert(
        &store,
        "Parent",
        r#"{"data": "p", "children": [{"data": "a"}, {"data": "b"}, {"data": "c"}]}"#,
    );

    let mut uow = UnitOfWork::begin(registry(), store.clone());
    let parent = uow
        .get("Parent", &PrimaryKey::single(Value::Int(1)))
        .unwrap()
        .unwrap();
    let before = uow.many(parent, "children").unwrap();

    let doc = JsonDecoder::new()
        .decode(r#"{"children": [{"id": 3}, {"id": 1, "data": "a2"}]}"#)
        .unwrap();
    apply_changes(
        &mut uow,
        parent,
        &doc,
        doc.root_node().unwrap(),
        None,
        ReconcileOptions::default(),
        true,
    )
    .unwrap();

    let after = uow.many(parent, "children").unwrap();
    assert_eq!(after, vec![before[2], before[0]]);
    assert_eq!(
        uow.entity(before[0]).scalar("data"),
        Some(&Value::Text("a2".into()))
    );
    uow.commit().unwrap();
    assert_eq!(store.len("Child"), 2);
}

#[test]
fn test_empty_list_clears_collection() {
    let store = Arc::new(MemoryStore::new());
    insert(&store, "Parent", r#"{"data": "p", "children": [{"data": "a"}, {"data": "b"}]}"#);
    assert_eq!(store.len("Child"), 2);

    let mut uow = UnitOfWork::begin(registry(), store.clone());
    let parent = uow
        .get("Parent", &PrimaryKey::single(Value::Int(1)))
        .unwrap()
        .unwrap();
    let doc = JsonDecoder::new().decode(r#"{"children": []}"#).unwrap();
    apply_changes(
        &mut uow,
        parent,
        &doc,
        doc.root_node().unwrap(),
        None,
        ReconcileOptions::default(),
        true,
    )
    .unwrap();
    assert!(uow.many(parent, "children").unwrap().is_empty());
    uow.commit().unwrap();

    assert_eq!(store.len("Child"), 0);
    let mut uow = UnitOfWork::begin(registry(), store.clone());
    let parent = uow
        .get("Parent", &PrimaryKey::single(Value::Int(1)))
        .unwrap()
        .unwrap();
    assert!(uow.many(parent, "children").unwrap().is_empty());
}

#[test]
fn test_mutual_references_link_both_ends() {
    let store = Arc::new(MemoryStore::new());
    insert(
        &store,
        "Person",
        r#"{"_id": "a", "name": "Ann", "friend": {"name": "Bob", "friend": {"_ref": "a"}}}"#,
    );
    assert_eq!(store.len("Person"), 2);

    let mut uow = UnitOfWork::begin(registry(), store.clone());
    let ann = uow
        .get("Person", &PrimaryKey::single(Value::Int(1)))
        .unwrap()
        .unwrap();
    let bob = uow.one(ann, "friend").unwrap().unwrap();
    assert_eq!(uow.entity(bob).scalar("name"), Some(&Value::Text("Bob".into())));
    assert_eq!(uow.one(bob, "friend").unwrap(), Some(ann));
}
