use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use liant::api::routes::create_router;
use liant::config::AppConfig;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

// Test client wrapper driving the router in-process
struct TestClient {
    app: Router,
}

impl TestClient {
    fn new(seeded: bool) -> Self {
        let mut config = AppConfig::default();
        config.seed.load_seed_data = seeded;
        let view = liant::build_view(&config).unwrap();
        Self {
            app: create_router().with_state(Arc::new(view)),
        }
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.send(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, json: Value) -> (StatusCode, Value) {
        self.send(Method::POST, path, Some(json)).await
    }

    async fn delete(&self, path: &str) -> (StatusCode, Value) {
        self.send(Method::DELETE, path, None).await
    }
}

#[tokio::test]
async fn test_health() {
    let client = TestClient::new(false);
    let (status, body) = client.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_get_seeded_parent() {
    let client = TestClient::new(true);

    let (status, body) = client.get("/parent@1").await;
    assert_eq!(status, StatusCode::OK);
    let parent = &body["parent"];
    assert_eq!(parent["id"], 1);
    assert_eq!(parent["data"], "first parent");
    assert_eq!(parent["title"], "first parent");
    assert_eq!(parent["kind"], "active");
    assert_eq!(parent["when"], "2024-03-01T10:30:00+02:00");
    assert_eq!(parent["interval"], "PT1H30M");
    assert_eq!(parent["_id"], 1);
    // Deferred columns and unloaded relations stay out
    assert!(parent.get("secret").is_none());
    assert!(parent.get("blob").is_none());
    assert!(parent.get("children").is_none());

    let (status, body) = client.get("/parent@1:+secret,+blob,*children(+data)").await;
    assert_eq!(status, StatusCode::OK);
    let parent = &body["parent"];
    assert_eq!(parent["secret"], "s3cret");
    assert_eq!(parent["blob"], "aGVsbG8=");
    let children = parent["children"].as_array().unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0]["data"], "first child");
    assert_eq!(children[1]["data"], "second child");
}

#[tokio::test]
async fn test_shared_tag_is_encoded_once() {
    let client = TestClient::new(true);

    let (status, body) = client.get("/parent?pageSize=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let (_, body) = client.get("/parent@2:*tags").await;
    let tags = body["parent"]["tags"].as_array().unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0]["code"], "blue");
    assert_eq!(tags[0]["_id"], 2);
}

#[tokio::test]
async fn test_list_filters_and_targets() {
    let client = TestClient::new(true);

    let (status, body) = client.get("/parent?kind=archived").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["data"], "second parent");

    let (_, body) = client.get("/parent?order=data%20desc").await;
    assert_eq!(body["items"][0]["data"], "second parent");
    assert_eq!(body["items"][1]["data"], "first parent");

    let (_, body) = client.get("/parent?data_like=FIRST").await;
    assert_eq!(body["total"], 1);

    let (_, body) = client.get("/active").await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["kind"], "active");

    let (status, body) = client.get("/parent@1/children%5B0:1%5D").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let (status, body) = client.get("/child@3/parent").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["parent"]["data"], "second parent");
}

#[tokio::test]
async fn test_polymorphic_vehicles() {
    let client = TestClient::new(true);

    let (status, body) = client.get("/vehicle").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let (status, body) = client.get("/vehicle!car").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    let car = &body["items"][0];
    assert_eq!(car["kind"], "car");
    assert_eq!(car["seats"], 5);
    assert_eq!(car["label"], "car #1");
    assert_eq!(car["dimensions"], json!({"length": 4.2, "width": 1.8}));
    assert!(car.get("length").is_none());

    let (_, body) = client.get("/vehicle!truck%5B0%5D").await;
    assert_eq!(body["vehicle"]["payload"], "3500.50");

    let (status, _) = client.get("/vehicle!bicycle").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_insert_update_delete() {
    let client = TestClient::new(false);

    let (status, body) = client
        .post(
            "/parent",
            json!({"parent": {"data": "new", "children": [{"data": "a"}, {"data": "b"}]}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let parent = &body["parent"];
    assert_eq!(parent["id"], 1);
    assert_eq!(parent["version"], 1);
    assert_eq!(parent["children"].as_array().unwrap().len(), 2);
    assert_eq!(parent["children"][0]["parent"], json!({"_ref": 1}));

    let (status, body) = client
        .post(
            "/parent@1",
            json!({"parent": {"data": "renamed", "version": 1, "children": [{"id": 2}]}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "renamed");
    assert_eq!(body["version"], 2);
    assert_eq!(body["children"].as_array().unwrap().len(), 1);
    assert_eq!(body["children"][0]["data"], "b");

    // The dropped child was an orphan
    let (_, body) = client.get("/child").await;
    assert_eq!(body["total"], 1);

    let (status, _) = client
        .post("/parent@1", json!({"parent": {"data": "stale", "version": 1}}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = client.delete("/parent@1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (status, body) = client.get("/parent@1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_client_errors() {
    let client = TestClient::new(true);

    let (status, _) = client.get("/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = client.get("/parent@1:+nonexistent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = client.get("/parent@99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = client.get("/parent?order=nonexistent").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("nonexistent"));

    let (status, _) = client.post("/parent", json!({"child": {}})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = client
        .post("/parent", json!({"parent": {"data": "x".repeat(201)}}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = client
        .post("/parent", json!({"parent": {"children": [{"id": 42}]}}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Nothing from the failed requests reached the store
    let (_, body) = client.get("/parent").await;
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn test_run_server_reports_bind_failure() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = AppConfig::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = taken.local_addr().unwrap().port();

    let view = liant::build_view(&config).unwrap();
    assert!(liant::run_server(view, &config).await.is_err());
}
