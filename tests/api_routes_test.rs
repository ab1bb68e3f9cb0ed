/// Operational HTTP surface tests
/// Runs the router on an ephemeral port over the in-memory store.
use ldap_directory_rs::api::{self, ApiState};
use ldap_directory_rs::auth::BearerToken;
use ldap_directory_rs::memory_db::MemoryDirectoryStore;
use ldap_directory_rs::metrics;
use ldap_directory_rs::schema::{SchemaCatalog, SchemaHandle};
use reqwest::Client;
use std::sync::Arc;

const TEST_BEARER_TOKEN: &str = "test-bearer-token-routes";

async fn start_server(schema: SchemaHandle, token: Option<&str>) -> String {
    let store = Arc::new(MemoryDirectoryStore::seeded("admin").await.unwrap());
    let app = api::create_router(
        ApiState { store, schema },
        BearerToken::new(token.map(str::to_string)),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    base_url
}

#[tokio::test]
async fn test_health_route() {
    let base_url = start_server(SchemaHandle::new(SchemaCatalog::standard()), None).await;

    let response = Client::new()
        .get(format!("{}/health", base_url))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["storage"], true);
}

#[tokio::test]
async fn test_metrics_route() {
    metrics::record_ldap_bind("success");
    let base_url = start_server(SchemaHandle::new(SchemaCatalog::standard()), None).await;

    let response = Client::new()
        .get(format!("{}/metrics", base_url))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("ldap_bind_operations_total"));
}

#[tokio::test]
async fn test_schema_reload_requires_token() {
    let base_url = start_server(
        SchemaHandle::new(SchemaCatalog::standard()),
        Some(TEST_BEARER_TOKEN),
    )
    .await;
    let client = Client::new();
    let url = format!("{}/admin/schema/reload", base_url);

    let missing = client.post(&url).send().await.unwrap();
    assert_eq!(missing.status(), 401);

    let wrong = client
        .post(&url)
        .bearer_auth("not-the-token")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let malformed = client
        .post(&url)
        .header("Authorization", TEST_BEARER_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), 401);
}

#[tokio::test]
async fn test_schema_reload_unconfigured_token() {
    let base_url = start_server(SchemaHandle::new(SchemaCatalog::standard()), None).await;

    let response = Client::new()
        .post(format!("{}/admin/schema/reload", base_url))
        .bearer_auth("anything")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn test_schema_reload_swaps_catalog() {
    // The handle starts empty; the store holds the standard schema.
    let schema = SchemaHandle::new(SchemaCatalog::default());
    let base_url = start_server(schema.clone(), Some(TEST_BEARER_TOKEN)).await;
    assert!(schema.current().object_classes().is_empty());

    let response = Client::new()
        .post(format!("{}/admin/schema/reload", base_url))
        .bearer_auth(TEST_BEARER_TOKEN)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let standard = SchemaCatalog::standard();
    assert_eq!(body["success"], true);
    assert_eq!(
        body["data"]["object_classes"],
        standard.object_classes().len()
    );
    assert_eq!(
        schema.current().attribute_types().len(),
        standard.attribute_types().len()
    );
}
