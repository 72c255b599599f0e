//! Renamed packages redirect to their new id

mod common;

use common::{openapi_sources, Hub};
use reqwest::header::LOCATION;
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn test_renamed_package_redirects() {
    let hub = Hub::new();
    let node = hub.start_node(1).await;
    node.publish_and_wait(
        "new-pkg",
        "v1",
        openapi_sources(&[("get", "/users", "listUsers")]),
    )
    .await;

    let response = node
        .post_json(
            "/api/internal/package-transitions",
            json!({ "oldPackageId": "old-pkg", "newPackageId": "new-pkg" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = node.get("/api/v2/packages/old-pkg/versions/v1").await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    let location = response.headers()[LOCATION].to_str().unwrap().to_string();
    assert_eq!(location, "/api/v2/packages/new-pkg/versions/v1");

    let version = node.get_json(&location).await;
    assert_eq!(version["packageId"], "new-pkg");
    assert_eq!(version["revision"], 1);

    // Query strings survive the rewrite
    let response = node
        .get("/api/v2/packages/old-pkg/versions/v1/operations?apiType=rest")
        .await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    let location = response.headers()[LOCATION].to_str().unwrap().to_string();
    assert_eq!(
        location,
        "/api/v2/packages/new-pkg/versions/v1/operations?apiType=rest"
    );
    let operations = node.get_json(&location).await;
    assert_eq!(operations[0]["operationId"], "listUsers");

    node.stop().await;
}

#[tokio::test]
async fn test_unknown_package_without_transition() {
    let hub = Hub::new();
    let node = hub.start_node(1).await;

    let response = node.get("/api/v2/packages/ghost/versions/v1").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "packageNotFound");

    node.stop().await;
}
