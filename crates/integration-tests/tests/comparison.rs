//! Changelog builds: concurrent ensure requests share one build

mod common;

use common::{eventually, openapi_sources, Hub};
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn test_concurrent_compare_shares_build() {
    let hub = Hub::new();

    let worker = hub.start_node(1).await;
    worker
        .publish_and_wait("pkg", "v1", openapi_sources(&[("get", "/users", "listUsers")]))
        .await;
    worker
        .publish_and_wait(
            "pkg",
            "v2",
            openapi_sources(&[
                ("get", "/users", "listUsers"),
                ("post", "/users", "createUser"),
            ]),
        )
        .await;
    worker.stop().await;

    // No internal workers here, so the changelog build stays queued
    let node = hub.start_node(0).await;
    let body = json!({ "packageId": "pkg", "version": "v2", "previousVersion": "v1" });
    let (first, second) = tokio::join!(
        node.post_json("/api/v2/compare", body.clone()),
        node.post_json("/api/v2/compare", body.clone()),
    );
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    let first: Value = first.json().await.unwrap();
    let second: Value = second.json().await.unwrap();
    assert_eq!(first["status"], "running");
    assert_eq!(second["status"], "running");
    assert_eq!(first["buildId"], second["buildId"]);

    let response = node
        .get("/api/v2/packages/pkg/versions/v2/comparison-summary?previousVersion=v1")
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "comparisonNotFound");

    // A peer with workers picks the queued build up from the shared database
    let peer = hub.start_node(1).await;
    let build_id = first["buildId"].as_str().unwrap().to_string();
    peer.wait_complete(&build_id).await;

    let (node_ref, body_ref) = (&node, &body);
    let result: Value = eventually(|| async move {
        let response = node_ref.post_json("/api/v2/compare", body_ref.clone()).await;
        match response.status() {
            StatusCode::OK => Some(response.json().await.unwrap()),
            _ => None,
        }
    })
    .await;
    assert_eq!(result["valid"], true);
    assert_eq!(result["buildId"], build_id.as_str());
    assert_eq!(result["summary"], json!({ "added": 1, "removed": 0, "changed": 0 }));

    let changes = node
        .get_json("/api/v2/packages/pkg/versions/v2/changes?previousVersion=v1")
        .await;
    assert_eq!(changes.as_array().unwrap().len(), 1);
    assert_eq!(changes[0]["operationId"], "createUser");
    assert_eq!(changes[0]["action"], "added");

    peer.stop().await;
    node.stop().await;
}

#[tokio::test]
async fn test_compare_unknown_version() {
    let hub = Hub::new();
    let node = hub.start_node(1).await;
    node.publish_and_wait("pkg", "v1", openapi_sources(&[("get", "/a", "a")]))
        .await;

    let response = node
        .post_json(
            "/api/v2/compare",
            json!({ "packageId": "pkg", "version": "v9", "previousVersion": "v1" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "publishedVersionNotFound");

    node.stop().await;
}
