//! Shared fixtures: real nodes on loopback listeners over a temp SQLite file
#![allow(dead_code)]

use apihub_core::application::archive::{write_sources, SourceFile};
use apihub_daemon::{AppConfig, Node};
use reqwest::multipart::{Form, Part};
use reqwest::{redirect, Client, Response, StatusCode};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const USER: &str = "alice";
pub const USER_HEADER: &str = "x-authenticated-user";

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One database and artifact root shared by every node started from it
pub struct Hub {
    dir: TempDir,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}", self.dir.path().join("hub.db").display())
    }

    pub fn config(&self, workers: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.database.url = self.db_url();
        config.artifacts.root = self.dir.path().join("artifacts").display().to_string();
        config.builds.workers = workers;
        config
    }

    pub async fn start(&self, config: &AppConfig) -> TestNode {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let node = Node::start(config, listener, None).await.unwrap();
        TestNode::new(node)
    }

    pub async fn start_node(&self, workers: usize) -> TestNode {
        self.start(&self.config(workers)).await
    }
}

pub struct TestNode {
    pub node: Node,
    pub client: Client,
}

impl TestNode {
    fn new(node: Node) -> Self {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .unwrap();
        Self { node, client }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.node.local_addr(), path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.node.local_addr(), path)
    }

    pub async fn get(&self, path: &str) -> Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    pub async fn get_json(&self, path: &str) -> Value {
        let response = self.get(path).await;
        assert_eq!(response.status(), StatusCode::OK, "GET {}", path);
        response.json().await.unwrap()
    }

    pub async fn post_json(&self, path: &str, body: Value) -> Response {
        self.client
            .post(self.url(path))
            .header(USER_HEADER, USER)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn post_form(&self, path: &str, form: Form) -> Response {
        self.client
            .post(self.url(path))
            .header(USER_HEADER, USER)
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    /// Publish `sources` as `package_id`/`version`
    pub async fn publish(&self, package_id: &str, version: &str, sources: Vec<u8>) -> Response {
        self.post_form(
            &format!("/api/v2/packages/{}/publish", package_id),
            publish_form(package_id, version, sources),
        )
        .await
    }

    pub async fn build_status(&self, build_id: &str) -> Value {
        self.get_json(&format!("/api/v2/publish/{}/status", build_id))
            .await
    }

    /// Poll until the build is terminal; panics unless it completed
    pub async fn wait_complete(&self, build_id: &str) {
        let status = eventually(|| async move {
            let status = self.build_status(build_id).await;
            match status["status"].as_str() {
                Some("complete") | Some("error") => Some(status),
                _ => None,
            }
        })
        .await;
        assert_eq!(status["status"], "complete", "build {}: {}", build_id, status);
    }

    /// Publish through the internal executor and wait for the revision
    pub async fn publish_and_wait(&self, package_id: &str, version: &str, sources: Vec<u8>) -> String {
        let response = self.publish(package_id, version, sources).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body: Value = response.json().await.unwrap();
        let build_id = body["buildId"].as_str().unwrap().to_string();
        self.wait_complete(&build_id).await;
        build_id
    }

    pub async fn stop(self) {
        self.node.stop().await;
    }
}

pub fn publish_form(package_id: &str, version: &str, sources: Vec<u8>) -> Form {
    let config = json!({ "packageId": package_id, "version": version });
    Form::new()
        .text("config", config.to_string())
        .part(
            "sources",
            Part::bytes(sources).file_name("sources.zip"),
        )
}

/// Sources ZIP holding one OpenAPI document with the given `(method, path, operationId)` triples
pub fn openapi_sources(operations: &[(&str, &str, &str)]) -> Vec<u8> {
    let mut paths = serde_json::Map::new();
    for (method, path, operation_id) in operations {
        let item = paths
            .entry(path.to_string())
            .or_insert_with(|| json!({}));
        item[*method] = json!({ "operationId": operation_id, "responses": {} });
    }
    let doc = json!({
        "openapi": "3.0.0",
        "info": { "title": "Users", "version": "1" },
        "paths": paths,
    });
    write_sources(&[SourceFile {
        path: "openapi.json".to_string(),
        content: serde_json::to_vec(&doc).unwrap(),
    }])
    .unwrap()
}

/// Retry `check` until it yields a value or the wait times out
pub async fn eventually<T, F, Fut>(mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let wait = async {
        loop {
            if let Some(value) = check().await {
                return value;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    tokio::time::timeout(WAIT_TIMEOUT, wait)
        .await
        .expect("condition not reached in time")
}
