//! Shared test helpers for the remote integration tests
//!
//! Each helper starts a mock server and returns a client pointing at it.

use serde_json::Value;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tokosync_remote::{TableStoreClient, TreeStoreClient};

pub const AUTH_TOKEN: &str = "tree-token";
pub const API_KEY: &str = "table-key";

/// Starts a tree store mock and a client with an auth token
pub async fn setup_tree_mock() -> (MockServer, TreeStoreClient) {
    let server = MockServer::start().await;
    let client = TreeStoreClient::new(server.uri(), Some(AUTH_TOKEN.to_string()));
    (server, client)
}

/// Starts a table store mock and a client with an API key
pub async fn setup_table_mock() -> (MockServer, TableStoreClient) {
    let server = MockServer::start().await;
    let client = TableStoreClient::new(server.uri(), Some(API_KEY.to_string()));
    (server, client)
}

/// Formats one server-sent event
pub fn sse_event(name: &str, data: &Value) -> String {
    format!("event: {name}\ndata: {data}\n\n")
}

/// Mounts an event stream on `node` that replies with `body` and closes
pub async fn mount_stream(server: &MockServer, node: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(format!("/{node}.json")))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .with_priority(1)
        .mount(server)
        .await;
}

/// Mounts a plain read of `node`
pub async fn mount_node(server: &MockServer, node: &str, value: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/{node}.json")))
        .respond_with(ResponseTemplate::new(200).set_body_json(value))
        .mount(server)
        .await;
}
