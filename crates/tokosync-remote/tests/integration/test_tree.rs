//! Integration tests for the tree store client

use std::time::Duration;

use serde_json::json;
use tokosync_core::ports::IPushRemote;
use tokosync_remote::RemoteError;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{self, AUTH_TOKEN};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_subscribe_delivers_root_put_as_snapshot() {
    let (server, client) = common::setup_tree_mock().await;
    let products = json!({ "p1": { "id": "p1", "name": "Kopi" } });
    common::mount_stream(
        &server,
        "products",
        common::sse_event("put", &json!({ "path": "/", "data": products })),
    )
    .await;

    let mut sub = client.subscribe("products").await.expect("subscribe failed");
    assert_eq!(sub.path, "products");

    let first = tokio::time::timeout(WAIT, sub.snapshots.recv())
        .await
        .expect("no snapshot in time")
        .expect("channel closed");
    assert_eq!(first, Some(products));

    sub.handle.release();
}

#[tokio::test]
async fn test_subscribe_null_root_is_empty_snapshot() {
    let (server, client) = common::setup_tree_mock().await;
    common::mount_stream(
        &server,
        "customers",
        common::sse_event("put", &json!({ "path": "/", "data": null })),
    )
    .await;

    let mut sub = client.subscribe("customers").await.expect("subscribe failed");
    let first = tokio::time::timeout(WAIT, sub.snapshots.recv())
        .await
        .expect("no snapshot in time")
        .expect("channel closed");
    assert_eq!(first, None);
}

#[tokio::test]
async fn test_nested_change_rereads_whole_node() {
    let (server, client) = common::setup_tree_mock().await;
    let full = json!({
        "p1": { "id": "p1", "stock": 3 },
        "p2": { "id": "p2", "stock": 9 }
    });
    common::mount_stream(
        &server,
        "products",
        common::sse_event("patch", &json!({ "path": "/p1", "data": { "stock": 3 } })),
    )
    .await;
    common::mount_node(&server, "products", full.clone()).await;

    let mut sub = client.subscribe("products").await.expect("subscribe failed");
    let snapshot = tokio::time::timeout(WAIT, sub.snapshots.recv())
        .await
        .expect("no snapshot in time")
        .expect("channel closed");
    assert_eq!(snapshot, Some(full));
}

#[tokio::test]
async fn test_keep_alive_is_not_a_snapshot() {
    let (server, client) = common::setup_tree_mock().await;
    let body = format!(
        "{}{}",
        common::sse_event("keep-alive", &json!(null)),
        common::sse_event("put", &json!({ "path": "/", "data": { "a": { "id": "a" } } }))
    );
    common::mount_stream(&server, "users", body).await;

    let mut sub = client.subscribe("users").await.expect("subscribe failed");
    let first = tokio::time::timeout(WAIT, sub.snapshots.recv())
        .await
        .expect("no snapshot in time")
        .expect("channel closed");
    assert_eq!(first, Some(json!({ "a": { "id": "a" } })));
}

#[tokio::test]
async fn test_released_subscription_closes_channel() {
    let (server, client) = common::setup_tree_mock().await;
    common::mount_stream(
        &server,
        "expenses",
        common::sse_event("put", &json!({ "path": "/", "data": null })),
    )
    .await;

    let mut sub = client.subscribe("expenses").await.expect("subscribe failed");
    let first = tokio::time::timeout(WAIT, sub.snapshots.recv())
        .await
        .expect("no snapshot in time");
    assert_eq!(first, Some(None));

    sub.handle.release();

    // The listener stops and drops its sender
    let closed = tokio::time::timeout(WAIT, async {
        while sub.snapshots.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "channel stayed open after release");
}

#[tokio::test]
async fn test_subscribe_fails_when_unauthorized() {
    let (server, client) = common::setup_tree_mock().await;
    Mock::given(method("GET"))
        .and(path("/products.json"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Permission denied"))
        .mount(&server)
        .await;

    let err = client.subscribe("products").await.expect_err("should fail");
    assert!(matches!(
        err.downcast_ref::<RemoteError>(),
        Some(RemoteError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_read_once_returns_none_for_null() {
    let (server, client) = common::setup_tree_mock().await;
    common::mount_node(&server, "settings", json!(null)).await;

    let value = client.read_once("settings").await.expect("read failed");
    assert_eq!(value, None);
}

#[tokio::test]
async fn test_write_full_puts_record_with_auth() {
    let (server, client) = common::setup_tree_mock().await;
    let record = json!({ "id": "p1", "name": "Kopi", "price": 5000 });
    Mock::given(method("PUT"))
        .and(path("/products/p1.json"))
        .and(query_param("auth", AUTH_TOKEN))
        .and(body_json(record.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(record.clone()))
        .expect(1)
        .mount(&server)
        .await;

    client
        .write_full("products/p1", &record)
        .await
        .expect("write failed");
}

#[tokio::test]
async fn test_write_patch_and_delete() {
    let (server, client) = common::setup_tree_mock().await;
    let patch = json!({ "stock": 4 });
    Mock::given(method("PATCH"))
        .and(path("/products/p1.json"))
        .and(body_json(patch.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(patch.clone()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/products/p2.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(null)))
        .expect(1)
        .mount(&server)
        .await;

    client
        .write_patch("products/p1", &patch)
        .await
        .expect("patch failed");
    client.delete("products/p2").await.expect("delete failed");
}

#[tokio::test]
async fn test_throttled_write_is_retried() {
    let (server, client) = common::setup_tree_mock().await;
    let record = json!({ "id": "c1" });
    Mock::given(method("PUT"))
        .and(path("/customers/c1.json"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/customers/c1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(record.clone()))
        .expect(1)
        .mount(&server)
        .await;

    client
        .write_full("customers/c1", &record)
        .await
        .expect("write should succeed after retry");
}

#[tokio::test]
async fn test_server_error_is_reported() {
    let (server, client) = common::setup_tree_mock().await;
    Mock::given(method("DELETE"))
        .and(path("/debts/d1.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client.delete("debts/d1").await.expect_err("should fail");
    assert!(matches!(
        err.downcast_ref::<RemoteError>(),
        Some(RemoteError::ServerError(_))
    ));
}
