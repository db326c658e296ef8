//! Integration tests for the table store client

use serde_json::json;
use tokosync_core::domain::RecordId;
use tokosync_core::ports::{IPullRemote, QueryFilter};
use tokosync_remote::RemoteError;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{self, API_KEY};

#[tokio::test]
async fn test_query_sends_order_limit_and_key() {
    let (server, client) = common::setup_table_mock().await;
    let rows = json!([
        { "id": "t2", "transaction_code": "TRX-2" },
        { "id": "t1", "transaction_code": "TRX-1" }
    ]);
    Mock::given(method("GET"))
        .and(path("/rest/v1/transactions"))
        .and(query_param("select", "*"))
        .and(query_param("order", "created_at.desc"))
        .and(query_param("limit", "500"))
        .and(header("apikey", API_KEY))
        .and(header("authorization", format!("Bearer {API_KEY}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let filter = QueryFilter::new().newest_first("created_at").with_limit(Some(500));
    let result = client
        .query("transactions", &filter)
        .await
        .expect("query failed");

    assert_eq!(result.len(), 2);
    assert_eq!(result[0]["id"], "t2");
}

#[tokio::test]
async fn test_query_rejects_non_array_body() {
    let (server, client) = common::setup_table_mock().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/products"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rows": [] })))
        .mount(&server)
        .await;

    let err = client
        .query("products", &QueryFilter::new())
        .await
        .expect_err("should fail");
    assert!(matches!(
        err.downcast_ref::<RemoteError>(),
        Some(RemoteError::InvalidResponse(_))
    ));
}

#[tokio::test]
async fn test_query_missing_table_is_not_found() {
    let (server, client) = common::setup_table_mock().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/customers"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "relation \"customers\" does not exist"
        })))
        .mount(&server)
        .await;

    let err = client
        .query("customers", &QueryFilter::new())
        .await
        .expect_err("should fail");
    assert!(matches!(
        err.downcast_ref::<RemoteError>(),
        Some(RemoteError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_insert_posts_row() {
    let (server, client) = common::setup_table_mock().await;
    let row = json!({ "id": "c1", "name": "Budi", "phone": "0812" });
    Mock::given(method("POST"))
        .and(path("/rest/v1/customers"))
        .and(header("prefer", "return=minimal"))
        .and(body_json(row.clone()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    client.insert("customers", &row).await.expect("insert failed");
}

#[tokio::test]
async fn test_insert_duplicate_is_conflict() {
    let (server, client) = common::setup_table_mock().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/customers"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let err = client
        .insert("customers", &json!({ "id": "c1" }))
        .await
        .expect_err("should fail");
    assert!(matches!(
        err.downcast_ref::<RemoteError>(),
        Some(RemoteError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_update_and_delete_match_by_id() {
    let (server, client) = common::setup_table_mock().await;
    let patch = json!({ "stock": 7 });
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/products"))
        .and(query_param("id", "eq.p1"))
        .and(body_json(patch.clone()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/products"))
        .and(query_param("id", "eq.p2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let p1 = RecordId::new("p1").expect("valid id");
    let p2 = RecordId::new("p2").expect("valid id");
    client
        .update_where("products", &p1, &patch)
        .await
        .expect("update failed");
    client
        .delete_where("products", &p2)
        .await
        .expect("delete failed");
}
