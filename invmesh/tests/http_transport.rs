use httpmock::prelude::*;
use invmesh::exception::{SERVICE_DOWN, SERVICE_REQUEST_FAILED};
use invmesh::transport::{TYPE_HEADER, WORKER_TYPE};
use invmesh::{BrokerAddress, BrokerCall, BrokerTransport, HttpTransport, InvMeshError, ServiceClient};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn posts_json_with_headers() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/echo")
                .header(TYPE_HEADER, WORKER_TYPE)
                .json_body(json!({"jsonrpc": "2.0", "id": 1, "result": 2}));
            then.status(200)
                .json_body(json!({"jsonrpc": "2.0", "id": 2, "method": "double", "params": {"x": 2}}));
        })
        .await;

    let transport = HttpTransport::new().unwrap();
    let call = BrokerCall::new(server.url("/echo"))
        .with_body(Some(json!({"jsonrpc": "2.0", "id": 1, "result": 2})))
        .with_header(TYPE_HEADER, WORKER_TYPE)
        .with_timeout(Some(Duration::from_secs(5)));
    let body = transport.post(call).await.unwrap().unwrap();

    mock.assert_async().await;
    assert_eq!(body["method"], json!("double"));
}

#[tokio::test]
async fn empty_body_is_none() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/audit");
            then.status(200);
        })
        .await;

    let transport = HttpTransport::new().unwrap();
    let body = transport.post(BrokerCall::new(server.url("/audit"))).await.unwrap();
    assert!(body.is_none());
}

#[tokio::test]
async fn error_status_is_reported() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/missing");
            then.status(404).body("no consumer");
        })
        .await;

    let transport = HttpTransport::new().unwrap();
    let err = transport
        .post(BrokerCall::new(server.url("/missing")))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    match err {
        InvMeshError::Status { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body.as_deref(), Some("no consumer"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn client(server: &MockServer) -> ServiceClient {
    ServiceClient::new(
        "orders",
        Arc::new(BrokerAddress::new(server.base_url())),
        Arc::new(HttpTransport::new().unwrap()),
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn sub_call_through_broker() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/billing");
            then.status(200)
                .json_body(json!({"jsonrpc": "2.0", "id": "ignored", "result": {"charged": true}}));
        })
        .await;

    let response = client(&server)
        .send_service_request("billing.charge", json!({"amount": 5}))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(response.result(), Some(&json!({"charged": true})));
}

#[tokio::test]
async fn sub_call_failures() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/billing");
            then.status(404);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/ledger");
            then.status(502);
        })
        .await;

    let client = client(&server);
    let down = client
        .send_service_request("billing.charge", json!({}))
        .await
        .unwrap_err();
    assert_eq!(down.status(), SERVICE_DOWN);

    let failed = client
        .send_service_request("ledger.post", json!({}))
        .await
        .unwrap_err();
    assert_eq!(failed.status(), SERVICE_REQUEST_FAILED);
    assert_eq!(failed.message(), "request failed with status code 502");
}
