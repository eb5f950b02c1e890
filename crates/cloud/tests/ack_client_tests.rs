//! Integration tests for the ACK client against a mock control plane.

use ack_cloud::{Ack, CloudProviderError, ClusterState, NodePoolProvider, NodePoolState};
use serde_json::json;
use wiremock::matchers::{body_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn provider(server: &MockServer) -> Ack {
    Ack::new("test-key-id", "test-key-secret", "cn-hangzhou")
        .unwrap()
        .with_endpoint(server.uri())
}

#[tokio::test]
async fn test_describe_cluster_maps_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clusters/c-123"))
        .and(header("x-acs-version", "2015-12-15"))
        .and(header("x-acs-signature-method", "HMAC-SHA1"))
        .and(header_exists("x-acs-signature-nonce"))
        .and(header_exists("date"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cluster_id": "c-123",
            "name": "prod",
            "state": "running",
            "region_id": "cn-hangzhou"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cluster = provider(&server)
        .await
        .describe_cluster("c-123")
        .await
        .unwrap();

    assert_eq!(cluster.id, "c-123");
    assert_eq!(cluster.name, "prod");
    assert_eq!(cluster.state, ClusterState::Running);
}

#[tokio::test]
async fn test_authorization_header_shape() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clusters/c-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cluster_id": "c-123",
            "state": "updating"
        })))
        .mount(&server)
        .await;

    provider(&server)
        .await
        .describe_cluster("c-123")
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let auth = requests[0]
        .headers
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(auth.starts_with("acs test-key-id:"), "unexpected header {auth}");
    assert!(auth.len() > "acs test-key-id:".len());
}

#[tokio::test]
async fn test_describe_node_pool_maps_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clusters/c-123/nodepools/np-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nodepool_info": { "nodepool_id": "np-1", "name": "workers" },
            "status": { "state": "scaling", "total_nodes": 4, "healthy_nodes": 3 }
        })))
        .mount(&server)
        .await;

    let pool = provider(&server)
        .await
        .describe_node_pool("c-123", "np-1")
        .await
        .unwrap();

    assert_eq!(pool.id, "np-1");
    assert_eq!(pool.name, "workers");
    assert_eq!(pool.state, NodePoolState::Scaling);
    assert_eq!(pool.total_nodes, 4);
}

#[tokio::test]
async fn test_scale_out_posts_count_and_returns_task() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clusters/c-123/nodepools/np-1"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({ "count": 2 })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "task_id": "T-abc",
            "request_id": "R-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let task = provider(&server)
        .await
        .scale_out_node_pool("c-123", "np-1", 2)
        .await
        .unwrap();

    assert_eq!(task.task_id, "T-abc");
}

#[tokio::test]
async fn test_scale_out_rejects_zero_count_without_request() {
    let server = MockServer::start().await;

    let err = provider(&server)
        .await
        .scale_out_node_pool("c-123", "np-1", 0)
        .await
        .unwrap_err();

    assert!(matches!(err, CloudProviderError::Config(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scale_out_without_task_id_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clusters/c-123/nodepools/np-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "request_id": "R-9" })))
        .mount(&server)
        .await;

    let err = provider(&server)
        .await
        .scale_out_node_pool("c-123", "np-1", 1)
        .await
        .unwrap_err();

    assert!(matches!(err, CloudProviderError::InvalidResponse(ref m) if m.contains("R-9")));
}

#[tokio::test]
async fn test_error_statuses_map_to_variants() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clusters/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "ErrorClusterNotFound",
            "message": "cluster not found"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/clusters/forbidden"))
        .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/clusters/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let ack = provider(&server).await;

    match ack.describe_cluster("missing").await.unwrap_err() {
        CloudProviderError::NotFound(message) => {
            assert_eq!(message, "ErrorClusterNotFound: cluster not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(matches!(
        ack.describe_cluster("forbidden").await.unwrap_err(),
        CloudProviderError::Auth(ref m) if m == "denied"
    ));
    assert!(matches!(
        ack.describe_cluster("broken").await.unwrap_err(),
        CloudProviderError::Api { status: 500, .. }
    ));
}
