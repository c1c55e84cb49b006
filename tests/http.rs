// HTTP surface tests: header contract, status codes, sibling multiparts.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use common::{cluster, replication, Node};

use mec_db::api::create_router;
use mec_db::codec::{clock_from_b64, Record};
use mec_db::vclock::VectorClock;

async fn single_node() -> (axum::Router, Vec<Node>) {
    let nodes = cluster(&["a"], replication(3, 2, 2, false)).await;
    let router = create_router(nodes[0].coordinator.clone());
    (router, nodes)
}

fn put_request(key: &str, body: &str, client: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/mec/{}", key))
        .header("Content-Type", "text/plain")
        .header("X-Mec-Client-ID", client)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

#[tokio::test]
async fn test_root_stub() {
    let (router, _nodes) = single_node().await;
    let response = router
        .oneshot(Request::get("/mec").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_write_then_read() {
    let (router, _nodes) = single_node().await;

    let response = router
        .clone()
        .oneshot(put_request("k", "v1", "alice"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let clock_b64 = response.headers()["x-mec-vclock"].to_str().unwrap().to_string();
    assert!(!clock_b64.is_empty());
    assert_eq!(clock_from_b64(&clock_b64).unwrap().counter("alice"), 1);

    let response = router
        .oneshot(Request::get("/mec/k").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/plain");
    assert_eq!(response.headers()["x-mec-vclock"].to_str().unwrap(), clock_b64);
    assert!(response.headers().contains_key("last-modified"));
    let timestamp: i64 = response.headers()["x-mec-timestamp"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(timestamp > 0);
    assert_eq!(body_bytes(response).await, b"v1");
}

#[tokio::test]
async fn test_missing_client_id_is_rejected() {
    let (router, _nodes) = single_node().await;
    let request = Request::builder()
        .method("POST")
        .uri("/mec/k")
        .header("Content-Type", "text/plain")
        .body(Body::from("v1"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_missing_key_is_404_with_clock() {
    let (router, _nodes) = single_node().await;
    let response = router
        .oneshot(Request::get("/mec/absent").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    // Every response carries a clock header.
    let clock_b64 = response.headers()["x-mec-vclock"].to_str().unwrap();
    assert!(clock_from_b64(clock_b64).unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_clock_header_still_writes() {
    let (router, _nodes) = single_node().await;
    let request = Request::builder()
        .method("PUT")
        .uri("/mec/k")
        .header("Content-Type", "text/plain")
        .header("X-Mec-Client-ID", "alice")
        .header("X-Mec-Vclock", "@@@definitely-not-base64@@@")
        .body(Body::from("v1"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_key_with_slashes_and_colons() {
    let (router, _nodes) = single_node().await;
    let response = router
        .clone()
        .oneshot(put_request("users:42/profile", "p", "alice"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(
            Request::get("/mec/users:42/profile")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"p");
}

#[tokio::test]
async fn test_quorum_shortfall_maps_to_502() {
    let nodes = cluster(&["a"], replication(3, 2, 2, true)).await;
    let router = create_router(nodes[0].coordinator.clone());
    let response = router.oneshot(put_request("k", "v1", "alice")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(response.headers().contains_key("x-mec-vclock"));
}

#[tokio::test]
async fn test_siblings_come_back_as_multipart() {
    let nodes = cluster(&["a", "b"], replication(2, 2, 2, false)).await;
    nodes[0]
        .store
        .put(
            "k",
            &Record {
                value: b"v1".to_vec(),
                content_type: "text/plain".to_string(),
                clock: VectorClock::new("alice"),
            },
        )
        .unwrap();
    nodes[1]
        .store
        .put(
            "k",
            &Record {
                value: b"v2".to_vec(),
                content_type: "text/plain".to_string(),
                clock: VectorClock::new("bob"),
            },
        )
        .unwrap();

    let router = create_router(nodes[0].coordinator.clone());
    let response = router
        .oneshot(Request::get("/mec/k").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::MULTIPLE_CHOICES);

    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("multipart/mixed; boundary="));

    let merged = clock_from_b64(response.headers()["x-mec-vclock"].to_str().unwrap()).unwrap();
    assert_eq!(merged.counter("alice"), 1);
    assert_eq!(merged.counter("bob"), 1);

    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.contains("v1"));
    assert!(body.contains("v2"));
    assert!(body.contains("Content-Type: text/plain"));
    assert!(body.contains("X-Mec-Timestamp:"));
}

#[tokio::test]
async fn test_delete_is_a_stub() {
    let (router, _nodes) = single_node().await;
    let response = router
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/mec/k")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
