// The client-facing HTTP surface - a thin adapter mapping verbs and headers
// onto the coordinator API.
//
// GET /mec/key    -> 200 value, 300 multipart siblings, 404
// PUT /mec/key    -> 200 new clock, 502 quorum shortfall

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::codec;
use crate::coordinator::{Coordinator, ReadResult, ReadValue};
use crate::error::MecError;
use crate::vclock::VectorClock;

pub const CLIENT_ID_HEADER: HeaderName = HeaderName::from_static("x-mec-client-id");
pub const VCLOCK_HEADER: HeaderName = HeaderName::from_static("x-mec-vclock");
pub const TIMESTAMP_HEADER: HeaderName = HeaderName::from_static("x-mec-timestamp");

pub fn create_router(coordinator: Coordinator) -> Router {
    Router::new()
        .route("/mec", get(get_root))
        .route(
            "/mec/{*key}",
            get(get_key).post(put_key).put(put_key).delete(delete_key),
        )
        .with_state(coordinator)
}

async fn get_root() -> (StatusCode, &'static str) {
    (StatusCode::OK, "stub")
}

async fn delete_key(Path(_key): Path<String>) -> (StatusCode, &'static str) {
    (StatusCode::OK, "stub")
}

async fn get_key(State(coordinator): State<Coordinator>, Path(key): Path<String>) -> Response {
    match coordinator.api_read(&key).await {
        Ok((ReadResult::Single(read), clock_b64)) => single_response(read, &clock_b64),
        Ok((ReadResult::Multi(reads), clock_b64)) => multi_response(reads, &clock_b64),
        Err(err) => with_clock_header(err.into_response(), &fresh_clock_b64()),
    }
}

async fn put_key(
    State(coordinator): State<Coordinator>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(client_id) = header_str(&headers, &CLIENT_ID_HEADER).filter(|id| !id.is_empty())
    else {
        let err = MecError::BadRequest("X-Mec-Client-ID header is required".to_string());
        return with_clock_header(err.into_response(), &fresh_clock_b64());
    };
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let packed_clock = header_str(&headers, &VCLOCK_HEADER);

    let written = coordinator
        .api_write(&key, &body, &content_type, &client_id, packed_clock.as_deref())
        .await;
    match written {
        Ok(clock_b64) => {
            let mut response = (StatusCode::OK, "").into_response();
            with_clock_header_mut(&mut response, &clock_b64);
            response
        }
        Err(err) => {
            // The write didn't happen; hand the caller back the clock they
            // sent, not the advanced one.
            let echo = packed_clock.unwrap_or_else(fresh_clock_b64);
            with_clock_header(err.into_response(), &echo)
        }
    }
}

fn single_response(read: ReadValue, clock_b64: &str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&read.content_type)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    insert_time_headers(&mut headers, read.timestamp_ns);
    let mut response = (StatusCode::OK, headers, read.value).into_response();
    with_clock_header_mut(&mut response, clock_b64);
    response
}

fn multi_response(reads: Vec<ReadValue>, clock_b64: &str) -> Response {
    let boundary = uuid::Uuid::new_v4().simple().to_string();
    let mut body: Vec<u8> = Vec::new();
    for read in &reads {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(format!("Content-Type: {}\r\n", read.content_type).as_bytes());
        body.extend_from_slice(
            format!("X-Mec-Timestamp: {}\r\n\r\n", read.timestamp_ns).as_bytes(),
        );
        body.extend_from_slice(&read.value);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&format!("multipart/mixed; boundary={}", boundary))
            .expect("boundary is ascii"),
    );
    let newest = reads.iter().map(|r| r.timestamp_ns).max().unwrap_or(0);
    insert_time_headers(&mut headers, newest);
    let mut response = (StatusCode::MULTIPLE_CHOICES, headers, body).into_response();
    with_clock_header_mut(&mut response, clock_b64);
    response
}

fn insert_time_headers(headers: &mut HeaderMap, timestamp_ns: i64) {
    if let Ok(value) = HeaderValue::from_str(&timestamp_ns.to_string()) {
        headers.insert(TIMESTAMP_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&http_date(timestamp_ns)) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

/// RFC 1123 rendering of a nanosecond timestamp.
fn http_date(timestamp_ns: i64) -> String {
    chrono::DateTime::from_timestamp_nanos(timestamp_ns)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn header_str(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn fresh_clock_b64() -> String {
    codec::clock_to_b64(&VectorClock::fresh()).unwrap_or_default()
}

fn with_clock_header(mut response: Response, clock_b64: &str) -> Response {
    with_clock_header_mut(&mut response, clock_b64);
    response
}

fn with_clock_header_mut(response: &mut Response, clock_b64: &str) {
    if let Ok(value) = HeaderValue::from_str(clock_b64) {
        response.headers_mut().insert(VCLOCK_HEADER, value);
    }
}
