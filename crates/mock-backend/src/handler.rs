//! Request handler - one HTTP request in, one canned response out

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use attendance_common::{endpoint_key, Error, ForceAction, ResponseCatalog, Result, ServerConfig};

use crate::channel::CaptureSink;

const ALLOWED_HEADERS: &str = "Content-Type, Authorization";

/// Per-server handler state, immutable once the router is built
#[derive(Debug)]
struct HandlerState {
    catalog: ResponseCatalog,
    force_action: ForceAction,
    captures: CaptureSink,
}

/// Build the stub's router. Every path and method lands in one fallback handler.
pub fn router(config: &ServerConfig, captures: CaptureSink) -> Router {
    let state = Arc::new(HandlerState {
        catalog: config.catalog.clone(),
        force_action: config.force_action,
        captures,
    });

    Router::new()
        .fallback(handle_request)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn handle_request(
    State(state): State<Arc<HandlerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let key = endpoint_key(uri.path());

    let response = match method {
        // Pre-flight must pass even under failure injection
        Method::OPTIONS => ok_response(Body::empty()),
        Method::GET | Method::HEAD | Method::POST if state.force_action.is_fail() => {
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Method::GET => state.answer("GET", key),
        Method::HEAD => ok_response(Body::empty()),
        Method::POST => state.accept_post(key, &headers, body).await,
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    };

    debug!(
        method = %method,
        path = %uri.path(),
        status = response.status().as_u16(),
        "handled request"
    );
    response
}

impl HandlerState {
    fn answer(&self, method: &str, key: &str) -> Response {
        let encoded = match self.catalog.lookup(method, key) {
            Some(value) => serde_json::to_vec(value),
            None => serde_json::to_vec(&Value::Null),
        };
        match encoded {
            Ok(bytes) => ok_response(Body::from(bytes)),
            Err(e) => {
                error!(error = %e, key, "failed to encode canned response");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }

    /// Capture the body, then answer. In a worker, `deliver` returns only
    /// once the supervisor has queued the body.
    async fn accept_post(&self, key: &str, headers: &HeaderMap, body: Body) -> Response {
        let captured = match read_json_body(headers, body).await {
            Ok(value) => self.captures.deliver(value).await,
            Err(e) => Err(e),
        };

        match captured {
            Ok(()) => self.answer("POST", key),
            Err(e) => {
                if e.is_per_request() {
                    warn!(error = %e, key, "rejected POST");
                } else {
                    error!(error = %e, key, "could not capture POST");
                }
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// Read exactly `Content-Length` bytes and decode them as UTF-8 JSON
async fn read_json_body(headers: &HeaderMap, body: Body) -> Result<Value> {
    let declared = declared_length(headers)?;
    let bytes = to_bytes(body, declared).await.map_err(|e| {
        Error::MalformedPayload(format!("failed to read {} body bytes: {}", declared, e))
    })?;
    if bytes.len() != declared {
        return Err(Error::MalformedPayload(format!(
            "body is {} bytes but Content-Length declared {}",
            bytes.len(),
            declared
        )));
    }

    let text = std::str::from_utf8(&bytes)
        .map_err(|e| Error::MalformedPayload(format!("body is not UTF-8: {}", e)))?;
    serde_json::from_str(text)
        .map_err(|e| Error::MalformedPayload(format!("body is not JSON: {}", e)))
}

fn declared_length(headers: &HeaderMap) -> Result<usize> {
    let raw = headers
        .get(header::CONTENT_LENGTH)
        .ok_or_else(|| Error::MalformedPayload("missing Content-Length".to_string()))?;
    raw.to_str()
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .ok_or_else(|| Error::MalformedPayload(format!("invalid Content-Length {:?}", raw)))
}

fn ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{acknowledged_capture_channel, capture_channel, CaptureReceiver};
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    fn build(config: ServerConfig) -> (Router, CaptureReceiver) {
        let (sink, captures) = capture_channel();
        (router(&config, sink), captures)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn post_json(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn assert_cors(headers: &HeaderMap) {
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Content-Type, Authorization"
        );
    }

    #[tokio::test]
    async fn test_get_default_settings() {
        let (app, _captures) = build(ServerConfig::default());
        let (status, headers, body) = send(app, get("/api/settings")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_cors(&headers);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            value,
            json!({"spreadsheetID": "", "attendanceSheet": "", "autocompleteSheet": ""})
        );
    }

    #[tokio::test]
    async fn test_get_configured_entry_on_nested_path() {
        let catalog = ResponseCatalog::new().with_entry("GET", "names", json!({"names": ["Ada"]}));
        let (app, _captures) = build(ServerConfig::default().with_catalog(catalog));
        let (status, _, body) = send(app, get("/macros/s/abc/exec/names")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"names": ["Ada"]}));
    }

    #[tokio::test]
    async fn test_get_unknown_endpoint_is_null() {
        let (app, _captures) = build(ServerConfig::default());
        let (status, _, body) = send(app, get("/nothing-here")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"null");
    }

    #[tokio::test]
    async fn test_head_has_headers_without_body() {
        let (app, _captures) = build(ServerConfig::default());
        let request = Request::builder()
            .method(Method::HEAD)
            .uri("/settings")
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_cors(&headers);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_options_succeeds_under_failure_injection() {
        let (app, _captures) =
            build(ServerConfig::default().with_force_action(ForceAction::Fail));
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/signin")
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_cors(&headers);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_fail_mode_rejects_without_capture() {
        let config = ServerConfig::default().with_force_action(ForceAction::Fail);
        let (app, mut captures) = build(config);

        let (status, _, body) = send(app.clone(), get("/settings")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());

        let (status, _, body) = send(app, post_json("/signin", r#"{"name":"Ada"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());
        assert!(matches!(captures.poll_no_wait(), Err(Error::EmptyQueue)));
    }

    #[tokio::test]
    async fn test_post_is_captured() {
        let (app, mut captures) = build(ServerConfig::default());
        let payload = r#"{"name":"Ada","event":"signin","guests":[1,2]}"#;
        let (status, headers, _) = send(app, post_json("/api/signin", payload)).await;

        assert_eq!(status, StatusCode::OK);
        assert_cors(&headers);
        assert_eq!(
            captures.poll_no_wait().unwrap(),
            json!({"name": "Ada", "event": "signin", "guests": [1, 2]})
        );
        assert!(matches!(captures.poll_no_wait(), Err(Error::EmptyQueue)));
    }

    #[tokio::test]
    async fn test_post_with_success_label_is_captured() {
        let (app, mut captures) =
            build(ServerConfig::default().with_force_action(ForceAction::Success));
        let (status, _, _) = send(app, post_json("/signout", r#"{"name":"Grace"}"#)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(captures.poll_no_wait().unwrap(), json!({"name": "Grace"}));
    }

    #[tokio::test]
    async fn test_post_answers_from_post_table() {
        let catalog = ResponseCatalog::new().with_entry("POST", "signin", json!({"result": "ok"}));
        let (app, _captures) = build(ServerConfig::default().with_catalog(catalog));
        let (_, _, body) = send(app, post_json("/signin", "{}")).await;

        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"result": "ok"}));
    }

    #[tokio::test]
    async fn test_post_without_content_length() {
        let (app, mut captures) = build(ServerConfig::default());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/signin")
            .body(Body::from(r#"{"name":"Ada"}"#))
            .unwrap();
        let (status, _, _) = send(app, request).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(captures.poll_no_wait(), Err(Error::EmptyQueue)));
    }

    #[tokio::test]
    async fn test_post_with_non_numeric_content_length() {
        let (app, mut captures) = build(ServerConfig::default());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/signin")
            .header(header::CONTENT_LENGTH, "lots")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _, _) = send(app, request).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(captures.poll_no_wait(), Err(Error::EmptyQueue)));
    }

    #[tokio::test]
    async fn test_post_shorter_than_declared() {
        let (app, mut captures) = build(ServerConfig::default());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/signin")
            .header(header::CONTENT_LENGTH, 64)
            .body(Body::from("{}"))
            .unwrap();
        let (status, _, _) = send(app, request).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(captures.poll_no_wait(), Err(Error::EmptyQueue)));
    }

    #[tokio::test]
    async fn test_malformed_post_does_not_poison_later_requests() {
        let (app, mut captures) = build(ServerConfig::default());

        let (status, _, _) = send(app.clone(), post_json("/signin", "name=Ada")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(captures.poll_no_wait(), Err(Error::EmptyQueue)));

        let (status, _, _) = send(app, post_json("/signin", r#"{"name":"Ada"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(captures.poll_no_wait().unwrap(), json!({"name": "Ada"}));
    }

    #[tokio::test]
    async fn test_post_after_channel_teardown() {
        let (app, captures) = build(ServerConfig::default());
        drop(captures);

        let (status, _, _) = send(app, post_json("/signin", "{}")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_post_answers_after_capture_is_acknowledged() {
        let (sink, mut captures) = acknowledged_capture_channel();
        let app = router(&ServerConfig::default(), sink);
        let request = tokio::spawn(send(app, post_json("/signin", r#"{"name":"Ada"}"#)));

        let pending = captures.recv_pending().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!request.is_finished());

        assert_eq!(pending.acknowledge(), json!({"name": "Ada"}));
        let (status, _, _) = request.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_dropped_by_consumer_is_rejected() {
        let (sink, mut captures) = acknowledged_capture_channel();
        let app = router(&ServerConfig::default(), sink);
        let request = tokio::spawn(send(app, post_json("/signin", "{}")));

        drop(captures.recv_pending().await.unwrap());
        let (status, _, _) = request.await.unwrap();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_unsupported_method() {
        let (app, _captures) = build(ServerConfig::default());
        let request = Request::builder()
            .method(Method::PUT)
            .uri("/settings")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(app, request).await;

        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }
}
