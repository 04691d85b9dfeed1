//! Audit middleware.
//!
//! Wraps mutating routes: buffers the request body, runs the handler, then
//! emits one audit event describing the request and its outcome. The event
//! is dispatched in the background; the response is returned without
//! waiting for the broker.

use std::collections::{BTreeMap, HashMap};

use axum::body::{to_bytes, Body};
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode, Version};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use audit_bus::AuditDispatcher;
use audit_types::AuditEvent;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// Route parameter holding the resource id.
pub const RESOURCE_ID_PARAM: &str = "resource_id";

/// Header carrying the authenticated caller, when known.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";

/// Header carrying the request id (set by the request-id layer).
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// State for [`audit_log`].
#[derive(Clone)]
pub struct AuditState {
    dispatcher: AuditDispatcher,
    resource_type: String,
    max_body_bytes: usize,
}

impl AuditState {
    pub fn new(dispatcher: AuditDispatcher, resource_type: impl Into<String>) -> Self {
        Self {
            dispatcher,
            resource_type: resource_type.into(),
            max_body_bytes: 64 * 1024,
        }
    }

    #[must_use]
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }
}

/// `from_fn_with_state` middleware emitting one audit event per request.
pub async fn audit_log(
    State(audit): State<AuditState>,
    path: Option<Path<HashMap<String, String>>>,
    request: Request,
    next: Next,
) -> Response {
    let resource_id = path
        .and_then(|Path(params)| params.get(RESOURCE_ID_PARAM).cloned())
        .unwrap_or_default();
    let request_id = header_value(request.headers(), REQUEST_ID_HEADER).unwrap_or_default();
    let actor_id = header_value(request.headers(), ACTOR_ID_HEADER)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let action = request.method().to_string();
    let protocol = protocol_name(request.version());

    let (parts, body) = request.into_parts();
    let (response, compact_body) = match to_bytes(body, audit.max_body_bytes).await {
        Ok(bytes) => {
            let compact_body = compact_json(&bytes);
            let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
            (response, compact_body)
        }
        Err(e) => {
            warn!(error = %e, request_id = %request_id, "Failed to read request body");
            let response = (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
            (response, String::new())
        }
    };

    let event = AuditEvent::resource_change(&audit.resource_type, &resource_id, action, compact_body)
        .with_actor(BTreeMap::from([("id".to_string(), actor_id)]))
        .with_metadata(BTreeMap::from([
            ("request_id".to_string(), request_id),
            ("response_status".to_string(), response.status().as_u16().to_string()),
            ("protocol".to_string(), protocol.to_string()),
        ]));
    audit.dispatcher.dispatch(event);

    response
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `HTTP/1.1` style protocol string.
fn protocol_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

/// Strip insignificant whitespace from a JSON body, keeping key order.
/// Bodies that are not valid JSON compact to an empty string.
fn compact_json(bytes: &[u8]) -> String {
    serde_json::from_slice::<Value>(bytes)
        .map(|value| value.to_string())
        .unwrap_or_default()
}
