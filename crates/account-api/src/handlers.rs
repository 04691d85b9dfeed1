//! Route handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::debug;

use crate::domain::account::{Account, AccountService};

/// Handler state.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<dyn AccountService>,
}

/// Body of `PATCH /accounts/:resource_id`. Absent fields are left unchanged.
#[derive(Debug, Deserialize)]
pub struct AccountPatchRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// `PATCH /accounts/:resource_id`
///
/// 400 on a blank id or a malformed body, 422 when the use case refuses,
/// 204 otherwise.
pub async fn patch_account(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
    body: Bytes,
) -> Response {
    if resource_id.trim().is_empty() {
        return missing_id().await;
    }

    let request: AccountPatchRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let patch = Account {
        id: resource_id,
        name: request.name,
        email: request.email,
    };
    match state.accounts.patch(patch).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            debug!(error = %e, "Account patch refused");
            (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response()
        }
    }
}

/// `PATCH /accounts/` without an id.
pub async fn missing_id() -> Response {
    (StatusCode::BAD_REQUEST, "accountID is required").into_response()
}

pub async fn health() -> &'static str {
    "ok"
}

/// Prometheus text exposition.
pub async fn metrics() -> Response {
    match audit_telemetry::encode_metrics() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
