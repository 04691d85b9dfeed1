//! Router assembly.
//!
//! ```text
//! SetRequestId ─→ Trace ─→ PropagateRequestId ─→ Timeout ─→ routes
//!                                                            ├─ PATCH /accounts/:resource_id  [audit_log]
//!                                                            ├─ PATCH /accounts/              [audit_log]
//!                                                            ├─ GET   /health
//!                                                            └─ GET   /metrics
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, patch};
use axum::Router;
use audit_bus::AuditDispatcher;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::domain::account::AccountService;
use crate::handlers::{self, AppState};
use crate::middleware::{audit_log, AuditState};

/// Resource type recorded in account audit events.
pub const ACCOUNT_RESOURCE: &str = "account";

/// Build the HTTP router.
pub fn build_router(
    accounts: Arc<dyn AccountService>,
    dispatcher: AuditDispatcher,
    request_timeout: Duration,
) -> Router {
    let audit = AuditState::new(dispatcher, ACCOUNT_RESOURCE);

    let audited = Router::new()
        .route("/accounts/:resource_id", patch(handlers::patch_account))
        .route("/accounts/", patch(handlers::missing_id))
        .route_layer(from_fn_with_state(audit, audit_log))
        .with_state(AppState { accounts });

    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TimeoutLayer::new(request_timeout));

    Router::new()
        .merge(audited)
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(middleware)
}
