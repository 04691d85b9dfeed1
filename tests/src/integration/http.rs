//! # HTTP to Store
//!
//! A PATCH against the account API becomes a row in the audit store.
//!
//! ```text
//! PATCH /accounts/:id ──→ audit_log ──dispatch──→ InMemoryBroker ──→ AuditRuntime ──→ InMemorySink
//! ```

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use account_api::{build_router, InMemoryAccounts};
    use audit_bus::{AuditDispatcher, InMemoryBroker};
    use audit_ingest::{BatcherConfig, ConsumerConfig, InMemorySink, PoolSettings};
    use audit_runtime::{AuditRuntime, RuntimeConfig};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use crate::fixtures::{eventually, publisher, wait_for_subscribers};

    fn runtime_config() -> RuntimeConfig {
        RuntimeConfig {
            batcher: BatcherConfig::new(100, Duration::from_secs(60)),
            consumer: ConsumerConfig::default(),
            pool: PoolSettings::default(),
            broker_url: "mqtt://localhost".to_string(),
            database_url: "postgres://localhost/audit".to_string(),
            client_id: "audit-tests".to_string(),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    fn api(broker: &Arc<InMemoryBroker>) -> Router {
        build_router(
            Arc::new(InMemoryAccounts::new()),
            AuditDispatcher::new(Arc::new(publisher(broker))),
            Duration::from_secs(5),
        )
    }

    fn patch(id: &str, body: &str, actor: &str) -> Request<Body> {
        Request::builder()
            .method("PATCH")
            .uri(format!("/accounts/{id}"))
            .header("content-type", "application/json")
            .header("x-actor-id", actor)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_account_patches_are_persisted_on_shutdown() {
        let broker = Arc::new(InMemoryBroker::new());
        let sink = Arc::new(InMemorySink::new());
        let shutdown = CancellationToken::new();
        let runtime =
            AuditRuntime::assemble(&runtime_config(), broker.clone(), sink.clone(), shutdown.clone())
                .unwrap();
        let batcher = Arc::clone(runtime.batcher());
        let running = tokio::spawn(runtime.run());
        wait_for_subscribers(&broker, 1).await;

        let router = api(&broker);
        let responses = [
            router.clone().oneshot(patch("1", r#"{"name":"Ada"}"#, "admin")).await.unwrap(),
            router.clone().oneshot(patch("2", r#"{"email":"bad"}"#, "admin")).await.unwrap(),
            router.clone().oneshot(patch("3", "{ broken", "admin")).await.unwrap(),
        ];
        let statuses: Vec<StatusCode> = responses.iter().map(|r| r.status()).collect();
        assert_eq!(
            statuses,
            [
                StatusCode::NO_CONTENT,
                StatusCode::UNPROCESSABLE_ENTITY,
                StatusCode::BAD_REQUEST
            ]
        );

        // Every request is audited, whatever its outcome.
        assert!(eventually(Duration::from_secs(2), || batcher.len() == 3).await);
        shutdown.cancel();
        running.await.unwrap().unwrap();

        let mut events = sink.events();
        events.sort_by(|a, b| a.subject().cmp(b.subject()));
        let subjects: Vec<&str> = events.iter().map(|e| e.subject()).collect();
        assert_eq!(subjects, ["event:account:1", "event:account:2", "event:account:3"]);

        let statuses: Vec<String> = events
            .iter()
            .map(|e| e.metadata().unwrap()["response_status"].clone())
            .collect();
        assert_eq!(statuses, ["204", "422", "400"]);
        assert!(events.iter().all(|e| e.actor().unwrap()["id"] == "admin"));
        assert!(events.iter().all(|e| e.action() == "PATCH"));
    }

    #[tokio::test]
    async fn test_api_keeps_answering_while_broker_is_down() {
        let broker = Arc::new(InMemoryBroker::new());
        let sink = Arc::new(InMemorySink::new());
        let shutdown = CancellationToken::new();
        let runtime =
            AuditRuntime::assemble(&runtime_config(), broker.clone(), sink.clone(), shutdown.clone())
                .unwrap();
        let batcher = Arc::clone(runtime.batcher());
        let running = tokio::spawn(runtime.run());
        wait_for_subscribers(&broker, 1).await;

        broker.set_connected(false);
        let response = tokio::time::timeout(
            Duration::from_millis(500),
            api(&broker).oneshot(patch("9", r#"{"name":"Bo"}"#, "ops")),
        )
        .await
        .expect("request must not wait for the broker")
        .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(batcher.len(), 0);

        // The background publish completes once the broker is back.
        broker.set_connected(true);
        assert!(eventually(Duration::from_secs(2), || batcher.len() == 1).await);

        shutdown.cancel();
        running.await.unwrap().unwrap();
        assert_eq!(sink.events()[0].subject(), "event:account:9");
    }
}
