//! # Failure Domains
//!
//! Each of the three outages degrades on its own without losing events or
//! stalling the other side:
//!
//! | Outage | Expected behaviour |
//! |--------|--------------------|
//! | Broker unreachable | publisher waits for liveness, then delivers |
//! | Buffer saturated | consumer retries the push, publisher unaffected |
//! | Store unreachable | batches parked in recovery loops, persisted on return |
//! | Shutdown under backpressure | unbuffered deliveries go back to the broker |

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use audit_bus::{AuditPublisher, Backoff, InMemoryBroker, PublishError, PublishPolicy};
    use audit_ingest::{BatcherConfig, ConsumerConfig, InMemorySink};
    use audit_types::{AUDIT_QUEUE_GROUP, AUDIT_TOPIC};
    use tokio_util::sync::CancellationToken;

    use crate::fixtures::{
        account_event, eventually, publisher, wait_for_subscribers, GatedSink, Pipeline, SlowSink,
    };

    fn small_batches(capacity: usize) -> BatcherConfig {
        BatcherConfig::new(capacity, Duration::from_secs(60))
            .with_recovery_interval(Duration::from_millis(50))
    }

    fn quick_retry() -> ConsumerConfig {
        ConsumerConfig {
            buffer_retry_interval: Duration::from_millis(10),
            ..ConsumerConfig::default()
        }
    }

    // =============================================================================
    // BROKER OUTAGE
    // =============================================================================

    #[tokio::test]
    async fn test_publish_waits_out_a_broker_outage() {
        let broker = Arc::new(InMemoryBroker::new());
        let sink = Arc::new(InMemorySink::new());
        let pipeline = Pipeline::start(&broker, sink.clone(), small_batches(10), quick_retry());
        wait_for_subscribers(&broker, 1).await;

        broker.set_connected(false);
        let publisher = Arc::new(publisher(&broker));
        let pending = {
            let publisher = Arc::clone(&publisher);
            tokio::spawn(async move { publisher.publish(account_event(7)).await })
        };

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(broker.messages_published(), 0);
        assert!(!pending.is_finished());

        broker.set_connected(true);
        pending.await.unwrap().unwrap();

        let batcher = Arc::clone(&pipeline.batcher);
        assert!(eventually(Duration::from_secs(2), || batcher.len() == 1).await);
        pipeline.stop().await;
        assert_eq!(sink.events()[0].subject(), "event:account:7");
    }

    #[tokio::test]
    async fn test_publish_gives_up_after_max_attempts() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.fail_next_publishes(3);

        let publisher = AuditPublisher::new(
            broker.clone(),
            PublishPolicy {
                max_attempts: 3,
                backoff: Backoff::constant(Duration::from_millis(5)),
                liveness_poll: Duration::from_millis(5),
            },
            CancellationToken::new(),
        );

        let err = publisher.publish(account_event(1)).await.unwrap_err();
        assert!(matches!(err, PublishError::Exhausted { attempts: 3, .. }));
        assert_eq!(broker.messages_published(), 0);
    }

    // =============================================================================
    // BUFFER SATURATION
    // =============================================================================

    #[tokio::test]
    async fn test_saturated_buffer_applies_backpressure_without_loss() {
        let broker = Arc::new(InMemoryBroker::new());
        let sink = Arc::new(GatedSink::closed());
        let pipeline = Pipeline::start(
            &broker,
            sink.clone(),
            small_batches(2),
            quick_retry(),
        );
        wait_for_subscribers(&broker, 1).await;

        // Publishing never waits on the store.
        let publisher = publisher(&broker);
        let published = tokio::time::timeout(Duration::from_secs(1), async {
            for i in 0..5 {
                publisher.publish(account_event(i)).await.unwrap();
            }
        })
        .await;
        assert!(published.is_ok());

        // First batch is stuck in the store, the next one fills the buffer,
        // the fifth event is held back by the consumer.
        let batcher = Arc::clone(&pipeline.batcher);
        assert!(eventually(Duration::from_secs(2), || batcher.len() == 2).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(batcher.len(), 2);
        assert_eq!(sink.persisted().event_count(), 0);

        sink.open();
        assert!(
            eventually(Duration::from_secs(2), || {
                sink.persisted().event_count() + batcher.len() == 5
            })
            .await
        );
        pipeline.stop().await;

        assert_eq!(sink.persisted().event_count(), 5);
    }

    // =============================================================================
    // STORE OUTAGE
    // =============================================================================

    #[tokio::test]
    async fn test_store_outage_recovers_parked_batches() {
        let broker = Arc::new(InMemoryBroker::new());
        let sink = Arc::new(InMemorySink::new());
        sink.set_available(false);
        let pipeline = Pipeline::start(&broker, sink.clone(), small_batches(2), quick_retry());
        wait_for_subscribers(&broker, 1).await;

        let publisher = publisher(&broker);
        for i in 0..4 {
            publisher.publish(account_event(i)).await.unwrap();
        }

        let batcher = Arc::clone(&pipeline.batcher);
        assert!(eventually(Duration::from_secs(2), || batcher.recoveries_in_flight() == 2).await);
        assert_eq!(batcher.len(), 0);

        // Recovery loops keep retrying on their interval.
        let attempts = sink.insert_attempts();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(sink.insert_attempts() > attempts);
        assert_eq!(sink.event_count(), 0);

        sink.set_available(true);
        assert!(eventually(Duration::from_secs(2), || sink.event_count() == 4).await);
        assert!(eventually(Duration::from_secs(1), || batcher.recoveries_in_flight() == 0).await);

        pipeline.stop().await;
        assert_eq!(sink.event_count(), 4);
    }

    #[tokio::test]
    async fn test_shutdown_does_not_hang_on_store_outage() {
        let broker = Arc::new(InMemoryBroker::new());
        let sink = Arc::new(InMemorySink::new());
        sink.set_available(false);
        let pipeline = Pipeline::start(&broker, sink.clone(), small_batches(2), quick_retry());
        wait_for_subscribers(&broker, 1).await;

        let publisher = publisher(&broker);
        for i in 0..3 {
            publisher.publish(account_event(i)).await.unwrap();
        }
        let batcher = Arc::clone(&pipeline.batcher);
        assert!(eventually(Duration::from_secs(2), || {
            batcher.recoveries_in_flight() == 1 && batcher.len() == 1
        })
        .await);

        tokio::time::timeout(Duration::from_secs(2), pipeline.stop())
            .await
            .expect("drain must finish while the store is down");

        assert!(batcher.is_closed());
        assert!(eventually(Duration::from_secs(1), || batcher.recoveries_in_flight() == 0).await);
        assert_eq!(sink.event_count(), 0);
    }

    // =============================================================================
    // SHUTDOWN UNDER BACKPRESSURE
    // =============================================================================

    #[tokio::test]
    async fn test_shutdown_returns_unbuffered_deliveries_to_the_broker() {
        let broker = Arc::new(InMemoryBroker::new());
        let slow = Arc::new(SlowSink::new(Duration::from_millis(200)));
        let first = Pipeline::start(
            &broker,
            slow.clone(),
            BatcherConfig::new(1, Duration::from_secs(60)),
            quick_retry(),
        );
        wait_for_subscribers(&broker, 1).await;

        let publisher = publisher(&broker);
        let mut published = HashSet::new();
        for i in 0..6 {
            let event = account_event(i);
            published.insert(event.id().to_string());
            publisher.publish(event).await.unwrap();
        }

        // One batch is in the store, one event buffered, the rest wait on
        // backpressure or in the subscription queue.
        tokio::time::sleep(Duration::from_millis(50)).await;
        first.stop().await;

        let held = broker.backlog_len(AUDIT_TOPIC, AUDIT_QUEUE_GROUP);
        assert_eq!(slow.persisted().event_count() + held, 6);
        assert!(held >= 4, "only {held} deliveries returned");

        // The next member of the group picks up where the first left off.
        let sink = Arc::new(InMemorySink::new());
        let second = Pipeline::start(
            &broker,
            sink.clone(),
            BatcherConfig::new(10, Duration::from_secs(60)),
            quick_retry(),
        );
        let batcher = Arc::clone(&second.batcher);
        assert!(eventually(Duration::from_secs(2), || batcher.len() == held).await);
        second.stop().await;

        assert_eq!(broker.backlog_len(AUDIT_TOPIC, AUDIT_QUEUE_GROUP), 0);
        let persisted: HashSet<String> = slow
            .persisted()
            .events()
            .iter()
            .chain(sink.events().iter())
            .map(|e| e.id().to_string())
            .collect();
        assert_eq!(persisted, published);
    }
}
