//! # Pipeline Flows
//!
//! Events published on the bus end up in the store, in bounded batches,
//! exactly once per queue group.
//!
//! ```text
//! AuditPublisher ──→ InMemoryBroker ──(queue group)──→ AuditConsumer ──→ BoundedBatcher ──→ sink
//! ```

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use audit_bus::{Broker, InMemoryBroker};
    use audit_ingest::{BatcherConfig, ConsumerConfig, InMemorySink};
    use audit_types::AUDIT_TOPIC;

    use crate::fixtures::{account_event, eventually, publisher, wait_for_subscribers, Pipeline};

    // =============================================================================
    // DELIVERY
    // =============================================================================

    #[tokio::test]
    async fn test_published_events_persist_in_bounded_batches() {
        let broker = Arc::new(InMemoryBroker::new());
        let sink = Arc::new(InMemorySink::new());
        let pipeline = Pipeline::start(
            &broker,
            sink.clone(),
            BatcherConfig::new(100, Duration::from_secs(60)),
            ConsumerConfig {
                buffer_retry_interval: Duration::from_millis(10),
                ..ConsumerConfig::default()
            },
        );
        wait_for_subscribers(&broker, 1).await;

        let publisher = publisher(&broker);
        let mut published = HashSet::new();
        for i in 0..250 {
            let event = account_event(i);
            published.insert(event.id().to_string());
            publisher.publish(event).await.unwrap();
        }

        // Two size-triggered flushes happen without any timer.
        let flushed = eventually(Duration::from_secs(5), || sink.event_count() >= 200).await;
        assert!(flushed, "size-triggered flushes did not happen");

        let batcher = Arc::clone(&pipeline.batcher);
        let settled = eventually(Duration::from_secs(2), || {
            sink.event_count() + batcher.len() == 250
        })
        .await;
        assert!(settled);
        pipeline.stop().await;

        let persisted: HashSet<String> = sink.events().iter().map(|e| e.id().to_string()).collect();
        assert_eq!(sink.event_count(), 250);
        assert_eq!(persisted, published);
        assert!(sink.batches().iter().all(|batch| batch.len() <= 100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_a_partial_batch() {
        let broker = Arc::new(InMemoryBroker::new());
        let sink = Arc::new(InMemorySink::new());
        let pipeline = Pipeline::start(
            &broker,
            sink.clone(),
            BatcherConfig::new(100, Duration::from_secs(5)),
            ConsumerConfig::default(),
        );
        wait_for_subscribers(&broker, 1).await;

        let publisher = publisher(&broker);
        for i in 0..3 {
            publisher.publish(account_event(i)).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert_eq!(sink.event_count(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.batch_count(), 1);
        assert_eq!(sink.event_count(), 3);

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_messages_are_skipped() {
        let broker = Arc::new(InMemoryBroker::new());
        let sink = Arc::new(InMemorySink::new());
        let pipeline = Pipeline::start(
            &broker,
            sink.clone(),
            BatcherConfig::new(10, Duration::from_secs(60)),
            ConsumerConfig::default(),
        );
        wait_for_subscribers(&broker, 1).await;

        broker.publish(AUDIT_TOPIC, b"{ not json".to_vec()).await.unwrap();
        broker.publish(AUDIT_TOPIC, b"[]".to_vec()).await.unwrap();
        publisher(&broker).publish(account_event(1)).await.unwrap();

        let batcher = Arc::clone(&pipeline.batcher);
        assert!(eventually(Duration::from_secs(2), || batcher.len() == 1).await);
        pipeline.stop().await;

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subject(), "event:account:1");
    }

    // =============================================================================
    // QUEUE GROUPS
    // =============================================================================

    #[tokio::test]
    async fn test_queue_group_members_share_the_stream() {
        let broker = Arc::new(InMemoryBroker::new());
        let first = Arc::new(InMemorySink::new());
        let second = Arc::new(InMemorySink::new());
        let config = || BatcherConfig::new(1000, Duration::from_secs(60));

        let a = Pipeline::start(&broker, first.clone(), config(), ConsumerConfig::default());
        let b = Pipeline::start(&broker, second.clone(), config(), ConsumerConfig::default());
        wait_for_subscribers(&broker, 2).await;

        let publisher = publisher(&broker);
        for i in 0..40 {
            publisher.publish(account_event(i)).await.unwrap();
        }

        let (ba, bb) = (Arc::clone(&a.batcher), Arc::clone(&b.batcher));
        assert!(eventually(Duration::from_secs(2), || ba.len() + bb.len() == 40).await);
        a.stop().await;
        b.stop().await;

        // Round-robin: every event lands exactly once, split across members.
        assert_eq!(first.event_count(), 20);
        assert_eq!(second.event_count(), 20);
        let all: HashSet<String> = first
            .events()
            .iter()
            .chain(second.events().iter())
            .map(|e| e.id().to_string())
            .collect();
        assert_eq!(all.len(), 40);
    }

    #[tokio::test]
    async fn test_separate_groups_each_receive_everything() {
        let broker = Arc::new(InMemoryBroker::new());
        let primary = Arc::new(InMemorySink::new());
        let archive = Arc::new(InMemorySink::new());
        let config = || BatcherConfig::new(1000, Duration::from_secs(60));

        let a = Pipeline::start(&broker, primary.clone(), config(), ConsumerConfig::default());
        let b = Pipeline::start(
            &broker,
            archive.clone(),
            config(),
            ConsumerConfig {
                group: "archive".to_string(),
                ..ConsumerConfig::default()
            },
        );
        wait_for_subscribers(&broker, 2).await;

        let publisher = publisher(&broker);
        for i in 0..10 {
            publisher.publish(account_event(i)).await.unwrap();
        }

        let (ba, bb) = (Arc::clone(&a.batcher), Arc::clone(&b.batcher));
        assert!(eventually(Duration::from_secs(2), || ba.len() == 10 && bb.len() == 10).await);
        a.stop().await;
        b.stop().await;

        assert_eq!(primary.event_count(), 10);
        assert_eq!(archive.event_count(), 10);
    }
}
