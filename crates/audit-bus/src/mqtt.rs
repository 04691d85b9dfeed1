//! # MQTT Broker Adapter
//!
//! [`Broker`] over MQTT 3.1.1 using `rumqttc`.
//!
//! - QoS 1 publishes and subscriptions (acknowledged, at-least-once)
//! - Manual acks: a PUBACK goes out only after the handler settles the
//!   delivery with `Disposition::Ack`; a requeued delivery stays unacked
//!   and the session redelivers it
//! - Persistent session (`clean_session = false`) so the broker keeps the
//!   subscription and unacked messages across reconnects
//! - Local queues are bounded: when a subscriber falls behind, the event
//!   loop waits for space and the broker's in-flight window fills up
//! - Queue groups map to shared subscriptions: `$share/<group>/<topic>`
//! - Liveness is tracked from the event loop: `ConnAck` marks the
//!   connection up, any connection error marks it down; the event loop
//!   reconnects on its own

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{
    Acknowledger, Broker, BrokerError, Delivery, MessageHandler, Subscription,
    DEFAULT_DELIVERY_CAPACITY,
};

/// Default MQTT port.
pub const DEFAULT_PORT: u16 = 1883;

/// Connection settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Must be stable across restarts for the persistent session to survive.
    pub client_id: String,
    pub keep_alive: Duration,
    /// Capacity of the client request queue.
    pub request_capacity: usize,
    /// Pause between reconnection attempts.
    pub reconnect_delay: Duration,
    /// How long `connect` waits for the first `ConnAck`.
    pub connect_timeout: Duration,
    /// Deliveries queued per local subscriber.
    pub delivery_capacity: usize,
}

impl MqttConfig {
    /// Parse `mqtt://host[:port]` (also accepts `tcp://` or a bare `host[:port]`).
    pub fn from_url(url: &str, client_id: impl Into<String>) -> Result<Self, BrokerError> {
        let authority = url
            .strip_prefix("mqtt://")
            .or_else(|| url.strip_prefix("tcp://"))
            .unwrap_or(url)
            .trim_end_matches('/');

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| BrokerError::InvalidConfig(format!("invalid port in {url}")))?;
                (host, port)
            }
            None => (authority, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(BrokerError::InvalidConfig(format!("missing host in {url}")));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            client_id: client_id.into(),
            ..Self::default()
        })
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            client_id: "audit-pipeline".to_string(),
            keep_alive: Duration::from_secs(30),
            request_capacity: 256,
            reconnect_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            delivery_capacity: DEFAULT_DELIVERY_CAPACITY,
        }
    }
}

/// One local subscriber on a topic.
struct LocalMember {
    id: u64,
    sender: mpsc::Sender<Delivery>,
}

#[derive(Default)]
struct Routes {
    /// topic -> local members, served round-robin
    members: HashMap<String, (usize, Vec<LocalMember>)>,
    /// shared-subscription filter -> local reference count
    filters: HashMap<String, usize>,
}

impl Routes {
    /// Next local member for `topic`.
    fn pick(&mut self, topic: &str) -> Option<(u64, mpsc::Sender<Delivery>)> {
        let (next, members) = self.members.get_mut(topic)?;
        if members.is_empty() {
            return None;
        }
        let index = *next % members.len();
        *next = index + 1;
        Some((members[index].id, members[index].sender.clone()))
    }

    fn prune(&mut self, topic: &str, id: u64) {
        if let Some((_, members)) = self.members.get_mut(topic) {
            members.retain(|m| m.id != id);
        }
    }
}

/// PUBACK for one incoming publish, sent when the handler is done.
struct MqttAck {
    client: AsyncClient,
    publish: Publish,
}

#[async_trait]
impl Acknowledger for MqttAck {
    async fn ack(&self) {
        if let Err(e) = self.client.ack(&self.publish).await {
            warn!(pkid = self.publish.pkid, error = %e, "Failed to acknowledge delivery");
        }
    }

    /// MQTT 3.1.1 has no negative ack: leaving it unacked makes the
    /// session redeliver it.
    async fn requeue(&self, _payload: Vec<u8>) {
        debug!(pkid = self.publish.pkid, "Delivery left unacknowledged for redelivery");
    }
}

/// Hand an incoming publish to a local member, waiting for queue space.
/// With no local member the message stays unacked.
async fn route(
    routes: &Mutex<Routes>,
    client: &AsyncClient,
    publish: Publish,
    stop: &CancellationToken,
) {
    let topic = publish.topic.clone();
    let mut delivery = Delivery::new(
        publish.payload.to_vec(),
        Box::new(MqttAck {
            client: client.clone(),
            publish,
        }),
    );

    loop {
        let picked = routes.lock().pick(&topic);
        let Some((id, sender)) = picked else {
            warn!(topic = %topic, "No local subscriber, message left unacknowledged");
            return;
        };

        tokio::select! {
            _ = stop.cancelled() => return,
            sent = sender.send(delivery) => match sent {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    routes.lock().prune(&topic, id);
                    delivery = returned;
                }
            },
        }
    }
}

fn shared_filter(topic: &str, group: &str) -> String {
    format!("$share/{group}/{topic}")
}

/// MQTT implementation of the broker.
pub struct MqttBroker {
    client: AsyncClient,
    delivery_capacity: usize,
    routes: Arc<Mutex<Routes>>,
    connected: watch::Receiver<bool>,
    next_id: AtomicU64,
    stop: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBroker {
    /// Connect and wait for the broker to acknowledge the session.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn connect(config: MqttConfig) -> Result<Self, BrokerError> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(false);
        options.set_manual_acks(true);

        let (client, eventloop) = AsyncClient::new(options, config.request_capacity);
        let routes = Arc::new(Mutex::new(Routes::default()));
        let (connected_tx, mut connected) = watch::channel(false);
        let stop = CancellationToken::new();

        let driver = tokio::spawn(drive(
            eventloop,
            client.clone(),
            Arc::clone(&routes),
            connected_tx,
            stop.clone(),
            config.reconnect_delay,
        ));

        let acked = matches!(
            tokio::time::timeout(config.connect_timeout, connected.wait_for(|up| *up)).await,
            Ok(Ok(_))
        );
        if !acked {
            stop.cancel();
            let _ = driver.await;
            return Err(BrokerError::Disconnected);
        }

        info!(host = %config.host, port = config.port, "Connected to broker");
        Ok(Self {
            client,
            delivery_capacity: config.delivery_capacity.max(1),
            routes,
            connected,
            next_id: AtomicU64::new(1),
            stop,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// Disconnect and stop the event loop.
    pub async fn shutdown(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "Disconnect request not delivered");
        }
        self.stop.cancel();
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }
        info!("Broker connection closed");
    }
}

/// Poll the event loop until stopped, tracking liveness and routing
/// incoming publishes to local subscribers.
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    routes: Arc<Mutex<Routes>>,
    connected: watch::Sender<bool>,
    stop: CancellationToken,
    reconnect_delay: Duration,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                connected.send_replace(true);
                info!(session_present = ack.session_present, "Broker connected");
                if !ack.session_present {
                    let filters: Vec<String> = routes.lock().filters.keys().cloned().collect();
                    for filter in filters {
                        if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                            warn!(filter = %filter, error = %e, "Failed to restore subscription");
                        }
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                route(&routes, &client, publish, &stop).await;
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.send_replace(false);
                warn!("Broker requested disconnect");
            }
            Ok(_) => {}
            Err(e) => {
                if connected.send_replace(false) {
                    error!(error = %e, "Broker disconnected");
                } else {
                    debug!(error = %e, "Broker still unreachable");
                }
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        }
    }
    connected.send_replace(false);
    debug!("Broker event loop stopped");
}

#[async_trait]
impl Broker for MqttBroker {
    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if self.stop.is_cancelled() {
            return Err(BrokerError::Closed);
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))
    }

    async fn queue_subscribe(
        &self,
        topic: &str,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, BrokerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let filter = shared_filter(topic, group);
        let (sender, receiver) = mpsc::channel(self.delivery_capacity);

        let first_for_filter = {
            let mut routes = self.routes.lock();
            routes
                .members
                .entry(topic.to_string())
                .or_default()
                .1
                .push(LocalMember { id, sender });
            let count = routes.filters.entry(filter.clone()).or_insert(0);
            *count += 1;
            *count == 1
        };

        if first_for_filter {
            self.client
                .subscribe(filter.as_str(), QoS::AtLeastOnce)
                .await
                .map_err(|e| BrokerError::SubscribeFailed(e.to_string()))?;
        }

        debug!(filter = %filter, subscription = id, "Queue subscription created");
        Ok(Subscription::spawn(id, topic, group, receiver, handler))
    }

    async fn unsubscribe(&self, subscription: Subscription) -> Result<(), BrokerError> {
        let filter = shared_filter(subscription.topic(), subscription.group());

        let last_for_filter = {
            let mut routes = self.routes.lock();
            if let Some((_, members)) = routes.members.get_mut(subscription.topic()) {
                members.retain(|m| m.id != subscription.id());
            }
            match routes.filters.get_mut(&filter) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    routes.filters.remove(&filter);
                    true
                }
                None => false,
            }
        };

        let result = if last_for_filter {
            self.client
                .unsubscribe(filter.as_str())
                .await
                .map_err(|e| BrokerError::SubscribeFailed(e.to_string()))
        } else {
            Ok(())
        };

        subscription.stop().await;
        result
    }
}
