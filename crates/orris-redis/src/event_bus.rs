//! Cross-instance event bus over Redis pub/sub.
//!
//! Publishing multiplexes over the shared connection; each subscriber holds
//! its own dedicated connection (a Redis connection in subscribe mode can
//! do nothing else). Received messages are dispatched on fresh tasks so the
//! receive loop never blocks behind a handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use orris_sync::{
    EventPublisher, HubStatusEvent, HubStatusHandler, SubscriptionChangeEvent,
    SubscriptionChangeHandler, SyncError, HUB_STATUS_CHANNEL, SUBSCRIPTION_CHANGE_CHANNEL,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct RedisEventBus {
    conn: ConnectionManager,
}

impl RedisEventBus {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<(), SyncError> {
        let mut conn = self.conn.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| SyncError::TransientIo(e.to_string()))
    }
}

#[async_trait]
impl EventPublisher for RedisEventBus {
    async fn publish_subscription_change(
        &self,
        event: &SubscriptionChangeEvent,
    ) -> Result<(), SyncError> {
        let payload = serde_json::to_string(event)?;
        self.publish(SUBSCRIPTION_CHANGE_CHANNEL, payload).await
    }

    async fn publish_hub_status(&self, event: &HubStatusEvent) -> Result<(), SyncError> {
        let payload = serde_json::to_string(event)?;
        self.publish(HUB_STATUS_CHANNEL, payload).await
    }
}

/// Subscribe to subscription change events. Runs until the shutdown signal,
/// reconnecting with a short delay whenever the connection drops.
pub fn spawn_subscription_listener(
    client: redis::Client,
    handler: Arc<dyn SubscriptionChangeHandler>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let mut pubsub = match client.get_async_pubsub().await {
                Ok(pubsub) => pubsub,
                Err(e) => {
                    error!(error = %e, "event bus connection failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                        _ = shutdown.changed() => return,
                    }
                }
            };
            if let Err(e) = pubsub.subscribe(SUBSCRIPTION_CHANGE_CHANNEL).await {
                error!(error = %e, "subscribe failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                    _ = shutdown.changed() => return,
                }
            }
            info!(channel = SUBSCRIPTION_CHANGE_CHANNEL, "subscribed to event bus");

            let stream = pubsub.on_message();
            tokio::pin!(stream);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    msg = stream.next() => {
                        let Some(msg) = msg else {
                            warn!("event bus stream closed, reconnecting");
                            break;
                        };
                        let payload: String = match msg.get_payload() {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(error = %e, "undecodable event payload");
                                continue;
                            }
                        };
                        match serde_json::from_str::<SubscriptionChangeEvent>(&payload) {
                            Ok(event) => {
                                let handler = Arc::clone(&handler);
                                tokio::spawn(async move {
                                    handler.handle(event).await;
                                });
                            }
                            Err(e) => {
                                warn!(error = %e, payload, "malformed subscription change event");
                            }
                        }
                    }
                }
            }
        }
    })
}

/// Subscribe to hub status events from peer instances.
pub fn spawn_hub_status_listener(
    client: redis::Client,
    handler: Arc<dyn HubStatusHandler>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let mut pubsub = match client.get_async_pubsub().await {
                Ok(pubsub) => pubsub,
                Err(e) => {
                    error!(error = %e, "hub status connection failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                        _ = shutdown.changed() => return,
                    }
                }
            };
            if let Err(e) = pubsub.subscribe(HUB_STATUS_CHANNEL).await {
                error!(error = %e, "subscribe failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                    _ = shutdown.changed() => return,
                }
            }
            info!(channel = HUB_STATUS_CHANNEL, "subscribed to hub status channel");

            let stream = pubsub.on_message();
            tokio::pin!(stream);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    msg = stream.next() => {
                        let Some(msg) = msg else {
                            warn!("hub status stream closed, reconnecting");
                            break;
                        };
                        let payload: String = match msg.get_payload() {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(error = %e, "undecodable hub status payload");
                                continue;
                            }
                        };
                        match serde_json::from_str::<HubStatusEvent>(&payload) {
                            Ok(event) => {
                                let handler = Arc::clone(&handler);
                                tokio::spawn(async move {
                                    handler.handle(event).await;
                                });
                            }
                            Err(e) => {
                                warn!(error = %e, payload, "malformed hub status event");
                            }
                        }
                    }
                }
            }
        }
    })
}
