//! Alert feed from the detection pipeline
//!
//! The pipeline publishes every detected alert as JSON on a Redis pub/sub
//! channel. Each message is decoded and handed to the hub exactly once; the
//! hub copes with duplicates, so reconnects never need to deduplicate.

use anyhow::Result;
use futures::StreamExt;
use std::pin::pin;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::alert::AlertRecord;
use crate::config::RedisConfig;
use crate::hub::Hub;

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

pub struct AlertSource {
    client: redis::Client,
    channel: String,
}

impl AlertSource {
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url())?;
        Ok(Self {
            client,
            channel: config.channel.clone(),
        })
    }

    /// Forward alerts to `hub` forever, reconnecting after failures
    pub async fn run(self, hub: Hub) {
        loop {
            match self.listen(&hub).await {
                Ok(()) => warn!(channel = %self.channel, "Alert feed closed, reconnecting"),
                Err(e) => warn!(channel = %self.channel, error = %e, "Alert feed unavailable"),
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn listen(&self, hub: &Hub) -> redis::RedisResult<()> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        info!(channel = %self.channel, "Subscribed to alert feed");

        let mut messages = pin!(pubsub.on_message());
        while let Some(message) = messages.next().await {
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Non-text alert payload skipped");
                    continue;
                }
            };
            forward(hub, &payload).await;
        }
        Ok(())
    }
}

/// Decode one pub/sub payload and broadcast it. Malformed payloads are dropped.
///
/// Waits while the hub's channel is full, so a burst slows the feed down
/// instead of losing alerts.
async fn forward(hub: &Hub, payload: &str) -> bool {
    match decode_alert(payload) {
        Ok(alert) => {
            debug!(rule = %alert.rule_name, severity = %alert.severity, source_ip = %alert.source_ip, "Alert received");
            hub.broadcast(alert).await;
            true
        }
        Err(e) => {
            warn!(error = %e, "Malformed alert payload skipped");
            false
        }
    }
}

pub fn decode_alert(payload: &str) -> Result<AlertRecord, serde_json::Error> {
    serde_json::from_str(payload)
}
