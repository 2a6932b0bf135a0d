use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::models::OrderDetails;

/// What downstream mailers need to confirm an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order_id: i64,
    pub order_number: String,
    pub user_id: i64,
    pub total_amount: i64,
    pub currency: String,
    pub item_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&OrderDetails> for OrderConfirmation {
    fn from(details: &OrderDetails) -> Self {
        let order = &details.order;
        Self {
            order_id: order.id,
            order_number: order.order_number.clone().unwrap_or_default(),
            user_id: order.user_id,
            total_amount: order.total_amount,
            currency: order.currency.clone(),
            item_count: details.items.len(),
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct NotificationEnvelope<'a> {
    id: Uuid,
    event_type: &'static str,
    payload: &'a OrderConfirmation,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_order_confirmation(&self, confirmation: &OrderConfirmation) -> Result<()>;
}

/// Publishes confirmations to a topic consumed by the mailer.
pub struct KafkaNotifier {
    producer: FutureProducer,
    topic: String,
}

impl KafkaNotifier {
    pub fn new(brokers: &str, topic: String) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;
        Ok(Self { producer, topic })
    }
}

#[async_trait]
impl Notifier for KafkaNotifier {
    async fn send_order_confirmation(&self, confirmation: &OrderConfirmation) -> Result<()> {
        let envelope = NotificationEnvelope {
            id: Uuid::new_v4(),
            event_type: "OrderConfirmation",
            payload: confirmation,
        };
        let json = serde_json::to_string(&envelope)?;
        let record = FutureRecord::to(&self.topic)
            .payload(&json)
            .key(&confirmation.order_number);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish order confirmation: {}", e))?;

        Ok(())
    }
}

/// Used when no broker is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_order_confirmation(&self, confirmation: &OrderConfirmation) -> Result<()> {
        info!(
            order_id = confirmation.order_id,
            order_number = %confirmation.order_number,
            total_amount = confirmation.total_amount,
            "Order confirmation (no broker configured)"
        );
        Ok(())
    }
}
