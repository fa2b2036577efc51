//! AMQP/RabbitMQ `Queue` implementation (spec §4.5, §6): durable queue
//! named `biomajdownload`, `prefetch=1`, manual ack, persistent publish.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;

use crate::domain::ports::queue::{Delivery, Queue};
use crate::error::{DownloadError, Result};
use crate::message::Operation;

const QUEUE_NAME: &str = "biomajdownload";

pub struct AmqpQueue {
    channel: Channel,
    consumer: Mutex<Option<lapin::Consumer>>,
}

impl AmqpQueue {
    pub async fn connect(uri: &str) -> Result<Self> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|e| DownloadError::Network(format!("amqp connect: {e}")))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| DownloadError::Network(format!("amqp channel: {e}")))?;

        channel
            .queue_declare(
                QUEUE_NAME,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| DownloadError::Network(format!("queue_declare: {e}")))?;

        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| DownloadError::Network(format!("basic_qos: {e}")))?;

        Ok(AmqpQueue {
            channel,
            consumer: Mutex::new(None),
        })
    }

    async fn ensure_consumer(&self) -> Result<()> {
        let mut guard = self.consumer.lock().await;
        if guard.is_none() {
            let consumer = self
                .channel
                .basic_consume(
                    QUEUE_NAME,
                    "biomaj-download-worker",
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| DownloadError::Network(format!("basic_consume: {e}")))?;
            *guard = Some(consumer);
        }
        Ok(())
    }
}

#[async_trait]
impl Queue for AmqpQueue {
    async fn publish(&self, operation: &Operation) -> Result<()> {
        let body = operation.encode()?;
        self.channel
            .basic_publish(
                "",
                QUEUE_NAME,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| DownloadError::Network(format!("basic_publish: {e}")))?
            .await
            .map_err(|e| DownloadError::Network(format!("publish confirm: {e}")))?;
        Ok(())
    }

    async fn next_delivery(&self) -> Result<Delivery> {
        self.ensure_consumer().await?;
        let mut guard = self.consumer.lock().await;
        let consumer = guard.as_mut().expect("ensure_consumer populates this");
        let delivery = consumer
            .next()
            .await
            .ok_or_else(|| DownloadError::Network("amqp consumer stream closed".to_string()))?
            .map_err(|e| DownloadError::Network(format!("delivery error: {e}")))?;

        let operation = Operation::decode(&delivery.data)?;
        let channel = self.channel.clone();
        let delivery_tag = delivery.delivery_tag;

        Ok(Delivery {
            operation,
            ack: Box::new(move || {
                Box::pin(async move {
                    channel
                        .basic_ack(delivery_tag, BasicAckOptions::default())
                        .await
                        .map_err(|e| DownloadError::Network(format!("basic_ack: {e}")))
                })
            }),
        })
    }
}
