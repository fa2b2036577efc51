use async_trait::async_trait;

use crate::error::Result;
use crate::message::Operation;

/// A single delivered message, carrying enough to ack it once handled.
pub struct Delivery {
    pub operation: Operation,
    pub(crate) ack: Box<dyn FnOnce() -> futures::future::BoxFuture<'static, Result<()>> + Send>,
}

impl Delivery {
    pub async fn ack(self) -> Result<()> {
        (self.ack)().await
    }
}

///# Queue
/// durable message transport (spec §6): persistent publish, `prefetch=1`,
/// manual ack. `consume` hands deliveries to the caller one at a time; the
/// caller is responsible for acking even on handler failure, to avoid
/// poison-message redelivery loops.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn publish(&self, operation: &Operation) -> Result<()>;

    async fn next_delivery(&self) -> Result<Delivery>;
}
