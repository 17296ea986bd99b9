use orderflow_core::OrderEvent;
use tracing::info;

use crate::broker::OutgoingMessage;
use crate::channel::Channel;
use crate::error::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Wait for the broker to accept the message.
    Confirmed,
    /// Return once the channel has the message.
    FireAndForget,
}

#[derive(Clone)]
pub struct Publisher {
    channel: Channel,
    mode: PublishMode,
}

impl Publisher {
    pub fn new(channel: Channel, mode: PublishMode) -> Self {
        Self { channel, mode }
    }

    pub fn mode(&self) -> PublishMode {
        self.mode
    }

    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        event: &OrderEvent,
    ) -> Result<(), BrokerError> {
        let body =
            serde_json::to_vec(event).map_err(|err| BrokerError::Serialization(err.to_string()))?;
        let message = OutgoingMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            message_id: event.message_id.to_string(),
            persistent: true,
            body,
        };

        match self.mode {
            PublishMode::Confirmed => self.channel.publish_confirmed(message).await?,
            PublishMode::FireAndForget => self.channel.publish_detached(message).await?,
        }

        info!(
            exchange,
            routing_key,
            message_id = %event.message_id,
            event_type = %event.event_type,
            "event published"
        );
        Ok(())
    }
}
