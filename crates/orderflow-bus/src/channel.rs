use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument};

use crate::broker::{
    Binding, Broker, Delivery, DeliveryTag, ExchangeSpec, OutgoingMessage, QueueSpec,
};
use crate::error::BrokerError;

const COMMAND_BUFFER: usize = 256;

type Reply<T> = oneshot::Sender<Result<T, BrokerError>>;

enum ChannelCommand {
    DeclareExchange {
        spec: ExchangeSpec,
        respond_to: Reply<()>,
    },
    DeclareQueue {
        spec: QueueSpec,
        respond_to: Reply<()>,
    },
    Bind {
        binding: Binding,
        respond_to: Reply<()>,
    },
    Publish {
        message: OutgoingMessage,
        respond_to: Option<Reply<()>>,
    },
    Subscribe {
        queue: String,
        respond_to: Reply<mpsc::Receiver<Delivery>>,
    },
    Ack {
        tag: DeliveryTag,
        respond_to: Reply<()>,
    },
    Nack {
        tag: DeliveryTag,
        requeue: bool,
        respond_to: Reply<()>,
    },
}

/// The process-wide broker channel. Every operation goes through one actor
/// task, so declares, publishes and acks never interleave on the connection.
#[derive(Clone)]
pub struct Channel {
    sender: mpsc::Sender<ChannelCommand>,
    broker: Arc<dyn Broker>,
}

impl Channel {
    /// Spawns the channel actor on the current runtime.
    pub fn open(broker: Arc<dyn Broker>) -> Self {
        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
        let actor = ChannelActor {
            broker: broker.clone(),
            receiver,
        };
        tokio::spawn(actor.run());
        Self { sender, broker }
    }

    pub async fn declare_exchange(&self, spec: ExchangeSpec) -> Result<(), BrokerError> {
        self.request(|respond_to| ChannelCommand::DeclareExchange { spec, respond_to })
            .await
    }

    pub async fn declare_queue(&self, spec: QueueSpec) -> Result<(), BrokerError> {
        self.request(|respond_to| ChannelCommand::DeclareQueue { spec, respond_to })
            .await
    }

    pub async fn bind(&self, binding: Binding) -> Result<(), BrokerError> {
        self.request(|respond_to| ChannelCommand::Bind {
            binding,
            respond_to,
        })
        .await
    }

    /// Waits until the broker has enqueued the message.
    pub async fn publish_confirmed(&self, message: OutgoingMessage) -> Result<(), BrokerError> {
        self.request(|respond_to| ChannelCommand::Publish {
            message,
            respond_to: Some(respond_to),
        })
        .await
    }

    /// Hands the message to the channel and returns. Broker failures are only
    /// logged.
    pub async fn publish_detached(&self, message: OutgoingMessage) -> Result<(), BrokerError> {
        self.sender
            .send(ChannelCommand::Publish {
                message,
                respond_to: None,
            })
            .await
            .map_err(|_| BrokerError::Unavailable("channel closed".to_string()))
    }

    pub async fn subscribe(&self, queue: &str) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        let queue = queue.to_string();
        self.request(|respond_to| ChannelCommand::Subscribe { queue, respond_to })
            .await
    }

    pub async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.request(|respond_to| ChannelCommand::Ack { tag, respond_to })
            .await
    }

    pub async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        self.request(|respond_to| ChannelCommand::Nack {
            tag,
            requeue,
            respond_to,
        })
        .await
    }

    /// Health checks bypass the command queue so a busy channel still
    /// reports liveness.
    pub async fn is_connected(&self) -> bool {
        !self.sender.is_closed() && self.broker.is_connected().await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> ChannelCommand,
    ) -> Result<T, BrokerError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(command(respond_to))
            .await
            .map_err(|_| BrokerError::Unavailable("channel closed".to_string()))?;
        response
            .await
            .map_err(|_| BrokerError::Unavailable("channel dropped the request".to_string()))?
    }
}

struct ChannelActor {
    broker: Arc<dyn Broker>,
    receiver: mpsc::Receiver<ChannelCommand>,
}

impl ChannelActor {
    #[instrument(name = "broker_channel", skip(self))]
    async fn run(mut self) {
        info!("broker channel open");

        while let Some(command) = self.receiver.recv().await {
            match command {
                ChannelCommand::DeclareExchange { spec, respond_to } => {
                    debug!(exchange = %spec.name, "declaring exchange");
                    let _ = respond_to.send(self.broker.declare_exchange(&spec).await);
                }
                ChannelCommand::DeclareQueue { spec, respond_to } => {
                    debug!(queue = %spec.name, "declaring queue");
                    let _ = respond_to.send(self.broker.declare_queue(&spec).await);
                }
                ChannelCommand::Bind {
                    binding,
                    respond_to,
                } => {
                    debug!(
                        queue = %binding.queue,
                        exchange = %binding.exchange,
                        pattern = %binding.pattern,
                        "binding queue"
                    );
                    let _ = respond_to.send(self.broker.bind_queue(&binding).await);
                }
                ChannelCommand::Publish {
                    message,
                    respond_to,
                } => {
                    let message_id = message.message_id.clone();
                    let result = self.broker.publish(message).await;
                    match respond_to {
                        Some(respond_to) => {
                            let _ = respond_to.send(result);
                        }
                        None => {
                            if let Err(err) = result {
                                error!(message_id = %message_id, error = %err, "detached publish failed");
                            }
                        }
                    }
                }
                ChannelCommand::Subscribe { queue, respond_to } => {
                    debug!(queue = %queue, "subscribing");
                    let _ = respond_to.send(self.broker.subscribe(&queue).await);
                }
                ChannelCommand::Ack { tag, respond_to } => {
                    let _ = respond_to.send(self.broker.ack(&tag).await);
                }
                ChannelCommand::Nack {
                    tag,
                    requeue,
                    respond_to,
                } => {
                    let _ = respond_to.send(self.broker.nack(&tag, requeue).await);
                }
            }
        }

        info!("broker channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;

    fn message(message_id: &str) -> OutgoingMessage {
        OutgoingMessage {
            exchange: "orders".to_string(),
            routing_key: "order.created".to_string(),
            message_id: message_id.to_string(),
            persistent: true,
            body: b"{}".to_vec(),
        }
    }

    async fn open_channel() -> (Arc<MemoryBroker>, Channel) {
        let broker = Arc::new(MemoryBroker::new());
        let channel = Channel::open(broker.clone());
        channel
            .declare_exchange(ExchangeSpec::topic("orders"))
            .await
            .unwrap();
        channel
            .declare_queue(QueueSpec::durable("restaurant_orders_queue"))
            .await
            .unwrap();
        channel
            .bind(Binding::new("restaurant_orders_queue", "orders", "order.*"))
            .await
            .unwrap();
        (broker, channel)
    }

    #[tokio::test]
    async fn confirmed_publish_surfaces_broker_failures() {
        let (broker, channel) = open_channel().await;
        channel.publish_confirmed(message("m1")).await.unwrap();
        assert_eq!(broker.queue_depth("restaurant_orders_queue"), Some((1, 0)));

        broker.set_connected(false);
        let err = channel.publish_confirmed(message("m2")).await.unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));
        assert!(!channel.is_connected().await);
    }

    #[tokio::test]
    async fn detached_publish_swallows_broker_failures() {
        let (broker, channel) = open_channel().await;
        broker.set_connected(false);
        channel.publish_detached(message("m1")).await.unwrap();

        // Commands are processed in order, so this reply means m1 was handled.
        assert!(
            channel
                .declare_exchange(ExchangeSpec::topic("orders"))
                .await
                .is_err()
        );
        broker.set_connected(true);
        channel.publish_confirmed(message("m2")).await.unwrap();
        assert_eq!(broker.queue_depth("restaurant_orders_queue"), Some((1, 0)));
    }

    #[tokio::test]
    async fn acks_flow_through_the_channel() {
        let (broker, channel) = open_channel().await;
        let mut deliveries = channel.subscribe("restaurant_orders_queue").await.unwrap();
        channel.publish_confirmed(message("m1")).await.unwrap();

        let delivery = deliveries.recv().await.unwrap();
        channel.ack(delivery.tag).await.unwrap();
        assert_eq!(broker.queue_depth("restaurant_orders_queue"), Some((0, 0)));
    }
}
