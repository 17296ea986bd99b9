use std::sync::Arc;
use std::time::Duration;

use orderflow_bus::{
    BrokerError, Channel, Consumer, DedupCache, EventHandler, FailurePolicy, OutboxRelay,
    Topology, TopologyManager,
};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Which queue a service consumes and how it treats handler failures.
pub struct ConsumerPlan {
    pub queue: &'static str,
    pub policy: FailurePolicy,
    pub dedup: DedupCache,
}

/// Background tasks of one running service.
pub struct ServiceRuntime {
    consumer: JoinHandle<()>,
    relay: JoinHandle<()>,
}

impl ServiceRuntime {
    /// Declares the topology first; nothing is spawned if that fails.
    pub async fn start(
        channel: &Channel,
        topology: &Topology,
        plan: ConsumerPlan,
        handler: Arc<dyn EventHandler>,
        relay: OutboxRelay,
        outbox_poll: Duration,
    ) -> Result<Self, BrokerError> {
        TopologyManager::declare(channel, topology).await?;

        let consumer = Consumer::new(channel.clone(), plan.queue, plan.policy, plan.dedup);
        let queue = plan.queue;
        let consumer = tokio::spawn(async move {
            if let Err(err) = consumer.run(handler).await {
                error!(queue, error = %err, "consumer stopped; events on this queue are no longer processed");
            }
        });
        let relay = tokio::spawn(relay.run(outbox_poll));
        info!(queue, "service runtime started");

        Ok(Self { consumer, relay })
    }

    pub fn consumer_finished(&self) -> bool {
        self.consumer.is_finished()
    }

    pub fn shutdown(self) {
        self.consumer.abort();
        self.relay.abort();
    }
}
