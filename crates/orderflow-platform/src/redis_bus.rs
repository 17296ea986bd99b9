use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use orderflow_bus::{
    Binding, Broker, BrokerError, Delivery, DeliveryTag, ExchangeSpec, OutgoingMessage,
    QueueSpec, topic_matches,
};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, RedisError};
use tokio::sync::mpsc;
use tracing::{info, warn};

const GROUP: &str = "orderflow";
const READ_COUNT: usize = 32;
const READ_BLOCK_MS: usize = 5_000;
const MAX_READ_FAILURES: u32 = 5;
const PREFETCH: usize = 64;

/// Topic broker on Redis Streams. Every queue is a stream read through one
/// consumer group; exchanges, queues and bindings are plain keys.
#[derive(Clone)]
pub struct RedisBroker {
    client: Client,
    connection: MultiplexedConnection,
    consumer_name: String,
}

impl RedisBroker {
    pub async fn connect(redis_url: &str, consumer_name: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            client,
            connection,
            consumer_name: consumer_name.to_string(),
        })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

fn exchange_key(name: &str) -> String {
    format!("orderflow:exchange:{name}")
}

fn queue_key(name: &str) -> String {
    format!("orderflow:queue:{name}")
}

fn bindings_key(exchange: &str) -> String {
    format!("orderflow:bindings:{exchange}")
}

fn stream_key(queue: &str) -> String {
    format!("orderflow:stream:{queue}")
}

fn binding_member(queue: &str, pattern: &str) -> String {
    format!("{queue} {pattern}")
}

fn parse_binding_member(member: &str) -> Option<(&str, &str)> {
    member.split_once(' ')
}

fn unavailable(err: RedisError) -> BrokerError {
    BrokerError::unavailable(err)
}

/// Compares stored declaration fields with the requested ones. Empty means
/// not declared yet.
fn check_declaration(
    kind: &str,
    name: &str,
    existing: &HashMap<String, String>,
    wanted: &[(&str, String)],
) -> Result<bool, BrokerError> {
    if existing.is_empty() {
        return Ok(false);
    }
    let same = wanted
        .iter()
        .all(|(field, value)| existing.get(*field) == Some(value));
    if same {
        Ok(true)
    } else {
        Err(BrokerError::PreconditionFailed(format!(
            "{kind} {name} already declared with different parameters"
        )))
    }
}

fn delivery_from_entry(queue: &str, entry: &StreamId, from_pending: bool) -> Delivery {
    let redelivered = from_pending || entry.get::<String>("redelivered").as_deref() == Some("1");
    Delivery {
        tag: DeliveryTag {
            queue: queue.to_string(),
            id: entry.id.clone(),
        },
        message_id: entry
            .get::<String>("message_id")
            .filter(|id| !id.is_empty()),
        exchange: entry.get("exchange").unwrap_or_default(),
        routing_key: entry.get("routing_key").unwrap_or_default(),
        body: entry.get("body").unwrap_or_default(),
        redelivered,
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BrokerError> {
        let mut conn = self.conn();
        let key = exchange_key(&spec.name);
        let wanted = [
            ("kind", spec.kind.as_str().to_string()),
            ("durable", spec.durable.to_string()),
        ];

        let existing: HashMap<String, String> = conn.hgetall(&key).await.map_err(unavailable)?;
        if check_declaration("exchange", &spec.name, &existing, &wanted)? {
            return Ok(());
        }
        let _: () = conn.hset_multiple(&key, &wanted).await.map_err(unavailable)?;
        Ok(())
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), BrokerError> {
        let mut conn = self.conn();
        let key = queue_key(&spec.name);
        let wanted = [("durable", spec.durable.to_string())];

        let existing: HashMap<String, String> = conn.hgetall(&key).await.map_err(unavailable)?;
        if !check_declaration("queue", &spec.name, &existing, &wanted)? {
            let _: () = conn.hset_multiple(&key, &wanted).await.map_err(unavailable)?;
        }

        let created: Result<(), RedisError> = conn
            .xgroup_create_mkstream(stream_key(&spec.name), GROUP, "0")
            .await;
        match created {
            Ok(()) => Ok(()),
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn bind_queue(&self, binding: &Binding) -> Result<(), BrokerError> {
        let mut conn = self.conn();
        let exchange_exists: bool = conn
            .exists(exchange_key(&binding.exchange))
            .await
            .map_err(unavailable)?;
        if !exchange_exists {
            return Err(BrokerError::NotFound(format!(
                "exchange {}",
                binding.exchange
            )));
        }
        let queue_exists: bool = conn
            .exists(queue_key(&binding.queue))
            .await
            .map_err(unavailable)?;
        if !queue_exists {
            return Err(BrokerError::NotFound(format!("queue {}", binding.queue)));
        }

        let _: () = conn
            .sadd(
                bindings_key(&binding.exchange),
                binding_member(&binding.queue, &binding.pattern),
            )
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn publish(&self, message: OutgoingMessage) -> Result<(), BrokerError> {
        let mut conn = self.conn();
        let exchange_exists: bool = conn
            .exists(exchange_key(&message.exchange))
            .await
            .map_err(unavailable)?;
        if !exchange_exists {
            return Err(BrokerError::NotFound(format!(
                "exchange {}",
                message.exchange
            )));
        }

        let members: Vec<String> = conn
            .smembers(bindings_key(&message.exchange))
            .await
            .map_err(unavailable)?;
        let targets: BTreeSet<&str> = members
            .iter()
            .filter_map(|member| parse_binding_member(member))
            .filter(|(_, pattern)| topic_matches(pattern, &message.routing_key))
            .map(|(queue, _)| queue)
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for queue in &targets {
            pipe.cmd("XADD")
                .arg(stream_key(queue))
                .arg("*")
                .arg("message_id")
                .arg(&message.message_id)
                .arg("exchange")
                .arg(&message.exchange)
                .arg("routing_key")
                .arg(&message.routing_key)
                .arg("body")
                .arg(message.body.as_slice())
                .arg("redelivered")
                .arg("0")
                .ignore();
        }
        let _: () = pipe.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        let queue_exists: bool = self
            .conn()
            .exists(queue_key(queue))
            .await
            .map_err(unavailable)?;
        if !queue_exists {
            return Err(BrokerError::NotFound(format!("queue {queue}")));
        }

        // Blocking reads get their own connection so they never stall the
        // shared one.
        let reader = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        let (sender, receiver) = mpsc::channel(PREFETCH);
        let stream = StreamReader {
            queue: queue.to_string(),
            consumer_name: self.consumer_name.clone(),
            conn: reader,
            sender,
        };
        tokio::spawn(stream.run());

        Ok(receiver)
    }

    async fn ack(&self, tag: &DeliveryTag) -> Result<(), BrokerError> {
        let mut conn = self.conn();
        let stream = stream_key(&tag.queue);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("XACK")
            .arg(&stream)
            .arg(GROUP)
            .arg(&tag.id)
            .ignore()
            .cmd("XDEL")
            .arg(&stream)
            .arg(&tag.id)
            .ignore();
        let _: () = pipe.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(())
    }

    async fn nack(&self, tag: &DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        let mut conn = self.conn();
        let stream = stream_key(&tag.queue);
        let mut pipe = redis::pipe();
        pipe.atomic();

        if requeue {
            let range: StreamRangeReply = conn
                .xrange(&stream, &tag.id, &tag.id)
                .await
                .map_err(unavailable)?;
            let Some(entry) = range.ids.first() else {
                return Err(BrokerError::PreconditionFailed(format!(
                    "unknown delivery tag {}",
                    tag.id
                )));
            };
            let original = delivery_from_entry(&tag.queue, entry, false);
            pipe.cmd("XADD")
                .arg(&stream)
                .arg("*")
                .arg("message_id")
                .arg(original.message_id.unwrap_or_default())
                .arg("exchange")
                .arg(original.exchange)
                .arg("routing_key")
                .arg(original.routing_key)
                .arg("body")
                .arg(original.body)
                .arg("redelivered")
                .arg("1")
                .ignore();
        }

        pipe.cmd("XACK")
            .arg(&stream)
            .arg(GROUP)
            .arg(&tag.id)
            .ignore()
            .cmd("XDEL")
            .arg(&stream)
            .arg(&tag.id)
            .ignore();
        let _: () = pipe.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        let mut conn = self.conn();
        let pong: Result<String, RedisError> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }
}

/// Feeds one queue's stream into a delivery channel. Entries this consumer
/// read but never acked (a crash before settling) come first.
struct StreamReader {
    queue: String,
    consumer_name: String,
    conn: MultiplexedConnection,
    sender: mpsc::Sender<Delivery>,
}

impl StreamReader {
    async fn run(mut self) {
        let stream = stream_key(&self.queue);
        let mut cursor = Some("0".to_string());
        let mut failures = 0;
        info!(queue = %self.queue, consumer = %self.consumer_name, "stream reader started");

        loop {
            let from_pending = cursor.is_some();
            let start = cursor.clone().unwrap_or_else(|| ">".to_string());
            let mut options = StreamReadOptions::default()
                .group(GROUP, &self.consumer_name)
                .count(READ_COUNT);
            if !from_pending {
                options = options.block(READ_BLOCK_MS);
            }

            let reply: Result<Option<StreamReadReply>, RedisError> = self
                .conn
                .xread_options(&[&stream], &[&start], &options)
                .await;
            let entries: Vec<StreamId> = match reply {
                Ok(reply) => {
                    failures = 0;
                    reply
                        .map(|reply| reply.keys.into_iter().flat_map(|key| key.ids).collect())
                        .unwrap_or_default()
                }
                Err(err) => {
                    failures += 1;
                    warn!(queue = %self.queue, error = %err, failures, "stream read failed");
                    if failures >= MAX_READ_FAILURES {
                        break;
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if from_pending {
                cursor = entries.last().map(|entry| entry.id.clone());
            }
            for entry in &entries {
                let delivery = delivery_from_entry(&self.queue, entry, from_pending);
                if self.sender.send(delivery).await.is_err() {
                    info!(queue = %self.queue, "delivery receiver dropped; stream reader stopped");
                    return;
                }
            }
            if self.sender.is_closed() {
                return;
            }
        }

        warn!(queue = %self.queue, "stream reader gave up");
    }
}
