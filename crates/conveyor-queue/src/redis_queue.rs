//! Redis Streams queue backend.
//!
//! Messages live on a stream consumed through a consumer group. A dequeue is
//! either an `XREADGROUP` of a new entry or an `XAUTOCLAIM` of a pending entry
//! whose idle time exceeds the visibility timeout (a crashed or abandoned
//! consumer's lease). Acks are `XACK` + `XDEL`; poisoned messages move to a
//! secondary stream. Delivery counts are tracked per message id.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamAutoClaimReply, StreamId, StreamRangeReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};
use uuid::Uuid;

use conveyor_models::JobId;

use crate::error::{QueueError, QueueResult};
use crate::message::{Delivery, PoisonedMessage, QueueMessage};
use crate::queue::{Queue, QueueConfig};

const DELIVERY_COUNT_TTL_SECS: i64 = 86_400;

/// Redis Streams queue client.
pub struct RedisQueue {
    client: redis::Client,
    config: QueueConfig,
    consumer_name: String,
    /// How long a dequeue blocks waiting for a new entry
    block_ms: u64,
}

impl RedisQueue {
    /// Connect and ensure the consumer group exists.
    pub async fn connect(redis_url: &str, config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let queue = Self {
            client,
            config,
            consumer_name: format!("worker-{}", Uuid::new_v4()),
            block_ms: 1000,
        };
        queue.init().await?;
        Ok(queue)
    }

    /// Create the consumer group if it does not exist yet.
    async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn delivery_count_key(&self, message_id: &str) -> String {
        format!("{}:deliveries:{}", self.config.stream_name, message_id)
    }

    /// Turn a stream entry into a delivery, bumping its delivery count.
    ///
    /// A malformed entry is moved straight to the poison stream so it can
    /// never wedge the consumer group.
    async fn delivery_from_entry(
        &self,
        conn: &mut MultiplexedConnection,
        entry: &StreamId,
    ) -> QueueResult<Option<Delivery>> {
        let Some(job_id) = field_string(entry, "job_id") else {
            warn!("Malformed queue entry {}, moving to poison stream", entry.id);
            redis::cmd("XADD")
                .arg(&self.config.poison_stream_name)
                .arg("*")
                .arg("job_id")
                .arg("")
                .arg("error")
                .arg("malformed queue entry")
                .arg("original_id")
                .arg(&entry.id)
                .query_async::<()>(conn)
                .await?;
            self.remove(conn, &entry.id).await?;
            return Ok(None);
        };

        let enqueued_at = field_string(entry, "enqueued_at")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let count_key = self.delivery_count_key(&entry.id);
        let delivery_count: u32 = conn.incr(&count_key, 1).await?;
        conn.expire::<_, ()>(&count_key, DELIVERY_COUNT_TTL_SECS).await?;

        Ok(Some(Delivery {
            message: QueueMessage {
                job_id: JobId::from_string(job_id),
                enqueued_at,
                delivery_count,
            },
            lease: entry.id.clone(),
        }))
    }

    /// Claim one pending entry whose lease (idle time) has expired.
    async fn claim_expired(
        &self,
        conn: &mut MultiplexedConnection,
    ) -> QueueResult<Option<Delivery>> {
        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg(self.config.visibility_timeout.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(conn)
            .await?;

        for entry in &reply.claimed {
            if let Some(delivery) = self.delivery_from_entry(conn, entry).await? {
                info!(job_id = %delivery.message.job_id, "Claimed expired lease");
                return Ok(Some(delivery));
            }
        }
        Ok(None)
    }

    /// Ack + delete a stream entry and its delivery counter.
    async fn remove(&self, conn: &mut MultiplexedConnection, message_id: &str) -> QueueResult<()> {
        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(conn)
            .await?;

        conn.del::<_, ()>(self.delivery_count_key(message_id)).await?;
        Ok(())
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn enqueue(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job_id")
            .arg(job_id.as_str())
            .arg("enqueued_at")
            .arg(Utc::now().to_rfc3339())
            .query_async(&mut conn)
            .await?;

        debug!("Enqueued job {} as stream entry {}", job_id, message_id);
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<Option<Delivery>> {
        let mut conn = self.conn().await?;

        // Expired leases first so redeliveries cannot starve behind new work.
        if let Some(delivery) = self.claim_expired(&mut conn).await? {
            return Ok(Some(delivery));
        }

        let reply: StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        for stream_key in &reply.keys {
            for entry in &stream_key.ids {
                if let Some(delivery) = self.delivery_from_entry(&mut conn, entry).await? {
                    return Ok(Some(delivery));
                }
            }
        }

        Ok(None)
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        self.remove(&mut conn, &delivery.lease).await?;
        debug!(job_id = %delivery.message.job_id, "Acknowledged delivery");
        Ok(())
    }

    async fn poison(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::cmd("XADD")
            .arg(&self.config.poison_stream_name)
            .arg("*")
            .arg("job_id")
            .arg(delivery.message.job_id.as_str())
            .arg("enqueued_at")
            .arg(delivery.message.enqueued_at.to_rfc3339())
            .arg("delivery_count")
            .arg(delivery.message.delivery_count)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&delivery.lease)
            .query_async::<()>(&mut conn)
            .await?;

        self.remove(&mut conn, &delivery.lease).await?;

        warn!(job_id = %delivery.message.job_id, "Moved message to poison queue: {}", error);
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    async fn poison_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.poison_stream_name).await?;
        Ok(len)
    }

    async fn poisoned(&self) -> QueueResult<Vec<PoisonedMessage>> {
        let mut conn = self.conn().await?;

        let reply: StreamRangeReply = redis::cmd("XRANGE")
            .arg(&self.config.poison_stream_name)
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(100)
            .query_async(&mut conn)
            .await?;

        let mut parked = Vec::with_capacity(reply.ids.len());
        for entry in &reply.ids {
            let job_id = field_string(entry, "job_id").unwrap_or_default();
            let enqueued_at = field_string(entry, "enqueued_at")
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            let delivery_count = field_string(entry, "delivery_count")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            parked.push(PoisonedMessage {
                message: QueueMessage {
                    job_id: JobId::from_string(job_id),
                    enqueued_at,
                    delivery_count,
                },
                error: field_string(entry, "error").unwrap_or_default(),
                poisoned_at: stream_id_timestamp(&entry.id).unwrap_or_else(Utc::now),
            });
        }

        Ok(parked)
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    fn visibility_timeout(&self) -> Duration {
        self.config.visibility_timeout
    }
}

/// Extract a string field from a stream entry.
fn field_string(entry: &StreamId, key: &str) -> Option<String> {
    match entry.map.get(key) {
        Some(redis::Value::BulkString(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Some(redis::Value::SimpleString(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Stream entry ids are `<unix-millis>-<seq>`.
fn stream_id_timestamp(id: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = id.split('-').next()?.parse().ok()?;
    DateTime::from_timestamp_millis(millis)
}
