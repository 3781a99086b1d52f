//! Redis Streams publisher.
//!
//! Each envelope becomes one stream entry: `XADD <destination> * envelope <json>`.

use crate::error::DispatchResult;
use crate::publisher::Publisher;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult};
use tracing::{debug, info, warn};

/// Field name under which the envelope is stored in the stream entry.
pub const ENVELOPE_FIELD: &str = "envelope";

/// Publishes envelopes to Redis Streams.
pub struct RedisStreamPublisher {
    client: Client,
    conn: Mutex<MultiplexedConnection>,
}

impl RedisStreamPublisher {
    /// Connect to Redis.
    pub async fn connect(redis_url: &str) -> DispatchResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;

        info!(redis_url, "Connected to Redis");

        Ok(Self {
            client,
            conn: Mutex::new(conn),
        })
    }

    /// Replace the shared connection with a fresh one.
    pub async fn reconnect(&self) -> DispatchResult<()> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        *self.conn.lock() = conn;
        info!("Reconnected to Redis");
        Ok(())
    }
}

#[async_trait]
impl Publisher for RedisStreamPublisher {
    async fn publish(&self, destination: &str, envelope: &[u8]) -> DispatchResult<()> {
        let mut conn = self.conn.lock().clone();

        let result: RedisResult<String> = redis::cmd("XADD")
            .arg(destination)
            .arg("*")
            .arg(ENVELOPE_FIELD)
            .arg(envelope)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(message_id) => {
                debug!(destination, message_id = %message_id, "XADD accepted");
                Ok(())
            }
            Err(e) => {
                // The entry is retried next cycle; make sure that attempt
                // does not reuse a dead connection.
                if e.is_io_error() || e.is_connection_dropped() {
                    warn!(error = %e, "Redis connection lost, reconnecting");
                    if let Err(reconnect_err) = self.reconnect().await {
                        warn!(error = %reconnect_err, "Failed to reconnect to Redis");
                    }
                }
                Err(e.into())
            }
        }
    }
}
