//! Redis-backed [`ConfigRepository`].
//!
//! Each config is a hash at `queue:{e}:config`; the set `queue:configured`
//! indexes the events that have one so the sweeper can enumerate them
//! without `SCAN`.

use crate::error::store_error;
use crate::keys::{CONFIGURED_EVENTS, EventKeys};
use purchase_queue_core::{
    EventId, QueueConfig, QueueError, Result,
    store::{ConfigRepository, StoreFuture},
};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;

const MAX_CONCURRENT: &str = "maxConcurrentBuyers";
const RESERVATION: &str = "reservationTimeSeconds";
const QUEUE_TIMEOUT: &str = "queueTimeoutSeconds";
const ENABLED: &str = "queueEnabled";

/// `Redis` config repository.
#[derive(Clone)]
pub struct RedisConfigRepository {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
}

impl RedisConfigRepository {
    /// Connect to `Redis`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(store_error("create Redis client"))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(store_error("create Redis connection manager"))?;
        Ok(Self { conn_manager })
    }

    /// Share an existing connection manager.
    #[must_use]
    pub const fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }
}

fn field<T: std::str::FromStr>(fields: &HashMap<String, String>, name: &str) -> Result<T> {
    fields
        .get(name)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| QueueError::CorruptState(format!("config field {name} missing or invalid")))
}

/// Rebuild a config from its hash fields.
fn decode(event_id: &EventId, fields: &HashMap<String, String>) -> Result<QueueConfig> {
    let enabled: String = field(fields, ENABLED)?;
    Ok(QueueConfig {
        event_id: event_id.clone(),
        max_concurrent_buyers: field(fields, MAX_CONCURRENT)?,
        reservation_time_seconds: field(fields, RESERVATION)?,
        queue_timeout_seconds: field(fields, QUEUE_TIMEOUT)?,
        queue_enabled: enabled == "1",
    })
}

fn encode(config: &QueueConfig) -> [(&'static str, String); 4] {
    [
        (MAX_CONCURRENT, config.max_concurrent_buyers.to_string()),
        (RESERVATION, config.reservation_time_seconds.to_string()),
        (QUEUE_TIMEOUT, config.queue_timeout_seconds.to_string()),
        (ENABLED, if config.queue_enabled { "1" } else { "0" }.to_string()),
    ]
}

impl ConfigRepository for RedisConfigRepository {
    fn load_config<'a>(
        &'a self,
        event_id: &'a EventId,
    ) -> StoreFuture<'a, Option<QueueConfig>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let keys = EventKeys::new(event_id);
            let fields: HashMap<String, String> = conn
                .hgetall(&keys.config)
                .await
                .map_err(store_error("load queue config"))?;
            if fields.is_empty() {
                return Ok(None);
            }
            decode(event_id, &fields).map(Some)
        })
    }

    fn save_config<'a>(&'a self, config: &'a QueueConfig) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let keys = EventKeys::new(&config.event_id);
            let _: () = redis::pipe()
                .atomic()
                .del(&keys.config)
                .ignore()
                .hset_multiple(&keys.config, &encode(config))
                .ignore()
                .sadd(CONFIGURED_EVENTS, config.event_id.as_str())
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(store_error("save queue config"))?;

            tracing::info!(
                event_id = %config.event_id,
                max_concurrent_buyers = config.max_concurrent_buyers,
                queue_enabled = config.queue_enabled,
                "Saved queue config"
            );
            Ok(())
        })
    }

    fn delete_config<'a>(&'a self, event_id: &'a EventId) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let keys = EventKeys::new(event_id);
            let (deleted, _): (u64, u64) = redis::pipe()
                .atomic()
                .del(&keys.config)
                .srem(CONFIGURED_EVENTS, event_id.as_str())
                .query_async(&mut conn)
                .await
                .map_err(store_error("delete queue config"))?;

            if deleted > 0 {
                tracing::info!(event_id = %event_id, "Deleted queue config");
            }
            Ok(deleted > 0)
        })
    }

    fn configured_events(&self) -> StoreFuture<'_, Vec<EventId>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let members: Vec<String> = conn
                .smembers(CONFIGURED_EVENTS)
                .await
                .map_err(store_error("list configured events"))?;
            let mut events = members
                .into_iter()
                .map(|raw| {
                    EventId::parse(raw)
                        .map_err(|e| QueueError::CorruptState(format!("event id: {e}")))
                })
                .collect::<Result<Vec<_>>>()?;
            events.sort();
            Ok(events)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_encoded_config() {
        let config = QueueConfig::new(EventId::new("e1"), 4)
            .with_reservation_seconds(90)
            .with_enabled(false);
        let fields: HashMap<String, String> = encode(&config)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(decode(&EventId::new("e1"), &fields).unwrap(), config);
    }

    #[test]
    fn test_decode_rejects_partial_hash() {
        let fields = HashMap::from([(MAX_CONCURRENT.to_string(), "three".to_string())]);
        assert!(matches!(
            decode(&EventId::new("e1"), &fields),
            Err(QueueError::CorruptState(_))
        ));
    }
}
