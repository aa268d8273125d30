//! The Redis-backed bus: stream append/read-group/ack, pub/sub, and a thin
//! KV/hash cache with TTL, following the `ConnectionManager` +
//! `AsyncCommands` pattern used for coordination caches elsewhere in this
//! ecosystem.

use crate::error::BusError;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct StreamBus {
    conn: ConnectionManager,
    client: Client,
    ensured_groups: Arc<Mutex<HashSet<(String, String)>>>,
}

impl StreamBus {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        info!(url, "connected to stream bus");
        Ok(Self {
            conn,
            client,
            ensured_groups: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Idempotently creates the consumer group, ignoring `BUSYGROUP`. A
    /// local cache avoids a round trip once a group is known to exist.
    pub async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BusError> {
        let key = (stream.to_owned(), group.to_owned());
        {
            let seen = self.ensured_groups.lock().await;
            if seen.contains(&key) {
                return Ok(());
            }
        }
        let mut conn = self.conn.clone();
        let result: Result<(), redis::RedisError> =
            conn.xgroup_create_mkstream(stream, group, "$").await;
        match result {
            Ok(()) => {}
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream, group, "consumer group already exists");
            }
            Err(e) => return Err(e.into()),
        }
        self.ensured_groups.lock().await.insert(key);
        Ok(())
    }

    pub async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> Result<String, BusError> {
        let mut conn = self.conn.clone();
        let id: String = conn.xadd(stream, "*", fields).await?;
        Ok(id)
    }

    /// Reads new entries for `consumer` within `group`, always resuming
    /// from `">"` (at-least-once delivery; the caller acks after
    /// successful processing).
    pub async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);
        let reply: StreamReadReply = conn.xread_options(&[stream], &[">"], &opts).await?;

        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                let fields = id
                    .map
                    .into_iter()
                    .map(|(k, v)| (k, redis::from_redis_value::<String>(&v).unwrap_or_default()))
                    .collect();
                entries.push(StreamEntry { id: id.id, fields });
            }
        }
        Ok(entries)
    }

    pub async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(stream, group, &[id]).await?;
        Ok(())
    }

    /// Runs `handler` for every entry read from `stream`/`group`, acking on
    /// success, reconnecting the group and backing off on read errors per
    /// the at-least-once recovery contract.
    pub async fn run_read_loop<F, Fut>(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        backoff: Duration,
        mut handler: F,
    ) where
        F: FnMut(StreamEntry) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        loop {
            if let Err(e) = self.ensure_group(stream, group).await {
                warn!(error = %e, stream, group, "failed to ensure consumer group, backing off");
                tokio::time::sleep(backoff).await;
                continue;
            }
            match self
                .read_group(stream, group, consumer, 100, Duration::from_secs(1))
                .await
            {
                Ok(entries) => {
                    for entry in entries {
                        let id = entry.id.clone();
                        handler(entry).await;
                        if let Err(e) = self.ack(stream, group, &id).await {
                            warn!(error = %e, stream, id, "failed to ack stream entry");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, stream, "stream read failed, backing off");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(channel, payload).await?;
        Ok(())
    }

    /// Opens a dedicated pub/sub connection (the multiplexed
    /// `ConnectionManager` does not support subscriptions).
    pub async fn subscribe(&self, channel: &str) -> Result<redis::aio::PubSub, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(pubsub)
    }

    pub async fn set_ex<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let bytes = serde_json::to_vec(value)?;
        let _: () = conn.set_ex(key, bytes, ttl_secs).await?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, BusError> {
        let mut conn = self.conn.clone();
        let bytes: Option<Vec<u8>> = conn.get(key).await?;
        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(key, field, value).await?;
        Ok(())
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, BusError> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }

    pub async fn hdel(&self, key: &str, field: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(key, field).await?;
        Ok(())
    }

    pub async fn hkeys(&self, key: &str) -> Result<Vec<String>, BusError> {
        let mut conn = self.conn.clone();
        Ok(conn.hkeys(key).await?)
    }

    pub async fn expire(&self, key: &str, ttl_secs: i64) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _: () = conn.expire(key, ttl_secs).await?;
        Ok(())
    }
}
