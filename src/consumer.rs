//! Stream Consumer (spec §4.3): idempotent group bootstrap plus the
//! `XREADGROUP` polling loop that feeds the [`crate::processor::Processor`].
//!
//! The teacher crate has no consumer-group machinery at all — its streams
//! are append/read-latest only (`traits.rs::StreamingBackend`). The shape
//! here is grounded instead on
//! `other_examples/2363db81_..._redis_streams.rs.rs`'s
//! `RedisStreamsEventBus` (`ensure_consumer_group`, `read_new_sync`,
//! `parse_stream_entry`), reworked from its blocking `redis::Connection` +
//! `std::thread::spawn` style into the teacher's `tokio::spawn` +
//! `ConnectionManager` + `tracing` idiom (`invalidation.rs::InvalidationSubscriber`).

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::entity::{Entity, Repository};
use crate::envelope::{names, Intent};
use crate::error::CoreError;
use crate::processor::Processor;

/// Per-`(E, R)` consumer-group reader (spec §4.3, §3 "Consumer group
/// name"/"Consumer name"). Bootstraps its group idempotently, then polls
/// in a background task, handing each decoded [`Intent`] to a
/// [`Processor`] via `orchestrate`.
pub struct StreamConsumer<E: Entity, R: Repository> {
    conn: ConnectionManager,
    stream_key: String,
    group: String,
    consumer: String,
    poll_timeout: Duration,
    batch_size: usize,
    shutdown: broadcast::Sender<()>,
    _marker: PhantomData<(E, R)>,
}

impl<E: Entity, R: Repository> StreamConsumer<E, R> {
    #[must_use]
    pub fn new(conn: ConnectionManager, poll_timeout: Duration, batch_size: usize) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            conn,
            stream_key: names::entity_stream(E::type_name()),
            group: names::group(R::type_name()),
            consumer: names::consumer(E::type_name(), R::type_name()),
            poll_timeout,
            batch_size,
            shutdown,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[must_use]
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// `ensure_group` (spec §4.3 steps 1-3): create the group at offset
    /// `0`; tolerate `BUSYGROUP` (already exists). If the stream itself
    /// doesn't exist yet, bootstrap it with a one-off "init" entry so the
    /// group can be created without `MKSTREAM` hiding that the stream was
    /// ever empty (spec §3 Lifecycle, §9 open question b).
    pub async fn ensure_group(&self) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();

        let created: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(_) => {
                info!(stream = %self.stream_key, group = %self.group, "created consumer group");
                Ok(())
            }
            Err(e) if is_busygroup(&e) => {
                debug!(stream = %self.stream_key, group = %self.group, "consumer group already exists");
                Ok(())
            }
            Err(e) if is_missing_stream(&e) => {
                self.bootstrap_stream_and_group().await
            }
            Err(e) => Err(CoreError::StoreUnavailable {
                store: "redis-stream",
                source: e.into(),
            }),
        }
    }

    async fn bootstrap_stream_and_group(&self) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();

        let mut xadd = redis::cmd("XADD");
        xadd.arg(&self.stream_key).arg("*");
        for (field, value) in Intent::init_marker_fields() {
            xadd.arg(field).arg(value);
        }
        let _: String = xadd.query_async(&mut conn).await.map_err(|e| {
            CoreError::StoreUnavailable {
                store: "redis-stream",
                source: e.into(),
            }
        })?;

        redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| CoreError::StoreUnavailable {
                store: "redis-stream",
                source: e.into(),
            })?;

        info!(
            stream = %self.stream_key,
            group = %self.group,
            "bootstrapped missing stream and created consumer group"
        );
        Ok(())
    }

    /// `read_batch` (spec §4.3): `XREADGROUP GROUP group consumer COUNT n
    /// BLOCK ms STREAMS stream >`. A `BLOCK` timeout with nothing new
    /// yields an empty batch, not an error.
    async fn read_batch(&self) -> Result<Vec<Intent>, CoreError> {
        let mut conn = self.conn.clone();

        let reply: Option<HashMap<String, Vec<(String, HashMap<String, String>)>>> =
            redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(&self.group)
                .arg(&self.consumer)
                .arg("COUNT")
                .arg(self.batch_size)
                .arg("BLOCK")
                .arg(u64::try_from(self.poll_timeout.as_millis()).unwrap_or(u64::MAX))
                .arg("STREAMS")
                .arg(&self.stream_key)
                .arg(">")
                .query_async(&mut conn)
                .await
                .map_err(|e| CoreError::StoreUnavailable {
                    store: "redis-stream",
                    source: e.into(),
                })?;

        let entries = reply
            .and_then(|mut streams| streams.remove(&self.stream_key))
            .unwrap_or_default();

        Ok(entries
            .into_iter()
            .map(|(id, fields)| Intent::new(id, fields))
            .collect())
    }

    /// Spawn the polling loop (spec §4.3 "Runs continuously until
    /// shutdown"). Each batch entry is orchestrated (processed then
    /// acknowledged) in turn; a failure leaves the entry pending for the
    /// [`crate::reaper::PendingReaper`] to pick up later instead of
    /// blocking the rest of the batch.
    pub fn spawn(self: Arc<Self>, processor: Arc<Processor<E, R>>) -> ConsumerHandle {
        let shutdown_tx = self.shutdown.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        let task = tokio::spawn(async move {
            if let Err(e) = self.ensure_group().await {
                error!(error = %e, "failed to bootstrap consumer group, consumer will not start");
                return;
            }

            loop {
                if shutdown_rx.try_recv().is_ok() {
                    info!(consumer = %self.consumer, "stream consumer shutting down");
                    break;
                }

                let batch = tokio::select! {
                    result = self.read_batch() => result,
                    _ = shutdown_rx.recv() => {
                        info!(consumer = %self.consumer, "stream consumer shutting down");
                        break;
                    }
                };

                let intents = match batch {
                    Ok(intents) => intents,
                    Err(e) => {
                        warn!(error = %e, "stream read failed, retrying in 1s");
                        tokio::select! {
                            () = tokio::time::sleep(Duration::from_secs(1)) => {},
                            _ = shutdown_rx.recv() => break,
                        }
                        continue;
                    }
                };

                for intent in &intents {
                    if let Err(e) = processor.orchestrate(intent).await {
                        warn!(
                            stream_id = %intent.stream_id,
                            error = %e,
                            "failed to orchestrate entry, left pending for the reaper"
                        );
                    }
                }
            }
        });

        ConsumerHandle { shutdown: shutdown_tx, task }
    }
}

/// Handle returned by [`StreamConsumer::spawn`]; mirrors the teacher's
/// `InvalidationSubscriber` shutdown/join shape.
pub struct ConsumerHandle {
    shutdown: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

fn is_busygroup(err: &redis::RedisError) -> bool {
    err.code() == Some("BUSYGROUP")
}

fn is_missing_stream(err: &redis::RedisError) -> bool {
    err.to_string().to_uppercase().contains("NOGROUP")
        || err.to_string().contains("requires the key to exist")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_handle_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ConsumerHandle>();
    }
}
