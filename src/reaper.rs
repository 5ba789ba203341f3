//! Pending-Entry Reaper (spec §4.5): periodically re-drives stream entries
//! this consumer holds but never acknowledged, and routes exhausted ones
//! to the dead-letter stream.
//!
//! Grounded on `other_examples/2363db81_..._redis_streams.rs.rs`'s
//! `read_pending_sync`/`send_to_dlq_sync`, reworked onto `tokio::time`
//! plus the teacher's single-flight `CleanupGuard` idiom
//! (`facade.rs::CleanupGuard`, itself grounded on the teacher's
//! `cache_manager.rs`) so one slow tick can't pile up concurrent ticks.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::CoreConfig;
use crate::entity::{Entity, Repository};
use crate::envelope::{names, DlqRecord, Intent};
use crate::error::CoreError;
use crate::processor::Processor;
use crate::producer::StreamProducer;

enum RetryOutcome {
    /// The entry was handled (acked, left pending for next tick, or
    /// vanished); keep going through the rest of the batch.
    Continue,
    /// The entry was moved to the dead-letter stream; spec §4.5 step 2d/2e
    /// says to stop processing the remaining batch once this happens.
    Stop,
}

/// Periodic re-driver for one `(E, R)` consumer group's pending-entries
/// list (spec §4.5). Ticks on a fixed delay; single-flight per instance so
/// a slow tick can't overlap the next one.
pub struct PendingReaper<E: Entity, R: Repository> {
    conn: ConnectionManager,
    stream_key: String,
    group: String,
    consumer: String,
    dlq: StreamProducer,
    processor: Arc<Processor<E, R>>,
    config: CoreConfig,
    in_flight: AtomicBool,
    shutdown: broadcast::Sender<()>,
    _marker: PhantomData<E>,
}

impl<E: Entity, R: Repository> PendingReaper<E, R> {
    #[must_use]
    pub fn new(
        conn: ConnectionManager,
        dlq: StreamProducer,
        processor: Arc<Processor<E, R>>,
        config: CoreConfig,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            conn,
            stream_key: names::entity_stream(E::type_name()),
            group: names::group(R::type_name()),
            consumer: names::consumer(E::type_name(), R::type_name()),
            dlq,
            processor,
            config,
            in_flight: AtomicBool::new(false),
            shutdown,
            _marker: PhantomData,
        }
    }

    /// Spawn the fixed-delay tick loop (spec §4.5 "Runs on a fixed
    /// delay").
    pub fn spawn(self: Arc<Self>) -> ReaperHandle {
        let shutdown_tx = self.shutdown.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        let interval = self.config.reaper_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.tick().await,
                    _ = shutdown_rx.recv() => {
                        info!(consumer = %self.consumer, "pending reaper shutting down");
                        break;
                    }
                }
            }
        });

        ReaperHandle { shutdown: shutdown_tx, task }
    }

    /// One tick (spec §4.5 steps 1-2). Guarded by `in_flight` so an
    /// overrunning tick is skipped rather than run concurrently with
    /// itself.
    async fn tick(&self) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!(consumer = %self.consumer, "reaper tick already in flight, skipping");
            return;
        }
        let _guard = InFlightGuard { flag: &self.in_flight };

        let count = match self.pending_count().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "reaper: failed to query pending summary");
                return;
            }
        };
        if count == 0 {
            return;
        }

        let entries = match self.pending_entries().await {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "reaper: failed to list pending entries");
                return;
            }
        };

        for (stream_id, _times_delivered) in entries {
            if let RetryOutcome::Stop = self.retry_one(&stream_id).await {
                error!(stream_id = %stream_id, "reaper: entry moved to DLQ, stopping this batch");
                break;
            }
        }
    }

    /// Step 1: `XPENDING stream group` summary; bail out early when
    /// nothing is pending.
    async fn pending_count(&self) -> Result<i64, CoreError> {
        let mut conn = self.conn.clone();
        let reply: (i64, Option<String>, Option<String>, Option<redis::Value>) =
            redis::cmd("XPENDING")
                .arg(&self.stream_key)
                .arg(&self.group)
                .query_async(&mut conn)
                .await
                .map_err(|e| CoreError::StoreUnavailable {
                    store: "redis-stream",
                    source: e.into(),
                })?;
        Ok(reply.0)
    }

    /// Step 2: the extended form, filtered to this consumer, up to
    /// `reaper_batch_size` entries (spec §4.5 "Fetch up to BATCH_SIZE
    /// pending entries for this consumer with unbounded age").
    async fn pending_entries(&self) -> Result<Vec<(String, i64)>, CoreError> {
        let mut conn = self.conn.clone();
        let entries: Vec<(String, String, i64, i64)> = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("-")
            .arg("+")
            .arg(self.config.reaper_batch_size)
            .arg(&self.consumer)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::StoreUnavailable {
                store: "redis-stream",
                source: e.into(),
            })?;

        Ok(entries
            .into_iter()
            .map(|(id, _consumer, _idle_ms, times_delivered)| (id, times_delivered))
            .collect())
    }

    async fn read_entry(&self, stream_id: &str) -> Result<Option<Intent>, CoreError> {
        let mut conn = self.conn.clone();
        let entries: Vec<(String, HashMap<String, String>)> = redis::cmd("XRANGE")
            .arg(&self.stream_key)
            .arg(stream_id)
            .arg(stream_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::StoreUnavailable {
                store: "redis-stream",
                source: e.into(),
            })?;

        Ok(entries
            .into_iter()
            .next()
            .map(|(id, fields)| Intent::new(id, fields)))
    }

    /// `INCR` the retry counter, `EXPIRE` it to `max_retention` (spec §3
    /// "Retry counter key", §4.5 step 2a).
    async fn bump_retry_counter(&self, key: &str) -> Result<u64, CoreError> {
        let mut conn = self.conn.clone();
        let n: u64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::StoreUnavailable {
                store: "redis-stream",
                source: e.into(),
            })?;
        let ttl_secs = i64::try_from(self.config.max_retention.as_secs()).unwrap_or(i64::MAX);
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::StoreUnavailable {
                store: "redis-stream",
                source: e.into(),
            })?;
        Ok(n)
    }

    async fn delete_counter(&self, key: &str) {
        let mut conn = self.conn.clone();
        if let Err(e) = redis::cmd("DEL")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await
        {
            warn!(error = %e, key = %key, "failed to clear retry counter");
        }
    }

    /// Re-drive one pending entry (spec §4.5 steps 2a-2e).
    async fn retry_one(&self, stream_id: &str) -> RetryOutcome {
        let retry_key = names::retry_counter(&self.stream_key, stream_id);
        let attempt = match self.bump_retry_counter(&retry_key).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, stream_id = %stream_id, "reaper: failed to bump retry counter");
                return RetryOutcome::Continue;
            }
        };

        let intent = match self.read_entry(stream_id).await {
            Ok(Some(intent)) => intent,
            Ok(None) => {
                warn!(stream_id = %stream_id, "reaper: pending entry vanished from its stream");
                self.delete_counter(&retry_key).await;
                return RetryOutcome::Continue;
            }
            Err(e) => {
                warn!(error = %e, stream_id = %stream_id, "reaper: failed to read pending entry");
                return RetryOutcome::Continue;
            }
        };

        let exhausted = attempt >= u64::from(self.config.max_attempts);

        if let Err(process_err) = self.processor.process(&intent).await {
            if exhausted {
                self.move_to_dlq(&intent, stream_id, "Too many attempts", &process_err.to_string())
                    .await;
                self.delete_counter(&retry_key).await;
                return RetryOutcome::Stop;
            }
            warn!(
                stream_id = %stream_id,
                attempt,
                max = self.config.max_attempts,
                error = %process_err,
                "reaper: process failed, left pending for the next tick"
            );
            return RetryOutcome::Continue;
        }

        if let Err(ack_err) = self.processor.acknowledge(stream_id).await {
            if exhausted {
                self.move_to_dlq(&intent, stream_id, "Long lasting message", &ack_err.to_string())
                    .await;
                self.delete_counter(&retry_key).await;
                return RetryOutcome::Stop;
            }
            warn!(
                stream_id = %stream_id,
                attempt,
                max = self.config.max_attempts,
                error = %ack_err,
                "reaper: acknowledge failed, left pending for the next tick"
            );
            return RetryOutcome::Continue;
        }

        self.delete_counter(&retry_key).await;
        RetryOutcome::Continue
    }

    /// Append a [`DlqRecord`] and acknowledge the original entry so it
    /// leaves the pending-entries list for good (spec §3 "Dead-letter
    /// record", §4.5).
    async fn move_to_dlq(&self, intent: &Intent, stream_id: &str, reason: &str, error: &str) {
        let record = DlqRecord::new(intent, reason, error, &self.stream_key, &self.consumer, &self.group);
        if let Err(e) = self.dlq.append(record.to_fields().into_iter().collect()).await {
            error!(error = %e, stream_id = %stream_id, "failed to append dead-letter record");
        }
        if let Err(e) = self.processor.acknowledge(stream_id).await {
            error!(error = %e, stream_id = %stream_id, "failed to acknowledge entry after DLQ transfer");
        }
    }
}

struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Handle returned by [`PendingReaper::spawn`].
pub struct ReaperHandle {
    shutdown: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl ReaperHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaper_handle_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ReaperHandle>();
    }
}
