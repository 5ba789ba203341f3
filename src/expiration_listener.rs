//! Refresh-Ahead Expiration Listener (spec §4.6): reacts to Redis keyspace
//! "expired" notifications by re-filling the cache before the next reader
//! ever sees a miss.
//!
//! Grounded on the teacher's `InvalidationSubscriber`
//! (`invalidation.rs`): same `redis::Client` + `broadcast`-shutdown +
//! reconnect-with-backoff shape, swapping `subscribe` for `psubscribe` on
//! the keyspace-event pattern and the handler for a
//! [`crate::facade::Facade::find_by_id`] call.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use redis::Client;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::entity::Entity;
use crate::error::CoreError;
use crate::facade::Facade;
use crate::policy::PolicyRegistry;

/// Keyspace-notification pattern for key expiration (spec §4.6, §6
/// "`notify-keyspace-events` must include at least `Ex`").
const EXPIRED_PATTERN: &str = "__keyevent@*__:expired";

/// Subscribes to `__keyevent@*__:expired` and triggers
/// `Facade::find_by_id` for any expiring key under `prefix(E)` (spec
/// §4.6). Constructed only for entities with `REFRESH_AHEAD` enabled.
pub struct ExpirationListener<E: Entity> {
    client: Client,
    facade: Arc<Facade<E>>,
    shutdown: broadcast::Sender<()>,
    _marker: PhantomData<E>,
}

impl<E: Entity> ExpirationListener<E> {
    #[must_use]
    pub fn new(client: Client, facade: Arc<Facade<E>>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            client,
            facade,
            shutdown,
            _marker: PhantomData,
        }
    }

    /// One-time server-side `CONFIG SET notify-keyspace-events` (spec §4.6
    /// "Configuration side effect"). Additive: merges `Ex` into whatever
    /// flags are already configured so repeated calls across entities
    /// sharing one server, or an operator's own flags, aren't clobbered.
    pub async fn ensure_keyspace_notifications(client: &Client) -> Result<(), CoreError> {
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CoreError::StoreUnavailable {
                store: "redis",
                source: e.into(),
            })?;

        let current: String = redis::cmd("CONFIG")
            .arg("GET")
            .arg("notify-keyspace-events")
            .query_async::<Vec<String>>(&mut conn)
            .await
            .map_err(|e| CoreError::StoreUnavailable {
                store: "redis",
                source: e.into(),
            })?
            .into_iter()
            .nth(1)
            .unwrap_or_default();

        let merged = merge_keyspace_flags(&current);
        redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg(&merged)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CoreError::StoreUnavailable {
                store: "redis",
                source: e.into(),
            })?;

        info!(flags = %merged, "keyspace notifications configured for expiration events");
        Ok(())
    }

    /// Spawn the listener loop, reconnecting on error (spec §4.6 "Runs
    /// continuously"; mirrors the teacher's `InvalidationSubscriber::start`).
    pub fn spawn(self: Arc<Self>) -> ListenerHandle {
        let shutdown_tx = self.shutdown.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        let task = tokio::spawn(async move {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    info!(entity = E::type_name(), "expiration listener shutting down");
                    break;
                }

                match self.run_once(&mut shutdown_rx).await {
                    Ok(()) => break,
                    Err(e) => {
                        error!(error = %e, "expiration listener errored, reconnecting in 5s");
                        tokio::select! {
                            () = tokio::time::sleep(Duration::from_secs(5)) => {},
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                }
            }
        });

        ListenerHandle { shutdown: shutdown_tx, task }
    }

    async fn run_once(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> Result<(), CoreError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            CoreError::StoreUnavailable {
                store: "redis-pubsub",
                source: e.into(),
            }
        })?;
        pubsub
            .psubscribe(EXPIRED_PATTERN)
            .await
            .map_err(|e| CoreError::StoreUnavailable {
                store: "redis-pubsub",
                source: e.into(),
            })?;

        info!(entity = E::type_name(), pattern = EXPIRED_PATTERN, "subscribed to keyspace expiration events");

        let mut stream = pubsub.on_message();
        let prefix = PolicyRegistry::prefix::<E>();

        loop {
            tokio::select! {
                msg = stream.next() => {
                    let Some(msg) = msg else { return Ok(()) };
                    let key: String = match msg.get_payload() {
                        Ok(k) => k,
                        Err(e) => {
                            warn!(error = %e, "failed to read expired-key payload");
                            continue;
                        }
                    };
                    self.handle_expired_key(prefix, &key).await;
                }
                _ = shutdown_rx.recv() => return Ok(()),
            }
        }
    }

    /// `keyevent(expired, k) → if k ∈ prefix(E) → Facade.findById(idOf(k))`
    /// (spec §2, §4.6). Keys under a different prefix are ignored. The
    /// spec's `k.substring(len(prefix(E)))` elides the `:` separator from
    /// spec §3's `prefix:id` cache key; stripping both here is what makes
    /// the extracted text actually parse as `E::Id` (matches the worked
    /// example in spec §8 scenario 4: `employer:7` expiring re-fills id 7).
    async fn handle_expired_key(&self, prefix: &str, key: &str) {
        let Some(id_part) = key.strip_prefix(prefix).and_then(|rest| rest.strip_prefix(':')) else {
            return;
        };
        let Ok(id) = id_part.parse::<E::Id>() else {
            debug!(key = %key, "expired key's id segment did not parse as this entity's id type");
            return;
        };

        debug!(key = %key, "refresh-ahead: re-filling cache after expiration");
        if let Err(e) = self.facade.find_by_id(&id).await {
            warn!(error = %e, key = %key, "refresh-ahead refill failed");
        }
    }
}

/// Handle returned by [`ExpirationListener::spawn`].
pub struct ListenerHandle {
    shutdown: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl ListenerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Merge `E` and `x` into whatever `notify-keyspace-events` flags are
/// already configured, without dropping unrelated flags another
/// subsystem may depend on.
fn merge_keyspace_flags(current: &str) -> String {
    let mut flags: Vec<char> = current.chars().collect();
    for required in ['E', 'x'] {
        if !flags.contains(&required) {
            flags.push(required);
        }
    }
    flags.into_iter().collect()
}
