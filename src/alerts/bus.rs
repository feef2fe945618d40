//! Alert bus: publishing side plus the handler-dispatching listener.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Sender};
use serde::{Deserialize, Serialize};

use crate::config::AlertConfig;
use crate::error::{ConsistencyError, ConsistencyResult};

use super::channel::AlertChannel;
use super::handlers::{AlertHandler, LoggingHandler, LOGGING_HANDLER};
use super::{AlertMessage, AlertPublisher, ContradictionAlert};

type HandlerMap = BTreeMap<String, Arc<dyn AlertHandler>>;

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    handler_failures: AtomicU64,
}

struct Listener {
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

/// Health snapshot of the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertStats {
    pub is_listening: bool,
    pub channel: String,
    pub handlers_registered: usize,
    pub handler_names: Vec<String>,
    /// Messages offered to at least one subscriber.
    pub published: u64,
    /// Messages the listener picked up and ran handlers for.
    pub delivered: u64,
    /// Messages nobody could take: no subscriber, full queue, or encode failure.
    pub dropped: u64,
    pub handler_failures: u64,
}

/// Publish/subscribe alert bus with a name-keyed handler registry.
///
/// States: `Idle -> Listening -> Idle`. Starting while listening and stopping
/// while idle are both no-ops.
pub struct AlertBus {
    channel: Arc<AlertChannel>,
    handlers: Arc<RwLock<HandlerMap>>,
    counters: Arc<Counters>,
    listener: Mutex<Option<Listener>>,
}

impl std::fmt::Debug for AlertBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertBus")
            .field("channel", &self.channel.name())
            .field("listening", &self.is_listening())
            .finish_non_exhaustive()
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new(&AlertConfig::default())
    }
}

impl AlertBus {
    /// Builds an idle bus; installs the logging handler if the config asks for it.
    #[must_use]
    pub fn new(cfg: &AlertConfig) -> Self {
        let mut handlers: HandlerMap = BTreeMap::new();
        if cfg.install_default_handlers {
            handlers.insert(
                LOGGING_HANDLER.to_string(),
                Arc::new(LoggingHandler::default()),
            );
        }
        Self {
            channel: Arc::new(AlertChannel::new(cfg.channel.clone(), cfg.subscriber_capacity)),
            handlers: Arc::new(RwLock::new(handlers)),
            counters: Arc::new(Counters::default()),
            listener: Mutex::new(None),
        }
    }

    /// The underlying channel; external consumers may subscribe to it directly.
    #[must_use]
    pub fn channel(&self) -> &AlertChannel {
        &self.channel
    }

    /// Stamps, serializes and emits `alert`. Never fails; problems are logged
    /// and counted as drops.
    pub fn publish(&self, alert: ContradictionAlert) {
        let message = AlertMessage::stamp(alert);
        let payload = match serde_json::to_string(&message) {
            Ok(p) => p,
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "failed to encode alert");
                return;
            }
        };
        match self.channel.publish(&payload) {
            Ok(fanout) if fanout.delivered > 0 => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                if fanout.dropped > 0 {
                    tracing::warn!(
                        channel = self.channel.name(),
                        dropped = fanout.dropped,
                        "slow alert subscribers missed a message"
                    );
                }
            }
            Ok(fanout) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    channel = self.channel.name(),
                    full = fanout.dropped,
                    story_id = %message.alert.story_id,
                    "alert dropped: no subscriber could take it"
                );
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "failed to publish alert");
            }
        }
    }

    /// Registers `handler` under `name`, replacing any previous one.
    /// Returns true if a handler was replaced.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Internal` if the registry lock is poisoned.
    pub fn add_handler<F>(&self, name: impl Into<String>, handler: F) -> ConsistencyResult<bool>
    where
        F: Fn(&AlertMessage) -> ConsistencyResult<()> + Send + Sync + 'static,
    {
        self.install_handler(name, Arc::new(handler))
    }

    /// Like [`add_handler`](Self::add_handler) for an existing trait object.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Internal` if the registry lock is poisoned.
    pub fn install_handler(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn AlertHandler>,
    ) -> ConsistencyResult<bool> {
        let name = name.into();
        let mut handlers = self.handlers.write().map_err(|_| registry_poisoned())?;
        let replaced = handlers.insert(name.clone(), handler).is_some();
        tracing::debug!(handler = %name, replaced, "alert handler registered");
        Ok(replaced)
    }

    /// Removes the handler registered under `name`. Returns true if one existed.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Internal` if the registry lock is poisoned.
    pub fn remove_handler(&self, name: &str) -> ConsistencyResult<bool> {
        let mut handlers = self.handlers.write().map_err(|_| registry_poisoned())?;
        Ok(handlers.remove(name).is_some())
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener.lock().map(|l| l.is_some()).unwrap_or(false)
    }

    /// Subscribes to the channel and spawns the listener thread.
    /// Returns false if already listening.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Internal` if a lock is poisoned or the
    /// thread cannot be spawned.
    pub fn start_listening(&self) -> ConsistencyResult<bool> {
        let mut listener = self
            .listener
            .lock()
            .map_err(|_| ConsistencyError::internal("alert listener lock poisoned"))?;
        if listener.is_some() {
            return Ok(false);
        }

        // Subscribe before returning so nothing published after this call is missed.
        let subscription = self.channel.subscribe()?;
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handlers = Arc::clone(&self.handlers);
        let counters = Arc::clone(&self.counters);
        let join = thread::Builder::new()
            .name("plotguard-alerts".to_string())
            .spawn(move || {
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(subscription.receiver()) -> msg => match msg {
                            Ok(payload) => dispatch(&handlers, &counters, &payload),
                            Err(_) => break,
                        },
                    }
                }
                drop(subscription);
            })
            .map_err(|e| ConsistencyError::internal(format!("failed to spawn alert listener: {e}")))?;

        *listener = Some(Listener { stop_tx, join });
        tracing::info!(channel = self.channel.name(), "alert listener started");
        Ok(true)
    }

    /// Signals the listener and waits for it to exit. Returns false if idle.
    ///
    /// A message mid-dispatch finishes with its current handler list; queued
    /// messages are discarded.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Internal` if the listener lock is poisoned.
    pub fn stop_listening(&self) -> ConsistencyResult<bool> {
        let taken = self
            .listener
            .lock()
            .map_err(|_| ConsistencyError::internal("alert listener lock poisoned"))?
            .take();
        let Some(Listener { stop_tx, join }) = taken else {
            return Ok(false);
        };
        let _ = stop_tx.try_send(());
        if join.join().is_err() {
            tracing::error!("alert listener thread panicked");
        }
        tracing::info!(channel = self.channel.name(), "alert listener stopped");
        Ok(true)
    }

    #[must_use]
    pub fn get_stats(&self) -> AlertStats {
        let handler_names: Vec<String> = self
            .handlers
            .read()
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default();
        AlertStats {
            is_listening: self.is_listening(),
            channel: self.channel.name().to_string(),
            handlers_registered: handler_names.len(),
            handler_names,
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
        }
    }
}

impl AlertPublisher for AlertBus {
    fn publish(&self, alert: ContradictionAlert) {
        Self::publish(self, alert);
    }
}

impl Drop for AlertBus {
    fn drop(&mut self) {
        let _ = self.stop_listening();
    }
}

fn registry_poisoned() -> ConsistencyError {
    ConsistencyError::internal("alert handler registry lock poisoned")
}

/// Runs every handler registered at the time the message arrived.
fn dispatch(handlers: &RwLock<HandlerMap>, counters: &Counters, payload: &str) {
    let message: AlertMessage = match serde_json::from_str(payload) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable alert payload skipped");
            return;
        }
    };
    counters.delivered.fetch_add(1, Ordering::Relaxed);

    let snapshot: Vec<(String, Arc<dyn AlertHandler>)> = match handlers.read() {
        Ok(h) => h.iter().map(|(n, h)| (n.clone(), Arc::clone(h))).collect(),
        Err(_) => {
            tracing::error!("alert handler registry lock poisoned");
            return;
        }
    };

    for (name, handler) in snapshot {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&message)));
        let failure = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(_) => "handler panicked".to_string(),
        };
        counters.handler_failures.fetch_add(1, Ordering::Relaxed);
        let err = ConsistencyError::Handler {
            handler: name,
            message: failure,
        };
        tracing::warn!(error = %err, "alert handler failed");
    }
}
