/*
[INPUT]:  Logical subscriptions (key, endpoint URL, listener callbacks).
[OUTPUT]: One physical stream per key fanned out to listeners + observable connection state.
[POS]:    Connection layer - shared socket multiplexing with reconnect/backoff.
[UPDATE]: When changing lifecycle states, reconnection backoff, or teardown semantics.
*/

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tickdeck_adapter::WsSession;

use crate::error::SyncError;

pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const BACKOFF_CAP_MULTIPLIER: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    /// Waiting for, or performing, reconnect attempt `attempt` (1-based)
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted; terminal
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed)
    }
}

/// Callback receiving every parsed message of a stream.
///
/// Errors and panics are isolated per listener and only logged.
pub type Listener = Arc<dyn Fn(&Value) -> Result<(), SyncError> + Send + Sync>;

/// Opens physical stream connections.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, url: &str) -> tickdeck_adapter::Result<WsSession>;
}

/// Default transport backed by tokio-tungstenite
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> tickdeck_adapter::Result<WsSession> {
        WsSession::connect(url).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// `min(base × 2^(attempt−1), 16 × base)`, attempt starting at 1
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX).min(BACKOFF_CAP_MULTIPLIER);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

struct ListenerSlot {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Listener,
}

struct SubscriptionEntry {
    generation: u64,
    url: String,
    listeners: Vec<ListenerSlot>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct Registry {
    subscriptions: HashMap<String, SubscriptionEntry>,
    next_id: u64,
}

impl Registry {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn live_entry(&self, key: &str, generation: u64) -> Option<&SubscriptionEntry> {
        self.subscriptions
            .get(key)
            .filter(|entry| entry.generation == generation)
    }
}

struct ManagerInner {
    registry: Mutex<Registry>,
    connector: Arc<dyn SocketConnector>,
    policy: ReconnectPolicy,
}

/// Multiplexes many listeners over one physical connection per key.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("policy", &self.inner.policy)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self::with_connector(Arc::new(TungsteniteConnector), policy)
    }

    pub fn with_connector(connector: Arc<dyn SocketConnector>, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry: Mutex::new(Registry::default()),
                connector,
                policy,
            }),
        }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.inner.policy
    }

    /// Add `listener` to the stream `key`, opening the connection on first use.
    ///
    /// Later calls for an existing key reuse its connection; their `url` is
    /// ignored.
    pub fn subscribe(&self, key: &str, url: &str, listener: Listener) -> SubscriptionHandle {
        self.subscribe_with_max_attempts(key, url, self.inner.policy.max_attempts, listener)
    }

    /// Like `subscribe`, overriding the reconnect budget when this call
    /// creates the stream.
    pub fn subscribe_with_max_attempts(
        &self,
        key: &str,
        url: &str,
        max_attempts: u32,
        listener: Listener,
    ) -> SubscriptionHandle {
        let active = Arc::new(AtomicBool::new(true));
        let mut registry = self.inner.registry.lock();
        let listener_id = registry.next_id();

        if let Some(entry) = registry.subscriptions.get_mut(key) {
            if entry.url != url {
                warn!(key, existing_url = %entry.url, url, "stream key reused with a different url; keeping the first");
            }
            entry.listeners.push(ListenerSlot {
                id: listener_id,
                active: active.clone(),
                callback: listener,
            });
            debug!(key, listeners = entry.listeners.len(), "listener added to existing stream");

            return SubscriptionHandle {
                manager: Arc::downgrade(&self.inner),
                key: key.to_string(),
                generation: entry.generation,
                listener_id,
                active,
            };
        }

        let generation = registry.next_id();
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Connecting);
        let shutdown = CancellationToken::new();

        registry.subscriptions.insert(
            key.to_string(),
            SubscriptionEntry {
                generation,
                url: url.to_string(),
                listeners: vec![ListenerSlot {
                    id: listener_id,
                    active: active.clone(),
                    callback: listener,
                }],
                state: state_tx.clone(),
                shutdown: shutdown.clone(),
            },
        );
        drop(registry);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                info!(key, url, max_attempts, "opening stream");
                let worker = StreamWorker {
                    manager: self.inner.clone(),
                    key: key.to_string(),
                    url: url.to_string(),
                    generation,
                    max_attempts,
                    state: state_tx,
                    shutdown,
                };
                runtime.spawn(worker.run());
            }
            Err(_) => {
                warn!(key, "ConnectionManager used without Tokio runtime; stream not started");
                let _ = state_tx.send(ConnectionState::Failed);
            }
        }

        SubscriptionHandle {
            manager: Arc::downgrade(&self.inner),
            key: key.to_string(),
            generation,
            listener_id,
            active,
        }
    }

    /// Current state of the stream `key`, if subscribed
    pub fn state(&self, key: &str) -> Option<ConnectionState> {
        let registry = self.inner.registry.lock();
        registry
            .subscriptions
            .get(key)
            .map(|entry| *entry.state.borrow())
    }

    /// Subscribe to state changes of the stream `key`
    pub fn watch_state(&self, key: &str) -> Option<watch::Receiver<ConnectionState>> {
        let registry = self.inner.registry.lock();
        registry
            .subscriptions
            .get(key)
            .map(|entry| entry.state.subscribe())
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.registry.lock().subscriptions.len()
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.inner
            .registry
            .lock()
            .subscriptions
            .get(key)
            .map_or(0, |entry| entry.listeners.len())
    }

    /// Force-close every stream and forget all subscriptions.
    pub fn destroy(&self) {
        let drained: Vec<(String, SubscriptionEntry)> = {
            let mut registry = self.inner.registry.lock();
            registry.subscriptions.drain().collect()
        };

        for (key, entry) in &drained {
            for slot in &entry.listeners {
                slot.active.store(false, Ordering::Release);
            }
            entry.shutdown.cancel();
            let _ = entry.state.send(ConnectionState::Disconnected);
            debug!(key, "stream destroyed");
        }
        info!(streams = drained.len(), "connection manager destroyed");
    }
}

impl ManagerInner {
    fn remove_listener(&self, key: &str, generation: u64, listener_id: u64) {
        let mut registry = self.registry.lock();
        let Some(entry) = registry.subscriptions.get_mut(key) else {
            return;
        };
        if entry.generation != generation {
            return;
        }

        entry.listeners.retain(|slot| slot.id != listener_id);
        if !entry.listeners.is_empty() {
            debug!(key, listeners = entry.listeners.len(), "listener removed");
            return;
        }

        if let Some(entry) = registry.subscriptions.remove(key) {
            entry.shutdown.cancel();
            let _ = entry.state.send(ConnectionState::Disconnected);
            info!(key, "last listener left; stream closed");
        }
    }

    fn has_listeners(&self, key: &str, generation: u64) -> bool {
        self.registry
            .lock()
            .live_entry(key, generation)
            .is_some_and(|entry| !entry.listeners.is_empty())
    }

    /// Parse once, then call each active listener outside the registry lock.
    fn dispatch(&self, key: &str, generation: u64, raw: &str) {
        let message: Value = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(err) => {
                debug!(key, error = %err, bytes = raw.len(), "stream frame is not JSON; dropped");
                return;
            }
        };

        let listeners: Vec<(Arc<AtomicBool>, Listener)> = {
            let registry = self.registry.lock();
            match registry.live_entry(key, generation) {
                Some(entry) => entry
                    .listeners
                    .iter()
                    .map(|slot| (slot.active.clone(), slot.callback.clone()))
                    .collect(),
                None => return,
            }
        };

        for (active, callback) in listeners {
            if !active.load(Ordering::Acquire) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| callback(&message))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(key, error = %err, "stream listener failed");
                }
                Err(panic) => {
                    let err = SyncError::listener(format!("panicked: {}", panic_message(panic.as_ref())));
                    warn!(key, error = %err, "stream listener panicked");
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Keeps one listener registered; unsubscribes on `unsubscribe` or drop.
#[derive(Debug)]
pub struct SubscriptionHandle {
    manager: Weak<ManagerInner>,
    key: String,
    generation: u64,
    listener_id: u64,
    active: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the listener now. No callback fires after this returns.
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn release(&mut self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.remove_listener(&self.key, self.generation, self.listener_id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ManagerInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerInner").field("policy", &self.policy).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamExit {
    Disconnected,
    Shutdown,
}

struct StreamWorker {
    manager: Arc<ManagerInner>,
    key: String,
    url: String,
    generation: u64,
    max_attempts: u32,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

impl StreamWorker {
    async fn run(self) {
        let mut attempt: u32 = 0;

        loop {
            let connected = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                connected = self.manager.connector.connect(&self.url) => connected,
            };

            match connected {
                Ok(mut session) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Connected);
                    info!(key = %self.key, "stream connected");

                    let exit = self.stream_loop(&mut session).await;
                    session.close();
                    if exit == StreamExit::Shutdown {
                        break;
                    }
                    self.set_state(ConnectionState::Disconnected);
                    warn!(key = %self.key, "stream disconnected");
                }
                Err(err) => {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(key = %self.key, attempt, error = %err, "stream connect failed");
                }
            }

            if self.shutdown.is_cancelled()
                || !self.manager.has_listeners(&self.key, self.generation)
            {
                break;
            }

            attempt = attempt.saturating_add(1);
            if attempt > self.max_attempts {
                self.set_state(ConnectionState::Failed);
                let failure = SyncError::SocketFailure {
                    key: self.key.clone(),
                    attempts: self.max_attempts,
                };
                warn!(key = %self.key, error = %failure, "stream gave up reconnecting");
                break;
            }

            let backoff = self.manager.policy.delay_for(attempt);
            self.set_state(ConnectionState::Reconnecting { attempt });
            warn!(key = %self.key, attempt, ?backoff, "stream reconnecting with backoff");

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        debug!(key = %self.key, "stream worker finished");
    }

    async fn stream_loop(&self, session: &mut WsSession) -> StreamExit {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return StreamExit::Shutdown,
                frame = session.next_frame() => match frame {
                    Some(raw) => self.manager.dispatch(&self.key, self.generation, &raw),
                    None => return StreamExit::Disconnected,
                },
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if !self.shutdown.is_cancelled() {
            let _ = self.state.send(state);
        }
    }
}
