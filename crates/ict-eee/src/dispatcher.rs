//! # Effect Dispatcher
//!
//! Single-consumer FIFO delivery: every submitted effect, whether aimed at
//! a plain environment or at a chain, goes through one queue drained by one
//! dispatch task. Listeners run synchronously inside that task, which is
//! what gives cross-listener ordering; a slow listener therefore delays the
//! whole bus, and a growing backlog is logged once it crosses the warning
//! threshold.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ict_common::{Lifecycle, LifecycleError};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::chain::ChainedPreprocessor;
use crate::{DispatchError, Environment, DEFAULT_BACKLOG_WARN_THRESHOLD};

/// A synchronous observer of effects in one environment.
///
/// Listeners run on the dispatch task, so `on_effect` should return
/// quickly; long-running reactions belong in their own task fed from the
/// listener.
pub trait EffectListener<T>: Send + Sync {
    fn on_effect(&self, effect: &T);
}

/// Handle identifying one registered listener, for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

enum DispatchItem<T> {
    /// Deliver to every listener of `environment`.
    Plain { environment: Environment, effect: T },
    /// Advance along a chain: deliver to the first preprocessor whose
    /// position is greater than `after`, or to the terminal environment
    /// if none remains.
    ChainHop {
        chain: Environment,
        after: i64,
        effect: T,
    },
}

struct ChainMember<T> {
    position: i64,
    queue: UnboundedSender<T>,
}

struct ChainState<T> {
    terminal: Environment,
    /// Sorted by ascending position.
    members: Vec<ChainMember<T>>,
}

/// The effect bus. Cheaply cloneable; all clones share one queue and one
/// dispatch task.
pub struct EffectDispatcher<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for EffectDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    lifecycle: Lifecycle,
    listeners: RwLock<HashMap<Environment, Vec<(ListenerId, Arc<dyn EffectListener<T>>)>>>,
    chains: RwLock<HashMap<Environment, ChainState<T>>>,
    queue: RwLock<UnboundedSender<DispatchItem<T>>>,
    /// Receiver parked here until `start` hands it to the dispatch task.
    parked: Mutex<Option<UnboundedReceiver<DispatchItem<T>>>>,
    backlog: AtomicUsize,
    warn_threshold: usize,
    next_listener_id: AtomicU64,
    shutdown: RwLock<Arc<Notify>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Default for EffectDispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> EffectDispatcher<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_backlog_warn_threshold(DEFAULT_BACKLOG_WARN_THRESHOLD)
    }

    #[must_use]
    pub fn with_backlog_warn_threshold(warn_threshold: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                lifecycle: Lifecycle::new("effect-dispatcher"),
                listeners: RwLock::new(HashMap::new()),
                chains: RwLock::new(HashMap::new()),
                queue: RwLock::new(tx),
                parked: Mutex::new(Some(rx)),
                backlog: AtomicUsize::new(0),
                warn_threshold,
                next_listener_id: AtomicU64::new(0),
                shutdown: RwLock::new(Arc::new(Notify::new())),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Spawn the dispatch task. Effects submitted before the first start
    /// are buffered and delivered once it runs.
    pub fn start(&self) -> Result<(), LifecycleError> {
        self.inner.lifecycle.begin_start()?;

        let mut rx = match self.inner.parked.lock().take() {
            Some(rx) => rx,
            // Restarting after a terminate: the previous receiver died with
            // its task, so the queue is rebuilt empty.
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                *self.inner.queue.write() = tx;
                self.inner.backlog.store(0, Ordering::Relaxed);
                rx
            }
        };

        let shutdown = Arc::new(Notify::new());
        *self.inner.shutdown.write() = Arc::clone(&shutdown);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    item = rx.recv() => {
                        let Some(item) = item else { break };
                        inner.backlog.fetch_sub(1, Ordering::Relaxed);
                        inner.deliver(item);
                    }
                }
            }
        });
        *self.inner.worker.lock() = Some(handle);

        self.inner.lifecycle.mark_running()
    }

    /// Stop the dispatch task. Effects still queued are discarded.
    pub async fn terminate(&self) -> Result<(), LifecycleError> {
        self.inner.lifecycle.begin_terminate()?;

        self.inner.shutdown.read().notify_one();
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                warn!("dispatch task panicked during shutdown");
            }
        }

        self.inner.lifecycle.mark_terminated()
    }

    /// Register a listener on an environment. Registration is allowed in
    /// any lifecycle state.
    pub fn add_listener(
        &self,
        environment: Environment,
        listener: Arc<dyn EffectListener<T>>,
    ) -> ListenerId {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .write()
            .entry(environment)
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a listener; returns `false` if it was not registered.
    pub fn remove_listener(&self, environment: &Environment, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let Some(registered) = listeners.get_mut(environment) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|(registered_id, _)| *registered_id != id);
        let removed = registered.len() < before;
        if registered.is_empty() {
            listeners.remove(environment);
        }
        removed
    }

    /// Queue an effect for every listener of `environment`.
    pub fn submit_effect(&self, environment: Environment, effect: T) {
        self.enqueue(DispatchItem::Plain {
            environment,
            effect,
        });
    }

    /// Register a preprocessor chain ending in `terminal`.
    pub fn register_chain(
        &self,
        chain: Environment,
        terminal: Environment,
    ) -> Result<(), DispatchError> {
        let mut chains = self.inner.chains.write();
        if chains.contains_key(&chain) {
            return Err(DispatchError::ChainAlreadyRegistered { environment: chain });
        }
        chains.insert(
            chain,
            ChainState {
                terminal,
                members: Vec::new(),
            },
        );
        Ok(())
    }

    /// Insert a preprocessor into a chain at `position`. Lower positions
    /// see effects earlier; the returned handle deregisters itself on drop.
    pub fn add_preprocessor(
        &self,
        chain: &Environment,
        position: i64,
    ) -> Result<ChainedPreprocessor<T>, DispatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut chains = self.inner.chains.write();
            let Some(state) = chains.get_mut(chain) else {
                return Err(DispatchError::UnknownChain {
                    environment: chain.clone(),
                });
            };
            if state.members.iter().any(|m| m.position == position) {
                return Err(DispatchError::PositionOccupied {
                    environment: chain.clone(),
                    position,
                });
            }
            let index = state.members.partition_point(|m| m.position < position);
            state.members.insert(
                index,
                ChainMember {
                    position,
                    queue: tx,
                },
            );
        }
        debug!(chain = %chain, position, "preprocessor added");
        Ok(ChainedPreprocessor::new(
            chain.clone(),
            position,
            rx,
            self.clone(),
        ))
    }

    /// Remove the preprocessor at `position`; effects then skip straight
    /// from its predecessor to its successor.
    pub fn remove_preprocessor(&self, chain: &Environment, position: i64) {
        if let Some(state) = self.inner.chains.write().get_mut(chain) {
            state.members.retain(|m| m.position != position);
        }
    }

    /// Queue an effect at the head of a chain.
    pub fn submit_to_chain(&self, chain: Environment, effect: T) {
        self.enqueue(DispatchItem::ChainHop {
            chain,
            after: i64::MIN,
            effect,
        });
    }

    /// Current number of queued, undelivered effects.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.inner.backlog.load(Ordering::Relaxed)
    }

    pub(crate) fn chain_hop(&self, chain: Environment, after: i64, effect: T) {
        self.enqueue(DispatchItem::ChainHop {
            chain,
            after,
            effect,
        });
    }

    fn enqueue(&self, item: DispatchItem<T>) {
        let depth = self.inner.backlog.fetch_add(1, Ordering::Relaxed) + 1;
        if depth == self.inner.warn_threshold {
            warn!(
                depth,
                "effect backlog crossed warning threshold; a listener is holding up the bus"
            );
        }
        if self.inner.queue.read().send(item).is_err() {
            self.inner.backlog.fetch_sub(1, Ordering::Relaxed);
            debug!("dispatcher terminated; effect dropped");
        }
    }
}

impl<T> Inner<T> {
    fn deliver(&self, item: DispatchItem<T>) {
        match item {
            DispatchItem::Plain {
                environment,
                effect,
            } => self.deliver_to_listeners(&environment, &effect),
            DispatchItem::ChainHop {
                chain,
                after,
                effect,
            } => self.advance_chain(&chain, after, effect),
        }
    }

    fn deliver_to_listeners(&self, environment: &Environment, effect: &T) {
        let targets: Vec<(ListenerId, Arc<dyn EffectListener<T>>)> = self
            .listeners
            .read()
            .get(environment)
            .cloned()
            .unwrap_or_default();
        for (id, listener) in targets {
            if catch_unwind(AssertUnwindSafe(|| listener.on_effect(effect))).is_err() {
                warn!(
                    environment = %environment,
                    listener = ?id,
                    "listener panicked; effect skipped for it"
                );
            }
        }
    }

    fn advance_chain(&self, chain: &Environment, after: i64, effect: T) {
        let (successors, terminal) = {
            let chains = self.chains.read();
            let Some(state) = chains.get(chain) else {
                warn!(chain = %chain, "effect submitted to unregistered chain; dropped");
                return;
            };
            let successors: Vec<(i64, UnboundedSender<T>)> = state
                .members
                .iter()
                .filter(|m| m.position > after)
                .map(|m| (m.position, m.queue.clone()))
                .collect();
            (successors, state.terminal.clone())
        };

        let mut effect = effect;
        for (position, queue) in successors {
            match queue.send(effect) {
                Ok(()) => return,
                // Handle was dropped without deregistering; skip ahead.
                Err(mpsc::error::SendError(returned)) => {
                    debug!(chain = %chain, position, "skipping dropped preprocessor");
                    effect = returned;
                }
            }
        }
        self.deliver_to_listeners(&terminal, &effect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Recorder {
        seen: parking_lot::Mutex<Vec<u32>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: parking_lot::Mutex::new(Vec::new()),
            })
        }
    }

    impl EffectListener<u32> for Recorder {
        fn on_effect(&self, effect: &u32) {
            self.seen.lock().push(*effect);
        }
    }

    struct Panicker;

    impl EffectListener<u32> for Panicker {
        fn on_effect(&self, _effect: &u32) {
            panic!("listener failure");
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn delivers_in_submission_order() {
        let dispatcher = EffectDispatcher::new();
        let env = Environment::new("test");
        let recorder = Recorder::new();
        dispatcher.add_listener(env.clone(), recorder.clone());
        dispatcher.start().unwrap();

        for effect in 0..100 {
            dispatcher.submit_effect(env.clone(), effect);
        }
        wait_until(|| recorder.seen.lock().len() == 100).await;
        assert_eq!(*recorder.seen.lock(), (0..100).collect::<Vec<_>>());
        dispatcher.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn effects_before_start_are_buffered() {
        let dispatcher = EffectDispatcher::new();
        let env = Environment::new("test");
        let recorder = Recorder::new();
        dispatcher.add_listener(env.clone(), recorder.clone());

        dispatcher.submit_effect(env.clone(), 7);
        assert_eq!(dispatcher.backlog(), 1);

        dispatcher.start().unwrap();
        wait_until(|| recorder.seen.lock().len() == 1).await;
        assert_eq!(*recorder.seen.lock(), vec![7]);
        dispatcher.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn panicking_listener_does_not_stop_the_bus() {
        let dispatcher = EffectDispatcher::new();
        let env = Environment::new("test");
        dispatcher.add_listener(env.clone(), Arc::new(Panicker));
        let recorder = Recorder::new();
        dispatcher.add_listener(env.clone(), recorder.clone());
        dispatcher.start().unwrap();

        dispatcher.submit_effect(env.clone(), 1);
        dispatcher.submit_effect(env.clone(), 2);
        wait_until(|| recorder.seen.lock().len() == 2).await;
        assert_eq!(*recorder.seen.lock(), vec![1, 2]);
        dispatcher.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn removed_listener_sees_nothing_further() {
        let dispatcher = EffectDispatcher::new();
        let env = Environment::new("test");
        let recorder = Recorder::new();
        let id = dispatcher.add_listener(env.clone(), recorder.clone());
        dispatcher.start().unwrap();

        dispatcher.submit_effect(env.clone(), 1);
        wait_until(|| recorder.seen.lock().len() == 1).await;

        assert!(dispatcher.remove_listener(&env, id));
        assert!(!dispatcher.remove_listener(&env, id));
        dispatcher.submit_effect(env.clone(), 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*recorder.seen.lock(), vec![1]);
        dispatcher.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn chain_walks_positions_in_order() {
        let dispatcher: EffectDispatcher<u32> = EffectDispatcher::new();
        let chain = Environment::new("chain");
        let terminal = Environment::new("terminal");
        dispatcher
            .register_chain(chain.clone(), terminal.clone())
            .unwrap();

        let mut late = dispatcher.add_preprocessor(&chain, 50).unwrap();
        let mut early = dispatcher.add_preprocessor(&chain, -10).unwrap();
        let recorder = Recorder::new();
        dispatcher.add_listener(terminal.clone(), recorder.clone());
        dispatcher.start().unwrap();

        dispatcher.submit_to_chain(chain.clone(), 42);

        let effect = early.take_effect().await.unwrap();
        assert_eq!(effect, 42);
        assert!(recorder.seen.lock().is_empty());
        early.pass_on(effect + 1);

        let effect = late.take_effect().await.unwrap();
        assert_eq!(effect, 43);
        late.pass_on(effect + 1);

        wait_until(|| !recorder.seen.lock().is_empty()).await;
        assert_eq!(*recorder.seen.lock(), vec![44]);
        dispatcher.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn dropped_preprocessor_is_skipped() {
        let dispatcher: EffectDispatcher<u32> = EffectDispatcher::new();
        let chain = Environment::new("chain");
        let terminal = Environment::new("terminal");
        dispatcher
            .register_chain(chain.clone(), terminal.clone())
            .unwrap();
        let recorder = Recorder::new();
        dispatcher.add_listener(terminal.clone(), recorder.clone());
        dispatcher.start().unwrap();

        let preprocessor = dispatcher.add_preprocessor(&chain, 0).unwrap();
        drop(preprocessor);

        dispatcher.submit_to_chain(chain.clone(), 9);
        wait_until(|| !recorder.seen.lock().is_empty()).await;
        assert_eq!(*recorder.seen.lock(), vec![9]);
        dispatcher.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn chain_registration_errors() {
        let dispatcher: EffectDispatcher<u32> = EffectDispatcher::new();
        let chain = Environment::new("chain");
        dispatcher
            .register_chain(chain.clone(), Environment::new("terminal"))
            .unwrap();
        assert_eq!(
            dispatcher.register_chain(chain.clone(), Environment::new("other")),
            Err(DispatchError::ChainAlreadyRegistered {
                environment: chain.clone()
            })
        );

        let _held = dispatcher.add_preprocessor(&chain, 3).unwrap();
        assert!(matches!(
            dispatcher.add_preprocessor(&chain, 3),
            Err(DispatchError::PositionOccupied { position: 3, .. })
        ));
        assert!(matches!(
            dispatcher.add_preprocessor(&Environment::new("missing"), 0),
            Err(DispatchError::UnknownChain { .. })
        ));
    }

    #[tokio::test]
    async fn restart_after_terminate() {
        let dispatcher = EffectDispatcher::new();
        let env = Environment::new("test");
        let recorder = Recorder::new();
        dispatcher.add_listener(env.clone(), recorder.clone());

        dispatcher.start().unwrap();
        dispatcher.terminate().await.unwrap();
        dispatcher.start().unwrap();

        dispatcher.submit_effect(env.clone(), 5);
        wait_until(|| !recorder.seen.lock().is_empty()).await;
        assert_eq!(*recorder.seen.lock(), vec![5]);
        dispatcher.terminate().await.unwrap();
    }
}
