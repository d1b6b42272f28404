//! The gossip node: socket ownership, task supervision, neighbor admin.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ict_common::{Lifecycle, NodeConfig, MAX_NEIGHBOR_COUNT};
use ict_eee::EffectDispatcher;
use ict_model::Transaction;
use ict_tangle::RingTangle;
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    gossip_environment, gossip_preprocessor_chain, ForwardingListener, GossipEvent, Neighbor,
    NeighborStats, NetworkError, Receiver, Sender,
};

/// One UDP gossip endpoint.
///
/// `start` binds the socket, resolves the configured neighbors and spawns
/// the receive loop, the send loop and the stats-round timer; `terminate`
/// unwinds all of it. Constructing a `Node` also wires the gossip plumbing
/// on the bus: the preprocessor chain, the forwarding listener on the
/// terminal environment, and the store's transaction requester.
pub struct Node {
    config: NodeConfig,
    lifecycle: Lifecycle,
    tangle: Arc<RingTangle>,
    dispatcher: EffectDispatcher<GossipEvent>,
    neighbors: Arc<RwLock<Vec<Arc<Neighbor>>>>,
    sender: Sender,
    receiver: Arc<Receiver>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    /// Per-task shutdown signal and join handle.
    tasks: Mutex<Vec<(Arc<Notify>, JoinHandle<()>)>>,
}

impl Node {
    #[must_use]
    pub fn new(
        config: NodeConfig,
        tangle: Arc<RingTangle>,
        dispatcher: EffectDispatcher<GossipEvent>,
    ) -> Self {
        let neighbors: Arc<RwLock<Vec<Arc<Neighbor>>>> = Arc::new(RwLock::new(Vec::new()));
        let sender = Sender::new(
            Arc::clone(&tangle),
            Arc::clone(&neighbors),
            config.min_forward_delay_ms,
            config.max_forward_delay_ms,
        );
        let receiver = Arc::new(Receiver::new(
            Arc::clone(&tangle),
            dispatcher.clone(),
            sender.clone(),
            Arc::clone(&neighbors),
            config.anti_spam_abs,
        ));

        if let Err(error) =
            dispatcher.register_chain(gossip_preprocessor_chain(), gossip_environment())
        {
            debug!(%error, "gossip chain already registered");
        }
        dispatcher.add_listener(
            gossip_environment(),
            Arc::new(ForwardingListener::new(
                sender.clone(),
                Arc::clone(&tangle),
                Arc::clone(&neighbors),
            )),
        );
        tangle.set_requester(Arc::new(sender.clone()));

        Self {
            config,
            lifecycle: Lifecycle::new("node"),
            tangle,
            dispatcher,
            neighbors,
            sender,
            receiver,
            socket: RwLock::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn start(&self) -> Result<(), NetworkError> {
        self.lifecycle.begin_start()?;
        match self.start_inner().await {
            Ok(()) => {
                info!(address = %self.config.bind_address(), "node started");
                self.lifecycle.mark_running().map_err(Into::into)
            }
            Err(error) => {
                if let Err(lifecycle_error) = self.lifecycle.abort_start() {
                    warn!(%lifecycle_error, "lifecycle rollback failed");
                }
                Err(error)
            }
        }
    }

    async fn start_inner(&self) -> Result<(), NetworkError> {
        if self.config.neighbors.len() > MAX_NEIGHBOR_COUNT {
            return Err(NetworkError::TooManyNeighbors {
                count: self.config.neighbors.len(),
                max: MAX_NEIGHBOR_COUNT,
            });
        }
        let mut resolved = Vec::with_capacity(self.config.neighbors.len());
        for configured in &self.config.neighbors {
            resolved.push(Arc::new(Neighbor::resolve(configured).await?));
        }
        *self.neighbors.write() = resolved;

        let address = self.config.bind_address();
        let socket = UdpSocket::bind(&address)
            .await
            .map_err(|source| NetworkError::Bind { address, source })?;
        let socket = Arc::new(socket);
        *self.socket.write() = Some(Arc::clone(&socket));

        let mut tasks = self.tasks.lock();
        tasks.push(self.spawn_receiver(Arc::clone(&socket)));
        tasks.push(self.spawn_sender(Arc::clone(&socket)));
        tasks.push(self.spawn_round_timer());
        Ok(())
    }

    pub async fn terminate(&self) -> Result<(), NetworkError> {
        self.lifecycle.begin_terminate()?;

        let tasks: Vec<(Arc<Notify>, JoinHandle<()>)> =
            self.tasks.lock().drain(..).collect();
        for (shutdown, handle) in tasks {
            shutdown.notify_one();
            if handle.await.is_err() {
                warn!("node task panicked during shutdown");
            }
        }
        *self.socket.write() = None;

        info!("node terminated");
        self.lifecycle.mark_terminated().map_err(Into::into)
    }

    /// Inject a locally issued transaction: store it and run it through
    /// the gossip pipeline, which ends in it being broadcast.
    pub fn submit(&self, transaction: Arc<Transaction>) {
        self.tangle.create_log_if_absent(Arc::clone(&transaction));
        self.dispatcher.submit_to_chain(
            gossip_preprocessor_chain(),
            GossipEvent {
                transaction,
                is_own_transaction: true,
            },
        );
    }

    /// Ask the neighbors for a transaction by hash. The request rides on
    /// the next outgoing datagram.
    pub fn request(&self, hash: &str) {
        ict_tangle::TransactionRequester::request(&self.sender, hash);
    }

    pub async fn add_neighbor(&self, address: &str) -> Result<(), NetworkError> {
        {
            let neighbors = self.neighbors.read();
            if neighbors.len() >= MAX_NEIGHBOR_COUNT {
                return Err(NetworkError::TooManyNeighbors {
                    count: neighbors.len() + 1,
                    max: MAX_NEIGHBOR_COUNT,
                });
            }
            if neighbors
                .iter()
                .any(|n| n.configured_address() == address)
            {
                return Err(NetworkError::DuplicateNeighbor {
                    address: address.to_string(),
                });
            }
        }
        let neighbor = Arc::new(Neighbor::resolve(address).await?);
        self.neighbors.write().push(neighbor);
        info!(%address, "neighbor added");
        Ok(())
    }

    pub fn remove_neighbor(&self, address: &str) -> bool {
        let mut neighbors = self.neighbors.write();
        let before = neighbors.len();
        neighbors.retain(|n| n.configured_address() != address);
        let removed = neighbors.len() < before;
        if removed {
            info!(%address, "neighbor removed");
        }
        removed
    }

    #[must_use]
    pub fn neighbor_stats(&self) -> Vec<NeighborStats> {
        self.neighbors
            .read()
            .iter()
            .map(|n| n.stats_snapshot())
            .collect()
    }

    /// The bound socket address, once started.
    #[must_use]
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.socket
            .read()
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    fn spawn_receiver(&self, socket: Arc<UdpSocket>) -> (Arc<Notify>, JoinHandle<()>) {
        let shutdown = Arc::new(Notify::new());
        let receiver = Arc::clone(&self.receiver);
        let signal = Arc::clone(&shutdown);
        let handle = tokio::spawn(async move {
            receiver.run(socket, signal).await;
        });
        (shutdown, handle)
    }

    fn spawn_sender(&self, socket: Arc<UdpSocket>) -> (Arc<Notify>, JoinHandle<()>) {
        let shutdown = Arc::new(Notify::new());
        let sender = self.sender.clone();
        let signal = Arc::clone(&shutdown);
        let handle = tokio::spawn(async move {
            sender.run(socket, signal).await;
        });
        (shutdown, handle)
    }

    /// Every round: report per-neighbor stats, rotate the counters and
    /// refresh DNS resolutions.
    fn spawn_round_timer(&self) -> (Arc<Notify>, JoinHandle<()>) {
        let shutdown = Arc::new(Notify::new());
        let neighbors = Arc::clone(&self.neighbors);
        let sender = self.sender.clone();
        let round = Duration::from_millis(self.config.round_duration_ms);
        let signal = Arc::clone(&shutdown);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = signal.notified() => break,
                    _ = sleep(round) => {
                        debug!(send_queue = sender.queue_depth(), "stats round closing");
                        let snapshot: Vec<Arc<Neighbor>> =
                            neighbors.read().iter().cloned().collect();
                        for neighbor in snapshot {
                            let stats = neighbor.current_round();
                            info!(
                                neighbor = %neighbor.configured_address(),
                                all = stats.received_all,
                                new = stats.received_new,
                                invalid = stats.invalid,
                                ignored = stats.ignored,
                                requested = stats.requested,
                                "stats round finished"
                            );
                            neighbor.new_round();
                            neighbor.refresh_address().await;
                        }
                    }
                }
            }
        });
        (shutdown, handle)
    }
}
