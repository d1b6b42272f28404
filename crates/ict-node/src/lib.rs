//! # ict-node
//!
//! The top-level node facade. [`Ict`] owns the transaction store, the
//! effect bus and the gossip endpoint, wires them together (including the
//! bundle-complete gate on the gossip chain) and exposes the public
//! operations: submitting transactions, querying the store, listening to
//! gossip and plugging preprocessors into the pipeline.

pub mod bundle;

pub use bundle::BUNDLE_GATE_POSITION;
pub use ict_common::{ConfigError, LifecycleError, NodeConfig};
pub use ict_eee::{ChainedPreprocessor, DispatchError, EffectListener, Environment, ListenerId};
pub use ict_model::{CodecError, Transaction, TransactionBuilder};
pub use ict_net::{gossip_environment, GossipEvent, NeighborStats, NetworkError};

use std::sync::Arc;

use ict_eee::EffectDispatcher;
use ict_net::Node;
use ict_tangle::RingTangle;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A complete Ict node.
///
/// ```no_run
/// # async fn run() -> Result<(), ict_node::NodeError> {
/// let ict = ict_node::Ict::new(ict_node::NodeConfig::default())?;
/// ict.start().await?;
/// let transaction = ict.submit_message("Hello, Economic Cluster!")?;
/// assert!(ict.find_transaction_by_hash(&transaction.hash).is_some());
/// ict.terminate().await?;
/// # Ok(())
/// # }
/// ```
pub struct Ict {
    lifecycle: ict_common::Lifecycle,
    tangle: Arc<RingTangle>,
    dispatcher: EffectDispatcher<GossipEvent>,
    node: Node,
    bundle_gate: Mutex<Option<(Arc<Notify>, JoinHandle<()>)>>,
}

impl Ict {
    /// Validate the configuration and assemble the node. Nothing runs
    /// until [`start`](Ict::start).
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let tangle = Arc::new(RingTangle::new(config.tangle_capacity));
        let dispatcher: EffectDispatcher<GossipEvent> = EffectDispatcher::new();
        let node = Node::new(config, Arc::clone(&tangle), dispatcher.clone());
        Ok(Self {
            lifecycle: ict_common::Lifecycle::new("ict"),
            tangle,
            dispatcher,
            node,
            bundle_gate: Mutex::new(None),
        })
    }

    /// Start the bus, the bundle gate and the gossip endpoint, in that
    /// order, so no gossip is ever dispatched into a dead pipeline.
    pub async fn start(&self) -> Result<(), NodeError> {
        self.lifecycle.begin_start()?;
        match self.start_inner().await {
            Ok(()) => {
                info!("ict node running");
                self.lifecycle.mark_running().map_err(Into::into)
            }
            Err(error) => {
                self.rollback_start().await;
                if let Err(lifecycle_error) = self.lifecycle.abort_start() {
                    warn!(%lifecycle_error, "lifecycle rollback failed");
                }
                Err(error)
            }
        }
    }

    async fn start_inner(&self) -> Result<(), NodeError> {
        self.dispatcher.start()?;
        *self.bundle_gate.lock() = Some(bundle::spawn(&self.dispatcher)?);
        self.node.start().await?;
        Ok(())
    }

    async fn rollback_start(&self) {
        self.stop_bundle_gate().await;
        if let Err(error) = self.dispatcher.terminate().await {
            debug!(%error, "dispatcher was not running during rollback");
        }
    }

    /// Tear down in reverse start order.
    pub async fn terminate(&self) -> Result<(), NodeError> {
        self.lifecycle.begin_terminate()?;
        self.node.terminate().await?;
        self.stop_bundle_gate().await;
        self.dispatcher.terminate().await?;
        info!("ict node terminated");
        self.lifecycle.mark_terminated().map_err(Into::into)
    }

    async fn stop_bundle_gate(&self) {
        let gate = self.bundle_gate.lock().take();
        if let Some((shutdown, handle)) = gate {
            shutdown.notify_one();
            if handle.await.is_err() {
                warn!("bundle gate panicked during shutdown");
            }
        }
    }

    /// Store a locally issued transaction and run it through the gossip
    /// pipeline, ending in broadcast to all neighbors.
    pub fn submit(&self, transaction: Arc<Transaction>) {
        self.node.submit(transaction);
    }

    /// Build and submit a transaction carrying an ASCII message.
    pub fn submit_message(&self, message: &str) -> Result<Arc<Transaction>, NodeError> {
        let mut builder = TransactionBuilder::default();
        builder.ascii_message(message);
        let transaction = Arc::new(builder.build()?);
        self.submit(Arc::clone(&transaction));
        Ok(transaction)
    }

    #[must_use]
    pub fn find_transaction_by_hash(&self, hash: &str) -> Option<Arc<Transaction>> {
        self.tangle.find_transaction_by_hash(hash)
    }

    #[must_use]
    pub fn find_transactions_by_address(&self, address: &str) -> Vec<Arc<Transaction>> {
        self.tangle.find_transactions_by_address(address)
    }

    #[must_use]
    pub fn find_transactions_by_tag(&self, tag: &str) -> Vec<Arc<Transaction>> {
        self.tangle.find_transactions_by_tag(tag)
    }

    /// Number of stored transactions, sentinel included.
    #[must_use]
    pub fn tangle_size(&self) -> usize {
        self.tangle.size()
    }

    /// Ask the neighbors for a transaction by hash.
    pub fn request(&self, hash: &str) {
        self.node.request(hash);
    }

    /// Observe every transaction that clears the gossip pipeline.
    pub fn add_gossip_listener(&self, listener: Arc<dyn EffectListener<GossipEvent>>) -> ListenerId {
        self.dispatcher.add_listener(gossip_environment(), listener)
    }

    pub fn remove_gossip_listener(&self, id: ListenerId) -> bool {
        self.dispatcher.remove_listener(&gossip_environment(), id)
    }

    /// Plug a preprocessor into the gossip chain. Positions above
    /// [`BUNDLE_GATE_POSITION`] run after the bundle gate; by convention
    /// applications use 0 and up.
    pub fn add_gossip_preprocessor(
        &self,
        position: i64,
    ) -> Result<ChainedPreprocessor<GossipEvent>, NodeError> {
        self.dispatcher
            .add_preprocessor(&ict_net::gossip_preprocessor_chain(), position)
            .map_err(Into::into)
    }

    /// Detach the preprocessor at `position` without dropping its handle.
    /// Dropping a [`ChainedPreprocessor`] deregisters it as well.
    pub fn remove_gossip_preprocessor(&self, position: i64) {
        self.dispatcher
            .remove_preprocessor(&ict_net::gossip_preprocessor_chain(), position);
    }

    pub async fn add_neighbor(&self, address: &str) -> Result<(), NodeError> {
        self.node.add_neighbor(address).await.map_err(Into::into)
    }

    pub fn remove_neighbor(&self, address: &str) -> bool {
        self.node.remove_neighbor(address)
    }

    #[must_use]
    pub fn neighbor_stats(&self) -> Vec<NeighborStats> {
        self.node.neighbor_stats()
    }

    /// The bound gossip socket address, once started.
    #[must_use]
    pub fn local_address(&self) -> Option<std::net::SocketAddr> {
        self.node.local_address()
    }
}
