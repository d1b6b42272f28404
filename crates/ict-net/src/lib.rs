//! # Gossip Layer
//!
//! UDP-based transaction exchange with a fixed, small set of configured
//! neighbors. Every datagram is one transaction plus an 81-tryte request
//! header through which nodes piggyback "send me this hash" queries on
//! regular traffic.
//!
//! Received transactions enter the node through the gossip preprocessor
//! chain on the effect bus; whatever survives the chain reaches the
//! terminal gossip environment, where the forwarding listener queues it
//! for the neighbors that do not have it yet.

pub mod neighbor;
pub mod node;
pub mod receiver;
pub mod sender;

pub use neighbor::{Neighbor, NeighborStats, Stats};
pub use node::Node;
pub use receiver::Receiver;
pub use sender::{ForwardingListener, Sender};

use std::sync::Arc;

use ict_common::LifecycleError;
use ict_eee::Environment;
use ict_model::Transaction;
use thiserror::Error;

/// Terminal environment carrying fully admitted gossip.
#[must_use]
pub fn gossip_environment() -> Environment {
    Environment::new("gossip")
}

/// Chain environment through which gossip passes before admission.
#[must_use]
pub fn gossip_preprocessor_chain() -> Environment {
    Environment::new("gossip.preprocessor-chain")
}

/// A transaction travelling through the gossip pipeline.
#[derive(Clone)]
pub struct GossipEvent {
    pub transaction: Arc<Transaction>,
    /// `true` for transactions submitted on this node rather than received
    /// from a neighbor.
    pub is_own_transaction: bool,
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to bind UDP socket on {address}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("failed to resolve neighbor address `{address}`")]
    Resolve {
        address: String,
        source: std::io::Error,
    },

    #[error("neighbor address `{address}` resolved to nothing")]
    NoAddress { address: String },

    #[error("{count} neighbors configured, at most {max} supported")]
    TooManyNeighbors { count: usize, max: usize },

    #[error("neighbor `{address}` is already configured")]
    DuplicateNeighbor { address: String },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
