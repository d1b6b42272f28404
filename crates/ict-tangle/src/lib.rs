//! # Tangle Store
//!
//! The in-memory DAG of known transactions. Each transaction is wrapped in
//! a [`TransactionLog`] carrying node-local gossip metadata (who sent it,
//! whether it was forwarded) and the resolved trunk/branch edges.
//!
//! Edges resolve lazily: a transaction may reference a trunk or branch the
//! node has not seen yet. The store records who is waiting on each missing
//! hash and asks its [`TransactionRequester`] to fetch it over the network
//! exactly once; when the missing transaction later arrives, all waiting
//! edges are attached in one step.
//!
//! [`RingTangle`] bounds memory by evicting the transaction with the oldest
//! issuance timestamp once a capacity is exceeded.

pub mod log;
pub mod ring;
pub mod tangle;

pub use log::TransactionLog;
pub use ring::RingTangle;
pub use tangle::Tangle;

/// Port through which the store asks the network layer to fetch a missing
/// transaction. The store guarantees at most one call per missing hash
/// while that hash stays unresolved.
pub trait TransactionRequester: Send + Sync {
    fn request(&self, hash: &str);
}
