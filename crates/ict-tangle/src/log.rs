//! Per-transaction gossip metadata.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ict_model::Transaction;
use parking_lot::{Mutex, RwLock};

/// A transaction plus everything the node tracks about it locally: which
/// neighbors delivered it, whether it was already forwarded, and the
/// resolved trunk/branch edges.
pub struct TransactionLog {
    transaction: Arc<Transaction>,
    /// Neighbor addresses this transaction was received from (or queued
    /// towards). Used to avoid echoing a transaction back to its source.
    senders: Mutex<HashSet<SocketAddr>>,
    was_sent: AtomicBool,
    trunk: RwLock<Option<Arc<Transaction>>>,
    branch: RwLock<Option<Arc<Transaction>>>,
}

impl TransactionLog {
    pub(crate) fn new(transaction: Arc<Transaction>) -> Arc<Self> {
        Arc::new(Self {
            transaction,
            senders: Mutex::new(HashSet::new()),
            was_sent: AtomicBool::new(false),
            trunk: RwLock::new(None),
            branch: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.transaction
    }

    /// Record a neighbor as a known holder of this transaction. Returns
    /// `false` if it was already recorded.
    pub fn add_sender(&self, address: SocketAddr) -> bool {
        self.senders.lock().insert(address)
    }

    pub fn remove_sender(&self, address: &SocketAddr) -> bool {
        self.senders.lock().remove(address)
    }

    #[must_use]
    pub fn is_sender(&self, address: &SocketAddr) -> bool {
        self.senders.lock().contains(address)
    }

    #[must_use]
    pub fn sender_count(&self) -> usize {
        self.senders.lock().len()
    }

    /// Flag this transaction as forwarded. Returns `true` only for the
    /// caller that flips the flag, so forwarding happens once.
    pub fn mark_sent(&self) -> bool {
        !self.was_sent.swap(true, Ordering::AcqRel)
    }

    #[must_use]
    pub fn was_sent(&self) -> bool {
        self.was_sent.load(Ordering::Acquire)
    }

    /// The resolved trunk transaction, if it has arrived.
    #[must_use]
    pub fn trunk(&self) -> Option<Arc<Transaction>> {
        self.trunk.read().clone()
    }

    /// The resolved branch transaction, if it has arrived.
    #[must_use]
    pub fn branch(&self) -> Option<Arc<Transaction>> {
        self.branch.read().clone()
    }

    pub(crate) fn attach_trunk(&self, trunk: Arc<Transaction>) {
        *self.trunk.write() = Some(trunk);
    }

    pub(crate) fn attach_branch(&self, branch: Arc<Transaction>) {
        *self.branch.write() = Some(branch);
    }
}
