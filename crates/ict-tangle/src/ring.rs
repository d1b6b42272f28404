//! Capacity-bounded Tangle.

use std::collections::BTreeSet;
use std::sync::Arc;

use ict_model::{Transaction, NULL_HASH};
use parking_lot::Mutex;
use tracing::debug;

use crate::log::TransactionLog;
use crate::tangle::Tangle;
use crate::TransactionRequester;

/// A [`Tangle`] whose `size()`, sentinel included, never exceeds
/// `capacity`. Once full, every insert evicts the stored transaction with
/// the oldest issuance timestamp, which may be the inserted transaction
/// itself.
pub struct RingTangle {
    tangle: Tangle,
    capacity: usize,
    /// `(issuance_timestamp, hash)`, oldest first.
    insertion_order: Mutex<BTreeSet<(i64, String)>>,
}

impl RingTangle {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tangle: Tangle::new(),
            capacity,
            insertion_order: Mutex::new(BTreeSet::new()),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_requester(&self, requester: Arc<dyn TransactionRequester>) {
        self.tangle.set_requester(requester);
    }

    /// Insert and, if over capacity, evict oldest-issued transactions.
    pub fn create_log_if_absent(&self, transaction: Arc<Transaction>) -> (Arc<TransactionLog>, bool) {
        let (log, created) = self.tangle.create_log_if_absent(transaction);
        if !created || log.transaction().hash == NULL_HASH {
            return (log, created);
        }

        let mut order = self.insertion_order.lock();
        order.insert((
            log.transaction().issuance_timestamp,
            log.transaction().hash.clone(),
        ));
        // The sentinel occupies one slot on top of the ordered entries.
        while order.len() + 1 > self.capacity {
            if let Some((timestamp, hash)) = order.pop_first() {
                debug!(%hash, timestamp, "evicting oldest transaction");
                self.tangle.delete(&hash);
            }
        }
        (log, created)
    }

    #[must_use]
    pub fn find_log(&self, hash: &str) -> Option<Arc<TransactionLog>> {
        self.tangle.find_log(hash)
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

    #[must_use]
    pub fn size(&self) -> usize {
        self.tangle.size()
    }

    pub fn delete(&self, hash: &str) -> bool {
        let deleted = self.tangle.delete(hash);
        if deleted {
            self.insertion_order
                .lock()
                .retain(|(_, stored)| stored != hash);
        }
        deleted
    }
}
