//! The unbounded Tangle store.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use ict_model::{Transaction, NULL_HASH};
use parking_lot::RwLock;
use tracing::debug;

use crate::log::TransactionLog;
use crate::TransactionRequester;

/// In-memory transaction store with hash, address and tag indices.
///
/// The blank sentinel transaction is present from construction under
/// [`NULL_HASH`], so freshly built transactions with blank trunk and branch
/// references resolve immediately instead of triggering network requests.
pub struct Tangle {
    by_hash: RwLock<HashMap<String, Arc<TransactionLog>>>,
    by_address: RwLock<HashMap<String, Vec<Arc<TransactionLog>>>>,
    by_tag: RwLock<HashMap<String, Vec<Arc<TransactionLog>>>>,
    /// Missing hash -> logs waiting to attach an edge to it.
    waiting: RwLock<HashMap<String, Vec<Arc<TransactionLog>>>>,
    requester: RwLock<Option<Arc<dyn TransactionRequester>>>,
}

enum Edge {
    Trunk,
    Branch,
}

impl Tangle {
    #[must_use]
    pub fn new() -> Self {
        let tangle = Self {
            by_hash: RwLock::new(HashMap::new()),
            by_address: RwLock::new(HashMap::new()),
            by_tag: RwLock::new(HashMap::new()),
            waiting: RwLock::new(HashMap::new()),
            requester: RwLock::new(None),
        };
        // The sentinel references itself, so its edges resolve in place.
        tangle.create_log_if_absent(Transaction::null_transaction());
        tangle
    }

    /// Wire up the network port used to fetch missing referenced
    /// transactions.
    pub fn set_requester(&self, requester: Arc<dyn TransactionRequester>) {
        *self.requester.write() = Some(requester);
    }

    /// Insert a transaction unless its hash is already known.
    ///
    /// Returns the stored log and whether this call created it. On
    /// creation the transaction is indexed, its trunk/branch edges are
    /// resolved (or queued as waiting, requesting each missing hash once),
    /// and any transactions waiting on this hash get their edges attached.
    pub fn create_log_if_absent(&self, transaction: Arc<Transaction>) -> (Arc<TransactionLog>, bool) {
        let log = {
            let mut by_hash = self.by_hash.write();
            match by_hash.entry(transaction.hash.clone()) {
                Entry::Occupied(entry) => return (Arc::clone(entry.get()), false),
                Entry::Vacant(entry) => {
                    let log = TransactionLog::new(Arc::clone(&transaction));
                    entry.insert(Arc::clone(&log));
                    log
                }
            }
        };

        self.by_address
            .write()
            .entry(transaction.address.clone())
            .or_default()
            .push(Arc::clone(&log));
        self.by_tag
            .write()
            .entry(transaction.tag.clone())
            .or_default()
            .push(Arc::clone(&log));

        self.resolve_edge(&log, &transaction.trunk_hash, Edge::Trunk);
        self.resolve_edge(&log, &transaction.branch_hash, Edge::Branch);
        self.satisfy_waiters(&transaction);

        (log, true)
    }

    #[must_use]
    pub fn find_log(&self, hash: &str) -> Option<Arc<TransactionLog>> {
        self.by_hash.read().get(hash).cloned()
    }

    #[must_use]
    pub fn find_transaction_by_hash(&self, hash: &str) -> Option<Arc<Transaction>> {
        self.find_log(hash).map(|log| Arc::clone(log.transaction()))
    }

    #[must_use]
    pub fn find_transactions_by_address(&self, address: &str) -> Vec<Arc<Transaction>> {
        self.collect_index(&self.by_address, address)
    }

    #[must_use]
    pub fn find_transactions_by_tag(&self, tag: &str) -> Vec<Arc<Transaction>> {
        self.collect_index(&self.by_tag, tag)
    }

    /// Number of stored transactions, sentinel included.
    #[must_use]
    pub fn size(&self) -> usize {
        self.by_hash.read().len()
    }

    /// Remove a transaction from all indices and waiting lists.
    ///
    /// Edges already attached in referencing transactions stay attached;
    /// the `Arc` keeps the removed transaction alive for them.
    pub fn delete(&self, hash: &str) -> bool {
        if hash == NULL_HASH {
            return false;
        }
        let Some(log) = self.by_hash.write().remove(hash) else {
            return false;
        };
        let transaction = log.transaction();
        Self::prune_index(&self.by_address, &transaction.address, &log);
        Self::prune_index(&self.by_tag, &transaction.tag, &log);

        let mut waiting = self.waiting.write();
        for key in [&transaction.trunk_hash, &transaction.branch_hash] {
            let emptied = match waiting.get_mut(key.as_str()) {
                Some(waiters) => {
                    waiters.retain(|waiter| !Arc::ptr_eq(waiter, &log));
                    waiters.is_empty()
                }
                None => false,
            };
            if emptied {
                waiting.remove(key.as_str());
            }
        }
        true
    }

    fn resolve_edge(&self, log: &Arc<TransactionLog>, hash: &str, edge: Edge) {
        if let Some(referenced) = self.find_transaction_by_hash(hash) {
            Self::attach(log, referenced, &edge);
            return;
        }

        let newly_missing = {
            let mut waiting = self.waiting.write();
            let waiters = waiting.entry(hash.to_string()).or_default();
            let newly_missing = waiters.is_empty();
            waiters.push(Arc::clone(log));
            newly_missing
        };

        // The referenced transaction may have arrived between the lookup
        // and the waiting-list insert; re-check so no edge stays dangling.
        if let Some(referenced) = self.find_transaction_by_hash(hash) {
            Self::attach(log, referenced, &edge);
            let mut waiting = self.waiting.write();
            if let Some(waiters) = waiting.get_mut(hash) {
                waiters.retain(|waiter| !Arc::ptr_eq(waiter, log));
                if waiters.is_empty() {
                    waiting.remove(hash);
                }
            }
            return;
        }

        if newly_missing {
            let requester = self.requester.read().clone();
            if let Some(requester) = requester {
                debug!(hash, "requesting missing referenced transaction");
                requester.request(hash);
            }
        }
    }

    fn satisfy_waiters(&self, arrived: &Arc<Transaction>) {
        let waiters = self.waiting.write().remove(&arrived.hash);
        let Some(waiters) = waiters else { return };
        debug!(
            hash = %arrived.hash,
            waiters = waiters.len(),
            "attaching edges of waiting transactions"
        );
        for waiter in waiters {
            if waiter.transaction().trunk_hash == arrived.hash {
                waiter.attach_trunk(Arc::clone(arrived));
            }
            if waiter.transaction().branch_hash == arrived.hash {
                waiter.attach_branch(Arc::clone(arrived));
            }
        }
    }

    fn attach(log: &Arc<TransactionLog>, referenced: Arc<Transaction>, edge: &Edge) {
        match edge {
            Edge::Trunk => log.attach_trunk(referenced),
            Edge::Branch => log.attach_branch(referenced),
        }
    }

    fn collect_index(
        &self,
        index: &RwLock<HashMap<String, Vec<Arc<TransactionLog>>>>,
        key: &str,
    ) -> Vec<Arc<Transaction>> {
        index
            .read()
            .get(key)
            .map(|logs| {
                logs.iter()
                    .map(|log| Arc::clone(log.transaction()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn prune_index(
        index: &RwLock<HashMap<String, Vec<Arc<TransactionLog>>>>,
        key: &str,
        log: &Arc<TransactionLog>,
    ) {
        let mut index = index.write();
        let emptied = match index.get_mut(key) {
            Some(logs) => {
                logs.retain(|stored| !Arc::ptr_eq(stored, log));
                logs.is_empty()
            }
            None => false,
        };
        if emptied {
            index.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) fn waiting_on(&self, hash: &str) -> usize {
        self.waiting.read().get(hash).map_or(0, Vec::len)
    }

    #[cfg(test)]
    pub(crate) fn waiting_entries(&self) -> usize {
        self.waiting.read().len()
    }
}

impl Default for Tangle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ict_model::{trytes, TransactionBuilder};
    use parking_lot::Mutex;

    struct RecordingRequester {
        requested: Mutex<Vec<String>>,
    }

    impl RecordingRequester {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                requested: Mutex::new(Vec::new()),
            })
        }
    }

    impl TransactionRequester for RecordingRequester {
        fn request(&self, hash: &str) {
            self.requested.lock().push(hash.to_string());
        }
    }

    fn build(configure: impl FnOnce(&mut TransactionBuilder)) -> Arc<Transaction> {
        let mut builder = TransactionBuilder::default();
        configure(&mut builder);
        Arc::new(builder.build().unwrap())
    }

    #[test]
    fn starts_with_the_sentinel_only() {
        let tangle = Tangle::new();
        assert_eq!(tangle.size(), 1);
        let sentinel = tangle.find_transaction_by_hash(NULL_HASH).unwrap();
        assert_eq!(sentinel.hash, NULL_HASH);
    }

    #[test]
    fn blank_references_resolve_without_requests() {
        let tangle = Tangle::new();
        let requester = RecordingRequester::new();
        tangle.set_requester(requester.clone());

        let (log, created) = tangle.create_log_if_absent(build(|_| {}));
        assert!(created);
        assert_eq!(log.trunk().unwrap().hash, NULL_HASH);
        assert_eq!(log.branch().unwrap().hash, NULL_HASH);
        assert!(requester.requested.lock().is_empty());
    }

    #[test]
    fn duplicate_insert_returns_existing_log() {
        let tangle = Tangle::new();
        let transaction = build(|_| {});
        let (first, created_first) = tangle.create_log_if_absent(transaction.clone());
        let (second, created_second) = tangle.create_log_if_absent(transaction);
        assert!(created_first);
        assert!(!created_second);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(tangle.size(), 2);
    }

    #[test]
    fn missing_reference_is_requested_exactly_once() {
        let tangle = Tangle::new();
        let requester = RecordingRequester::new();
        tangle.set_requester(requester.clone());

        let missing = trytes::random_trytes(81);
        let (a, _) = tangle.create_log_if_absent(build(|b| b.trunk_hash = missing.clone()));
        let (b, _) = tangle.create_log_if_absent(build(|b| b.trunk_hash = missing.clone()));

        assert!(a.trunk().is_none());
        assert!(b.trunk().is_none());
        assert_eq!(tangle.waiting_on(&missing), 2);
        assert_eq!(*requester.requested.lock(), vec![missing]);
    }

    #[test]
    fn arrival_attaches_all_waiting_edges() {
        let tangle = Tangle::new();
        let referenced = build(|_| {});
        let by_trunk = build(|b| b.trunk_hash = referenced.hash.clone());
        let by_branch = build(|b| b.branch_hash = referenced.hash.clone());

        let (trunk_waiter, _) = tangle.create_log_if_absent(by_trunk);
        let (branch_waiter, _) = tangle.create_log_if_absent(by_branch);
        assert!(trunk_waiter.trunk().is_none());
        assert!(branch_waiter.branch().is_none());

        tangle.create_log_if_absent(referenced.clone());
        assert_eq!(trunk_waiter.trunk().unwrap().hash, referenced.hash);
        assert_eq!(branch_waiter.branch().unwrap().hash, referenced.hash);
        assert_eq!(tangle.waiting_on(&referenced.hash), 0);
    }

    #[test]
    fn same_missing_trunk_and_branch_both_attach() {
        let tangle = Tangle::new();
        let referenced = build(|_| {});
        let (log, _) = tangle.create_log_if_absent(build(|b| {
            b.trunk_hash = referenced.hash.clone();
            b.branch_hash = referenced.hash.clone();
        }));

        tangle.create_log_if_absent(referenced.clone());
        assert_eq!(log.trunk().unwrap().hash, referenced.hash);
        assert_eq!(log.branch().unwrap().hash, referenced.hash);
    }

    #[test]
    fn concurrent_arrival_leaves_no_waiting_residue() {
        for _ in 0..50 {
            let tangle = Tangle::new();
            let referenced = build(|_| {});
            let referrer = build(|b| b.trunk_hash = referenced.hash.clone());

            std::thread::scope(|scope| {
                scope.spawn(|| tangle.create_log_if_absent(referrer.clone()));
                scope.spawn(|| tangle.create_log_if_absent(referenced.clone()));
            });

            // Whichever way the insertions interleave, the edge attaches
            // and the waiting map holds no entry, empty or otherwise.
            let log = tangle.find_log(&referrer.hash).unwrap();
            assert_eq!(log.trunk().unwrap().hash, referenced.hash);
            assert_eq!(tangle.waiting_entries(), 0);
        }
    }

    #[test]
    fn address_and_tag_indices() {
        let tangle = Tangle::new();
        let address = trytes::random_trytes(81);
        let tag = trytes::random_trytes(27);
        tangle.create_log_if_absent(build(|b| {
            b.address = address.clone();
            b.tag = tag.clone();
        }));
        tangle.create_log_if_absent(build(|b| b.address = address.clone()));

        assert_eq!(tangle.find_transactions_by_address(&address).len(), 2);
        assert_eq!(tangle.find_transactions_by_tag(&tag).len(), 1);
        assert!(tangle.find_transactions_by_tag(&trytes::random_trytes(27)).is_empty());
    }

    #[test]
    fn delete_removes_from_all_indices() {
        let tangle = Tangle::new();
        let missing = trytes::random_trytes(81);
        let transaction = build(|b| b.trunk_hash = missing.clone());
        tangle.create_log_if_absent(transaction.clone());

        assert!(tangle.delete(&transaction.hash));
        assert!(tangle.find_transaction_by_hash(&transaction.hash).is_none());
        assert!(tangle
            .find_transactions_by_address(&transaction.address)
            .is_empty());
        assert_eq!(tangle.waiting_on(&missing), 0);
        assert!(!tangle.delete(&transaction.hash));
    }

    #[test]
    fn sentinel_cannot_be_deleted() {
        let tangle = Tangle::new();
        assert!(!tangle.delete(NULL_HASH));
        assert_eq!(tangle.size(), 1);
    }
}
