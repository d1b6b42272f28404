//! Outbound gossip: jittered forwarding queue and request piggybacking.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ict_eee::EffectListener;
use ict_model::{Transaction, TransactionBuilder, NULL_HASH};
use ict_tangle::{RingTangle, TransactionRequester};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, trace, warn};

use crate::{GossipEvent, Neighbor};

/// How long a queued request may sit with no outbound transaction to ride
/// on before a carrier transaction is sent for it.
const REQUEST_CARRIER_DELAY: Duration = Duration::from_millis(100);

/// A transaction waiting for its forwarding delay to elapse.
struct Scheduled {
    due: Instant,
    /// Tie-breaker keeping equal deadlines in submission order.
    seq: u64,
    transaction: Arc<Transaction>,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

struct SenderInner {
    tangle: Arc<RingTangle>,
    neighbors: Arc<RwLock<Vec<Arc<Neighbor>>>>,
    min_forward_delay_ms: u64,
    max_forward_delay_ms: u64,
    queue: Mutex<BinaryHeap<Reverse<Scheduled>>>,
    seq: AtomicU64,
    /// FIFO of missing hashes to piggyback, one per outgoing datagram.
    requests: Mutex<VecDeque<String>>,
    pending_requests: Mutex<HashSet<String>>,
    /// Reusable blank transaction for requests with nothing to ride on.
    carrier: Mutex<Option<Arc<Transaction>>>,
    wake: Notify,
}

/// The outbound half of the gossip socket.
///
/// Transactions are queued with a random per-transaction forwarding delay
/// between the configured minimum and maximum, which decorrelates
/// propagation paths across the network. Each outgoing datagram carries at
/// most one queued request in its header.
#[derive(Clone)]
pub struct Sender {
    inner: Arc<SenderInner>,
}

impl Sender {
    #[must_use]
    pub fn new(
        tangle: Arc<RingTangle>,
        neighbors: Arc<RwLock<Vec<Arc<Neighbor>>>>,
        min_forward_delay_ms: u64,
        max_forward_delay_ms: u64,
    ) -> Self {
        Self {
            inner: Arc::new(SenderInner {
                tangle,
                neighbors,
                min_forward_delay_ms,
                max_forward_delay_ms,
                queue: Mutex::new(BinaryHeap::new()),
                seq: AtomicU64::new(0),
                requests: Mutex::new(VecDeque::new()),
                pending_requests: Mutex::new(HashSet::new()),
                carrier: Mutex::new(None),
                wake: Notify::new(),
            }),
        }
    }

    /// Schedule a transaction for broadcast after its forwarding delay.
    pub fn queue_transaction(&self, transaction: Arc<Transaction>) {
        let scheduled = Scheduled {
            due: Instant::now() + self.forward_delay(),
            seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
            transaction,
        };
        trace!(hash = %scheduled.transaction.hash, "transaction queued for broadcast");
        self.inner.queue.lock().push(Reverse(scheduled));
        self.inner.wake.notify_one();
    }

    /// Drive the send loop until `shutdown` fires.
    pub async fn run(&self, socket: Arc<UdpSocket>, shutdown: Arc<Notify>) {
        loop {
            let next_due = self.broadcast_due(&socket).await;
            let deadline = next_due.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            let request_waiting = !self.inner.requests.lock().is_empty();
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = self.inner.wake.notified() => {}
                _ = sleep_until(deadline), if next_due.is_some() => {}
                _ = sleep(REQUEST_CARRIER_DELAY), if next_due.is_none() && request_waiting => {
                    self.send_request_carrier(&socket).await;
                }
            }
        }
    }

    /// Broadcast every queued transaction whose delay has elapsed; returns
    /// the deadline of the earliest still-waiting one.
    async fn broadcast_due(&self, socket: &UdpSocket) -> Option<Instant> {
        loop {
            let due = {
                let mut queue = self.inner.queue.lock();
                match queue.peek() {
                    Some(Reverse(scheduled)) if scheduled.due <= Instant::now() => {
                        queue.pop().map(|Reverse(scheduled)| scheduled)
                    }
                    Some(Reverse(scheduled)) => return Some(scheduled.due),
                    None => return None,
                }
            };
            if let Some(scheduled) = due {
                self.broadcast(socket, &scheduled.transaction, false).await;
            }
        }
    }

    /// Send one transaction to every neighbor not already known to hold
    /// it, piggybacking the oldest queued request.
    async fn broadcast(&self, socket: &UdpSocket, transaction: &Arc<Transaction>, to_all: bool) {
        let log = self.inner.tangle.find_log(&transaction.hash);
        let recipients: Vec<Arc<Neighbor>> = self
            .inner
            .neighbors
            .read()
            .iter()
            .filter(|neighbor| {
                to_all
                    || !log
                        .as_ref()
                        .is_some_and(|log| log.is_sender(&neighbor.address()))
            })
            .cloned()
            .collect();
        if recipients.is_empty() {
            // A queued request stays pending until a datagram actually
            // leaves the node to carry it.
            return;
        }

        let request = self.next_request();
        let datagram =
            match transaction.to_datagram(request.as_deref().unwrap_or(NULL_HASH)) {
                Ok(datagram) => datagram,
                Err(error) => {
                    warn!(hash = %transaction.hash, %error, "failed to encode datagram");
                    if let Some(hash) = request {
                        self.requeue_request(hash);
                    }
                    return;
                }
            };

        for neighbor in recipients {
            if let Err(error) = socket.send_to(&datagram, neighbor.address()).await {
                warn!(neighbor = %neighbor.configured_address(), %error, "send failed");
            }
        }
    }

    /// Requests must not starve when the node has nothing else to say: ride
    /// them on a reusable blank transaction.
    async fn send_request_carrier(&self, socket: &UdpSocket) {
        let Some(carrier) = self.carrier_transaction() else {
            return;
        };
        debug!("sending request on a carrier transaction");
        self.broadcast(socket, &carrier, true).await;
    }

    fn carrier_transaction(&self) -> Option<Arc<Transaction>> {
        let mut slot = self.inner.carrier.lock();
        if slot.is_none() {
            match TransactionBuilder::default().build() {
                Ok(transaction) => *slot = Some(Arc::new(transaction)),
                Err(error) => {
                    warn!(%error, "failed to build request carrier");
                    return None;
                }
            }
        }
        slot.clone()
    }

    fn next_request(&self) -> Option<String> {
        let request = self.inner.requests.lock().pop_front();
        if let Some(hash) = &request {
            self.inner.pending_requests.lock().remove(hash);
        }
        request
    }

    /// Put a popped request back at the front of the queue.
    fn requeue_request(&self, hash: String) {
        if self.inner.pending_requests.lock().insert(hash.clone()) {
            self.inner.requests.lock().push_front(hash);
        }
    }

    fn forward_delay(&self) -> Duration {
        let (min, max) = (
            self.inner.min_forward_delay_ms,
            self.inner.max_forward_delay_ms,
        );
        let millis = if max <= min {
            min
        } else {
            rand::thread_rng().gen_range(min..=max)
        };
        Duration::from_millis(millis)
    }

    /// Transactions currently waiting for their forwarding delay.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn pending_request_count(&self) -> usize {
        self.inner.requests.lock().len()
    }
}

impl TransactionRequester for Sender {
    fn request(&self, hash: &str) {
        if self.inner.pending_requests.lock().insert(hash.to_string()) {
            self.inner.requests.lock().push_back(hash.to_string());
            self.inner.wake.notify_one();
        }
    }
}

/// Listener on the terminal gossip environment that queues admitted
/// transactions towards the neighbors that have not shown them yet. Runs
/// after the preprocessor chain, so filtered-out transactions are never
/// forwarded.
pub struct ForwardingListener {
    sender: Sender,
    tangle: Arc<RingTangle>,
    neighbors: Arc<RwLock<Vec<Arc<Neighbor>>>>,
}

impl ForwardingListener {
    #[must_use]
    pub fn new(
        sender: Sender,
        tangle: Arc<RingTangle>,
        neighbors: Arc<RwLock<Vec<Arc<Neighbor>>>>,
    ) -> Self {
        Self {
            sender,
            tangle,
            neighbors,
        }
    }
}

impl EffectListener<GossipEvent> for ForwardingListener {
    fn on_effect(&self, event: &GossipEvent) {
        let Some(log) = self.tangle.find_log(&event.transaction.hash) else {
            // Evicted between admission and forwarding.
            return;
        };
        if log.was_sent() {
            return;
        }
        let neighbor_count = self.neighbors.read().len();
        if !event.is_own_transaction && log.sender_count() >= neighbor_count {
            // Every neighbor already holds it.
            return;
        }
        if log.mark_sent() {
            self.sender.queue_transaction(Arc::clone(&event.transaction));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> (Sender, Arc<RingTangle>, Arc<RwLock<Vec<Arc<Neighbor>>>>) {
        let tangle = Arc::new(RingTangle::new(100));
        let neighbors = Arc::new(RwLock::new(Vec::new()));
        let sender = Sender::new(Arc::clone(&tangle), Arc::clone(&neighbors), 0, 200);
        (sender, tangle, neighbors)
    }

    fn transaction() -> Arc<Transaction> {
        Arc::new(TransactionBuilder::default().build().unwrap())
    }

    #[tokio::test]
    async fn requests_deduplicate_until_sent() {
        let (sender, _, _) = sender();
        sender.request("HASH9A");
        sender.request("HASH9A");
        sender.request("HASH9B");
        assert_eq!(sender.pending_request_count(), 2);

        assert_eq!(sender.next_request().as_deref(), Some("HASH9A"));
        assert_eq!(sender.pending_request_count(), 1);

        // Once sent, the same hash may be requested again.
        sender.request("HASH9A");
        assert_eq!(sender.pending_request_count(), 2);
    }

    #[tokio::test]
    async fn forward_delay_respects_bounds() {
        let (sender, _, _) = sender();
        for _ in 0..50 {
            let delay = sender.forward_delay();
            assert!(delay <= Duration::from_millis(200));
        }

        let fixed = Sender::new(
            Arc::new(RingTangle::new(10)),
            Arc::new(RwLock::new(Vec::new())),
            40,
            40,
        );
        assert_eq!(fixed.forward_delay(), Duration::from_millis(40));
    }

    #[test]
    fn scheduled_orders_by_deadline_then_sequence() {
        let now = Instant::now();
        let later = now + Duration::from_millis(10);
        let a = Scheduled {
            due: later,
            seq: 0,
            transaction: transaction(),
        };
        let b = Scheduled {
            due: now,
            seq: 1,
            transaction: transaction(),
        };
        let c = Scheduled {
            due: now,
            seq: 2,
            transaction: transaction(),
        };

        let mut heap = BinaryHeap::from([Reverse(a), Reverse(b), Reverse(c)]);
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|Reverse(s)| s.seq)).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[tokio::test]
    async fn request_survives_a_fully_skipped_broadcast() {
        let (sender, tangle, neighbors) = sender();
        let neighbor = Arc::new(Neighbor::resolve("127.0.0.1:1400").await.unwrap());
        neighbors.write().push(Arc::clone(&neighbor));

        let tx = transaction();
        let (log, _) = tangle.create_log_if_absent(Arc::clone(&tx));
        log.add_sender(neighbor.address());

        let missing = ict_model::trytes::random_trytes(81);
        sender.request(&missing);

        // The only neighbor already holds the transaction: nothing leaves,
        // so the request must stay queued for a later datagram.
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.broadcast(&socket, &tx, false).await;
        assert_eq!(sender.pending_request_count(), 1);

        sender.broadcast(&socket, &tx, true).await;
        assert_eq!(sender.pending_request_count(), 0);
    }

    #[tokio::test]
    async fn forwarding_listener_queues_once() {
        let (sender, tangle, neighbors) = sender();
        neighbors
            .write()
            .push(Arc::new(Neighbor::resolve("127.0.0.1:1400").await.unwrap()));
        let listener = ForwardingListener::new(
            sender.clone(),
            Arc::clone(&tangle),
            Arc::clone(&neighbors),
        );

        let tx = transaction();
        tangle.create_log_if_absent(Arc::clone(&tx));
        let event = GossipEvent {
            transaction: tx,
            is_own_transaction: false,
        };
        listener.on_effect(&event);
        listener.on_effect(&event);
        assert_eq!(sender.queue_depth(), 1);
    }

    #[tokio::test]
    async fn forwarding_listener_skips_fully_distributed() {
        let (sender, tangle, neighbors) = sender();
        let neighbor = Arc::new(Neighbor::resolve("127.0.0.1:1400").await.unwrap());
        neighbors.write().push(Arc::clone(&neighbor));
        let listener = ForwardingListener::new(
            sender.clone(),
            Arc::clone(&tangle),
            Arc::clone(&neighbors),
        );

        let tx = transaction();
        let (log, _) = tangle.create_log_if_absent(Arc::clone(&tx));
        log.add_sender(neighbor.address());
        listener.on_effect(&GossipEvent {
            transaction: tx,
            is_own_transaction: false,
        });
        assert_eq!(sender.queue_depth(), 0);
    }
}
