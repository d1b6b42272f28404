//! Inbound gossip: datagram attribution, anti-spam, decode and admission.

use std::net::SocketAddr;
use std::sync::Arc;

use ict_eee::{EffectDispatcher, Environment};
use ict_model::{decode_datagram, NULL_HASH, PACKET_SIZE_BYTES};
use ict_tangle::RingTangle;
use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::{gossip_preprocessor_chain, GossipEvent, Neighbor, Sender};

/// The inbound half of the gossip socket.
///
/// Every datagram is attributed to a configured neighbor before anything
/// else; traffic from unknown addresses is dropped without decoding.
/// Attributed datagrams then pass the anti-spam gate, are decoded, stored,
/// and, if new, submitted to the gossip preprocessor chain.
pub struct Receiver {
    tangle: Arc<RingTangle>,
    dispatcher: EffectDispatcher<GossipEvent>,
    sender: Sender,
    neighbors: Arc<RwLock<Vec<Arc<Neighbor>>>>,
    anti_spam_abs: u64,
    chain: Environment,
}

impl Receiver {
    #[must_use]
    pub fn new(
        tangle: Arc<RingTangle>,
        dispatcher: EffectDispatcher<GossipEvent>,
        sender: Sender,
        neighbors: Arc<RwLock<Vec<Arc<Neighbor>>>>,
        anti_spam_abs: u64,
    ) -> Self {
        Self {
            tangle,
            dispatcher,
            sender,
            neighbors,
            anti_spam_abs,
            chain: gossip_preprocessor_chain(),
        }
    }

    /// Drive the receive loop until `shutdown` fires.
    pub async fn run(&self, socket: Arc<UdpSocket>, shutdown: Arc<Notify>) {
        let mut buffer = vec![0u8; PACKET_SIZE_BYTES + 1];
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                received = socket.recv_from(&mut buffer) => match received {
                    Ok((length, from)) => self.process_datagram(&buffer[..length], from),
                    Err(error) => {
                        warn!(%error, "receive failed");
                    }
                },
            }
        }
    }

    /// Handle one inbound datagram.
    pub fn process_datagram(&self, bytes: &[u8], from: SocketAddr) {
        let Some(neighbor) = self.attribute(from) else {
            trace!(%from, "datagram from unknown sender dropped");
            return;
        };
        neighbor.count_received_all();

        if neighbor.is_flooding(self.anti_spam_abs) {
            neighbor.count_ignored();
            trace!(neighbor = %neighbor.configured_address(), "anti-spam limit hit");
            return;
        }

        let (transaction, request) = match decode_datagram(bytes) {
            Ok(decoded) => decoded,
            Err(error) => {
                neighbor.count_invalid();
                debug!(
                    neighbor = %neighbor.configured_address(),
                    %error,
                    "invalid datagram"
                );
                return;
            }
        };

        let (log, created) = self.tangle.create_log_if_absent(Arc::new(transaction));
        log.add_sender(neighbor.address());
        if created {
            neighbor.count_received_new();
            self.dispatcher.submit_to_chain(
                self.chain.clone(),
                GossipEvent {
                    transaction: Arc::clone(log.transaction()),
                    is_own_transaction: false,
                },
            );
        }

        if request != NULL_HASH {
            neighbor.count_requested();
            self.answer_request(&neighbor, &request);
        }
    }

    /// Match a source address to a neighbor: exact first, then same host
    /// with a changed port, which is adopted as the new address.
    fn attribute(&self, from: SocketAddr) -> Option<Arc<Neighbor>> {
        let neighbors = self.neighbors.read();
        if let Some(exact) = neighbors.iter().find(|n| n.is_address(&from)) {
            return Some(Arc::clone(exact));
        }
        let moved = neighbors.iter().find(|n| n.is_same_host(&from)).cloned();
        drop(neighbors);
        if let Some(neighbor) = &moved {
            neighbor.update_address(from);
        }
        moved
    }

    fn answer_request(&self, neighbor: &Arc<Neighbor>, request: &str) {
        let Some(log) = self.tangle.find_log(request) else {
            trace!(hash = %request, "requested transaction unknown");
            return;
        };
        // Forget that the neighbor holds it, so the broadcast reaches it.
        log.remove_sender(&neighbor.address());
        self.sender.queue_transaction(Arc::clone(log.transaction()));
    }
}
