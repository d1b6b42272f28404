//! Neighbor bookkeeping: address resolution and per-round traffic stats.

use std::collections::VecDeque;
use std::net::SocketAddr;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::NetworkError;

/// Completed stats rounds retained per neighbor.
pub const STATS_HISTORY_ROUNDS: usize = 64;

/// Traffic counters for one stats round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Every datagram attributed to the neighbor.
    pub received_all: u64,
    /// Datagrams carrying a transaction seen for the first time.
    pub received_new: u64,
    /// Datagrams that failed to decode.
    pub invalid: u64,
    /// Datagrams dropped by the anti-spam limit.
    pub ignored: u64,
    /// Requests the neighbor piggybacked on its datagrams.
    pub requested: u64,
}

/// Snapshot handed out through the node API.
#[derive(Debug, Clone, Serialize)]
pub struct NeighborStats {
    pub address: String,
    pub current_round: Stats,
    pub previous_round: Stats,
}

/// One configured gossip peer.
///
/// The configured `host:port` string is authoritative; the resolved socket
/// address is refreshed every stats round so a neighbor behind a dynamic
/// DNS name keeps working across IP changes.
pub struct Neighbor {
    configured: String,
    address: RwLock<SocketAddr>,
    current: Mutex<Stats>,
    previous: RwLock<Stats>,
    history: Mutex<VecDeque<Stats>>,
}

impl Neighbor {
    /// Resolve the configured address and create the neighbor.
    pub async fn resolve(configured: &str) -> Result<Self, NetworkError> {
        let address = resolve_address(configured).await?;
        Ok(Self {
            configured: configured.to_string(),
            address: RwLock::new(address),
            current: Mutex::new(Stats::default()),
            previous: RwLock::new(Stats::default()),
            history: Mutex::new(VecDeque::with_capacity(STATS_HISTORY_ROUNDS)),
        })
    }

    #[must_use]
    pub fn configured_address(&self) -> &str {
        &self.configured
    }

    #[must_use]
    pub fn address(&self) -> SocketAddr {
        *self.address.read()
    }

    /// Exact source-address match.
    #[must_use]
    pub fn is_address(&self, address: &SocketAddr) -> bool {
        *self.address.read() == *address
    }

    /// Same host, possibly different source port. Neighbors behind NAT can
    /// legitimately change ports between restarts.
    #[must_use]
    pub fn is_same_host(&self, address: &SocketAddr) -> bool {
        self.address.read().ip() == address.ip()
    }

    /// Adopt a changed source port observed on inbound traffic.
    pub fn update_address(&self, address: SocketAddr) {
        let mut current = self.address.write();
        if *current != address {
            info!(
                neighbor = %self.configured,
                old = %current,
                new = %address,
                "neighbor address changed"
            );
            *current = address;
        }
    }

    /// Re-resolve the configured name, keeping the old address if the
    /// lookup fails.
    pub async fn refresh_address(&self) {
        match resolve_address(&self.configured).await {
            Ok(address) => self.update_address(address),
            Err(error) => {
                warn!(neighbor = %self.configured, %error, "DNS refresh failed");
            }
        }
    }

    pub fn count_received_all(&self) {
        self.current.lock().received_all += 1;
    }

    pub fn count_received_new(&self) {
        self.current.lock().received_new += 1;
    }

    pub fn count_invalid(&self) {
        self.current.lock().invalid += 1;
    }

    pub fn count_ignored(&self) {
        self.current.lock().ignored += 1;
    }

    pub fn count_requested(&self) {
        self.current.lock().requested += 1;
    }

    /// `true` while the neighbor's traffic in the previous round exceeded
    /// the per-round datagram allowance. The current round's counters do
    /// not mute; a burst takes effect at the next round boundary.
    #[must_use]
    pub fn is_flooding(&self, anti_spam_abs: u64) -> bool {
        self.previous.read().received_all > anti_spam_abs
    }

    /// Close the current stats round: the live counters become the
    /// previous round and a fresh round begins.
    pub fn new_round(&self) {
        let completed = {
            let mut current = self.current.lock();
            std::mem::take(&mut *current)
        };
        let displaced = {
            let mut previous = self.previous.write();
            std::mem::replace(&mut *previous, completed)
        };
        let mut history = self.history.lock();
        if history.len() == STATS_HISTORY_ROUNDS {
            history.pop_front();
        }
        history.push_back(displaced);
    }

    #[must_use]
    pub fn current_round(&self) -> Stats {
        *self.current.lock()
    }

    #[must_use]
    pub fn previous_round(&self) -> Stats {
        *self.previous.read()
    }

    #[must_use]
    pub fn history(&self) -> Vec<Stats> {
        self.history.lock().iter().copied().collect()
    }

    #[must_use]
    pub fn stats_snapshot(&self) -> NeighborStats {
        NeighborStats {
            address: self.configured.clone(),
            current_round: self.current_round(),
            previous_round: self.previous_round(),
        }
    }
}

async fn resolve_address(configured: &str) -> Result<SocketAddr, NetworkError> {
    let mut addresses =
        tokio::net::lookup_host(configured)
            .await
            .map_err(|source| NetworkError::Resolve {
                address: configured.to_string(),
                source,
            })?;
    addresses.next().ok_or_else(|| NetworkError::NoAddress {
        address: configured.to_string(),
    })
}
