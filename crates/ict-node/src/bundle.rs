//! Bundle-complete gate: a preprocessor that holds gossip back until the
//! whole bundle it belongs to has arrived.
//!
//! A bundle is a chain of transactions linked head-to-tail through their
//! trunk references, with the boundary flags baked into the hashes. The
//! gate buffers every flagged fragment and releases a bundle only once it
//! can walk an unbroken path from a head to a tail, emitting the members
//! tail-first so downstream listeners always see a bundle bottom-up.

use std::collections::HashMap;
use std::sync::Arc;

use ict_eee::{ChainedPreprocessor, DispatchError, EffectDispatcher};
use ict_net::{gossip_preprocessor_chain, GossipEvent};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Chain position of the gate. Strongly negative so application
/// preprocessors at the conventional position 0 and above run after it.
pub const BUNDLE_GATE_POSITION: i64 = -1000;

/// Walk limit guarding against trunk cycles in hostile input.
const MAX_BUNDLE_LENGTH: usize = 1000;

pub(crate) struct BundleGate {
    /// Buffered fragments by their own hash; descending a bundle follows
    /// `trunk_hash` through this map.
    by_hash: HashMap<String, GossipEvent>,
    /// Buffered fragments by their trunk hash; ascending towards the head
    /// looks up who points at the current fragment.
    by_trunk: HashMap<String, GossipEvent>,
}

impl BundleGate {
    pub(crate) fn new() -> Self {
        Self {
            by_hash: HashMap::new(),
            by_trunk: HashMap::new(),
        }
    }

    /// Take in one gossip event; `release` is called for every event that
    /// may proceed down the chain, complete bundles tail-first.
    pub(crate) fn admit(&mut self, event: GossipEvent, mut release: impl FnMut(GossipEvent)) {
        let transaction = Arc::clone(&event.transaction);
        if transaction.is_bundle_head && transaction.is_bundle_tail {
            // A single-transaction bundle is complete by itself.
            release(event);
            return;
        }

        // A head is never descended into and a tail's trunk points outside
        // its own bundle; indexing either would let one bundle's entries
        // shadow another's.
        if !transaction.is_bundle_head {
            self.by_hash.insert(transaction.hash.clone(), event.clone());
        }
        if !transaction.is_bundle_tail {
            self.by_trunk.insert(transaction.trunk_hash.clone(), event.clone());
        }

        let Some(head) = self.find_head(&event) else {
            return;
        };
        let Some(bundle) = self.collect_to_tail(head) else {
            return;
        };

        debug!(
            head = %bundle[0].transaction.hash,
            length = bundle.len(),
            "bundle complete"
        );
        for member in bundle.iter().rev() {
            release(member.clone());
        }
        for member in &bundle {
            if !member.transaction.is_bundle_head {
                self.by_hash.remove(&member.transaction.hash);
            }
            if !member.transaction.is_bundle_tail {
                self.by_trunk.remove(&member.transaction.trunk_hash);
            }
        }
    }

    /// Number of buffered fragments awaiting their bundle. Non-tails all
    /// sit in the trunk index; tails only in the hash index.
    pub(crate) fn buffered(&self) -> usize {
        self.by_trunk.len()
            + self
                .by_hash
                .values()
                .filter(|event| event.transaction.is_bundle_tail)
                .count()
    }

    /// Ascend trunk references from `event` to the bundle head, if every
    /// fragment on the way is already buffered.
    fn find_head(&self, event: &GossipEvent) -> Option<GossipEvent> {
        let mut current = event.clone();
        for _ in 0..MAX_BUNDLE_LENGTH {
            if current.transaction.is_bundle_head {
                return Some(current);
            }
            current = self.by_trunk.get(&current.transaction.hash)?.clone();
        }
        warn!(
            hash = %event.transaction.hash,
            "bundle exceeds maximum length, treating as incomplete"
        );
        None
    }

    /// Descend trunk references from the head, returning the full bundle
    /// once a tail is reached.
    fn collect_to_tail(&self, head: GossipEvent) -> Option<Vec<GossipEvent>> {
        let mut bundle = vec![head];
        for _ in 0..MAX_BUNDLE_LENGTH {
            let last = &bundle[bundle.len() - 1];
            if last.transaction.is_bundle_tail {
                return Some(bundle);
            }
            let next = self.by_hash.get(&last.transaction.trunk_hash)?.clone();
            bundle.push(next);
        }
        None
    }
}

/// Register the gate on the gossip chain and spawn its task.
pub(crate) fn spawn(
    dispatcher: &EffectDispatcher<GossipEvent>,
) -> Result<(Arc<Notify>, JoinHandle<()>), DispatchError> {
    let mut preprocessor: ChainedPreprocessor<GossipEvent> =
        dispatcher.add_preprocessor(&gossip_preprocessor_chain(), BUNDLE_GATE_POSITION)?;
    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    let handle = tokio::spawn(async move {
        let mut gate = BundleGate::new();
        loop {
            let event = tokio::select! {
                _ = signal.notified() => break,
                event = preprocessor.take_effect() => event,
            };
            let Some(event) = event else { break };
            gate.admit(event, |admitted| preprocessor.pass_on(admitted));
        }
    });
    Ok((shutdown, handle))
}
