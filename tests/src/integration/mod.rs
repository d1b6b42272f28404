//! Cross-subsystem scenarios: complete nodes gossiping over loopback.

mod gossip;
mod pipeline;

#[cfg(test)]
pub(crate) mod support {
    use std::sync::Arc;
    use std::time::Duration;

    use ict_node::{EffectListener, GossipEvent, Ict, NodeConfig};
    use parking_lot::Mutex;

    /// A loopback node with tight forwarding jitter so tests stay fast.
    pub async fn start_node(configure: impl FnOnce(&mut NodeConfig)) -> Ict {
        let mut config = NodeConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            min_forward_delay_ms: 0,
            max_forward_delay_ms: 5,
            ..NodeConfig::default()
        };
        configure(&mut config);
        let ict = Ict::new(config).expect("valid test config");
        ict.start().await.expect("node starts on loopback");
        ict
    }

    /// Make two running nodes neighbors of each other.
    pub async fn link(a: &Ict, b: &Ict) {
        let a_address = a.local_address().expect("a is running").to_string();
        let b_address = b.local_address().expect("b is running").to_string();
        a.add_neighbor(&b_address).await.expect("add neighbor");
        b.add_neighbor(&a_address).await.expect("add neighbor");
    }

    /// Poll until `condition` holds, panicking after a few seconds.
    pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for: {what}");
    }

    /// Gossip listener capturing everything it sees.
    pub struct Recorder {
        pub seen: Mutex<Vec<GossipEvent>>,
    }

    impl Recorder {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }

        pub fn hashes(&self) -> Vec<String> {
            self.seen
                .lock()
                .iter()
                .map(|event| event.transaction.hash.clone())
                .collect()
        }
    }

    impl EffectListener<GossipEvent> for Recorder {
        fn on_effect(&self, effect: &GossipEvent) {
            self.seen.lock().push(effect.clone());
        }
    }
}
