//! Gossip pipeline behavior across nodes: bundle gating and preprocessors.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ict_node::TransactionBuilder;

    use crate::integration::support::{link, start_node, wait_until, Recorder};

    /// head -> tail two-fragment bundle.
    fn two_bundle() -> (ict_node::Transaction, ict_node::Transaction) {
        let tail = TransactionBuilder {
            is_bundle_head: false,
            is_bundle_tail: true,
            ..TransactionBuilder::default()
        }
        .build()
        .unwrap();
        let head = TransactionBuilder {
            is_bundle_head: true,
            is_bundle_tail: false,
            trunk_hash: tail.hash.clone(),
            ..TransactionBuilder::default()
        }
        .build()
        .unwrap();
        (head, tail)
    }

    #[tokio::test]
    async fn bundles_cross_the_network_and_release_tail_first() {
        let a = start_node(|_| {}).await;
        let b = start_node(|_| {}).await;
        link(&a, &b).await;

        let recorder = Recorder::new();
        b.add_gossip_listener(recorder.clone());

        let (head, tail) = two_bundle();
        a.submit(Arc::new(head.clone()));

        // Half a bundle crosses no gate, on either node.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(recorder.seen.lock().is_empty());

        a.submit(Arc::new(tail.clone()));
        wait_until("b releases the whole bundle", || {
            recorder.seen.lock().len() == 2
        })
        .await;

        assert_eq!(recorder.hashes(), vec![tail.hash.clone(), head.hash.clone()]);

        a.terminate().await.unwrap();
        b.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn vetoing_preprocessor_stops_relaying() {
        let a = start_node(|_| {}).await;
        let b = start_node(|_| {}).await;
        let c = start_node(|_| {}).await;
        link(&a, &b).await;
        link(&b, &c).await;

        let recorder_b = Recorder::new();
        b.add_gossip_listener(recorder_b.clone());
        let mut veto = b.add_gossip_preprocessor(0).unwrap();

        let transaction = a.submit_message("stopped at b").unwrap();
        wait_until("b stores the transaction", || {
            b.find_transaction_by_hash(&transaction.hash).is_some()
        })
        .await;

        // Held by the preprocessor: b neither reacts nor relays.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(recorder_b.seen.lock().is_empty());
        assert!(c.find_transaction_by_hash(&transaction.hash).is_none());

        // Releasing it lets the pipeline finish: b's listeners fire and
        // the transaction reaches c after all.
        let held = veto.take_effect().await.unwrap();
        veto.pass_on(held);
        wait_until("b dispatches after release", || {
            !recorder_b.seen.lock().is_empty()
        })
        .await;
        wait_until("c receives the relayed transaction", || {
            c.find_transaction_by_hash(&transaction.hash).is_some()
        })
        .await;

        a.terminate().await.unwrap();
        b.terminate().await.unwrap();
        c.terminate().await.unwrap();
    }
}
