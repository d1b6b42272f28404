//! Transaction dissemination between full nodes.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::integration::support::{link, start_node, wait_until, Recorder};

    #[tokio::test]
    async fn transaction_propagates_and_is_counted() {
        let a = start_node(|_| {}).await;
        let b = start_node(|_| {}).await;
        link(&a, &b).await;

        let transaction = a.submit_message("across the wire").unwrap();
        wait_until("b stores the transaction", || {
            b.find_transaction_by_hash(&transaction.hash).is_some()
        })
        .await;

        let stored = b.find_transaction_by_hash(&transaction.hash).unwrap();
        assert_eq!(stored.decoded_message, "across the wire");

        let stats = &b.neighbor_stats()[0];
        assert_eq!(stats.current_round.received_new, 1);
        assert!(stats.current_round.received_all >= 1);
        assert_eq!(stats.current_round.invalid, 0);

        a.terminate().await.unwrap();
        b.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn no_echo_back_to_the_source() {
        let a = start_node(|_| {}).await;
        let b = start_node(|_| {}).await;
        link(&a, &b).await;

        let transaction = a.submit_message("one way only").unwrap();
        wait_until("b stores the transaction", || {
            b.find_transaction_by_hash(&transaction.hash).is_some()
        })
        .await;

        // Give b ample time to (wrongly) forward it back.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(a.neighbor_stats()[0].current_round.received_all, 0);

        a.terminate().await.unwrap();
        b.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn relay_reaches_indirect_neighbors() {
        let a = start_node(|_| {}).await;
        let b = start_node(|_| {}).await;
        let c = start_node(|_| {}).await;
        link(&a, &b).await;
        link(&b, &c).await;

        let transaction = a.submit_message("two hops").unwrap();
        wait_until("c stores the relayed transaction", || {
            c.find_transaction_by_hash(&transaction.hash).is_some()
        })
        .await;

        // c got it from b, never from a.
        assert_eq!(c.neighbor_stats()[0].current_round.received_new, 1);

        a.terminate().await.unwrap();
        b.terminate().await.unwrap();
        c.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn missing_reference_is_fetched_from_neighbor() {
        let a = start_node(|_| {}).await;
        // Known only to a: submitted before the nodes are linked.
        let held_back = a.submit_message("you will want this").unwrap();

        let b = start_node(|_| {}).await;
        link(&a, &b).await;

        // b references a transaction it has never seen, which makes it ask
        // its neighbors for the missing hash.
        let referencing = ict_node::TransactionBuilder {
            trunk_hash: held_back.hash.clone(),
            ..ict_node::TransactionBuilder::default()
        }
        .build()
        .unwrap();
        b.submit(std::sync::Arc::new(referencing));

        wait_until("b fetches the missing transaction", || {
            b.find_transaction_by_hash(&held_back.hash).is_some()
        })
        .await;
        assert_eq!(
            b.find_transaction_by_hash(&held_back.hash)
                .unwrap()
                .decoded_message,
            "you will want this"
        );

        a.terminate().await.unwrap();
        b.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn bounded_store_keeps_only_the_newest() {
        let a = start_node(|_| {}).await;
        let b = start_node(|config| config.tangle_capacity = 5).await;
        link(&a, &b).await;

        for i in 0..10 {
            a.submit_message(&format!("message {i}")).unwrap();
        }
        wait_until("b has seen all ten", || {
            b.neighbor_stats()[0].current_round.received_new == 10
        })
        .await;

        // Sentinel plus at most the four newest.
        assert_eq!(b.tangle_size(), 5);

        a.terminate().await.unwrap();
        b.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn node_survives_a_restart() {
        let recorder = Recorder::new();
        let ict = start_node(|_| {}).await;
        ict.add_gossip_listener(recorder.clone());

        let first = ict.submit_message("before restart").unwrap();
        wait_until("first message dispatched", || {
            recorder.hashes().contains(&first.hash)
        })
        .await;

        ict.terminate().await.unwrap();
        ict.start().await.unwrap();

        let second = ict.submit_message("after restart").unwrap();
        wait_until("second message dispatched", || {
            recorder.hashes().contains(&second.hash)
        })
        .await;
        ict.terminate().await.unwrap();
    }
}
