//! # QLight Server Flows
//!
//! What a connected client gets from the server: best-peer selection over
//! handshake difficulties, block bodies with privacy-filtered payloads,
//! header ranges and pooled transaction announcements.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::{Arc, OnceLock};

    use qc_05_qlight_protocol::ports::{ChainSync, PrivateTxManager};
    use qc_05_qlight_protocol::{
        GetBlockHeadersPacket, HashOrNumber, Packet, PrivateClientCache, QLightConfig, QLightError,
        TokenHolder, BLOCK_HEADERS_MSG, NEW_POOLED_TRANSACTION_HASHES_MSG,
    };
    use shared_types::{EncryptedPayloadHash, Transaction, U256};

    use crate::integration::harness::{
        child, connect, eventually, genesis, ClientNode, ServerNode, PARTY_A, PARTY_B, PSI_A,
    };

    // =============================================================================
    // BEST PEER
    // =============================================================================

    #[tokio::test]
    async fn test_best_peer_follows_handshake_difficulty() {
        let server = ServerNode::new(QLightConfig::for_testing());

        let c12 = ClientNode::new(QLightConfig::for_testing(), PSI_A, "");
        c12.chain.insert_block(child(&genesis(), 11, vec![]));
        let c13 = ClientNode::new(QLightConfig::for_testing(), PSI_A, "");
        c13.chain.insert_block(child(&genesis(), 12, vec![]));

        let _l12 = connect(&server, &c12, "c12");
        let _l13 = connect(&server, &c13, "c13");
        eventually("both clients registered", || server.handler.peers().len() == 2).await;

        let peers = server.handler.peers();
        let best = peers.best_peer().expect("two peers registered");
        assert_eq!(best.id(), "c13");
        assert_eq!(best.td(), Some(U256::from(13u64)));

        let (head, _) = best.head();
        best.set_head(head, None);
        let best = peers.best_peer().expect("one peer with difficulty left");
        assert_eq!(best.id(), "c12");
        assert_eq!(best.td(), Some(U256::from(12u64)));
    }

    // =============================================================================
    // BLOCK BODIES
    // =============================================================================

    /// Records, for every bodies packet, how many bodies it had and whether the
    /// watched payload was already in the client cache when it arrived.
    struct BodiesWatch {
        cache: OnceLock<Arc<PrivateClientCache>>,
        watched: EncryptedPayloadHash,
        seen: Mutex<Vec<(usize, bool)>>,
    }

    #[async_trait]
    impl ChainSync for BodiesWatch {
        async fn handle(&self, _peer_id: &str, packet: Packet) -> Result<(), QLightError> {
            if let Packet::BlockBodies(bodies) = packet {
                let cached = match self.cache.get() {
                    Some(cache) => cache.receive(&self.watched)?.is_some(),
                    None => false,
                };
                self.seen.lock().push((bodies.len(), cached));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_block_bodies_carry_scoped_private_data_first() {
        let server = ServerNode::new(QLightConfig::for_testing());
        let ours = server.private_tx(b"for-a", PARTY_A);
        let theirs = server.private_tx(b"for-b", PARTY_B);
        let first = server.seal(vec![]);
        let second = server.seal(vec![
            ours.clone(),
            theirs.clone(),
            Transaction::new_public(1, None, U256::one(), vec![]),
        ]);
        let third = server.seal(vec![]);
        let hashes = vec![first.hash(), second.hash(), third.hash()];

        let watch = Arc::new(BodiesWatch {
            cache: OnceLock::new(),
            watched: ours.payload_hash(),
            seen: Mutex::new(Vec::new()),
        });
        let client = ClientNode::with_sync(
            QLightConfig::for_testing(),
            Arc::new(TokenHolder::new(PSI_A, "", 0, None)),
            watch.clone(),
        );
        let _ = watch.cache.set(client.cache.clone());
        let link = connect(&server, &client, "c1");
        eventually("client registered", || client.handler.peers().len() == 1).await;

        let (bodies, private) = server
            .handler
            .answer_get_block_bodies(&link.client_peer, &hashes)
            .unwrap();
        assert_eq!(bodies.len(), 3);
        assert_eq!(private.len(), 1);
        assert_eq!(private[0].block_hash, second.hash());
        assert_eq!(private[0].psi, PSI_A);
        assert_eq!(private[0].private_transactions.len(), 1);
        assert_eq!(private[0].private_transactions[0].hash, ours.payload_hash());

        link.server_peer.request_block_bodies(hashes).await.unwrap();
        eventually("bodies delivered", || !watch.seen.lock().is_empty()).await;

        assert_eq!(*watch.seen.lock(), vec![(3, true)]);
        let (payload, _) = client.cache.receive(&ours.payload_hash()).unwrap().unwrap();
        assert_eq!(payload, b"for-a".to_vec());
        assert!(client.cache.contains(&theirs.payload_hash()));
        assert!(client.cache.receive(&theirs.payload_hash()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_bodies_are_skipped() {
        let server = ServerNode::new(QLightConfig::for_testing());
        let known = server.seal(vec![]);
        let client = ClientNode::new(QLightConfig::for_testing(), PSI_A, "");
        let link = connect(&server, &client, "c1");
        eventually("client registered", || server.handler.peers().len() == 1).await;

        let (bodies, private) = server
            .handler
            .answer_get_block_bodies(&link.client_peer, &[[0xEE; 32], known.hash()])
            .unwrap();
        assert_eq!(bodies.len(), 1);
        assert!(private.is_empty());
    }

    // =============================================================================
    // HEADERS AND POOLED TRANSACTIONS
    // =============================================================================

    #[tokio::test]
    async fn test_header_range_is_served() {
        let server = ServerNode::new(QLightConfig::for_testing());
        for _ in 0..4 {
            server.seal(vec![]);
        }
        let client = ClientNode::new(QLightConfig::for_testing(), PSI_A, "");
        let link = connect(&server, &client, "c1");
        eventually("client registered", || client.handler.peers().len() == 1).await;

        link.server_peer
            .request_block_headers(GetBlockHeadersPacket {
                origin: HashOrNumber::Number(4),
                amount: 3,
                skip: 1,
                reverse: true,
            })
            .await
            .unwrap();
        eventually("headers delivered", || {
            client.sync.codes().contains(&BLOCK_HEADERS_MSG)
        })
        .await;

        let numbers: Vec<u64> = client
            .sync
            .packets()
            .into_iter()
            .find_map(|(_, packet)| match packet {
                Packet::BlockHeaders(headers) => Some(headers.iter().map(|h| h.number).collect()),
                _ => None,
            })
            .unwrap();
        assert_eq!(numbers, vec![4, 2, 0]);
    }

    #[tokio::test]
    async fn test_pool_is_synced_then_new_transactions_announced() {
        let server = ServerNode::new(QLightConfig::for_testing());
        let pending = Transaction::new_public(1, None, U256::one(), vec![]);
        server.pool.add(vec![pending.clone()]);

        let client = ClientNode::new(QLightConfig::for_testing(), PSI_A, "");
        let link = connect(&server, &client, "c1");
        eventually("pool synced on connect", || {
            client.sync.codes().contains(&NEW_POOLED_TRANSACTION_HASHES_MSG)
        })
        .await;
        assert!(link.client_peer.known_transaction(&pending.hash()));

        let fresh = Transaction::new_public(2, None, U256::one(), vec![]);
        server.pool.add(vec![fresh.clone()]);
        eventually("new transaction announced", || {
            client.sync.packets().iter().any(|(_, packet)| {
                matches!(packet, Packet::NewPooledTransactionHashes(hashes) if hashes.contains(&fresh.hash()))
            })
        })
        .await;

        let served = server
            .handler
            .answer_get_pooled_transactions(&[fresh.hash(), [0xAB; 32]]);
        assert_eq!(served, vec![fresh]);
    }
}
