//! # QLight Client Flows
//!
//! Server-to-client block propagation with private payloads, token refresh
//! pushed over a live connection, and the client's handling of invalid
//! blocks and server shutdown.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use qc_05_qlight_protocol::adapters::SequenceTokenRefresher;
    use qc_05_qlight_protocol::ports::{PrivateTxManager, TokenRefresher};
    use qc_05_qlight_protocol::{
        DisconnectReason, Packet, QLightConfig, QLightError, TokenHolder, NEW_BLOCK_MSG,
        QLIGHT_NEW_BLOCK_PRIVATE_DATA_MSG,
    };
    use shared_types::{Hash, U256};

    use crate::integration::harness::{
        child, connect, eventually, full_grant, genesis, ClientNode, ServerNode, PARTY_A, PARTY_B,
        PSI_A,
    };

    fn new_block_hashes(client: &ClientNode) -> Vec<Hash> {
        client
            .sync
            .packets()
            .into_iter()
            .filter_map(|(_, packet)| match packet {
                Packet::NewBlock(p) => Some(p.block.hash()),
                _ => None,
            })
            .collect()
    }

    // =============================================================================
    // BLOCK PROPAGATION
    // =============================================================================

    #[tokio::test]
    async fn test_propagated_blocks_fill_the_private_cache() {
        let server = ServerNode::new(QLightConfig::for_testing());
        let client = ClientNode::new(QLightConfig::for_testing(), PSI_A, "");
        let link = connect(&server, &client, "c1");
        eventually("client registered", || server.handler.peers().len() == 1).await;

        let ours = server.private_tx(b"for-a", PARTY_A);
        let theirs = server.private_tx(b"for-b", PARTY_B);
        let first = server.seal(vec![theirs.clone()]);
        let second = server.seal(vec![ours.clone()]);

        eventually("both blocks delivered", || new_block_hashes(&client).len() == 2).await;
        assert_eq!(new_block_hashes(&client), vec![first.hash(), second.hash()]);
        assert!(!client
            .sync
            .codes()
            .contains(&QLIGHT_NEW_BLOCK_PRIVATE_DATA_MSG));

        let (payload, extra) = client.cache.receive(&ours.payload_hash()).unwrap().unwrap();
        assert_eq!(payload, b"for-a".to_vec());
        assert_eq!(extra.sender, PARTY_A);
        assert!(client.cache.contains(&theirs.payload_hash()));
        assert!(client.cache.receive(&theirs.payload_hash()).unwrap().is_none());

        assert!(link.client_peer.known_block(&second.hash()));
        assert!(link.server_peer.known_block(&second.hash()));
        // genesis 1, then two blocks of difficulty 2: the server is known to
        // hold the parent of the latest block.
        assert_eq!(
            link.server_peer.head(),
            (first.hash(), Some(U256::from(3u64)))
        );
    }

    #[tokio::test]
    async fn test_tolerated_invalid_block_is_ignored() {
        let server = ServerNode::new(QLightConfig::for_testing());
        let client = ClientNode::new(QLightConfig::for_testing(), PSI_A, "");
        let link = connect(&server, &client, "c1");
        eventually("client registered", || client.handler.peers().len() == 1).await;

        let mut tampered = child(&genesis(), 2, vec![]);
        tampered.header.tx_root = [0x11; 32];
        let valid = child(&genesis(), 3, vec![]);
        link.client_peer
            .send_new_block(tampered.clone(), U256::from(3u64))
            .await
            .unwrap();
        link.client_peer
            .send_new_block(valid.clone(), U256::from(4u64))
            .await
            .unwrap();

        eventually("valid block delivered", || {
            client.sync.codes().contains(&NEW_BLOCK_MSG)
        })
        .await;
        assert_eq!(new_block_hashes(&client), vec![valid.hash()]);
        assert!(!link.server_peer.known_block(&tampered.hash()));
        assert_eq!(client.handler.peers().len(), 1);
    }

    #[tokio::test]
    async fn test_strict_client_drops_server_on_invalid_block() {
        let server = ServerNode::new(QLightConfig::for_testing());
        let client = ClientNode::new(
            QLightConfig {
                tolerate_invalid_block_roots: false,
                ..QLightConfig::for_testing()
            },
            PSI_A,
            "",
        );
        let link = connect(&server, &client, "c1");
        eventually("client registered", || client.handler.peers().len() == 1).await;

        let mut tampered = child(&genesis(), 2, vec![]);
        tampered.header.uncle_hash = [0x22; 32];
        link.client_peer
            .send_new_block(tampered, U256::from(3u64))
            .await
            .unwrap();

        let err = link.client_session.await.unwrap().unwrap_err();
        assert!(matches!(err, QLightError::InvalidBlock(_)));
        assert_eq!(
            link.server_peer.disconnect_reason(),
            Some(DisconnectReason::ProtocolError)
        );
        assert!(client.handler.peers().is_empty());
        assert!(link.server_session.await.unwrap().is_err());
    }

    // =============================================================================
    // TOKENS
    // =============================================================================

    #[tokio::test]
    async fn test_refreshed_token_is_pushed_to_server() {
        let server = ServerNode::with_auth(QLightConfig::for_testing());
        server.auth.grant("tok-2", full_grant(PSI_A));
        server.auth.grant("tok-3", full_grant(PSI_A));

        // Opaque tokens carry no expiry, so any positive anticipation window
        // makes every read refresh.
        let refresher: Arc<dyn TokenRefresher> = Arc::new(SequenceTokenRefresher::new(
            vec!["tok-2".into(), "tok-3".into()],
            100,
        ));
        let holder = Arc::new(TokenHolder::new(PSI_A, "tok-1", 0, Some(refresher)));
        let client = ClientNode::with_holder(QLightConfig::for_testing(), holder.clone());
        let link = connect(&server, &client, "c1");

        eventually("client admitted", || server.handler.peers().len() == 1).await;
        assert_eq!(link.client_peer.token(), "tok-2");

        eventually("refreshed token reached the server", || {
            link.client_peer.token() == "tok-3"
        })
        .await;
        assert_eq!(holder.token(), "tok-3");

        server.auth.revoke("tok-2");
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(server.handler.peers().len(), 1);
        assert_eq!(link.client_peer.disconnect_reason(), None);
    }

    // =============================================================================
    // SHUTDOWN
    // =============================================================================

    #[tokio::test]
    async fn test_server_stop_releases_client() {
        let server = ServerNode::new(QLightConfig::for_testing());
        let client = ClientNode::new(QLightConfig::for_testing(), PSI_A, "");
        let link = connect(&server, &client, "c1");
        eventually("client registered", || client.handler.peers().len() == 1).await;

        server.handler.stop().await;

        assert_eq!(
            link.client_peer.disconnect_reason(),
            Some(DisconnectReason::Quitting)
        );
        assert!(server.handler.peers().is_empty());
        assert!(link.client_session.await.unwrap().is_err());
        assert!(client.handler.peers().is_empty());

        client.handler.stop().await;
    }
}
