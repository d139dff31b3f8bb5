//! # QLight Handshake and Admission
//!
//! Connection setup between real server and client handlers over the
//! in-memory transport: role checks, capacity, and token authorization.

#[cfg(test)]
mod tests {
    use qc_05_qlight_protocol::{DisconnectReason, QLightConfig, QLightError, Role};
    use shared_types::U256;

    use crate::integration::harness::{
        connect, eventually, full_grant, peer_pair, ClientNode, ServerNode, PSI_A, PSI_B,
    };

    // =============================================================================
    // ROLES
    // =============================================================================

    #[tokio::test]
    async fn test_client_registers_with_server() {
        let server = ServerNode::new(QLightConfig::for_testing());
        let client = ClientNode::new(QLightConfig::for_testing(), PSI_A, "tok");
        let link = connect(&server, &client, "c1");

        eventually("both sides registered", || {
            server.handler.peers().len() == 1 && client.handler.peers().len() == 1
        })
        .await;

        assert!(link.server_peer.is_server());
        assert!(!link.client_peer.is_server());
        assert_eq!(link.client_peer.psi(), PSI_A);
        assert_eq!(link.client_peer.token(), "tok");

        let info = server.handler.peer_info("c1").expect("client registered on server");
        assert_eq!(info.version, 65);
        assert_eq!(info.difficulty, Some(U256::one()));
        assert_eq!(server.handler.peers().peers_by_role(Role::Client).len(), 1);
        assert_eq!(client.handler.peers().peers_by_role(Role::Server).len(), 1);
    }

    #[tokio::test]
    async fn test_client_rejects_non_server_peer() {
        let config = QLightConfig::for_testing();
        let a = ClientNode::new(config.clone(), PSI_A, "");
        let b = ClientNode::new(config.clone(), PSI_B, "");
        let (b_seen_by_a, a_seen_by_b) = peer_pair(&config, "a", "b");

        let (a_result, b_result) = tokio::join!(
            a.handler.run_peer(b_seen_by_a.clone()),
            b.handler.run_peer(a_seen_by_b.clone()),
        );

        for result in [a_result, b_result] {
            match result {
                Err(QLightError::RoleMismatch { local, remote }) => {
                    assert_eq!(local, Role::Client);
                    assert_eq!(remote, Role::Client);
                }
                other => panic!("expected role mismatch, got {:?}", other),
            }
        }
        assert!(a.handler.peers().is_empty());
        assert!(b.handler.peers().is_empty());
        assert!(b_seen_by_a.base_disconnected().is_fired());
    }

    #[tokio::test]
    async fn test_server_rejects_server_peer() {
        let config = QLightConfig::for_testing();
        let a = ServerNode::new(config.clone());
        let b = ServerNode::new(config.clone());
        let (b_seen_by_a, a_seen_by_b) = peer_pair(&config, "a", "b");

        let (a_result, b_result) = tokio::join!(
            a.handler.run_peer(b_seen_by_a),
            b.handler.run_peer(a_seen_by_b),
        );

        assert!(matches!(a_result, Err(QLightError::RoleMismatch { .. })));
        assert!(matches!(b_result, Err(QLightError::RoleMismatch { .. })));
        assert!(a.handler.peers().is_empty());
        assert!(b.handler.peers().is_empty());
    }

    #[tokio::test]
    async fn test_network_mismatch_fails_base_handshake() {
        let server = ServerNode::new(QLightConfig::for_testing());
        let client = ClientNode::new(
            QLightConfig {
                network_id: 7,
                ..QLightConfig::for_testing()
            },
            PSI_A,
            "",
        );
        let link = connect(&server, &client, "c1");

        let err = link.client_session.await.unwrap().unwrap_err();
        assert!(matches!(err, QLightError::NetworkIdMismatch { local: 7, .. }));
        let err = link.server_session.await.unwrap().unwrap_err();
        assert!(matches!(err, QLightError::NetworkIdMismatch { .. }));
        assert!(server.handler.peers().is_empty());
    }

    // =============================================================================
    // CAPACITY
    // =============================================================================

    #[tokio::test]
    async fn test_server_refuses_clients_beyond_max_peers() {
        let server = ServerNode::new(QLightConfig {
            max_peers: 1,
            ..QLightConfig::for_testing()
        });
        let first = ClientNode::new(QLightConfig::for_testing(), PSI_A, "");
        let second = ClientNode::new(QLightConfig::for_testing(), PSI_A, "");

        let _kept = connect(&server, &first, "c1");
        eventually("first client registered", || server.handler.peers().len() == 1).await;

        let refused = connect(&server, &second, "c2");
        let err = refused.server_session.await.unwrap().unwrap_err();
        assert!(matches!(err, QLightError::TooManyPeers));
        assert_eq!(
            refused.client_peer.disconnect_reason(),
            Some(DisconnectReason::TooManyPeers)
        );
        assert!(refused.client_session.await.unwrap().is_err());

        assert_eq!(server.handler.peers().len(), 1);
        assert!(server.handler.peer_info("c1").is_some());
        assert!(server.handler.peer_info("c2").is_none());
    }

    #[tokio::test]
    async fn test_client_keeps_a_single_server() {
        let client = ClientNode::new(QLightConfig::for_testing(), PSI_A, "");
        let first = ServerNode::new(QLightConfig::for_testing());
        let second = ServerNode::new(QLightConfig::for_testing());

        let _kept = connect(&first, &client, "c1");
        eventually("first server registered", || client.handler.peers().len() == 1).await;

        let refused = connect(&second, &client, "c1");
        let err = refused.client_session.await.unwrap().unwrap_err();
        assert!(matches!(err, QLightError::TooManyPeers));
        assert_eq!(client.handler.peers().len(), 1);
    }

    // =============================================================================
    // AUTHORIZATION
    // =============================================================================

    #[tokio::test]
    async fn test_unauthorized_client_is_disconnected_with_auth_error() {
        let server = ServerNode::with_auth(QLightConfig::for_testing());
        server.auth.grant("tok-b", full_grant(PSI_B));
        let client = ClientNode::new(QLightConfig::for_testing(), PSI_A, "tok-b");
        let link = connect(&server, &client, "c1");

        let err = link.server_session.await.unwrap().unwrap_err();
        assert!(matches!(err, QLightError::Unauthorized(_)));
        assert_eq!(err.disconnect_reason(), DisconnectReason::AuthError);
        assert_eq!(
            link.client_peer.disconnect_reason(),
            Some(DisconnectReason::AuthError)
        );
        assert!(link.client_session.await.unwrap().is_err());
        assert!(server.handler.peers().is_empty());
        assert!(client.handler.peers().is_empty());
    }

    #[tokio::test]
    async fn test_revoked_token_is_caught_by_periodic_check() {
        let server = ServerNode::with_auth(QLightConfig::for_testing());
        server.auth.grant("tok", full_grant(PSI_A));
        let client = ClientNode::new(QLightConfig::for_testing(), PSI_A, "tok");
        let link = connect(&server, &client, "c1");
        eventually("client admitted", || server.handler.peers().len() == 1).await;

        server.auth.revoke("tok");

        let err = link.server_session.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            QLightError::Disconnected(DisconnectReason::AuthError)
        ));
        assert_eq!(
            link.client_peer.disconnect_reason(),
            Some(DisconnectReason::AuthError)
        );
        assert!(server.handler.peers().is_empty());
        eventually("client dropped the server", || client.handler.peers().is_empty()).await;
    }
}
