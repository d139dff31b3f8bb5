//! Async driver of the two handshake rounds.
//!
//! Each round sends our status and reads the remote one concurrently; both
//! halves share one deadline.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::Peer;
use crate::domain::{
    check_remote_role, expect_handshake_msg, verify_qlight_status, verify_status, Packet,
    QLightStatusPacket, Role, StatusPacket, QLIGHT65, QLIGHT_STATUS_MSG, STATUS_MSG,
};
use crate::events::QLightError;

async fn exchange<S, R, T>(timeout: Duration, send: S, recv: R) -> Result<T, QLightError>
where
    S: Future<Output = Result<(), QLightError>>,
    R: Future<Output = Result<T, QLightError>>,
{
    let joined = async { tokio::try_join!(send, recv) };
    match tokio::time::timeout(timeout, joined).await {
        Ok(Ok(((), remote))) => Ok(remote),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(QLightError::ReadTimeout),
    }
}

/// Base chain handshake. On success the peer head and TD are taken from the
/// remote status.
pub async fn handshake(
    peer: &Peer,
    local: &StatusPacket,
    local_head_number: u64,
    max_message_size: u32,
    timeout: Duration,
) -> Result<(), QLightError> {
    let packet = Packet::Status(local.clone());
    let send = peer.send_packet(&packet);
    let recv = async {
        let msg = peer.read_msg().await?;
        expect_handshake_msg(&msg, STATUS_MSG, max_message_size)?;
        let remote: StatusPacket = msg.decode()?;
        verify_status(local, &remote, local_head_number)?;
        Ok(remote)
    };
    let remote = exchange(timeout, send, recv).await?;

    peer.set_head(remote.head, Some(remote.td));
    debug!(peer = %peer.id(), td = %remote.td, "[qlight] Base handshake complete");
    Ok(())
}

/// QLight capability handshake, run after the base handshake.
///
/// Announces our role, privacy scope and token, stores the remote ones on the
/// peer and applies the role pairing rule.
pub async fn qlight_handshake(
    peer: &Peer,
    local_role: Role,
    psi: &str,
    token: &str,
    max_message_size: u32,
    timeout: Duration,
) -> Result<(), QLightError> {
    let local = QLightStatusPacket {
        protocol_version: QLIGHT65,
        server: local_role.is_server(),
        psi: psi.to_string(),
        token: token.to_string(),
    };
    let packet = Packet::QLightStatus(local);
    let send = peer.send_packet(&packet);
    let recv = async {
        let msg = peer.read_msg().await?;
        expect_handshake_msg(&msg, QLIGHT_STATUS_MSG, max_message_size)?;
        let remote: QLightStatusPacket = msg.decode()?;
        verify_qlight_status(&remote)?;
        Ok(remote)
    };
    let remote = exchange(timeout, send, recv).await?;

    peer.set_qlight_status(remote.server, remote.psi.clone(), remote.token.clone());
    check_remote_role(local_role, &remote)?;
    debug!(
        peer = %peer.id(),
        server = remote.server,
        psi = %remote.psi,
        "[qlight] QLight handshake complete"
    );
    Ok(())
}
