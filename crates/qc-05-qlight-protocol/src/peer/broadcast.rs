//! Per-peer send loops draining the broadcast queues.

use shared_types::short_hex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::{BlockPropagation, Peer, TxBroadcast};

/// Starts the block and transaction send loops of `peer`.
///
/// Returns `false` if the loops were already started.
pub(crate) fn spawn_send_loops(peer: &Arc<Peer>) -> bool {
    let Some((blocks, txs)) = peer.take_queue_receivers() else {
        return false;
    };
    tokio::spawn(block_send_loop(peer.clone(), blocks));
    tokio::spawn(tx_send_loop(peer.clone(), txs));
    true
}

/// Sends queued blocks, private payloads first. Exits on close or the first
/// failed write.
async fn block_send_loop(peer: Arc<Peer>, mut queue: mpsc::Receiver<BlockPropagation>) {
    let term = peer.term_signal();
    loop {
        let prop = tokio::select! {
            biased;
            _ = term.wait() => return,
            prop = queue.recv() => match prop {
                Some(prop) => prop,
                None => return,
            },
        };

        let number = prop.block.number();
        let hash = prop.block.hash();
        if let Some(private_data) = prop.private_data {
            let count = private_data.private_transactions.len();
            if let Err(e) = peer.send_block_private_data(vec![private_data]).await {
                debug!(peer = %peer.id(), error = %e, "[qlight] Block private data send failed");
                return;
            }
            debug!(peer = %peer.id(), number, count, "[qlight] Sent block private data");
        }
        if let Err(e) = peer.send_new_block(prop.block, prop.td).await {
            debug!(peer = %peer.id(), error = %e, "[qlight] Block propagation failed");
            return;
        }
        debug!(peer = %peer.id(), number, hash = %short_hex(&hash), td = %prop.td, "[qlight] Propagated block");
    }
}

async fn tx_send_loop(peer: Arc<Peer>, mut queue: mpsc::Receiver<TxBroadcast>) {
    let term = peer.term_signal();
    loop {
        let batch = tokio::select! {
            biased;
            _ = term.wait() => return,
            batch = queue.recv() => match batch {
                Some(batch) => batch,
                None => return,
            },
        };

        let result = match batch {
            TxBroadcast::Full(txs) => peer.send_transactions(txs).await,
            TxBroadcast::Announce(hashes) => peer.send_new_pooled_transaction_hashes(hashes).await,
        };
        if let Err(e) = result {
            debug!(peer = %peer.id(), error = %e, "[qlight] Transaction broadcast failed");
            return;
        }
    }
}
