//! In-process message pipe implementing [`MsgReadWriter`].
//!
//! Used by the integration tests and the loopback node. Closing either end
//! closes the whole link, the way a dropped TCP connection would.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::domain::Msg;
use crate::events::QLightError;
use crate::ports::MsgReadWriter;

/// One end of an in-memory duplex link.
pub struct MemoryTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Msg>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Msg>>,
    closed: Arc<watch::Sender<bool>>,
}

impl MemoryTransport {
    /// Creates two connected ends.
    pub fn pipe() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);
        (
            Self {
                tx: Mutex::new(Some(a_tx)),
                rx: tokio::sync::Mutex::new(b_rx),
                closed: closed.clone(),
            },
            Self {
                tx: Mutex::new(Some(b_tx)),
                rx: tokio::sync::Mutex::new(a_rx),
                closed,
            },
        )
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

fn pipe_closed() -> QLightError {
    QLightError::Transport("pipe closed".into())
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|c| *c).await;
}

#[async_trait]
impl MsgReadWriter for MemoryTransport {
    async fn read_msg(&self) -> Result<Msg, QLightError> {
        let closed = self.closed.subscribe();
        let mut rx = self.rx.lock().await;
        // Frames written before the link closed are still delivered.
        if let Ok(msg) = rx.try_recv() {
            return Ok(msg);
        }
        if *closed.borrow() {
            return Err(pipe_closed());
        }
        tokio::select! {
            biased;
            msg = rx.recv() => msg.ok_or_else(pipe_closed),
            _ = wait_closed(closed) => Err(pipe_closed()),
        }
    }

    async fn write_msg(&self, msg: Msg) -> Result<(), QLightError> {
        if self.is_closed() {
            return Err(pipe_closed());
        }
        let tx = self.tx.lock();
        let tx = tx.as_ref().ok_or_else(pipe_closed)?;
        tx.send(msg).map_err(|_| pipe_closed())
    }

    async fn close(&self) {
        self.tx.lock().take();
        self.closed.send_replace(true);
    }
}
