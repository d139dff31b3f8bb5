//! Transport seam between the protocol engine and the framed connection.

use async_trait::async_trait;

use crate::domain::Msg;
use crate::events::QLightError;

/// Framed message reader/writer for one connection.
///
/// Framing, encryption and sub-protocol multiplexing live below this trait.
/// A single reader task calls `read_msg`; writers may be concurrent.
#[async_trait]
pub trait MsgReadWriter: Send + Sync {
    /// Waits for the next inbound frame. Fails once the connection is gone.
    async fn read_msg(&self) -> Result<Msg, QLightError>;

    /// Writes one frame, returning once it has been handed to the connection.
    async fn write_msg(&self, msg: Msg) -> Result<(), QLightError>;

    /// Tears the connection down. Later reads and writes fail.
    async fn close(&self);
}
