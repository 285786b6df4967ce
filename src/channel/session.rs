use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::channel::client::ChannelError;

/// Handle to one open connection to the rover server.
///
/// Writes go through a bounded queue drained by the channel worker. The
/// session closes for good when the worker drops the other end; a new
/// connection always gets a new session with a higher id.
#[derive(Clone, Debug)]
pub struct ChannelSession {
    id: u64,
    tx: mpsc::Sender<String>,
}

impl ChannelSession {
    pub(crate) fn new(id: u64, tx: mpsc::Sender<String>) -> Self {
        Self { id, tx }
    }

    /// Session id; increases with every connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queues one text frame without waiting.
    ///
    /// A full queue drops the frame and reports [`ChannelError::Backpressure`].
    pub fn send(&self, text: String) -> Result<(), ChannelError> {
        self.tx.try_send(text).map_err(|err| match err {
            TrySendError::Full(_) => ChannelError::Backpressure,
            TrySendError::Closed(_) => ChannelError::SessionClosed,
        })
    }

    /// Returns `true` once the connection behind this session is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the underlying connection is gone.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}
