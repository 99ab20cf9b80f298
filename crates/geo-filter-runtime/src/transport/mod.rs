//! Message channels between the consuming and privileged contexts.
//!
//! An [`Endpoint`] is one side of a bidirectional, per-direction FIFO channel.
//! Messages are serialized to JSON text before they leave an endpoint, so the
//! two sides never share memory regardless of whether they live in the same
//! process, talk over stdio, or run as parent and child processes.

pub mod framing;
pub mod process;
pub mod stdio;
pub mod stream;

use tokio::sync::mpsc;

use crate::types::{BridgeMessage, RuntimeError, RuntimeResult};

pub use process::BridgeProcess;

/// One side of a duplex message channel.
pub struct Endpoint {
    sender: MessageSender,
    receiver: MessageReceiver,
}

/// Sending half of an endpoint. Cheap to clone.
#[derive(Clone)]
pub struct MessageSender {
    tx: mpsc::UnboundedSender<String>,
}

/// Receiving half of an endpoint.
pub struct MessageReceiver {
    rx: mpsc::UnboundedReceiver<String>,
}

/// Create two connected endpoints.
pub fn duplex() -> (Endpoint, Endpoint) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        Endpoint::from_channels(a_tx, a_rx),
        Endpoint::from_channels(b_tx, b_rx),
    )
}

impl Endpoint {
    pub(crate) fn from_channels(
        tx: mpsc::UnboundedSender<String>,
        rx: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            sender: MessageSender { tx },
            receiver: MessageReceiver { rx },
        }
    }

    pub fn split(self) -> (MessageSender, MessageReceiver) {
        (self.sender, self.receiver)
    }
}

impl MessageSender {
    /// Queue a message for delivery. Fails only once the other side is gone.
    pub fn send(&self, message: &BridgeMessage) -> RuntimeResult<()> {
        let line = framing::frame_message(message)?;
        self.tx.send(line).map_err(|_| RuntimeError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl MessageReceiver {
    /// Next message, `None` once the other side has closed.
    pub async fn recv(&mut self) -> Option<RuntimeResult<BridgeMessage>> {
        let line = self.rx.recv().await?;
        Some(framing::parse_message(&line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LookupRequest;
    use geo_filter::AuthorId;

    fn request(id: u64) -> BridgeMessage {
        BridgeMessage::LookupRequest(LookupRequest {
            request_id: id,
            author_id: AuthorId::new("ada"),
        })
    }

    #[tokio::test]
    async fn test_duplex_is_fifo_per_direction() {
        let (left, right) = duplex();
        let (left_tx, _left_rx) = left.split();
        let (_right_tx, mut right_rx) = right.split();

        for id in 1..=3 {
            left_tx.send(&request(id)).unwrap();
        }
        for id in 1..=3 {
            assert_eq!(right_rx.recv().await.unwrap().unwrap(), request(id));
        }
    }

    #[tokio::test]
    async fn test_closed_peer() {
        let (left, right) = duplex();
        let (left_tx, _) = left.split();
        drop(right);
        assert!(left_tx.is_closed());
        assert!(matches!(
            left_tx.send(&request(1)),
            Err(RuntimeError::ChannelClosed)
        ));
    }
}
