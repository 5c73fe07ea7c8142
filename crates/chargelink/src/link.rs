//! Links: the node's view of one live connection.
//!
//! A link owns nothing but a queue into the connection's writer task, so
//! it is cheap to clone into every task that needs to answer on it.

use chargelink_protocol::{Envelope, NodeId, ProtocolError, WireFormat, encode_frame};
use chargelink_routing::Route;
use chargelink_transport::{ConnectionId, Frame, TransportError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::NodeError;

/// Who opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We dialed the peer.
    Outbound,
    /// The peer dialed us.
    Inbound,
}

pub(crate) struct Link {
    pub(crate) id: ConnectionId,
    pub(crate) peer: NodeId,
    pub(crate) direction: Direction,
    tx: mpsc::Sender<Frame>,
    /// The format the peer last spoke.
    format: Mutex<WireFormat>,
    pub(crate) cancel: CancellationToken,
}

impl Link {
    pub(crate) fn new(
        id: ConnectionId,
        peer: NodeId,
        direction: Direction,
        tx: mpsc::Sender<Frame>,
        format: WireFormat,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer,
            direction,
            tx,
            format: Mutex::new(format),
            cancel,
        }
    }

    pub(crate) fn route(&self) -> Route {
        match self.direction {
            Direction::Outbound => Route::Outbound(self.id),
            Direction::Inbound => Route::Inbound(self.id),
        }
    }

    pub(crate) fn observe(&self, format: WireFormat) {
        *self.format.lock() = format;
    }

    fn is_for_peer(&self, envelope: &Envelope) -> bool {
        envelope
            .destination
            .as_ref()
            .is_none_or(|dest| dest == &self.peer)
    }

    /// Picks the wire format for `envelope` on this link.
    ///
    /// Text is only possible when the peer speaks it and the envelope is for
    /// the peer itself; anything else needs the routing fields only the
    /// binary form carries.
    pub(crate) fn format_for(&self, envelope: &Envelope) -> WireFormat {
        if self.is_for_peer(envelope) {
            *self.format.lock()
        } else {
            WireFormat::Binary
        }
    }

    /// Encodes and queues an envelope in the link's current format.
    pub(crate) async fn send(&self, envelope: &Envelope) -> Result<(), NodeError> {
        self.send_as(envelope, self.format_for(envelope)).await
    }

    /// Encodes and queues a reply in the format its request arrived in.
    pub(crate) async fn reply(
        &self,
        envelope: &Envelope,
        arrived_as: WireFormat,
    ) -> Result<(), NodeError> {
        let format = if self.is_for_peer(envelope) {
            arrived_as
        } else {
            WireFormat::Binary
        };
        self.send_as(envelope, format).await
    }

    async fn send_as(
        &self,
        envelope: &Envelope,
        format: WireFormat,
    ) -> Result<(), NodeError> {
        // Raw payloads fall back to binary.
        let frame = match encode_frame(envelope, format) {
            Err(ProtocolError::PayloadNotText) => {
                encode_frame(envelope, WireFormat::Binary)?
            }
            other => other?,
        };
        self.send_frame(frame).await
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), NodeError> {
        self.tx.send(frame).await.map_err(|_| {
            NodeError::Transport(TransportError::ConnectionClosed(format!(
                "{} writer stopped",
                self.id
            )))
        })
    }
}
