//! In-memory connection pair backed by Tokio channels.

use tokio::sync::{Mutex, mpsc};

use crate::{Connection, ConnectionId, Frame, TransportError};

/// One end of an in-memory connection created by [`channel_pair`].
pub struct ChannelConnection {
    id: ConnectionId,
    peer_identity: Option<String>,
    tx: Mutex<Option<mpsc::Sender<Frame>>>,
    rx: Mutex<mpsc::Receiver<Frame>>,
}

/// Creates two connected in-memory endpoints.
///
/// `a_identity` is what the `a` side reports as its peer's identity (i.e.
/// the identity of whoever holds `b`), and vice versa. Closing either side
/// makes the other side's `recv` return `Ok(None)`.
pub fn channel_pair(
    a_identity: Option<&str>,
    b_identity: Option<&str>,
    capacity: usize,
) -> (ChannelConnection, ChannelConnection) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);

    let a = ChannelConnection {
        id: ConnectionId::next(),
        peer_identity: a_identity.map(str::to_owned),
        tx: Mutex::new(Some(a_tx)),
        rx: Mutex::new(a_rx),
    };
    let b = ChannelConnection {
        id: ConnectionId::next(),
        peer_identity: b_identity.map(str::to_owned),
        tx: Mutex::new(Some(b_tx)),
        rx: Mutex::new(b_rx),
    };
    (a, b)
}

impl Connection for ChannelConnection {
    type Error = TransportError;

    async fn send(&self, frame: Frame) -> Result<(), Self::Error> {
        // Clone the sender so the lock is not held while the channel is full.
        let tx = self.tx.lock().await.clone().ok_or_else(|| {
            TransportError::ConnectionClosed("closed locally".into())
        })?;
        tx.send(frame).await.map_err(|_| {
            TransportError::ConnectionClosed("peer dropped".into())
        })
    }

    async fn recv(&self) -> Result<Option<Frame>, Self::Error> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.tx.lock().await.take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_identity(&self) -> Option<&str> {
        self.peer_identity.as_deref()
    }
}
