//! Transport abstraction layer for Chargelink.
//!
//! The message exchange engine never opens sockets itself. It talks to a
//! [`Connection`]: a bidirectional channel of [`Frame`]s with a close
//! notification (`recv` returning `Ok(None)`). Listeners implement
//! [`Transport`].
//!
//! Two implementations ship with the crate:
//!
//! - [`ChannelConnection`]: an in-memory pair, used to wire nodes together
//!   inside one process (tests, simulations).
//! - `WebSocketTransport` / `WebSocketConnection`: OCPP over WebSocket via
//!   `tokio-tungstenite` (feature `websocket`, enabled by default).

mod channel;
mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use channel::{ChannelConnection, channel_pair};
pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{OCPP_SUBPROTOCOLS, WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating process-unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next unused `ConnectionId` in this process.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One transport message.
///
/// OCPP-J travels in text frames; the compact binary envelope travels in
/// binary frames. Keeping the distinction lets a node answer in the format
/// a request arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Returns the raw bytes of the frame.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(data) => data,
        }
    }

    /// Returns `true` for binary frames.
    pub fn is_binary(&self) -> bool {
        matches!(self, Frame::Binary(_))
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// Gracefully shuts down the transport, stopping new connections.
    fn shutdown(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// A single connection that can send and receive frames.
///
/// `send` and `recv` may be called concurrently from different tasks, and
/// their futures are `Send` so a node can drive each connection from its
/// own spawned task.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends a frame to the remote peer.
    fn send(
        &self,
        frame: Frame,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Frame>, Self::Error>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Identity the remote peer presented while connecting, if any.
    ///
    /// For OCPP over WebSocket this is the last path segment of the upgrade
    /// URL (the charging station identity).
    fn peer_identity(&self) -> Option<&str>;
}
