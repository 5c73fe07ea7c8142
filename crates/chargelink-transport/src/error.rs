/// Errors raised while moving frames between two nodes.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The link is gone; the string says which side noticed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending a frame failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving a frame failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding, accepting or dialing a socket failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// The WebSocket upgrade was refused or malformed.
    #[error("OCPP handshake with {url} failed: {reason}")]
    Handshake { url: String, reason: String },
}
