//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! The charging station identity travels in the upgrade URL
//! (`ws://csms.example/ocpp/<identity>`); the listener captures the last
//! path segment and exposes it through [`Connection::peer_identity`].

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Frame, Transport, TransportError};

/// Subprotocols offered and accepted, most preferred first.
pub const OCPP_SUBPROTOCOLS: &[&str] = &["ocpp2.1", "ocpp2.0.1"];

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::ConnectFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::ConnectFailed)?;

        let mut identity: Option<String> = None;
        let callback = |req: &Request, mut resp: Response| {
            identity = identity_from_path(req.uri().path());
            if let Some(protocol) = negotiate_subprotocol(req) {
                resp.headers_mut().insert(
                    header::SEC_WEBSOCKET_PROTOCOL,
                    HeaderValue::from_static(protocol),
                );
            }
            Ok::<Response, ErrorResponse>(resp)
        };

        let ws = tokio_tungstenite::accept_hdr_async(
            MaybeTlsStream::Plain(stream),
            callback,
        )
        .await
        .map_err(|e| TransportError::Handshake {
            url: addr.to_string(),
            reason: e.to_string(),
        })?;

        let conn = WebSocketConnection::from_stream(ws, identity);
        tracing::debug!(
            conn_id = %conn.id,
            %addr,
            identity = ?conn.identity,
            "accepted WebSocket connection"
        );
        Ok(conn)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A single WebSocket connection.
///
/// The sink and the stream halves are locked independently so a task
/// blocked in `recv` never delays a concurrent `send`.
pub struct WebSocketConnection {
    id: ConnectionId,
    identity: Option<String>,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    fn from_stream(ws: WsStream, identity: Option<String>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: ConnectionId::next(),
            identity,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }

    /// Dials `base_url/<local_identity>` offering the OCPP subprotocols.
    ///
    /// `peer_identity` is the identity of the node being dialed; it is what
    /// this connection reports from [`Connection::peer_identity`].
    pub async fn connect(
        base_url: &str,
        local_identity: &str,
        peer_identity: &str,
    ) -> Result<Self, TransportError> {
        let url = build_ocpp_url(base_url, local_identity);
        let mut request = url.as_str().into_client_request().map_err(|e| {
            TransportError::Handshake {
                url: url.clone(),
                reason: e.to_string(),
            }
        })?;
        request.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("ocpp2.1, ocpp2.0.1"),
        );

        let (ws, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::Handshake {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let accepted = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        if accepted.is_none() {
            tracing::warn!(%url, "peer did not select an OCPP subprotocol");
        }

        let conn = Self::from_stream(ws, Some(peer_identity.to_owned()));
        tracing::info!(conn_id = %conn.id, %url, "WebSocket connected");
        Ok(conn)
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, frame: Frame) -> Result<(), Self::Error> {
        let msg = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
        };
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&self) -> Result<Option<Frame>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Frame::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(Frame::Binary(data.into())));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong are answered by tungstenite
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }
}

/// Builds the full OCPP WebSocket URL for a station identity.
pub(crate) fn build_ocpp_url(base_url: &str, identity: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), identity)
}

fn identity_from_path(path: &str) -> Option<String> {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
}

fn negotiate_subprotocol(req: &Request) -> Option<&'static str> {
    let offered = req
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)?
        .to_str()
        .ok()?;
    OCPP_SUBPROTOCOLS.iter().copied().find(|ours| {
        offered.split(',').any(|theirs| theirs.trim() == *ours)
    })
}
