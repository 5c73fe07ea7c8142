//! Integration tests for the WebSocket transport.
//!
//! These tests spin up a real WebSocket listener on a loopback port and
//! dial it with [`WebSocketConnection::connect`], verifying that frames
//! flow both ways and that the station identity is taken from the URL.

#[cfg(feature = "websocket")]
mod websocket {
    use chargelink_transport::{
        Connection, Frame, Transport, WebSocketConnection, WebSocketTransport,
    };

    /// Binds on a random port and returns the transport and its base URL.
    async fn listen() -> (WebSocketTransport, String) {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("should have local addr");
        (transport, format!("ws://{addr}/ocpp"))
    }

    #[tokio::test]
    async fn test_websocket_accept_and_exchange_frames() {
        let (mut transport, base_url) = listen().await;

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let client = WebSocketConnection::connect(&base_url, "CS001", "CSMS")
            .await
            .expect("client should connect");
        let server_conn = server_handle.await.expect("task should complete");

        // The listener learns who connected from the URL path.
        assert_eq!(server_conn.peer_identity(), Some("CS001"));
        assert_eq!(client.peer_identity(), Some("CSMS"));

        client
            .send(Frame::Text(r#"[2,"1","Heartbeat",{}]"#.into()))
            .await
            .expect("send should succeed");
        let received = server_conn
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have a frame");
        assert_eq!(received, Frame::Text(r#"[2,"1","Heartbeat",{}]"#.into()));

        server_conn
            .send(Frame::Binary(vec![0x4f, 0x01]))
            .await
            .expect("send should succeed");
        let received = client.recv().await.unwrap().unwrap();
        assert_eq!(received, Frame::Binary(vec![0x4f, 0x01]));

        server_conn.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_client_close() {
        let (mut transport, base_url) = listen().await;

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let client = WebSocketConnection::connect(&base_url, "CS002", "CSMS")
            .await
            .unwrap();
        let server_conn = server_handle.await.unwrap();

        client.close().await.unwrap();

        let result = server_conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }
}
