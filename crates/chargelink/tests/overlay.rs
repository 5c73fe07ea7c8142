//! End-to-end behaviour of nodes wired together over in-memory links:
//! local calls, forwarding through a networking node, and failure paths.

use std::collections::BTreeSet;
use std::future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chargelink::prelude::*;
use chargelink::protocol::{Envelope, Message, NetworkPath, Payload, decode_frame, encode_frame};
use chargelink::routing::Route;
use chargelink::transport::{ChannelConnection, Connection, ConnectionId, Frame};
use serde_json::json;
use tokio::sync::mpsc;

// =========================================================================
// Helpers
// =========================================================================

/// Connects `a` (dialing) to `b` (accepting). Returns each side's link id.
fn wire(a: &Node, b: &Node) -> (ConnectionId, ConnectionId) {
    let (a_end, b_end) = channel_pair(Some(b.id().as_str()), Some(a.id().as_str()), 32);
    let a_link = a.attach(a_end, Direction::Outbound).unwrap();
    let b_link = b.attach(b_end, Direction::Inbound).unwrap();
    (a_link, b_link)
}

/// CS-1 ── NN ── CSMS, with NN advertising each end to the other.
async fn chain(cs: &Node, nn: &Node, csms: &Node) {
    wire(cs, nn);
    wire(nn, csms);
    let out = nn.outbound();
    assert!(
        out.advertise_topology("CS-1", vec![TopologyEntry::new("CSMS")])
            .await
            .unwrap()
    );
    assert!(
        out.advertise_topology("CSMS", vec![TopologyEntry::new("CS-1")])
            .await
            .unwrap()
    );
}

/// A station that counts GetFile requests and accepts them.
fn counting_station(config: NodeConfig) -> (Node, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let node = Node::builder(config)
        .handler("GetFile", move |_ctx, _payload| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!({ "status": "Accepted" })) }
        })
        .build();
    (node, calls)
}

fn heartbeat_node(id: &str) -> Node {
    Node::builder(NodeConfig::new(id))
        .handler("Heartbeat", |_ctx, _payload| async {
            Ok(json!({ "currentTime": "2025-01-01T00:00:00Z" }))
        })
        .build()
}

// =========================================================================
// Local calls
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_local_call_round_trip() {
    let cs = Node::builder(NodeConfig::new("CS-1")).build();
    let csms = heartbeat_node("CSMS");
    wire(&cs, &csms);

    let response = cs
        .outbound()
        .call("CSMS", "Heartbeat", json!({}))
        .await
        .unwrap();
    assert_eq!(response["currentTime"], "2025-01-01T00:00:00Z");
    assert!(cs.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_action_is_not_supported() {
    let cs = Node::builder(NodeConfig::new("CS-1")).build();
    let csms = heartbeat_node("CSMS");
    wire(&cs, &csms);

    let err = cs
        .outbound()
        .call("CSMS", "DataTransfer", json!({ "vendorId": "acme" }))
        .await
        .unwrap_err();
    assert_eq!(err.remote().unwrap().error_code, ErrorCode::NotSupported);
}

#[tokio::test(start_paused = true)]
async fn test_handler_error_is_returned_as_call_error() {
    let cs = Node::builder(NodeConfig::new("CS-1")).build();
    let csms = Node::builder(NodeConfig::new("CSMS"))
        .handler("Authorize", |_ctx, _payload| async {
            Err(CallError::new(ErrorCode::SecurityError, "unknown token"))
        })
        .build();
    wire(&cs, &csms);

    let err = cs
        .outbound()
        .call("CSMS", "Authorize", json!({ "idToken": {} }))
        .await
        .unwrap_err();
    let remote = err.remote().unwrap();
    assert_eq!(remote.error_code, ErrorCode::SecurityError);
    assert_eq!(remote.error_description, "unknown token");
}

#[tokio::test(start_paused = true)]
async fn test_unroutable_fails_without_waiting() {
    let cs = Node::builder(NodeConfig::new("CS-1")).build();

    let started = tokio::time::Instant::now();
    let err = cs
        .outbound()
        .call("CSMS", "Heartbeat", json!({}))
        .await
        .unwrap_err();
    assert!(err.is_unroutable());
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(cs.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_collects_one_result_per_destination() {
    let csms = Node::builder(NodeConfig::new("CSMS")).build();
    let cs1 = heartbeat_node("CS-1");
    let cs2 = heartbeat_node("CS-2");
    wire(&cs1, &csms);
    wire(&cs2, &csms);

    let targets: BTreeSet<NodeId> = ["CS-1", "CS-2", "CS-3"].into_iter().map(NodeId::from).collect();
    let results = csms
        .outbound()
        .send(
            SourceRouting::Broadcast(targets),
            "Heartbeat",
            json!({}),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    for (node, result) in results {
        match node.as_str() {
            "CS-3" => assert!(result.unwrap_err().is_unroutable()),
            _ => assert!(result.is_ok(), "{node}: {result:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_fails_pending_request() {
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let cs = Node::builder(NodeConfig::new("CS-1"))
        .handler("GetLog", move |_ctx, _payload| {
            let _ = started_tx.send(());
            future::pending::<HandlerResult>()
        })
        .build();
    let csms = Node::builder(NodeConfig::new("CSMS")).build();
    let (_, csms_link) = wire(&cs, &csms);

    let out = csms.outbound();
    let call = tokio::spawn(async move { out.call("CS-1", "GetLog", json!({})).await });
    started_rx.recv().await.unwrap();
    csms.close_link(csms_link);

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, NodeError::Request(RequestError::TransportLost)));
    assert!(csms.reachability().resolve(&NodeId::new("CS-1")).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_hub_link_loss_fails_over_to_next_hub() {
    let csms = Node::builder(NodeConfig::new("CSMS")).build();
    let h1 = Node::builder(NodeConfig::new("H1")).build();
    let h2 = Node::builder(NodeConfig::new("H2")).build();
    let (_, via_h1) = wire(&h1, &csms);
    let (_, via_h2) = wire(&h2, &csms);

    assert!(
        h1.outbound()
            .advertise_topology("CSMS", vec![TopologyEntry::new("CS-9").with_priority(1)])
            .await
            .unwrap()
    );
    assert!(
        h2.outbound()
            .advertise_topology("CSMS", vec![TopologyEntry::new("CS-9").with_priority(2)])
            .await
            .unwrap()
    );
    let cs9 = NodeId::new("CS-9");
    assert_eq!(csms.reachability().next_hop(&cs9, 8), Ok(via_h1));

    csms.close_link(via_h1);
    assert_eq!(csms.reachability().next_hop(&cs9, 8), Ok(via_h2));
    let entries = csms.reachability().entries(&cs9);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].route, Route::ViaHub(NodeId::new("H2")));
}

// =========================================================================
// Forwarding through a networking node
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_forwarded_call_carries_path() {
    let (paths_tx, mut paths_rx) = mpsc::unbounded_channel();
    let cs = Node::builder(NodeConfig::new("CS-1").with_wire_format(WireFormat::Binary))
        .handler("GetFile", move |ctx: RequestContext, _payload| {
            let _ = paths_tx.send((ctx.origin.clone(), ctx.network_path.clone()));
            async { Ok(json!({ "status": "Accepted" })) }
        })
        .build();
    let nn = Node::builder(NodeConfig::new("NN").with_wire_format(WireFormat::Binary)).build();
    let csms = Node::builder(NodeConfig::new("CSMS").with_wire_format(WireFormat::Binary)).build();
    chain(&cs, &nn, &csms).await;

    let response = csms
        .outbound()
        .call("CS-1", "GetFile", json!({ "fileName": "diag.log" }))
        .await
        .unwrap();
    assert_eq!(response["status"], "Accepted");

    let (origin, path) = paths_rx.recv().await.unwrap();
    assert_eq!(origin, NodeId::new("CSMS"));
    assert_eq!(path.hops(), &[NodeId::new("CSMS"), NodeId::new("NN")]);
}

#[tokio::test(start_paused = true)]
async fn test_text_station_is_answered_through_relay() {
    let (cs, calls) = counting_station(NodeConfig::new("CS-1"));
    let nn = Node::builder(NodeConfig::new("NN")).build();
    let csms = Node::builder(NodeConfig::new("CSMS")).build();
    chain(&cs, &nn, &csms).await;

    let response = csms
        .outbound()
        .call("CS-1", "GetFile", json!({ "fileName": "diag.log" }))
        .await
        .unwrap();
    assert_eq!(response["status"], "Accepted");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_default_reject_answers_with_negative_response() {
    let (cs, calls) = counting_station(NodeConfig::new("CS-1"));
    let nn = Node::builder(NodeConfig::new("NN").with_default_policy(DefaultPolicy::Reject)).build();
    let csms = Node::builder(NodeConfig::new("CSMS")).build();
    chain(&cs, &nn, &csms).await;

    let response = csms
        .outbound()
        .call("CS-1", "GetFile", json!({ "fileName": "diag.log" }))
        .await
        .unwrap();
    assert_eq!(response["status"], "Rejected");
    assert_eq!(response["statusInfo"]["reasonCode"], "Filtered");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hook_rejects_with_call_error() {
    let (cs, calls) = counting_station(NodeConfig::new("CS-1"));
    let nn = Node::builder(NodeConfig::new("NN"))
        .filter_hook(
            "GetFile",
            filter_fn(|ctx, _request| {
                (ctx.origin().as_str() == "CSMS").then(|| {
                    ForwardingDecision::reject(
                        RejectResponse::Error(CallError::new(
                            ErrorCode::SecurityError,
                            "file transfer blocked",
                        )),
                        "blocked by site policy",
                    )
                })
            }),
        )
        .build();
    let csms = Node::builder(NodeConfig::new("CSMS")).build();
    chain(&cs, &nn, &csms).await;

    let err = csms
        .outbound()
        .call("CS-1", "GetFile", json!({ "fileName": "diag.log" }))
        .await
        .unwrap_err();
    assert_eq!(err.remote().unwrap().error_code, ErrorCode::SecurityError);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_request_times_out() {
    let (cs, calls) = counting_station(NodeConfig::new("CS-1"));
    let nn = Node::builder(NodeConfig::new("NN"))
        .filter_hook(
            "GetFile",
            filter_fn(|_ctx, _request| Some(ForwardingDecision::drop("maintenance window"))),
        )
        .build();
    let csms = Node::builder(NodeConfig::new("CSMS")).build();
    chain(&cs, &nn, &csms).await;

    let err = csms
        .outbound()
        .call_with_timeout("CS-1", "GetFile", json!({}), Duration::from_secs(3))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Request(RequestError::Timeout(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(csms.pending().is_empty());
}

// =========================================================================
// Raw peers
// =========================================================================

/// Attaches one end of a pair to `node` and returns the other, which the
/// test drives by hand as `peer`.
fn raw_peer(node: &Node, peer: &str) -> ChannelConnection {
    let (raw, end) = channel_pair(Some(node.id().as_str()), Some(peer), 32);
    node.attach(end, Direction::Inbound).unwrap();
    raw
}

async fn recv_text(raw: &ChannelConnection) -> serde_json::Value {
    match raw.recv().await.unwrap().unwrap() {
        Frame::Text(text) => serde_json::from_str(&text).unwrap(),
        Frame::Binary(_) => panic!("expected a text frame"),
    }
}

async fn send_text(raw: &ChannelConnection, value: serde_json::Value) {
    raw.send(Frame::Text(value.to_string())).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_late_duplicate_response_is_discarded() {
    let csms = heartbeat_node("CSMS");
    let raw = raw_peer(&csms, "CS-1");

    let out = csms.outbound();
    let call = tokio::spawn(async move {
        out.call("CS-1", "Reset", json!({ "type": "Immediate" })).await
    });
    let request = recv_text(&raw).await;
    assert_eq!(request[0], 2);
    assert_eq!(request[2], "Reset");

    let id = request[1].as_str().unwrap().to_owned();
    send_text(&raw, json!([3, id, { "status": "Accepted" }])).await;
    send_text(&raw, json!([3, id, { "status": "Rejected" }])).await;

    let response = call.await.unwrap().unwrap();
    assert_eq!(response["status"], "Accepted");

    // Still serving after the duplicate.
    send_text(&raw, json!([2, "hb-1", "Heartbeat", {}])).await;
    let reply = recv_text(&raw).await;
    assert_eq!(reply[0], 3);
    assert_eq!(reply[1], "hb-1");
    assert!(csms.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_is_answered() {
    let csms = heartbeat_node("CSMS");
    let raw = raw_peer(&csms, "CS-1");

    send_text(&raw, json!([2, "m-1", "Heartbeat"])).await;
    let reply = recv_text(&raw).await;
    assert_eq!(reply[0], 4);
    assert_eq!(reply[1], "m-1");
    assert_eq!(reply[2], "RpcFrameworkError");

    // No request id, nobody to answer; the next frame is still served.
    raw.send(Frame::Text("not json".into())).await.unwrap();
    send_text(&raw, json!([2, "hb-2", "Heartbeat", {}])).await;
    let reply = recv_text(&raw).await;
    assert_eq!(reply[1], "hb-2");
}

#[tokio::test(start_paused = true)]
async fn test_malformed_response_is_never_answered() {
    let csms = heartbeat_node("CSMS");
    let raw = raw_peer(&csms, "CS-1");

    send_text(&raw, json!([3, "r-9", {}, {}])).await;
    send_text(&raw, json!([4, "r-10", 17, "x", {}])).await;
    send_text(&raw, json!([2, "hb-3", "Heartbeat", {}])).await;

    // The first thing back is the heartbeat answer.
    let reply = recv_text(&raw).await;
    assert_eq!(reply[0], 3);
    assert_eq!(reply[1], "hb-3");
}

#[tokio::test(start_paused = true)]
async fn test_malformed_response_fails_the_pending_request() {
    let csms = Node::builder(NodeConfig::new("CSMS")).build();
    let raw = raw_peer(&csms, "CS-1");

    let out = csms.outbound();
    let call = tokio::spawn(async move {
        out.call_with_timeout("CS-1", "Reset", json!({}), Duration::from_secs(30))
            .await
    });
    let request = recv_text(&raw).await;
    let id = request[1].as_str().unwrap().to_owned();

    let started = tokio::time::Instant::now();
    send_text(&raw, json!([3, id, {}, {}])).await;
    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.remote().unwrap().error_code, ErrorCode::RpcFrameworkError);
    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(csms.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_message_type_is_answered() {
    let csms = heartbeat_node("CSMS");
    let raw = raw_peer(&csms, "CS-1");

    send_text(&raw, json!([5, "t-1", "Heartbeat", {}])).await;
    let reply = recv_text(&raw).await;
    assert_eq!(reply[0], 4);
    assert_eq!(reply[1], "t-1");
    assert_eq!(reply[2], "MessageTypeNotSupported");
}

#[tokio::test(start_paused = true)]
async fn test_looping_request_is_refused() {
    let csms = heartbeat_node("CSMS");
    let raw = raw_peer(&csms, "NN-X");

    let path = NetworkPath::from_hops([NodeId::new("CSMS"), NodeId::new("NN-X")]).unwrap();
    let looping = Envelope::call(RequestId::new("loop-1"), Action::new("GetFile"), json!({}))
        .to(NodeId::new("CS-9"))
        .with_path(path);
    raw.send(encode_frame(&looping, WireFormat::Binary).unwrap())
        .await
        .unwrap();

    let reply = decode_frame(&raw.recv().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply.request_id, RequestId::new("loop-1"));
    match reply.message {
        Message::CallError(err) => assert_eq!(err.error_code, ErrorCode::GenericError),
        other => panic!("expected CALLERROR, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_unroutable_transit_request_is_refused() {
    let nn = Node::builder(NodeConfig::new("NN")).build();
    let raw = raw_peer(&nn, "CS-1");

    let stray = Envelope::call(RequestId::new("far-1"), Action::new("GetFile"), json!({}))
        .to(NodeId::new("CS-404"));
    raw.send(encode_frame(&stray, WireFormat::Binary).unwrap())
        .await
        .unwrap();

    let reply = decode_frame(&raw.recv().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply.request_id, RequestId::new("far-1"));
    assert!(matches!(
        reply.message,
        Message::CallError(CallError { error_code: ErrorCode::GenericError, .. })
    ));
}

async fn recv_envelope(raw: &ChannelConnection) -> Envelope {
    decode_frame(&raw.recv().await.unwrap().unwrap()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_same_request_id_from_two_origins_returns_to_its_caller() {
    let nn = Node::builder(NodeConfig::new("NN").with_wire_format(WireFormat::Binary)).build();
    let a = raw_peer(&nn, "A");
    let b = raw_peer(&nn, "B");
    let cs = raw_peer(&nn, "CS");

    for raw in [&a, &b] {
        let call = Envelope::call(RequestId::new("dup"), Action::new("GetFile"), json!({}))
            .to(NodeId::new("CS"));
        raw.send(encode_frame(&call, WireFormat::Binary).unwrap())
            .await
            .unwrap();
    }
    let mut origins = BTreeSet::new();
    for _ in 0..2 {
        let forwarded = recv_envelope(&cs).await;
        assert_eq!(forwarded.request_id, RequestId::new("dup"));
        origins.insert(forwarded.network_path.origin().cloned().unwrap());
    }
    assert_eq!(origins.len(), 2);

    let answer = Envelope::call_result(RequestId::new("dup"), json!({ "answer": "for-A" }))
        .to(NodeId::new("A"));
    cs.send(encode_frame(&answer, WireFormat::Binary).unwrap())
        .await
        .unwrap();

    let received = recv_envelope(&a).await;
    assert_eq!(received.request_id, RequestId::new("dup"));
    assert_eq!(received.destination, Some(NodeId::new("A")));
    match received.message {
        Message::CallResult { payload } => assert_eq!(payload, Payload::Json(json!({ "answer": "for-A" }))),
        other => panic!("expected CALLRESULT, got {other:?}"),
    }
    assert!(
        tokio::time::timeout(Duration::from_secs(5), b.recv())
            .await
            .is_err()
    );
}
