//! A networking node between charging stations and a CSMS.
//!
//! Stations dial `ws://<CHARGELINK_BIND>/<station id>`. If an upstream is
//! configured the relay dials it and keeps advertising its stations there,
//! so requests for them can find their way down.
//!
//! Environment:
//!
//! ```text
//! CHARGELINK_BIND         listen address        (default 0.0.0.0:9000)
//! CHARGELINK_NODE_ID      this node's id        (default NN)
//! CHARGELINK_UPSTREAM     upstream base URL     (optional)
//! CHARGELINK_UPSTREAM_ID  upstream node id      (default CSMS)
//! CHARGELINK_POLICY       FORWARD or REJECT     (default FORWARD)
//! RUST_LOG                log filter            (default info)
//! ```

use std::env;
use std::time::Duration;

use chargelink::prelude::*;
use serde_json::json;

struct RelaySettings {
    bind: String,
    node_id: String,
    upstream: Option<(String, String)>,
    policy: DefaultPolicy,
}

impl RelaySettings {
    fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let var = |name: &str, default: &str| env::var(name).unwrap_or_else(|_| default.into());
        let upstream = env::var("CHARGELINK_UPSTREAM")
            .ok()
            .map(|url| (url, var("CHARGELINK_UPSTREAM_ID", "CSMS")));
        Ok(Self {
            bind: var("CHARGELINK_BIND", "0.0.0.0:9000"),
            node_id: var("CHARGELINK_NODE_ID", "NN"),
            upstream,
            policy: var("CHARGELINK_POLICY", "FORWARD").parse()?,
        })
    }
}

/// Builds the relay: a local Heartbeat handler, and firmware updates held
/// back for stations the relay has not seen boot.
fn relay(node_id: &str, policy: DefaultPolicy) -> Node {
    Node::builder(NodeConfig::new(node_id).with_default_policy(policy))
        .handler("Heartbeat", |_ctx, _payload| async {
            Ok(json!({ "currentTime": chrono::Utc::now().to_rfc3339() }))
        })
        .filter_hook(
            "UpdateFirmware",
            filter_fn(|_ctx, request| {
                request
                    .payload
                    .get("firmware")
                    .is_none()
                    .then(|| ForwardingDecision::reject_generic("firmware location missing"))
            }),
        )
        .build()
}

const ADVERTISE_EVERY: Duration = Duration::from_secs(30);
const ADVERTISE_TTL: Duration = Duration::from_secs(90);

/// Keeps the upstream told which stations hang off this relay.
async fn advertise_loop(node: Node, upstream: NodeId) {
    let mut ticker = tokio::time::interval(ADVERTISE_EVERY);
    loop {
        ticker.tick().await;
        let stations: Vec<TopologyEntry> = node
            .peers()
            .into_iter()
            .filter(|(_, peer)| peer != &upstream)
            .map(|(_, peer)| TopologyEntry::new(peer).with_ttl(ADVERTISE_TTL))
            .collect();
        if stations.is_empty() {
            continue;
        }
        let count = stations.len();
        match node.outbound().advertise_topology(upstream.clone(), stations).await {
            Ok(accepted) => tracing::debug!(%upstream, count, accepted, "advertised stations"),
            Err(e) => tracing::warn!(%upstream, error = %e, "advertisement failed"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = RelaySettings::from_env()?;
    let node = relay(&settings.node_id, settings.policy);
    let transport = WebSocketTransport::bind(&settings.bind).await?;
    tracing::info!(bind = %settings.bind, node_id = %settings.node_id, "relay listening");

    if let Some((url, upstream_id)) = settings.upstream {
        let upstream = NodeId::from(upstream_id);
        node.connect(&url, upstream.clone()).await?;
        tokio::spawn(advertise_loop(node.clone(), upstream));
    }

    let shutdown = node.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.shutdown();
        }
    });

    node.serve(transport).await?;
    Ok(())
}
