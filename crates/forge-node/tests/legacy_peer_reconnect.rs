//! 端到端场景（spec.md §8 场景 1）：旧版本对端发来拒绝列表里的首字节，
//! 端点回写单字节 `0xFF` 并断开那次连接尝试，但自身保持可连接状态；
//! 紧随其后的一次真实握手必须能够成功，把端点带入 `Active`。

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use forge_core::{NodeId, PacketKind};
use forge_node::{derive, HandshakeIdentity, NodeEndpoint, NodeState, PacketRouter};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

struct NoopRouter;

#[async_trait]
impl PacketRouter for NoopRouter {
    async fn route(&self, _node_id: NodeId, _kind: PacketKind, _payload: Bytes) {}
}

#[tokio::test]
async fn a_legacy_peer_is_rejected_and_the_next_connection_attempt_still_succeeds() {
    let node_id = NodeId::from_raw(1);
    let identity = HandshakeIdentity::new("forge/1.0.0");
    let values = derive(&identity);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.sock");

    let endpoint = NodeEndpoint::listen(
        node_id,
        path.clone(),
        values.host,
        values.client,
        Duration::from_secs(5),
        std::sync::Arc::new(NoopRouter),
    )
    .unwrap();

    // First connection attempt: a legacy peer sending one of the reject
    // leading bytes. It must be bounced with a single 0xFF and the overall
    // endpoint must remain armed, not torn down.
    let mut legacy_peer = UnixStream::connect(&path).await.unwrap();
    legacy_peer.write_u8(0x5F).await.unwrap();
    legacy_peer.flush().await.unwrap();
    let mut reply = [0u8; 1];
    legacy_peer.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 0xFF);
    drop(legacy_peer);

    // Give the accept loop a moment to re-enter `accept()`.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_ne!(endpoint.state(), NodeState::Failed);
    assert_ne!(endpoint.state(), NodeState::ConnectionFailed);

    // Second attempt: a real sibling performs the handshake and should be
    // accepted, bringing the link to Active.
    let mut real_peer = UnixStream::connect(&path).await.unwrap();
    forge_wire::perform_client_handshake(&mut real_peer, values.host, values.client)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(endpoint.state(), NodeState::Active);
}
