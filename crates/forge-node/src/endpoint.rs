//! 节点端点：一个 Unix 域套接字上的连接生命周期。
//!
//! # 状态机（What）
//! `Listening -> Active -> {Failed, Inactive}`，外加接受连接阶段的
//! `Listening -> ConnectionFailed`（等待对端超时）。`Inactive` 是可以被
//! 上层重用的终态（调用方随后可以重新 `listen`）；`Failed` 与
//! `ConnectionFailed` 被 §4.6 视为需要终止整个提交的硬失败。
//!
//! # 握手重试（Why）
//! 一次被拒绝的握手尝试（版本不匹配、旧版本对端）不应该杀死整个端点：
//! accept 循环重新进入下一轮 `accept`，端点保持 `Listening`，等待下一个
//! 连接尝试。只有「确实没有人在规定时间内连上来」才计为 `ConnectionFailed`。
//! 这个「规定时间」是从第一次 `listen()` 起算的单个截止时刻，被拒绝的重试
//! 不会把时钟拨回去重新给满额超时（§5「剩余的连接尝试复用原始起始时间」）。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use bytes::Bytes;
use forge_core::{NodeId, PacketKind};
use forge_wire::WireError;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::error::NodeError;
use crate::identity::peer_is_same_user;
use crate::router::PacketRouter;

/// 端点当前所处的连接状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Listening,
    Active,
    Inactive,
    Failed,
    ConnectionFailed,
}

/// 一个正在监听/已连接的节点端点句柄。
pub struct NodeEndpoint {
    node_id: NodeId,
    socket_path: PathBuf,
    outbound: mpsc::UnboundedSender<(PacketKind, Bytes)>,
    state: watch::Receiver<NodeState>,
    terminate: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl NodeEndpoint {
    /// 绑定一个 Unix 域套接字并立即返回；真正的 accept/握手/泵送循环
    /// 在后台任务中运行，端点从 `Listening` 状态开始。
    pub fn listen(
        node_id: NodeId,
        socket_path: PathBuf,
        expected_host_handshake: u64,
        reply_client_handshake: u64,
        connect_timeout: Duration,
        router: Arc<dyn PacketRouter>,
    ) -> Result<Self, NodeError> {
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path).map_err(|source| NodeError::Bind {
            path: socket_path.display().to_string(),
            source,
        })?;
        restrict_permissions(&socket_path)?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(NodeState::Listening);
        let terminate = Arc::new(Notify::new());

        let task = tokio::spawn(run_endpoint(
            node_id,
            listener,
            expected_host_handshake,
            reply_client_handshake,
            connect_timeout,
            outbound_rx,
            state_tx,
            terminate.clone(),
            router,
        ));

        Ok(Self {
            node_id,
            socket_path,
            outbound: outbound_tx,
            state: state_rx,
            terminate,
            task: Some(task),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket_path
    }

    pub fn state(&self) -> NodeState {
        *self.state.borrow()
    }

    /// 排队一帧待发送的报文；端点不处于 `Active` 时直接丢弃并返回 `false`。
    pub fn send(&self, kind: PacketKind, payload: Bytes) -> bool {
        if self.state() != NodeState::Active {
            return false;
        }
        self.outbound.send((kind, payload)).is_ok()
    }

    /// 请求断开：唤醒泵送循环走优雅退出路径（先清空待发送队列再关闭），
    /// 并等待后台任务结束。
    pub async fn disconnect(&mut self) {
        self.terminate.notify_one();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &std::path::Path) -> Result<(), NodeError> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|source| {
        NodeError::Bind {
            path: path.display().to_string(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &std::path::Path) -> Result<(), NodeError> {
    Ok(())
}

async fn run_endpoint(
    node_id: NodeId,
    listener: UnixListener,
    expected_host_handshake: u64,
    reply_client_handshake: u64,
    connect_timeout: Duration,
    mut outbound_rx: mpsc::UnboundedReceiver<(PacketKind, Bytes)>,
    state_tx: watch::Sender<NodeState>,
    terminate: Arc<Notify>,
    router: Arc<dyn PacketRouter>,
) {
    // §5: the connect timeout's clock starts once per `listen()` and is not
    // reset by a rejected legacy/mismatched handshake attempt — all retries
    // within this accept loop race against the same deadline.
    let deadline = tokio::time::Instant::now() + connect_timeout;

    loop {
        let accept_result = tokio::select! {
            biased;
            _ = terminate.notified() => {
                let _ = state_tx.send(NodeState::Inactive);
                return;
            }
            res = tokio::time::timeout_at(deadline, listener.accept()) => res,
        };

        let mut stream = match accept_result {
            Ok(Ok((stream, _addr))) => stream,
            Ok(Err(err)) => {
                tracing::warn!(node = %node_id, error = %err, "accept failed");
                let _ = state_tx.send(NodeState::Inactive);
                return;
            }
            Err(_elapsed) => {
                tracing::warn!(node = %node_id, timeout = ?connect_timeout, "no peer connected in time");
                let _ = state_tx.send(NodeState::ConnectionFailed);
                return;
            }
        };

        let identity_ok = peer_is_same_user(&stream);
        let handshake_result = forge_wire::perform_server_handshake(
            &mut stream,
            expected_host_handshake,
            reply_client_handshake,
            identity_ok,
        )
        .await;

        match handshake_result {
            Ok(()) => {
                let _ = state_tx.send(NodeState::Active);
                match pump(node_id, stream, &mut outbound_rx, &terminate, router.clone()).await {
                    PumpOutcome::Terminated | PumpOutcome::LinkFailed => {
                        let _ = state_tx.send(NodeState::Inactive);
                    }
                    PumpOutcome::ProtocolFailed => {
                        let _ = state_tx.send(NodeState::Failed);
                    }
                }
                return;
            }
            Err(WireError::LegacyPeerRejected(_)) | Err(WireError::HandshakeMismatch { .. }) => {
                tracing::warn!(node = %node_id, "rejected a handshake attempt; endpoint stays armed for the next connection");
                continue;
            }
            Err(err) => {
                tracing::warn!(node = %node_id, error = %err, "handshake failed");
                let _ = state_tx.send(NodeState::Inactive);
                return;
            }
        }
    }
}

enum PumpOutcome {
    Terminated,
    LinkFailed,
    ProtocolFailed,
}

/// 活动链路上的读写泵送循环：出站报文优先于终止信号，终止信号到达后先
/// 排空已入队的出站报文再退出（§5「优先处理出站，再处理终止」）。
async fn pump(
    node_id: NodeId,
    stream: UnixStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<(PacketKind, Bytes)>,
    terminate: &Notify,
    router: Arc<dyn PacketRouter>,
) -> PumpOutcome {
    let (mut read_half, mut write_half) = stream.into_split();
    loop {
        tokio::select! {
            biased;
            maybe_out = outbound_rx.recv() => {
                match maybe_out {
                    Some((kind, payload)) => {
                        if let Err(err) = forge_wire::write_packet(&mut write_half, kind, &payload).await {
                            tracing::warn!(node = %node_id, error = %err, "failed writing an outbound packet");
                            return PumpOutcome::LinkFailed;
                        }
                    }
                    None => return PumpOutcome::Terminated,
                }
            }
            _ = terminate.notified() => {
                while let Ok((kind, payload)) = outbound_rx.try_recv() {
                    if forge_wire::write_packet(&mut write_half, kind, &payload).await.is_err() {
                        break;
                    }
                }
                return PumpOutcome::Terminated;
            }
            read_result = forge_wire::read_packet(&mut read_half) => {
                match read_result {
                    Ok((kind, payload)) => router.route(node_id, kind, payload).await,
                    Err(WireError::LinkFailed(reason)) => {
                        tracing::info!(node = %node_id, reason, "link closed by peer");
                        return PumpOutcome::LinkFailed;
                    }
                    Err(err) => {
                        tracing::warn!(node = %node_id, error = %err, "protocol violation from node");
                        return PumpOutcome::ProtocolFailed;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::{derive, HandshakeIdentity};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct RecordingRouter {
        seen: Mutex<Vec<(NodeId, PacketKind)>>,
    }

    #[async_trait]
    impl PacketRouter for RecordingRouter {
        async fn route(&self, node_id: NodeId, kind: PacketKind, _payload: Bytes) {
            self.seen.lock().unwrap().push((node_id, kind));
        }
    }

    #[tokio::test]
    async fn a_matching_client_brings_the_endpoint_active_and_routes_a_packet() {
        let node_id = NodeId::from_raw(1);
        let identity = HandshakeIdentity::new("forge/1.0.0");
        let values = derive(&identity);
        let router = Arc::new(RecordingRouter {
            seen: Mutex::new(Vec::new()),
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.sock");

        let endpoint = NodeEndpoint::listen(
            node_id,
            path.clone(),
            values.host,
            values.client,
            Duration::from_secs(5),
            router.clone(),
        )
        .unwrap();

        let mut client = UnixStream::connect(&path).await.unwrap();
        forge_wire::perform_client_handshake(&mut client, values.host, values.client)
            .await
            .unwrap();

        forge_wire::write_packet(&mut client, PacketKind::LogMessage, b"hi")
            .await
            .unwrap();
        client.flush().await.unwrap();

        // 给后台泵送循环一点时间处理刚发出的报文。
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(endpoint.state(), NodeState::Active);
        assert_eq!(router.seen.lock().unwrap().as_slice(), &[(node_id, PacketKind::LogMessage)]);
    }

    #[tokio::test]
    async fn a_connection_timeout_marks_the_endpoint_connection_failed() {
        let node_id = NodeId::from_raw(2);
        let identity = HandshakeIdentity::new("forge/1.0.0");
        let values = derive(&identity);
        let router = Arc::new(RecordingRouter {
            seen: Mutex::new(Vec::new()),
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.sock");

        let endpoint = NodeEndpoint::listen(
            node_id,
            path,
            values.host,
            values.client,
            Duration::from_millis(30),
            router,
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(endpoint.state(), NodeState::ConnectionFailed);
    }

    #[tokio::test]
    async fn a_rejected_legacy_attempt_does_not_reset_the_connect_deadline() {
        let node_id = NodeId::from_raw(3);
        let identity = HandshakeIdentity::new("forge/1.0.0");
        let values = derive(&identity);
        let router = Arc::new(RecordingRouter {
            seen: Mutex::new(Vec::new()),
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.sock");

        let endpoint = NodeEndpoint::listen(
            node_id,
            path.clone(),
            values.host,
            values.client,
            Duration::from_millis(80),
            router,
        )
        .unwrap();

        // Burn most of the deadline, then make a legacy-rejected attempt.
        // If the timeout clock reset on this retry, the endpoint would still
        // be `Listening` well past the original 80ms deadline.
        tokio::time::sleep(Duration::from_millis(60)).await;
        let mut legacy_client = UnixStream::connect(&path).await.unwrap();
        legacy_client
            .write_u8(forge_wire::LEGACY_REJECT_LEADING_BYTES[0])
            .await
            .unwrap();
        legacy_client.flush().await.unwrap();
        let mut reply = [0u8; 1];
        legacy_client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[0], forge_wire::REJECT_BYTE);
        drop(legacy_client);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(endpoint.state(), NodeState::ConnectionFailed);
    }
}
