//! 节点管理器：创建/寻址/关闭一组节点端点，并在进程外节点上拉起 worker。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use forge_core::{ids::NodeIdAllocator, NodeId, NodeKind, PacketKind};
use tokio::process::{Child, Command};

use crate::endpoint::{NodeEndpoint, NodeState};
use crate::error::NodeError;
use crate::handshake::{derive, HandshakeIdentity};
use crate::router::PacketRouter;

/// worker 子进程读取握手套接字路径所使用的环境变量名。
pub const NODE_SOCKET_ENV_VAR: &str = "FORGE_NODE_SOCKET";

/// 节点管理器的构造参数。
pub struct NodeManagerConfig {
    pub capacity: usize,
    pub socket_dir: PathBuf,
    pub worker_binary: PathBuf,
    pub connect_timeout: Duration,
    pub handshake_identity: HandshakeIdentity,
}

/// 持有一组节点端点与（如果是进程外节点）对应子进程的管理器。
///
/// # 设计取舍（Trade-offs）
/// - `InProcess` 节点类型不在这里拉起子进程，也不绑定套接字——调用方
///   （`forge-manager`）直接在当前进程内执行请求，这个管理器只负责
///   进程外/task-host worker 的套接字与生命周期（§4.3）。
pub struct NodeManager {
    endpoints: DashMap<NodeId, NodeEndpoint>,
    kinds: DashMap<NodeId, NodeKind>,
    children: DashMap<NodeId, Child>,
    allocator: NodeIdAllocator,
    config: NodeManagerConfig,
    router: Arc<dyn PacketRouter>,
}

impl NodeManager {
    pub fn new(config: NodeManagerConfig, router: Arc<dyn PacketRouter>) -> Self {
        Self {
            endpoints: DashMap::new(),
            kinds: DashMap::new(),
            children: DashMap::new(),
            allocator: NodeIdAllocator::default(),
            config,
            router,
        }
    }

    pub fn connected_count(&self) -> usize {
        self.endpoints.len()
    }

    /// 创建一个新节点：绑定监听套接字，若是进程外节点再拉起 worker 子进程。
    /// 节点池已满时返回 [`NodeError::PoolExhausted`]（§4.3 准入控制）。
    pub fn create(&self, kind: NodeKind) -> Result<NodeId, NodeError> {
        if self.endpoints.len() >= self.config.capacity {
            return Err(NodeError::PoolExhausted(self.config.capacity));
        }

        let node_id = self.allocator.next();
        let socket_path = self.config.socket_dir.join(format!("forge-node-{node_id}.sock"));
        let values = derive(&self.config.handshake_identity);

        let endpoint = NodeEndpoint::listen(
            node_id,
            socket_path.clone(),
            values.host,
            values.client,
            self.config.connect_timeout,
            self.router.clone(),
        )?;
        self.endpoints.insert(node_id, endpoint);
        self.kinds.insert(node_id, kind);

        if matches!(kind, NodeKind::OutOfProcessWorker | NodeKind::TaskHostWorker) {
            let child = Command::new(&self.config.worker_binary)
                .env(NODE_SOCKET_ENV_VAR, &socket_path)
                .kill_on_drop(true)
                .spawn()
                .map_err(NodeError::Spawn)?;
            self.children.insert(node_id, child);
        }

        Ok(node_id)
    }

    pub fn kind_of(&self, node_id: NodeId) -> Option<NodeKind> {
        self.kinds.get(&node_id).map(|entry| *entry)
    }

    pub fn state_of(&self, node_id: NodeId) -> Option<NodeState> {
        self.endpoints.get(&node_id).map(|entry| entry.state())
    }

    /// 向一个已连接节点排队发送一帧报文。
    pub fn send(&self, node_id: NodeId, kind: PacketKind, payload: Bytes) -> Result<(), NodeError> {
        let endpoint = self.endpoints.get(&node_id).ok_or(NodeError::NotConnected(node_id))?;
        if endpoint.send(kind, payload) {
            Ok(())
        } else {
            Err(NodeError::NotConnected(node_id))
        }
    }

    /// 断开所有已连接节点；`reuse` 为 `false` 时同时终止子进程并清理套接字文件
    /// （对应宿主真正退出，而不是两次构建之间的节点复用）。
    pub async fn shutdown_connected(&self, reuse: bool) {
        let node_ids: Vec<NodeId> = self.endpoints.iter().map(|entry| *entry.key()).collect();
        for node_id in node_ids {
            if let Some((_, mut endpoint)) = self.endpoints.remove(&node_id) {
                endpoint.disconnect().await;
                let _ = std::fs::remove_file(endpoint.socket_path());
            }
            if !reuse {
                if let Some((_, mut child)) = self.children.remove(&node_id) {
                    let _ = child.kill().await;
                }
                self.kinds.remove(&node_id);
            }
        }
    }
}
