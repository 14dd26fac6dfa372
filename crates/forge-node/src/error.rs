//! 节点端点 / 节点管理器的错误域（§7 Transport 的落地部分）。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    /// 绑定监听套接字失败。
    #[error("failed to bind node listener at {path}: {source}")]
    Bind {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 以客户端角色连接到节点套接字失败（worker 侧）。
    #[error("failed to connect to node socket at {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 握手或帧层失败，直接来自 `forge-wire`。
    #[error(transparent)]
    Wire(#[from] forge_wire::WireError),

    /// 节点池已满，无法创建新节点（§4.3 准入控制的节点数上限）。
    #[error("node pool is at capacity ({0} nodes)")]
    PoolExhausted(usize),

    /// 向一个不存在或已下线的节点发送报文。
    #[error("node {0} is not connected")]
    NotConnected(forge_core::NodeId),

    /// 拉起进程外 worker 失败。
    #[error("failed to spawn worker process: {0}")]
    Spawn(#[source] std::io::Error),
}
