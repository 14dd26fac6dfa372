//! 节点把收到的报文交给调用方（通常是 `forge-manager`）处理的回调契约。

use async_trait::async_trait;
use bytes::Bytes;
use forge_core::{NodeId, PacketKind};

/// 端点收到一帧报文后转交给上层的接口；上层不得在 `route` 中长时间阻塞，
/// 否则会拖慢该节点 pump 循环对后续报文的读取（§5 并发模型）。
#[async_trait]
pub trait PacketRouter: Send + Sync {
    async fn route(&self, node_id: NodeId, kind: PacketKind, payload: Bytes);
}
