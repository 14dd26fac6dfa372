//! `forge-node`：节点端点生命周期、身份校验、节点管理器、worker 侧泵送循环。
//!
//! # 模块总览（What）
//! - [`endpoint`]：单个节点的连接状态机 `Listening -> Active -> {Inactive,
//!   Failed, ConnectionFailed}`，§4.2 的 `listen`/`send`/`disconnect` 契约。
//! - [`manager`]：`NodeManager`，创建/寻址/关闭一组节点端点（§4.3）。
//! - [`handshake`]：把 `forge-wire` 的握手推导包装成节点双方共用的一次性计算。
//! - [`identity`]：Unix 对端凭据校验，落地 §4.1 的「同用户」身份检查。
//! - [`router`]：上层（`forge-manager`）接收入站报文的回调契约。
//! - [`worker_loop`]：worker 侧（客户端角色）连接/握手/报文泵送循环。
//! - [`error`]：`NodeError`，对应 §7 Transport 错误类别在节点层的落地。

pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod manager;
pub mod router;
pub mod worker_loop;

pub use endpoint::{NodeEndpoint, NodeState};
pub use error::NodeError;
pub use handshake::{derive, HandshakeIdentity, HandshakeValues};
pub use manager::{NodeManager, NodeManagerConfig, NODE_SOCKET_ENV_VAR};
pub use router::PacketRouter;
pub use worker_loop::RequestExecutor;
