//! 把 `forge-wire` 的握手推导公式包装成节点双方共用的一次性计算。
//!
//! 管理器（服务端）与 worker（客户端）必须从同一份 [`HandshakeIdentity`]
//! 独立算出同一组握手值；两边都调用 [`derive`]，任何一方版本/位宽/提权
//! 状态不一致都会在 `forge-wire` 的握手阶段体现为不匹配。

use forge_wire::handshake::{base_handshake, client_handshake, host_handshake, HandshakeContext};

/// 决定握手值的一组本地属性。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeIdentity {
    pub version_identity: String,
    pub is_64_bit: bool,
    pub runtime_major_version: u16,
    pub elevated: bool,
}

impl HandshakeIdentity {
    pub fn new(version_identity: impl Into<String>) -> Self {
        Self {
            version_identity: version_identity.into(),
            is_64_bit: cfg!(target_pointer_width = "64"),
            runtime_major_version: 1,
            elevated: false,
        }
    }
}

/// 由 [`HandshakeIdentity`] 推导出的一对握手值。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandshakeValues {
    pub host: u64,
    pub client: u64,
}

pub fn derive(identity: &HandshakeIdentity) -> HandshakeValues {
    let ctx = HandshakeContext::new(identity.is_64_bit, identity.runtime_major_version);
    let base = base_handshake(ctx, &identity.version_identity);
    HandshakeValues {
        host: host_handshake(base, identity.elevated),
        client: client_handshake(base),
    }
}
