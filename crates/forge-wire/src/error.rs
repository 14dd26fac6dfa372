//! §7 中 Transport / Handshake / Protocol 三类错误在线路层的具体形态。

use thiserror::Error;

/// `forge-wire` 暴露的错误域。
#[derive(Debug, Error)]
pub enum WireError {
    /// 成帧、EOF 或身份校验失败——link 被判定为失效（§7 Transport）。
    #[error("link failed: {0}")]
    LinkFailed(String),

    /// 两端握手值不一致（§7 Handshake）。
    #[error("handshake mismatch: expected {expected:#018x}, got {actual:#018x}")]
    HandshakeMismatch { expected: u64, actual: u64 },

    /// 对端是只认识单字节协议的旧版本（legacy-reject 列表命中）。
    #[error("legacy peer rejected after sending leading byte {0:#04x}")]
    LegacyPeerRejected(u8),

    /// 载荷超过单帧允许的最大长度，或长度字段与实际读取字节数不一致。
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// 收到未知报文种类——每端必须以内部错误关闭连接（§6）。
    #[error("unknown packet kind byte {0:#04x}")]
    UnknownPacketKind(u8),

    /// 载荷反序列化失败（§7 Protocol）。
    #[error("payload decode failed for {kind}: {source}")]
    PayloadDecode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl From<std::io::Error> for WireError {
    fn from(err: std::io::Error) -> Self {
        WireError::LinkFailed(err.to_string())
    }
}
