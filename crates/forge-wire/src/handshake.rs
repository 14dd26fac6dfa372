//! 版本/身份握手：§4.1 与 §6 的推导公式与交换协议。
//!
//! # 交换时序（How）
//! 1. 客户端把本地算出的 *host handshake* 按大端写成 8 字节，发给服务端；
//! 2. 服务端读取首字节：若命中 legacy-reject 列表 `{0x5F, 0x60}`，回写单字节
//!    `0xFF` 并以失败断开（防止与只会说一个字节的旧版本对端卡死）；
//! 3. 否则服务端补齐剩余 7 字节拼回 64 位整数，与本地期望的 host handshake
//!    比较；不等 ⇒ 断开（[`WireError::HandshakeMismatch`]）；
//! 4. 值匹配后，服务端校验调用方身份与自身一致（同用户），不一致 ⇒ 断开；
//! 5. 服务端把 *client handshake* 按大端写回；链路进入 active 状态。
//!
//! 身份校验的落地方式是平台相关的（Windows 用 ACL/SID，这里用 Unix 对端
//! 凭据），因此本模块把身份判定结果作为布尔参数注入，自身保持传输无关。

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WireError;

/// 旧版本对端只发送这两个首字节之一时触发拒绝路径（§6）。该列表本身就是
/// 稳定契约：未来新增旧版本时在这里追加，而不是改变拒绝机制本身
/// （spec.md §9 Open Questions）。
pub const LEGACY_REJECT_LEADING_BYTES: [u8; 2] = [0x5F, 0x60];

/// 拒绝旧版本对端时回写的单字节。
pub const REJECT_BYTE: u8 = 0xFF;

/// 握手上下文：位宽与运行时大版本号，参与 `base handshake` 的推导。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandshakeContext {
    pub is_64_bit: bool,
    pub runtime_major_version: u16,
}

impl HandshakeContext {
    pub fn new(is_64_bit: bool, runtime_major_version: u16) -> Self {
        Self {
            is_64_bit,
            runtime_major_version,
        }
    }

    /// 把上下文打包成一个 16 位值：bit0 为位宽标志，其余位存运行时大版本号。
    /// 之所以限制在 16 位，是为了让 `context << 40` 之后仍落在「高字节为 0」
    /// 的约束范围内（bit40..56，不触及 bit56..64）。
    fn pack(self) -> u64 {
        let bit0 = u64::from(self.is_64_bit);
        let version = u64::from(self.runtime_major_version) << 1;
        bit0 | version
    }
}

fn rol5(x: u32) -> u32 {
    (x << 5).wrapping_add(x).wrapping_add(x >> 27)
}

/// DJB2 变体双哈希，逐 UTF-16 码元处理，4 个码元一组（§6）。
///
/// 对应经典的「每次读 2 个码元打包成一个 32 位字，交替喂给 hash1/hash2」算法；
/// 若码元总数不是 4 的倍数，缺失的码元按 0 处理（该边界情形 spec 未明确规定，
/// 属于实现选择，记录于 DESIGN.md）。
pub fn version_hash(version_identity: &str) -> u32 {
    let units: Vec<u16> = version_identity.encode_utf16().collect();
    let unit_at = |i: usize| -> u32 { units.get(i).copied().unwrap_or(0) as u32 };
    let packed_word = |lo: usize| -> u32 { unit_at(lo) | (unit_at(lo + 1) << 16) };

    let mut hash1: u32 = (5381u32 << 16).wrapping_add(5381);
    let mut hash2: u32 = hash1;

    let mut idx = 0usize;
    let mut remaining = units.len() as i64;
    loop {
        hash1 = rol5(hash1) ^ packed_word(idx);
        if remaining <= 2 {
            break;
        }
        hash2 = rol5(hash2) ^ packed_word(idx + 2);
        idx += 4;
        remaining -= 4;
        if remaining <= 0 {
            break;
        }
    }

    hash1.wrapping_add(hash2.wrapping_mul(1_566_083_941))
}

/// 掩码：清空 64 位值的最高字节。
const HIGH_BYTE_MASK: u64 = 0x00FF_FFFF_FFFF_FFFF;

/// 提权状态折叠使用的常量；具体取值不被 spec 固定，只要求「提权与非提权
/// 的对端永远不会互相认可」。
const ELEVATION_FOLD_MASK: u64 = 0x00A5_A5A5_A5A5_A5A5;

/// 推导 base handshake：`(context << 40) | (version_hash << 8)`。
pub fn base_handshake(ctx: HandshakeContext, version_identity: &str) -> u64 {
    let hash = u64::from(version_hash(version_identity));
    (ctx.pack() << 40) | (hash << 8)
}

/// 推导 host handshake：按提权状态异或折叠后，清空高字节。
pub fn host_handshake(base: u64, elevated: bool) -> u64 {
    let folded = if elevated { base ^ ELEVATION_FOLD_MASK } else { base };
    folded & HIGH_BYTE_MASK
}

/// 推导 client handshake：`(base XOR MAX_INT64) & 0x00FFFFFFFFFFFFFF`。
pub fn client_handshake(base: u64) -> u64 {
    (base ^ i64::MAX as u64) & HIGH_BYTE_MASK
}

/// 服务端（监听方）握手流程。
///
/// # 契约（What）
/// - `identity_ok`：调用方（`forge-node`）已经完成了「调用方与服务端同用户」
///   的平台相关检查，在此只是作为布尔结果注入；
/// - 成功返回 `Ok(())` 时，链路可以被调用方标记为 `Active`。
pub async fn perform_server_handshake<S>(
    stream: &mut S,
    expected_host_handshake: u64,
    reply_client_handshake: u64,
    identity_ok: bool,
) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let debug_comm = forge_core::env::ForgeEnv::from_process_environment().debug_comm();

    let first_byte = stream.read_u8().await?;
    if LEGACY_REJECT_LEADING_BYTES.contains(&first_byte) {
        if debug_comm {
            tracing::debug!(first_byte, "DEBUGCOMM: rejecting legacy peer leading byte");
        }
        stream.write_u8(REJECT_BYTE).await.ok();
        stream.flush().await.ok();
        return Err(WireError::LegacyPeerRejected(first_byte));
    }

    let mut rest = [0u8; 7];
    stream.read_exact(&mut rest).await?;
    let mut bytes = [0u8; 8];
    bytes[0] = first_byte;
    bytes[1..].copy_from_slice(&rest);
    let received = u64::from_be_bytes(bytes);

    if debug_comm {
        tracing::debug!(received, expected = expected_host_handshake, "DEBUGCOMM: host handshake received");
    }

    if received != expected_host_handshake {
        return Err(WireError::HandshakeMismatch {
            expected: expected_host_handshake,
            actual: received,
        });
    }

    if !identity_ok {
        return Err(WireError::LinkFailed(
            "peer identity does not match server identity".to_string(),
        ));
    }

    stream.write_all(&reply_client_handshake.to_be_bytes()).await?;
    stream.flush().await?;
    if debug_comm {
        tracing::debug!(reply_client_handshake, "DEBUGCOMM: client handshake sent");
    }
    Ok(())
}

/// 客户端（连接发起方）握手流程。
pub async fn perform_client_handshake<S>(
    stream: &mut S,
    send_host_handshake: u64,
    expected_client_handshake: u64,
) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let debug_comm = forge_core::env::ForgeEnv::from_process_environment().debug_comm();
    if debug_comm {
        tracing::debug!(send_host_handshake, "DEBUGCOMM: host handshake sent");
    }

    stream.write_all(&send_host_handshake.to_be_bytes()).await?;
    stream.flush().await?;

    let mut bytes = [0u8; 8];
    stream.read_exact(&mut bytes).await?;
    let received = u64::from_be_bytes(bytes);

    if debug_comm {
        tracing::debug!(received, expected = expected_client_handshake, "DEBUGCOMM: client handshake received");
    }

    if received != expected_client_handshake {
        return Err(WireError::HandshakeMismatch {
            expected: expected_client_handshake,
            actual: received,
        });
    }
    Ok(())
}
