//! 帧格式：`[kind: 1 字节][length: 4 字节 LE][payload: length 字节]`（§4.1）。
//!
//! 所有整数按小端写入；握手阶段的 8 字节交换是唯一的例外，见 [`crate::handshake`]
//! 的说明（那 8 个字节固定按大端传输，不经过本模块）。

use bytes::Bytes;
use forge_core::PacketKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WireError;

/// 单帧载荷允许的最大长度。防止一个损坏或恶意的长度字段导致无界内存分配——
/// 对端是「同用户、同提权级别」的受信任兄弟进程（§1 Non-goals 明确不处理不受信
/// worker），但损坏的长度字段仍然可能来自协议解析 bug，因此保留一个硬上限。
pub const MAX_PAYLOAD_LEN: u32 = 256 * 1024 * 1024;

/// 把一个已知种类与载荷字节写成一帧，写入任意异步可写流。
pub async fn write_packet<W>(writer: &mut W, kind: PacketKind, payload: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() as u64 > MAX_PAYLOAD_LEN as u64 {
        return Err(WireError::MalformedFrame(format!(
            "payload of {} bytes exceeds the {} byte frame limit",
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }
    writer.write_u8(kind.as_byte()).await?;
    writer.write_u32_le(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// 从异步可读流读取一帧，返回解析出的种类与原始载荷字节。
///
/// - 未知种类字节 ⇒ [`WireError::UnknownPacketKind`]（§6：每端必须以内部错误
///   关闭连接，由调用方——`forge-node`——负责真正断开连接）；
/// - 长度超过 [`MAX_PAYLOAD_LEN`] ⇒ [`WireError::MalformedFrame`]；
/// - 流提前结束（EOF）⇒ 底层 `io::Error` 经 `From` 转换为 `WireError::LinkFailed`。
pub async fn read_packet<R>(reader: &mut R) -> Result<(PacketKind, Bytes), WireError>
where
    R: AsyncRead + Unpin,
{
    let kind_byte = reader.read_u8().await?;
    let kind = PacketKind::from_byte(kind_byte).ok_or(WireError::UnknownPacketKind(kind_byte))?;

    let len = reader.read_u32_le().await?;
    if len > MAX_PAYLOAD_LEN {
        return Err(WireError::MalformedFrame(format!(
            "declared payload length {len} exceeds the {MAX_PAYLOAD_LEN} byte frame limit"
        )));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok((kind, Bytes::from(buf)))
}
