//! `forge-wire`：报文成帧、版本/身份握手、载荷编解码。
//!
//! # 模块总览（What）
//! - [`frame`]：`[kind:1][len:4 LE][payload]` 成帧读写，工作在任意
//!   `AsyncRead + AsyncWrite` 流上，不关心流的来源（Unix socket、内存管道都可以）。
//! - [`handshake`]：§4.1/§6 的版本哈希与握手值推导，以及服务端/客户端的握手序列。
//! - [`payloads`]：各报文种类载荷的（反）序列化，线路上选用 UTF-8 JSON
//!   （spec 把字符串编码留给实现选择，只要求可往返）。
//! - [`error`]：`WireError`，对应 §7 的 Transport / Handshake 错误类别。

pub mod error;
pub mod frame;
pub mod handshake;
pub mod payloads;

pub use error::WireError;
pub use frame::{read_packet, write_packet, MAX_PAYLOAD_LEN};
pub use handshake::{
    perform_client_handshake, perform_server_handshake, version_hash, HandshakeContext,
    LEGACY_REJECT_LEADING_BYTES, REJECT_BYTE,
};
