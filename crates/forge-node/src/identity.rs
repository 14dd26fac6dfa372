//! 调用方身份校验：Unix 域套接字上的对端凭据检查。
//!
//! spec.md 把身份校验描述为「宿主平台相关的 ACL/SID 比较」，这里落地为
//! Unix 对端凭据（`SO_PEERCRED`）与当前进程 uid 的比较——两端只信任同一
//! 用户下的兄弟进程，这与 §1 Non-goals「不处理不受信任的 worker」一致。

use tokio::net::UnixStream;

/// 判断 `stream` 另一端的 uid 是否与当前进程相同。
///
/// 取不到对端凭据时保守地判定为不一致，交由握手失败路径处理，而不是
/// 放行一个身份未知的连接。
pub fn peer_is_same_user(stream: &UnixStream) -> bool {
    match stream.peer_cred() {
        Ok(cred) => cred.uid() == current_uid(),
        Err(err) => {
            tracing::warn!(error = %err, "could not read peer credentials; rejecting handshake");
            false
        }
    }
}

fn current_uid() -> u32 {
    // SAFETY: `getuid` 是一个无参数、不可失败的系统调用。
    unsafe { libc_getuid() }
}

// 避免为了一次系统调用引入整个 `libc` crate；extern 块直接声明所需符号。
unsafe extern "C" {
    #[link_name = "getuid"]
    fn libc_getuid() -> u32;
}
