//! 进程外节点的可执行入口：从 `FORGE_NODE_SOCKET` 读取管理器为本节点绑定的
//! 套接字路径，完成握手后进入报文泵送循环，直到管理器关闭链路。

mod executor;

use std::path::PathBuf;
use std::sync::Arc;

use forge_node::{HandshakeIdentity, NODE_SOCKET_ENV_VAR};

const VERSION_IDENTITY: &str = concat!("forge/", env!("CARGO_PKG_VERSION"));

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let socket_path = std::env::var(NODE_SOCKET_ENV_VAR)
        .map(PathBuf::from)
        .map_err(|_| anyhow::anyhow!("{NODE_SOCKET_ENV_VAR} is not set; this binary is meant to be spawned by a manager"))?;

    let identity = HandshakeIdentity::new(VERSION_IDENTITY);
    let executor = Arc::new(executor::StubExecutor);

    forge_node::worker_loop::run(&socket_path, &identity, executor)
        .await
        .map_err(|err| anyhow::anyhow!("worker loop exited with an error: {err}"))
}
