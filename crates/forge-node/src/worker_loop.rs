//! worker 侧（客户端角色）的连接与报文泵送循环，供 `forge-worker` 可执行
//! 文件调用。放在这里而不是 bin crate 里，是因为测试需要以进程内方式
//! 驱动这套逻辑（见下方测试），没有必要为此再拉起一个真正的子进程。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use forge_core::{BuildRequest, BuildResult, PacketKind};
use forge_wire::payloads::{self, ResultPayload, ScheduleRequestPayload};
use tokio::net::UnixStream;

use crate::error::NodeError;
use crate::handshake::{derive, HandshakeIdentity};

/// 节点真正执行一次构建请求的可插拔实现。项目求值/目标图执行是 spec
/// 明确划出的协作方职责（§1 Non-goals），这里只定义它对外的调用形状。
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: &BuildRequest) -> BuildResult;
}

/// 以客户端角色连接到管理器监听的套接字，完成握手后进入报文泵送循环，
/// 直到管理器关闭链路或下发 `NodeShutdown`。
pub async fn run(
    socket_path: &Path,
    identity: &HandshakeIdentity,
    executor: Arc<dyn RequestExecutor>,
) -> Result<(), NodeError> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .map_err(|source| NodeError::Connect {
            path: socket_path.display().to_string(),
            source,
        })?;

    let values = derive(identity);
    forge_wire::perform_client_handshake(&mut stream, values.host, values.client).await?;

    let (mut read_half, mut write_half) = stream.into_split();
    loop {
        let (kind, payload) = match forge_wire::read_packet(&mut read_half).await {
            Ok(v) => v,
            Err(forge_wire::WireError::LinkFailed(_)) => return Ok(()),
            Err(err) => return Err(NodeError::Wire(err)),
        };

        match kind {
            PacketKind::ScheduleRequest => {
                let schedule: ScheduleRequestPayload = payloads::decode(kind, &payload)?;
                let request_id = schedule.request.request_id;
                let result = executor.execute(&schedule.request).await;
                let (result_kind, result_bytes) =
                    payloads::encode(PacketKind::Result, &ResultPayload { request_id, result })?;
                forge_wire::write_packet(&mut write_half, result_kind, &result_bytes).await?;
            }
            PacketKind::NodeShutdown => return Ok(()),
            other => {
                tracing::warn!(?other, "worker node received an unexpected packet kind");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::{ConfigId, RequestFlags, RequestId, SubmissionId, TargetOutcome, TargetStatus};
    use tokio::net::UnixListener;

    struct EchoExecutor;

    #[async_trait]
    impl RequestExecutor for EchoExecutor {
        async fn execute(&self, request: &BuildRequest) -> BuildResult {
            BuildResult {
                submission_id: request.submission_id,
                config_id: request.config_id,
                outcomes: request
                    .targets
                    .iter()
                    .map(|t| TargetOutcome {
                        target: t.clone(),
                        status: TargetStatus::Success,
                    })
                    .collect(),
                default_targets: request.targets.clone(),
                initial_targets: request.targets.clone(),
                exception: None,
                aborted: false,
            }
        }
    }

    #[tokio::test]
    async fn runs_a_request_through_the_worker_loop_and_replies_with_a_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let identity = HandshakeIdentity::new("forge/1.0.0");

        let server_identity = identity.clone();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let server_values = derive(&server_identity);
            forge_wire::perform_server_handshake(
                &mut stream,
                server_values.host,
                server_values.client,
                true,
            )
            .await
            .unwrap();

            let request = BuildRequest {
                submission_id: SubmissionId::from_raw(0),
                request_id: RequestId::from_raw(1),
                config_id: ConfigId::from_raw(2),
                parent_request_id: None,
                targets: vec!["Build".into()],
                flags: RequestFlags::default(),
            };
            let (kind, bytes) =
                payloads::encode(PacketKind::ScheduleRequest, &ScheduleRequestPayload { request }).unwrap();
            forge_wire::write_packet(&mut stream, kind, &bytes).await.unwrap();

            let (result_kind, result_bytes) = forge_wire::read_packet(&mut stream).await.unwrap();
            let result: ResultPayload = payloads::decode(result_kind, &result_bytes).unwrap();
            assert!(result.result.is_success());
        });

        let executor = Arc::new(EchoExecutor);
        run(&path, &identity, executor).await.ok();
        server.await.unwrap();
    }
}
