//! 请求执行器的默认实现。
//!
//! 项目求值与目标图执行是协作方的职责，不在本仓库范围内（见顶层设计边界）。
//! 这里提供的 [`StubExecutor`] 只是满足 `forge_node::RequestExecutor` 接口
//! 形状的占位实现：把每个请求里的目标都报告为成功，让节点↔管理器之间的
//! 报文往返、配置亲和性与调度逻辑可以被端到端地练习，而不必接入一套真正
//! 的构建求值引擎。

use async_trait::async_trait;
use forge_core::{BuildRequest, BuildResult, TargetOutcome, TargetStatus};
use forge_node::RequestExecutor;

pub struct StubExecutor;

#[async_trait]
impl RequestExecutor for StubExecutor {
    async fn execute(&self, request: &BuildRequest) -> BuildResult {
        tracing::debug!(
            submission_id = %request.submission_id,
            config_id = %request.config_id,
            targets = ?request.targets,
            "executing stubbed build request"
        );

        BuildResult {
            submission_id: request.submission_id,
            config_id: request.config_id,
            outcomes: request
                .targets
                .iter()
                .map(|target| TargetOutcome {
                    target: target.clone(),
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
