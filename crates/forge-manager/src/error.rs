//! 构建管理器生命周期相关的错误类别（§4.6 合法状态跃迁、§7 取消/异常传播）。

use forge_core::SubmissionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    /// 在 `Idle` 之外的状态调用 `begin_build`，或在非 `Building` 状态调用
    /// `pend_submission`/`execute_submission`（§4.6「合法跃迁」）。
    #[error("illegal lifecycle transition: {attempted} while manager is {current}")]
    IllegalTransition {
        attempted: &'static str,
        current: &'static str,
    },

    #[error("submission {0} is unknown to this build")]
    UnknownSubmission(SubmissionId),

    /// `end_build` 在工作队列线程上捕获到的一次未预期异常被重新抛出
    /// （§7「传播策略」：构建级线程异常槽位）。
    #[error("build-level thread exception: {0}")]
    ThreadException(String),

    #[error("node manager rejected node creation: {0}")]
    NodeCreationFailed(String),
}
