//! 活跃提交簿记：把 `forge_core::Submission` 的数据形状和等待其完成所需的
//! 异步信号（§3「手动重置信号」）粘合在一起。

use forge_core::{BuildResult, ConfigId, ConfigurationKey, Submission, SubmissionId};
use tokio::sync::oneshot;

/// 一个仍在进行中的提交：数据本体加上唤醒调用者 `execute` 的一次性通道。
pub struct PendingSubmission {
    pub submission: Submission,
    /// 这次提交解析出的配置 id；在工作队列处理 `Submit` 消息、完成对
    /// `ConfigCache::resolve` 的调用之前是 `None`（见 `work_queue::handle_submit`）。
    pub config_id: Option<ConfigId>,
    waiter: Option<oneshot::Sender<BuildResult>>,
}

impl PendingSubmission {
    pub fn new(id: SubmissionId, config_key: ConfigurationKey, targets: Vec<String>) -> (Self, oneshot::Receiver<BuildResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                submission: Submission::new(id, config_key, targets),
                config_id: None,
                waiter: Some(tx),
            },
            rx,
        )
    }

    /// 交付终态结果：完成提交本体并唤醒等待方；对已完成提交重复调用是
    /// 编程错误，返回 `false`（镜像 `Submission::complete` 的单次跃迁约束）。
    pub fn complete(&mut self, result: BuildResult) -> bool {
        if !self.submission.complete(result.clone()) {
            return false;
        }
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(result);
        }
        true
    }
}
