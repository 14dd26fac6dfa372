//! §4.5 的动作词汇表：调度器不执行任何 I/O，只产出一串待执行的动作，
//! 由 `forge-manager` 把它们变成真正的报文发送、节点创建或提交完成通知。

use forge_core::{BuildRequest, BuildResult, ConfigId, NodeId, NodeKind, SubmissionId};

/// 调度器每次输入事件后产出的动作序列中的一项。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerAction {
    /// 当前没有可执行的动作（例如请求已入队等待节点）。
    NoAction,

    /// 把 `request` 发往 `node_id`；该节点已经知道 `request.config_id` 对应的配置体。
    Schedule { node_id: NodeId, request: BuildRequest },

    /// 同上，但节点尚未见过这个配置，调用方必须先推送配置体再下发请求
    /// （§5：配置体的到达必须先于引用它的请求）。
    ScheduleWithConfiguration {
        node_id: NodeId,
        config_id: ConfigId,
        request: BuildRequest,
    },

    /// 用新到达的结果唤醒一个此前被阻塞、挂起在 `node_id` 上的请求。
    ResumeExecution {
        node_id: NodeId,
        resumed_request_id: forge_core::RequestId,
        blocker_results: Vec<BuildResult>,
    },

    /// 把一个结果直接交付给请求它的节点——不涉及恢复某个挂起的执行，
    /// 例如节点通过 `RequestConfig` 发现目标配置已有缓存结果。
    ReportResults { node_id: NodeId, result: BuildResult },

    /// 请求再创建 `count` 个给定种类的新节点（准入控制，§4.5）。
    CreateNode { kind: NodeKind, count: usize },

    /// 某个提交的顶层请求已经完成。
    SubmissionComplete {
        submission_id: SubmissionId,
        result: BuildResult,
    },

    /// 一个新请求会闭合一个依赖环；只失败这个最年轻的请求，不牵连整条链路
    /// （§4.5「为最年轻的弧发出 CircularDependency」）。
    CircularDependency {
        submission_id: SubmissionId,
        request_id: forge_core::RequestId,
    },
}
