//! 单消费者工作队列：调度器/缓存的一切变更都只在这个任务里发生（§5）。
//! 节点泵送循环、日志消费者、用户线程都只向这里*投递消息*，不直接触碰
//! 共享状态——镜像 `forge-node::endpoint::pump` 同一套"一个逻辑消费者"原则。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use forge_core::{
    BuildResult, ConfigId, ConfigurationKey, NodeId, NodeKind, PacketKind, RequestFlags, SubmissionId,
};
use forge_node::NodeManager;
use forge_scheduler::{Scheduler, SchedulerAction};
use forge_wire::payloads::{
    self, LogMessagePayload, NodeShutdownPayload, NodeShutdownReason, PushConfigurationPayload, RequestBlockerPayload,
    RequestConfigPayload, RequestConfigResponsePayload, ResultPayload, ResumeExecutionPayload, ScheduleRequestPayload,
};
use tokio::sync::{mpsc, Notify};

use crate::config_cache::ConfigCache;
use crate::results_cache::ResultsCache;
use crate::submission::PendingSubmission;

/// 提交给工作队列处理的消息。
pub enum WorkMessage {
    Submit {
        submission_id: SubmissionId,
        config_key: ConfigurationKey,
        explicitly_loaded: bool,
        targets: Vec<String>,
        flags: RequestFlags,
    },
    Packet {
        node_id: NodeId,
        kind: PacketKind,
        payload: Bytes,
    },
    CancelAll,
}

/// 工作队列任务需要触达的一切共享协作者。
pub struct WorkQueueContext {
    pub scheduler: Arc<Scheduler>,
    pub node_manager: Arc<NodeManager>,
    pub config_cache: Arc<ConfigCache>,
    pub results_cache: Arc<ResultsCache>,
    pub active_submissions: Arc<DashMap<SubmissionId, PendingSubmission>>,
    pub shutting_down: Arc<AtomicBool>,
    pub no_active_submissions: Arc<Notify>,
    pub thread_exception: Arc<parking_lot::Mutex<Option<String>>>,
}

/// 单消费者主循环：依次取出消息、处理，直到发送端全部释放（`begin_build`
/// 持有的句柄在 `end_build` 完成排空后丢弃）。任何 panic 都会被捕获进
/// `thread_exception` 槽位而不是让整个任务悄悄死掉（§7「构建级线程异常」）。
pub async fn run(mut rx: mpsc::UnboundedReceiver<WorkMessage>, ctx: Arc<WorkQueueContext>) {
    while let Some(message) = rx.recv().await {
        let ctx = ctx.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handle_message(&ctx, message)));
        if let Err(panic) = outcome {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "work queue task panicked".to_string());
            tracing::error!(reason = %reason, "build-level thread exception captured");
            *ctx.thread_exception.lock() = Some(reason);
        }
    }
}

fn handle_message(ctx: &WorkQueueContext, message: WorkMessage) {
    if ctx.shutting_down.load(Ordering::Acquire) && !matches!(message, WorkMessage::CancelAll) {
        tracing::debug!("dropping post-shutdown message");
        return;
    }

    match message {
        WorkMessage::Submit {
            submission_id,
            config_key,
            explicitly_loaded,
            targets,
            flags,
        } => handle_submit(ctx, submission_id, config_key, explicitly_loaded, targets, flags),
        WorkMessage::Packet { node_id, kind, payload } => handle_packet(ctx, node_id, kind, payload),
        WorkMessage::CancelAll => handle_cancel_all(ctx),
    }
}

fn handle_submit(
    ctx: &WorkQueueContext,
    submission_id: SubmissionId,
    config_key: ConfigurationKey,
    explicitly_loaded: bool,
    targets: Vec<String>,
    flags: RequestFlags,
) {
    let config = ctx.config_cache.resolve(config_key, explicitly_loaded);
    if let Some(mut entry) = ctx.active_submissions.get_mut(&submission_id) {
        entry.config_id = Some(config.id());
    }
    let actions = ctx.scheduler.submit(submission_id, config.id(), targets, flags);
    execute_actions(ctx, actions);
}

fn handle_packet(ctx: &WorkQueueContext, node_id: NodeId, kind: PacketKind, payload: Bytes) {
    match kind {
        PacketKind::RequestBlocker => handle_request_blocker(ctx, node_id, &payload),
        PacketKind::RequestConfig => handle_request_config(ctx, node_id, &payload),
        PacketKind::Result => handle_result(ctx, node_id, &payload),
        PacketKind::NodeShutdown => handle_node_shutdown(ctx, node_id, &payload),
        PacketKind::LogMessage => handle_log_message(&payload),
        PacketKind::ScheduleRequest | PacketKind::PushConfiguration | PacketKind::ResumeExecution => {
            tracing::warn!(?kind, %node_id, "manager received a manager-to-node-only packet kind; dropping");
        }
    }
}

fn handle_request_blocker(ctx: &WorkQueueContext, node_id: NodeId, payload: &[u8]) {
    let decoded: RequestBlockerPayload = match payloads::decode(PacketKind::RequestBlocker, payload) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(%node_id, %err, "malformed RequestBlocker payload");
            return;
        }
    };

    let Some(parent_request_id) = decoded.parent_request_id else {
        tracing::warn!(%node_id, "RequestBlocker without a parent request id");
        return;
    };

    let request = decoded.blocked_request;
    match ctx
        .scheduler
        .report_blocked(node_id, parent_request_id, request.config_id, request.targets, request.flags)
    {
        Ok(actions) => execute_actions(ctx, actions),
        Err(err) => tracing::warn!(%node_id, %err, "report_blocked rejected"),
    }
}

fn handle_request_config(ctx: &WorkQueueContext, node_id: NodeId, payload: &[u8]) {
    let decoded: RequestConfigPayload = match payloads::decode(PacketKind::RequestConfig, payload) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(%node_id, %err, "malformed RequestConfig payload");
            return;
        }
    };

    let config = ctx.config_cache.resolve(decoded.config_key, decoded.explicitly_loaded);
    let response = RequestConfigResponsePayload {
        config_id: config.id(),
        owning_node: config.owning_node(),
    };
    send_packet(ctx, node_id, PacketKind::RequestConfigResponse, &response);
}

fn handle_result(ctx: &WorkQueueContext, node_id: NodeId, payload: &[u8]) {
    let decoded: ResultPayload = match payloads::decode(PacketKind::Result, payload) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(%node_id, %err, "malformed Result payload");
            return;
        }
    };

    if let Some(config) = ctx.config_cache.get_by_id(decoded.result.config_id) {
        config.fill_targets_if_absent(&decoded.result.default_targets, &decoded.result.initial_targets);
    }
    ctx.results_cache.add(decoded.result.clone());

    match ctx.scheduler.report_result(node_id, decoded.request_id, decoded.result) {
        Ok(actions) => execute_actions(ctx, actions),
        Err(err) => tracing::warn!(%node_id, %err, "report_result rejected"),
    }
}

fn handle_node_shutdown(ctx: &WorkQueueContext, node_id: NodeId, payload: &[u8]) {
    let decoded: NodeShutdownPayload = match payloads::decode(PacketKind::NodeShutdown, payload) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(%node_id, %err, "malformed NodeShutdown payload");
            return;
        }
    };

    execute_actions(ctx, ctx.scheduler.report_build_aborted(node_id));

    if matches!(decoded.reason, NodeShutdownReason::Error | NodeShutdownReason::ConnectionFailed) {
        tracing::error!(%node_id, reason = ?decoded.reason, "node went down abnormally, aborting every open submission");
        abort_all_open_submissions(ctx);
    }
}

fn handle_log_message(payload: &[u8]) {
    match payloads::decode::<LogMessagePayload>(PacketKind::LogMessage, payload) {
        Ok(decoded) => tracing::info!(level = ?decoded.level, message = %decoded.message, "node log message"),
        Err(err) => tracing::warn!(%err, "malformed LogMessage payload"),
    }
}

fn handle_cancel_all(ctx: &WorkQueueContext) {
    ctx.shutting_down.store(true, Ordering::Release);
    abort_all_open_submissions(ctx);
}

/// 为每个仍处于 pending 的提交合成一个 `Aborted` 结果并唤醒其等待者，
/// 然后通知节点管理器不要复用现存节点（§4.6 取消路径、§7 类别 6）。
fn abort_all_open_submissions(ctx: &WorkQueueContext) {
    let open: Vec<SubmissionId> = ctx
        .active_submissions
        .iter()
        .filter(|entry| !entry.submission.is_complete())
        .map(|entry| *entry.key())
        .collect();

    for submission_id in open {
        if let Some(mut entry) = ctx.active_submissions.get_mut(&submission_id) {
            let config_id = entry.config_id.unwrap_or(ConfigId::from_raw(0));
            entry.complete(BuildResult::aborted(submission_id, config_id));
        }
    }

    if ctx
        .active_submissions
        .iter()
        .all(|entry| entry.submission.is_complete())
    {
        ctx.no_active_submissions.notify_waiters();
    }
}

/// 执行一批调度动作：把它们变成真正的报文发送、节点创建请求，或提交完成
/// 通知。`CreateNode` 成功时递归地把 `report_nodes_created` 产出的后续动作
/// 也在这同一条消息里执行完，保持"同一条触发事件的全部后果同批落地"。
fn execute_actions(ctx: &WorkQueueContext, actions: Vec<SchedulerAction>) {
    for action in actions {
        execute_action(ctx, action);
    }
}

fn execute_action(ctx: &WorkQueueContext, action: SchedulerAction) {
    match action {
        SchedulerAction::NoAction => {}
        SchedulerAction::Schedule { node_id, request } => {
            let payload = ScheduleRequestPayload { request };
            send_packet(ctx, node_id, PacketKind::ScheduleRequest, &payload);
        }
        SchedulerAction::ScheduleWithConfiguration { node_id, config_id, request } => {
            if let Some(config) = ctx.config_cache.get_by_id(config_id) {
                let push = PushConfigurationPayload {
                    config_id,
                    config_key: config.key().clone(),
                    explicitly_loaded: config.is_explicitly_loaded(),
                };
                send_packet(ctx, node_id, PacketKind::PushConfiguration, &push);
            } else {
                tracing::error!(%config_id, "scheduler referenced an unknown configuration");
            }
            let schedule = ScheduleRequestPayload { request };
            send_packet(ctx, node_id, PacketKind::ScheduleRequest, &schedule);
        }
        SchedulerAction::ResumeExecution { node_id, resumed_request_id, blocker_results } => {
            let payload = ResumeExecutionPayload { resumed_request_id, blocker_results };
            send_packet(ctx, node_id, PacketKind::ResumeExecution, &payload);
        }
        SchedulerAction::ReportResults { result, .. } => {
            ctx.results_cache.add(result);
        }
        SchedulerAction::CreateNode { kind, count } => create_nodes(ctx, kind, count),
        SchedulerAction::SubmissionComplete { submission_id, result } => {
            if let Some(mut entry) = ctx.active_submissions.get_mut(&submission_id) {
                entry.complete(result);
            }
            if ctx
                .active_submissions
                .iter()
                .all(|entry| entry.submission.is_complete())
            {
                ctx.no_active_submissions.notify_waiters();
            }
        }
        SchedulerAction::CircularDependency { submission_id, .. } => {
            tracing::warn!(%submission_id, "failing submission: a scheduled request would close a dependency cycle");
            if let Some(mut entry) = ctx.active_submissions.get_mut(&submission_id) {
                let config_id = entry.config_id.unwrap_or(ConfigId::from_raw(0));
                entry.complete(BuildResult {
                    submission_id,
                    config_id,
                    outcomes: Vec::new(),
                    default_targets: Vec::new(),
                    initial_targets: Vec::new(),
                    exception: Some("circular dependency detected".to_string()),
                    aborted: false,
                });
            }
        }
    }
}

fn create_nodes(ctx: &WorkQueueContext, kind: NodeKind, count: usize) {
    let mut created = Vec::with_capacity(count);
    for _ in 0..count {
        match ctx.node_manager.create(kind) {
            Ok(node_id) => created.push((node_id, kind)),
            Err(err) => {
                tracing::error!(%err, "node creation failed, aborting build");
                abort_all_open_submissions(ctx);
                return;
            }
        }
    }
    let actions = ctx.scheduler.report_nodes_created(created);
    execute_actions(ctx, actions);
}

fn send_packet<T: serde::Serialize>(ctx: &WorkQueueContext, node_id: NodeId, kind: PacketKind, payload: &T) {
    match payloads::encode(kind, payload) {
        Ok((kind, bytes)) => {
            if let Err(err) = ctx.node_manager.send(node_id, kind, Bytes::from(bytes)) {
                tracing::warn!(%node_id, %err, "failed to deliver packet to node");
            }
        }
        Err(err) => tracing::error!(%node_id, %err, "failed to encode outbound payload"),
    }
}
