//! `BuildManager`：生命周期状态机、活跃提交簿记、对外的 `begin_build` /
//! `pend_submission` / `execute_submission` / `end_build` / `cancel_all` API（§4.6）。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use forge_core::ids::SubmissionIdAllocator;
use forge_core::{BuildResult, ConfigurationKey, NodeId, PacketKind, RequestFlags, SubmissionId};
use forge_node::{NodeManager, NodeManagerConfig, PacketRouter};
use forge_scheduler::Scheduler;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

use crate::config_cache::ConfigCache;
use crate::error::ManagerError;
use crate::lifecycle::LifecycleState;
use crate::results_cache::ResultsCache;
use crate::submission::PendingSubmission;
use crate::work_queue::{self, WorkMessage, WorkQueueContext};

/// 调用 `begin_build` 时传入的参数；克隆进管理器内部，宿主之后对原值的修改
/// 不会影响正在进行的构建（§4.6「宿主不能在构建中途改变它们」）。
#[derive(Clone, Debug, Default)]
pub struct BeginBuildParams {
    /// 强制整体重置两张缓存，而不是只清理非显式加载的部分。
    pub force_reset_caches: bool,
}

/// 把入站报文转发进工作队列的薄适配器；`NodeManager` 需要在构造时拿到一个
/// 路由器，而工作队列的发送端在 `BuildManager::new` 里和它同时诞生。
struct QueueRouter {
    tx: mpsc::UnboundedSender<WorkMessage>,
}

#[async_trait]
impl PacketRouter for QueueRouter {
    async fn route(&self, node_id: NodeId, kind: PacketKind, payload: Bytes) {
        let _ = self.tx.send(WorkMessage::Packet { node_id, kind, payload });
    }
}

/// 并行构建执行引擎的核心：维护活跃提交、把一切变更串行化到一条工作队列上，
/// 并在 `Idle <-> Building <-> WaitingForBuildToComplete` 之间跃迁（§4.6）。
pub struct BuildManager {
    lifecycle: Mutex<LifecycleState>,
    scheduler: Arc<Scheduler>,
    node_manager: Arc<NodeManager>,
    config_cache: Arc<ConfigCache>,
    results_cache: Arc<ResultsCache>,
    active_submissions: Arc<DashMap<SubmissionId, PendingSubmission>>,
    submission_ids: SubmissionIdAllocator,
    work_tx: mpsc::UnboundedSender<WorkMessage>,
    queue_task: Mutex<Option<JoinHandle<()>>>,
    shutting_down: Arc<AtomicBool>,
    no_active_submissions: Arc<Notify>,
    thread_exception: Arc<Mutex<Option<String>>>,
}

impl BuildManager {
    /// 装配缓存、调度器、节点管理器与工作队列任务；初始状态为 `Idle`。
    pub fn new(node_manager_config: NodeManagerConfig, max_nodes: usize) -> Self {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let router: Arc<dyn PacketRouter> = Arc::new(QueueRouter { tx: work_tx.clone() });
        let node_manager = Arc::new(NodeManager::new(node_manager_config, router));
        let scheduler = Arc::new(Scheduler::new(max_nodes));
        let config_cache = Arc::new(ConfigCache::default());
        let results_cache = Arc::new(ResultsCache::new());
        let active_submissions = Arc::new(DashMap::new());
        let shutting_down = Arc::new(AtomicBool::new(false));
        let no_active_submissions = Arc::new(Notify::new());
        let thread_exception = Arc::new(Mutex::new(None));

        let ctx = Arc::new(WorkQueueContext {
            scheduler: scheduler.clone(),
            node_manager: node_manager.clone(),
            config_cache: config_cache.clone(),
            results_cache: results_cache.clone(),
            active_submissions: active_submissions.clone(),
            shutting_down: shutting_down.clone(),
            no_active_submissions: no_active_submissions.clone(),
            thread_exception: thread_exception.clone(),
        });
        let queue_task = tokio::spawn(work_queue::run(work_rx, ctx));

        Self {
            lifecycle: Mutex::new(LifecycleState::Idle),
            scheduler,
            node_manager,
            config_cache,
            results_cache,
            active_submissions,
            submission_ids: SubmissionIdAllocator::default(),
            work_tx,
            queue_task: Mutex::new(Some(queue_task)),
            shutting_down,
            no_active_submissions,
            thread_exception,
        }
    }

    pub fn node_manager(&self) -> &Arc<NodeManager> {
        &self.node_manager
    }

    pub fn results_cache(&self) -> &Arc<ResultsCache> {
        &self.results_cache
    }

    /// `Idle -> Building`：按阈值/强制标志决定整体重置还是只清理非显式加载
    /// 的配置（§4.4、§4.6）。`CLEARXMLCACHEONBUILDMANAGER=1` 与
    /// `force_reset_caches` 效果相同，都会越过阈值判断强制整体重置。
    pub fn begin_build(&self, params: BeginBuildParams) -> Result<(), ManagerError> {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.can_begin_build() {
            return Err(ManagerError::IllegalTransition {
                attempted: "begin_build",
                current: lifecycle.name(),
            });
        }

        let env_forces_reset = forge_core::env::ForgeEnv::from_process_environment()
            .clear_xml_cache_on_build_manager();
        if params.force_reset_caches || env_forces_reset || self.config_cache.is_size_above_threshold() {
            self.config_cache.clear_all();
            self.results_cache.clear();
        } else {
            for cleared in self.config_cache.clear_non_explicit() {
                self.results_cache.clear_for(cleared);
            }
        }

        self.scheduler.reset();
        self.shutting_down.store(false, Ordering::Release);
        *lifecycle = LifecycleState::Building;
        Ok(())
    }

    /// 为一次用户可见的构建请求分配提交 id、登记进活跃提交表，返回其句柄与
    /// 等待其终态结果的一次性通道（§4.6 `pend_submission`）。
    pub fn pend_submission(
        &self,
        config_key: ConfigurationKey,
        targets: Vec<String>,
    ) -> Result<(SubmissionId, oneshot::Receiver<BuildResult>), ManagerError> {
        {
            let lifecycle = self.lifecycle.lock();
            if !lifecycle.can_accept_submissions() {
                return Err(ManagerError::IllegalTransition {
                    attempted: "pend_submission",
                    current: lifecycle.name(),
                });
            }
        }

        let submission_id = self.submission_ids.next();
        let (pending, receiver) = PendingSubmission::new(submission_id, config_key, targets);
        self.active_submissions.insert(submission_id, pending);
        Ok((submission_id, receiver))
    }

    /// 把一个已登记的提交真正送入调度：解析/创建其配置，构造顶层请求并投递
    /// 到工作队列，然后异步等待其终态结果（§4.6 `execute_submission`）。
    pub async fn execute_submission(
        &self,
        submission_id: SubmissionId,
        receiver: oneshot::Receiver<BuildResult>,
    ) -> Result<BuildResult, ManagerError> {
        let (config_key, targets) = {
            let entry = self
                .active_submissions
                .get(&submission_id)
                .ok_or(ManagerError::UnknownSubmission(submission_id))?;
            (entry.submission.config_key.clone(), entry.submission.targets.clone())
        };

        let message = WorkMessage::Submit {
            submission_id,
            config_key,
            explicitly_loaded: false,
            targets,
            flags: RequestFlags::default(),
        };
        if self.work_tx.send(message).is_err() {
            return Err(ManagerError::ThreadException("work queue is no longer running".to_string()));
        }

        receiver
            .await
            .map_err(|_| ManagerError::ThreadException("work queue dropped the submission without a result".to_string()))
    }

    /// `Building -> WaitingForBuildToComplete -> Idle`：等待一切提交完成，
    /// 复用已连接的节点供下一次构建使用，并把捕获到的工作队列异常重新抛出
    /// （§4.6「失败语义」）。
    pub async fn end_build(&self) -> Result<(), ManagerError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.can_begin_drain() {
                return Err(ManagerError::IllegalTransition {
                    attempted: "end_build",
                    current: lifecycle.name(),
                });
            }
            *lifecycle = LifecycleState::WaitingForBuildToComplete;
        }

        self.wait_for_no_active_submissions().await;
        self.node_manager.shutdown_connected(true).await;

        *self.lifecycle.lock() = LifecycleState::Idle;

        if let Some(reason) = self.thread_exception.lock().take() {
            return Err(ManagerError::ThreadException(reason));
        }
        Ok(())
    }

    /// 取消路径：立刻标记 shutting-down，为每个仍未完成的提交合成一个
    /// `Aborted` 结果，终止（不复用）全部节点，然后排空回 `Idle`（§5 取消）。
    pub async fn cancel_all(&self) -> Result<(), ManagerError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.can_begin_drain() {
                return Ok(());
            }
            *lifecycle = LifecycleState::WaitingForBuildToComplete;
        }

        let _ = self.work_tx.send(WorkMessage::CancelAll);
        self.wait_for_no_active_submissions().await;
        self.node_manager.shutdown_connected(false).await;

        *self.lifecycle.lock() = LifecycleState::Idle;
        if let Some(reason) = self.thread_exception.lock().take() {
            return Err(ManagerError::ThreadException(reason));
        }
        Ok(())
    }

    async fn wait_for_no_active_submissions(&self) {
        loop {
            if self.active_submissions.iter().all(|entry| entry.submission.is_complete()) {
                return;
            }
            let notified = self.no_active_submissions.notified();
            if self.active_submissions.iter().all(|entry| entry.submission.is_complete()) {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for BuildManager {
    fn drop(&mut self) {
        if let Some(task) = self.queue_task.lock().take() {
            task.abort();
        }
    }
}
