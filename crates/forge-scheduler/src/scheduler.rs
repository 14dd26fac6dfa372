//! 调度决策核心：配置亲和性、节点准入、每节点已知配置集合、请求 id 铸造与
//! 循环依赖检测（§4.5）。
//!
//! # 设计取舍（Trade-offs）
//! spec.md 把「节点已知哪些配置」这件事交给管理器维护（§4.5 最后一句）；
//! 这里把它和配置亲和性一起收纳进调度器内部状态，因为两者都只在「该把
//! 这个请求发到哪个节点、要不要先推送配置体」这一个决策点上被读取——拆成
//! 两个需要互相同步的所有者反而更容易产生不一致。管理器仍然是配置体本身
//! （`ConfigurationKey`）的唯一所有者；调度器只携带 `ConfigId`，由管理器
//! 在执行 `ScheduleWithConfiguration` 动作时去配置缓存里取真正的配置体。

use std::collections::{HashMap, HashSet, VecDeque};

use forge_core::ids::RequestIdAllocator;
use forge_core::{BuildRequest, BuildResult, ConfigId, NodeId, NodeKind, RequestFlags, RequestId, SubmissionId};
use parking_lot::Mutex;

use crate::action::SchedulerAction;
use crate::error::SchedulerError;

struct NodeRecord {
    kind: NodeKind,
    known_configs: HashSet<ConfigId>,
    busy_with: Option<RequestId>,
}

struct RequestRecord {
    submission_id: SubmissionId,
    config_id: ConfigId,
    parent_request_id: Option<RequestId>,
    node_id: Option<NodeId>,
    targets: Vec<String>,
    flags: RequestFlags,
}

#[derive(Clone, Copy)]
struct PendingRequest {
    request_id: RequestId,
}

#[derive(Default)]
struct State {
    nodes: HashMap<NodeId, NodeRecord>,
    owning_node: HashMap<ConfigId, NodeId>,
    requests: HashMap<RequestId, RequestRecord>,
    submission_root: HashMap<SubmissionId, RequestId>,
    pending: VecDeque<PendingRequest>,
    waiting_for_result: HashMap<RequestId, (NodeId, RequestId)>,
    nodes_requested_not_yet_created: usize,
}

/// 决定请求去哪个节点、何时创建新节点、何时报告循环依赖的核心状态机。
///
/// 本身不做任何 I/O；每个 `report_*`/`submit` 调用返回一串 [`SchedulerAction`]，
/// 由 `forge-manager` 的工作队列线程负责真正执行（发送报文、拉起节点等）。
pub struct Scheduler {
    state: Mutex<State>,
    max_nodes: usize,
    request_ids: RequestIdAllocator,
}

impl Scheduler {
    pub fn new(max_nodes: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_nodes,
            request_ids: RequestIdAllocator::default(),
        }
    }

    /// 清空所有调度状态，回到一次全新构建开始前的样子（§4.5 `reset`）。
    /// 节点本身的连接生命周期由 `forge-node` 管理，不受这里影响。
    pub fn reset(&self) {
        *self.state.lock() = State::default();
    }

    /// 新建一个顶层请求（来自 `execute_submission`），铸造其请求 id 并尝试调度。
    pub fn submit(
        &self,
        submission_id: SubmissionId,
        config_id: ConfigId,
        targets: Vec<String>,
        flags: RequestFlags,
    ) -> Vec<SchedulerAction> {
        let request_id = self.request_ids.next();
        let mut state = self.state.lock();
        state.submission_root.insert(submission_id, request_id);
        state.requests.insert(
            request_id,
            RequestRecord {
                submission_id,
                config_id,
                parent_request_id: None,
                node_id: None,
                targets: targets.clone(),
                flags,
            },
        );
        self.try_schedule_or_queue(&mut state, request_id)
    }

    /// 某节点上一个正在执行的请求（`parent_request_id`）因为需要另一个配置
    /// 的结果而阻塞；铸造子请求并尝试调度，除非它会闭合一个依赖环（§4.5）。
    pub fn report_blocked(
        &self,
        node_id: NodeId,
        parent_request_id: RequestId,
        new_config_id: ConfigId,
        new_targets: Vec<String>,
        flags: RequestFlags,
    ) -> Result<Vec<SchedulerAction>, SchedulerError> {
        let mut state = self.state.lock();

        let (submission_id, parent_owner) = {
            let parent = state
                .requests
                .get(&parent_request_id)
                .ok_or(SchedulerError::UnknownRequest(parent_request_id))?;
            (parent.submission_id, parent.node_id)
        };
        if parent_owner != Some(node_id) {
            return Err(SchedulerError::NotOwnedByReportingNode(parent_request_id));
        }

        if self.closes_a_cycle(&state, parent_request_id, new_config_id) {
            let request_id = self.request_ids.next();
            return Ok(vec![SchedulerAction::CircularDependency {
                submission_id,
                request_id,
            }]);
        }

        let request_id = self.request_ids.next();
        state.requests.insert(
            request_id,
            RequestRecord {
                submission_id,
                config_id: new_config_id,
                parent_request_id: Some(parent_request_id),
                node_id: None,
                targets: new_targets,
                flags,
            },
        );
        state
            .waiting_for_result
            .insert(request_id, (node_id, parent_request_id));

        Ok(self.try_schedule_or_queue(&mut state, request_id))
    }

    /// 沿父请求链向上查找：如果祖先中已经有请求在构建同一个配置，新的子请求
    /// 会闭合一个环——只失败这条「最年轻的弧」，不牵连更早的请求。
    fn closes_a_cycle(&self, state: &State, parent_request_id: RequestId, new_config_id: ConfigId) -> bool {
        let mut cursor = Some(parent_request_id);
        while let Some(id) = cursor {
            let Some(record) = state.requests.get(&id) else {
                break;
            };
            if record.config_id == new_config_id {
                return true;
            }
            cursor = record.parent_request_id;
        }
        false
    }

    /// 一个节点报告了某请求的结果：释放节点、维护配置亲和性、从挂起队列里
    /// 给这个节点派发下一项工作，并决定这个结果的去向——提交完成、恢复某个
    /// 被阻塞的请求，还是作为一次直接的结果交付。
    pub fn report_result(
        &self,
        node_id: NodeId,
        request_id: RequestId,
        result: BuildResult,
    ) -> Result<Vec<SchedulerAction>, SchedulerError> {
        let mut state = self.state.lock();
        {
            let node = state.nodes.get_mut(&node_id).ok_or(SchedulerError::UnknownNode(node_id))?;
            node.busy_with = None;
        }
        state.owning_node.insert(result.config_id, node_id);

        let mut actions = self.drain_pending_onto_idle_nodes(&mut state);

        let is_root = state
            .submission_root
            .get(&result.submission_id)
            .is_some_and(|root| *root == request_id);

        if is_root {
            state.submission_root.remove(&result.submission_id);
            state.requests.remove(&request_id);
            actions.push(SchedulerAction::SubmissionComplete {
                submission_id: result.submission_id,
                result,
            });
        } else if let Some((waiting_node, resumed_request_id)) = state.waiting_for_result.remove(&request_id) {
            state.requests.remove(&request_id);
            actions.push(SchedulerAction::ResumeExecution {
                node_id: waiting_node,
                resumed_request_id,
                blocker_results: vec![result],
            });
        } else {
            actions.push(SchedulerAction::ReportResults { node_id, result });
        }

        Ok(actions)
    }

    /// 一批新节点完成创建，登记为空闲并立刻尝试消化挂起队列。
    pub fn report_nodes_created(&self, created: Vec<(NodeId, NodeKind)>) -> Vec<SchedulerAction> {
        let mut state = self.state.lock();
        for (node_id, kind) in created {
            state.nodes.insert(
                node_id,
                NodeRecord {
                    kind,
                    known_configs: HashSet::new(),
                    busy_with: None,
                },
            );
            state.nodes_requested_not_yet_created = state.nodes_requested_not_yet_created.saturating_sub(1);
        }
        self.drain_pending_onto_idle_nodes(&mut state)
    }

    /// 一个节点报告整个构建中止（连接失败/内部错误）；从调度器簿记中移除它。
    /// 受影响提交的失败结果由 `forge-manager` 合成，调度器只负责不再把新
    /// 工作派给一个已经死掉的节点。
    pub fn report_build_aborted(&self, node_id: NodeId) -> Vec<SchedulerAction> {
        let mut state = self.state.lock();
        state.nodes.remove(&node_id);
        state.owning_node.retain(|_, owner| *owner != node_id);
        Vec::new()
    }

    fn try_schedule_or_queue(&self, state: &mut State, request_id: RequestId) -> Vec<SchedulerAction> {
        if let Some(action) = self.assign_to_a_node(state, request_id) {
            return vec![action];
        }

        state.pending.push_back(PendingRequest { request_id });

        if state.nodes.len() + state.nodes_requested_not_yet_created < self.max_nodes {
            state.nodes_requested_not_yet_created += 1;
            vec![SchedulerAction::CreateNode {
                kind: NodeKind::OutOfProcessWorker,
                count: 1,
            }]
        } else {
            vec![SchedulerAction::NoAction]
        }
    }

    /// 尝试把挂起队列里的请求一一派给现在空闲的节点，直到队列耗尽或没有
    /// 空闲节点为止。
    fn drain_pending_onto_idle_nodes(&self, state: &mut State) -> Vec<SchedulerAction> {
        let mut actions = Vec::new();
        loop {
            let Some(request_id) = state.pending.front().copied().map(|p| p.request_id) else {
                break;
            };
            match self.assign_to_a_node(state, request_id) {
                Some(action) => {
                    state.pending.pop_front();
                    actions.push(action);
                }
                None => break,
            }
        }
        actions
    }

    /// 按配置亲和性优先、否则任意空闲节点的策略挑一个节点并实际分配。
    fn assign_to_a_node(&self, state: &mut State, request_id: RequestId) -> Option<SchedulerAction> {
        let (config_id, submission_id, parent_request_id, targets, flags) = {
            let record = state.requests.get(&request_id)?;
            (
                record.config_id,
                record.submission_id,
                record.parent_request_id,
                record.targets.clone(),
                record.flags,
            )
        };

        let preferred = state.owning_node.get(&config_id).copied();
        let chosen = preferred
            .filter(|n| state.nodes.get(n).is_some_and(|r| r.busy_with.is_none()))
            .or_else(|| {
                state
                    .nodes
                    .iter()
                    .find(|(_, record)| record.busy_with.is_none())
                    .map(|(id, _)| *id)
            })?;

        let node = state.nodes.get_mut(&chosen).expect("chosen node looked up above");
        node.busy_with = Some(request_id);
        let needs_configuration = !node.known_configs.contains(&config_id);
        if needs_configuration {
            node.known_configs.insert(config_id);
        }

        if let Some(record) = state.requests.get_mut(&request_id) {
            record.node_id = Some(chosen);
        }

        let request = BuildRequest {
            submission_id,
            request_id,
            config_id,
            parent_request_id,
            targets,
            flags,
        };

        Some(if needs_configuration {
            SchedulerAction::ScheduleWithConfiguration {
                node_id: chosen,
                config_id,
                request,
            }
        } else {
            SchedulerAction::Schedule {
                node_id: chosen,
                request,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::{ConfigId, SubmissionId, TargetOutcome, TargetStatus};

    fn result_for(submission_id: SubmissionId, config_id: ConfigId) -> BuildResult {
        BuildResult {
            submission_id,
            config_id,
            outcomes: vec![TargetOutcome {
                target: "Build".into(),
                status: TargetStatus::Success,
            }],
            default_targets: vec!["Build".into()],
            initial_targets: vec!["Build".into()],
            exception: None,
            aborted: false,
        }
    }

    #[test]
    fn submit_with_no_nodes_requests_a_new_one_and_queues() {
        let sched = Scheduler::new(4);
        let actions = sched.submit(
            SubmissionId::from_raw(0),
            ConfigId::from_raw(1),
            vec!["Build".into()],
            RequestFlags::default(),
        );
        assert_eq!(
            actions,
            vec![SchedulerAction::CreateNode {
                kind: NodeKind::OutOfProcessWorker,
                count: 1
            }]
        );
    }

    #[test]
    fn once_a_node_exists_the_queued_request_is_scheduled_with_its_configuration() {
        let sched = Scheduler::new(4);
        sched.submit(
            SubmissionId::from_raw(0),
            ConfigId::from_raw(1),
            vec!["Build".into()],
            RequestFlags::default(),
        );
        let actions = sched.report_nodes_created(vec![(NodeId::from_raw(1), NodeKind::OutOfProcessWorker)]);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], SchedulerAction::ScheduleWithConfiguration { .. }));
    }

    #[test]
    fn a_second_request_for_a_known_configuration_does_not_repush_it() {
        let sched = Scheduler::new(4);
        sched.report_nodes_created(vec![(NodeId::from_raw(1), NodeKind::OutOfProcessWorker)]);
        let config = ConfigId::from_raw(7);

        let first = sched.submit(SubmissionId::from_raw(0), config, vec!["Build".into()], RequestFlags::default());
        assert!(matches!(first[0], SchedulerAction::ScheduleWithConfiguration { .. }));
        sched
            .report_result(NodeId::from_raw(1), request_id_of(&first[0]), result_for(SubmissionId::from_raw(0), config))
            .unwrap();

        let second = sched.submit(SubmissionId::from_raw(1), config, vec!["Build".into()], RequestFlags::default());
        assert!(matches!(second[0], SchedulerAction::Schedule { .. }));
    }

    #[test]
    fn configuration_affinity_prefers_the_node_that_already_owns_it() {
        let sched = Scheduler::new(4);
        sched.report_nodes_created(vec![
            (NodeId::from_raw(1), NodeKind::OutOfProcessWorker),
            (NodeId::from_raw(2), NodeKind::OutOfProcessWorker),
        ]);
        let config = ConfigId::from_raw(9);

        let first = sched.submit(SubmissionId::from_raw(0), config, vec!["Build".into()], RequestFlags::default());
        let first_node = node_id_of(&first[0]);
        sched
            .report_result(first_node, request_id_of(&first[0]), result_for(SubmissionId::from_raw(0), config))
            .unwrap();

        let second = sched.submit(SubmissionId::from_raw(1), config, vec!["Build".into()], RequestFlags::default());
        assert_eq!(node_id_of(&second[0]), first_node);
    }

    #[test]
    fn a_request_that_would_close_a_cycle_is_rejected_not_scheduled() {
        let sched = Scheduler::new(4);
        sched.report_nodes_created(vec![(NodeId::from_raw(1), NodeKind::OutOfProcessWorker)]);
        let config_a = ConfigId::from_raw(1);
        let config_b = ConfigId::from_raw(2);

        let root = sched.submit(SubmissionId::from_raw(0), config_a, vec!["Build".into()], RequestFlags::default());
        let root_request = request_id_of(&root[0]);

        let blocked = sched
            .report_blocked(NodeId::from_raw(1), root_request, config_b, vec!["Build".into()], RequestFlags::default())
            .unwrap();
        assert!(matches!(blocked[0], SchedulerAction::Schedule { .. } | SchedulerAction::ScheduleWithConfiguration { .. }));
        let child_request = request_id_of(&blocked[0]);

        let cyclic = sched
            .report_blocked(NodeId::from_raw(1), child_request, config_a, vec!["Build".into()], RequestFlags::default())
            .unwrap();
        assert!(matches!(cyclic[0], SchedulerAction::CircularDependency { .. }));
    }

    #[test]
    fn resolving_a_blocker_resumes_the_original_request() {
        let sched = Scheduler::new(4);
        sched.report_nodes_created(vec![
            (NodeId::from_raw(1), NodeKind::OutOfProcessWorker),
            (NodeId::from_raw(2), NodeKind::OutOfProcessWorker),
        ]);
        let config_a = ConfigId::from_raw(1);
        let config_b = ConfigId::from_raw(2);

        let root = sched.submit(SubmissionId::from_raw(0), config_a, vec!["Build".into()], RequestFlags::default());
        let root_request = request_id_of(&root[0]);
        let root_node = node_id_of(&root[0]);

        let blocked = sched
            .report_blocked(root_node, root_request, config_b, vec!["Build".into()], RequestFlags::default())
            .unwrap();
        let child_request = request_id_of(&blocked[0]);
        let child_node = node_id_of(&blocked[0]);

        let resumed = sched
            .report_result(child_node, child_request, result_for(SubmissionId::from_raw(0), config_b))
            .unwrap();
        assert!(resumed.iter().any(|a| matches!(
            a,
            SchedulerAction::ResumeExecution { node_id, resumed_request_id, .. }
                if *node_id == root_node && *resumed_request_id == root_request
        )));
    }

    #[test]
    fn reset_clears_affinity_and_node_bookkeeping() {
        let sched = Scheduler::new(4);
        sched.report_nodes_created(vec![(NodeId::from_raw(1), NodeKind::OutOfProcessWorker)]);
        sched.submit(SubmissionId::from_raw(0), ConfigId::from_raw(1), vec!["Build".into()], RequestFlags::default());
        sched.reset();

        let actions = sched.submit(SubmissionId::from_raw(1), ConfigId::from_raw(1), vec!["Build".into()], RequestFlags::default());
        assert_eq!(
            actions,
            vec![SchedulerAction::CreateNode {
                kind: NodeKind::OutOfProcessWorker,
                count: 1
            }]
        );
    }

    fn request_id_of(action: &SchedulerAction) -> RequestId {
        match action {
            SchedulerAction::Schedule { request, .. } => request.request_id,
            SchedulerAction::ScheduleWithConfiguration { request, .. } => request.request_id,
            other => panic!("expected a schedule action, got {other:?}"),
        }
    }

    fn node_id_of(action: &SchedulerAction) -> NodeId {
        match action {
            SchedulerAction::Schedule { node_id, .. } => *node_id,
            SchedulerAction::ScheduleWithConfiguration { node_id, .. } => *node_id,
            other => panic!("expected a schedule action, got {other:?}"),
        }
    }
}
