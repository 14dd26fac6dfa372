//! 提交 / 配置 / 请求 / 结果 / 节点 / 报文种类——贯穿所有子系统的数据形状。
//!
//! 本模块只负责「形状」，不负责「怎么搬运」或「怎么调度」：线路编解码在
//! `forge-wire`，进程/连接生命周期在 `forge-node`，调度决策在
//! `forge-scheduler`，生命周期信号与缓存在 `forge-manager`。

use std::fmt;

use parking_lot::RwLock;

use crate::ids::{ConfigId, NodeId, RequestId, SubmissionId};

/// 项目路径 + 全局属性 + 工具版本三元组，唯一确定一个配置的结构化身份。
///
/// # 契约（What）
/// - `global_properties` 必须由调用方按键排序后传入（见 [`ConfigurationKey::new`]），
///   这样两个属性集合相同但插入顺序不同的请求仍然判等为同一配置，满足
///   §3「两个配置比较相等 ⇒ 同一 manager 内 id 相同」的不变式。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ConfigurationKey {
    pub project_path: String,
    pub tools_version: String,
    global_properties: Vec<(String, String)>,
}

impl ConfigurationKey {
    /// 构造一个规范化的配置键：内部按属性名排序，保证结构相等即语义相等。
    pub fn new(
        project_path: impl Into<String>,
        tools_version: impl Into<String>,
        mut global_properties: Vec<(String, String)>,
    ) -> Self {
        global_properties.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            project_path: project_path.into(),
            tools_version: tools_version.into(),
            global_properties,
        }
    }

    /// 只读访问已排序的全局属性列表。
    pub fn global_properties(&self) -> &[(String, String)] {
        &self.global_properties
    }
}

/// 一个被缓存的配置实例：结构化身份 + 进程内分配的 id + 调度器维护的可变状态。
///
/// `owning_node`、`default_targets`、`initial_targets` 在构造之后仍会被
/// 调度器/管理器更新，因此用内部可变性承载，而不要求调用方持有 `&mut`。
#[derive(Debug)]
pub struct Configuration {
    id: ConfigId,
    key: ConfigurationKey,
    explicitly_loaded: std::sync::atomic::AtomicBool,
    owning_node: RwLock<Option<NodeId>>,
    default_targets: RwLock<Option<Vec<String>>>,
    initial_targets: RwLock<Option<Vec<String>>>,
}

impl Configuration {
    /// 以给定 id 与结构化键创建配置。`explicitly_loaded` 对应宿主通过
    /// `add_new_configuration`/显式加载 API 请求保留的那部分配置。
    pub fn new(id: ConfigId, key: ConfigurationKey, explicitly_loaded: bool) -> Self {
        Self {
            id,
            key,
            explicitly_loaded: std::sync::atomic::AtomicBool::new(explicitly_loaded),
            owning_node: RwLock::new(None),
            default_targets: RwLock::new(None),
            initial_targets: RwLock::new(None),
        }
    }

    pub fn id(&self) -> ConfigId {
        self.id
    }

    pub fn key(&self) -> &ConfigurationKey {
        &self.key
    }

    pub fn is_explicitly_loaded(&self) -> bool {
        self.explicitly_loaded.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn set_explicitly_loaded(&self, value: bool) {
        self.explicitly_loaded.store(value, std::sync::atomic::Ordering::Release);
    }

    /// 配置当前的「家」节点；一旦某节点构建过该配置的结果，调度器应优先把
    /// 后续请求派发到同一节点（§4.5 配置亲和性）。
    pub fn owning_node(&self) -> Option<NodeId> {
        *self.owning_node.read()
    }

    pub fn set_owning_node(&self, node: NodeId) {
        *self.owning_node.write() = Some(node);
    }

    /// 返回默认目标列表，如果此前已经由某个 `Result` 回填过。
    pub fn default_targets(&self) -> Option<Vec<String>> {
        self.default_targets.read().clone()
    }

    /// 仅在管理器尚未知道默认/初始目标时回填，幂等、不覆盖已有值（§4.6）。
    pub fn fill_targets_if_absent(&self, default_targets: &[String], initial_targets: &[String]) {
        let mut default_slot = self.default_targets.write();
        if default_slot.is_none() {
            *default_slot = Some(default_targets.to_vec());
        }
        drop(default_slot);
        let mut initial_slot = self.initial_targets.write();
        if initial_slot.is_none() {
            *initial_slot = Some(initial_targets.to_vec());
        }
    }

    pub fn initial_targets(&self) -> Option<Vec<String>> {
        self.initial_targets.read().clone()
    }
}

/// 请求携带的标志位，语义随具体部署扩展；目前仅区分是否来自显式加载路径。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RequestFlags {
    pub is_explicitly_loaded: bool,
}

/// 一次被调度的构建请求：归属某个提交与某个配置，带目标列表与父请求链。
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BuildRequest {
    pub submission_id: SubmissionId,
    pub request_id: RequestId,
    pub config_id: ConfigId,
    pub parent_request_id: Option<RequestId>,
    pub targets: Vec<String>,
    pub flags: RequestFlags,
}

/// 单个目标的执行结果。
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TargetOutcome {
    pub target: String,
    pub status: TargetStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TargetStatus {
    Success,
    Failure,
    Skipped,
}

/// 一次请求的结果；一旦发布即不可变，按配置 id 存入结果缓存（§3）。
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BuildResult {
    pub submission_id: SubmissionId,
    pub config_id: ConfigId,
    pub outcomes: Vec<TargetOutcome>,
    pub default_targets: Vec<String>,
    pub initial_targets: Vec<String>,
    pub exception: Option<String>,
    pub aborted: bool,
}

impl BuildResult {
    /// 是否所有目标都成功，且没有携带异常/取消标记。
    pub fn is_success(&self) -> bool {
        !self.aborted
            && self.exception.is_none()
            && self
                .outcomes
                .iter()
                .all(|o| o.status != TargetStatus::Failure)
    }

    /// 构造一个取消结果，供 §4.6 取消路径合成。
    pub fn aborted(submission_id: SubmissionId, config_id: ConfigId) -> Self {
        Self {
            submission_id,
            config_id,
            outcomes: Vec::new(),
            default_targets: Vec::new(),
            initial_targets: Vec::new(),
            exception: None,
            aborted: true,
        }
    }
}

/// 提交的终态：提交只会经历一次「完成」跃迁（§3、§8）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionState {
    Pending,
    Completed,
}

/// 一次用户可见的「构建这个」调用；结果与完成信号由 `forge-manager` 中
/// 携带 `tokio::sync::Notify`/`oneshot` 的包装类型负责，本结构只承载数据。
#[derive(Clone, Debug)]
pub struct Submission {
    pub id: SubmissionId,
    pub config_key: ConfigurationKey,
    pub targets: Vec<String>,
    pub state: SubmissionState,
    pub result: Option<BuildResult>,
}

impl Submission {
    pub fn new(id: SubmissionId, config_key: ConfigurationKey, targets: Vec<String>) -> Self {
        Self {
            id,
            config_key,
            targets,
            state: SubmissionState::Pending,
            result: None,
        }
    }

    /// 提交唯一的终态跃迁；对已完成的提交再次调用是编程错误，返回 `false`。
    pub fn complete(&mut self, result: BuildResult) -> bool {
        if matches!(self.state, SubmissionState::Completed) {
            return false;
        }
        self.result = Some(result);
        self.state = SubmissionState::Completed;
        true
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, SubmissionState::Completed)
    }
}

/// 节点类型：in-process 虚拟节点、进程外 worker、task-host worker。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    InProcess,
    OutOfProcessWorker,
    TaskHostWorker,
}

/// §6 固定枚举的报文种类。前六种是 spec 原文列出的节点↔管理器报告/应答；
/// 后三种（`ScheduleRequest`/`PushConfiguration`/`ResumeExecution`）是管理器
/// 向节点下发工作所需、但 spec 原文未单独命名的种类——§6 明确允许「额外定义
/// 的种类」，只要求未知字节触发内部错误关闭，这里按该允许补齐了下行方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PacketKind {
    RequestBlocker,
    RequestConfig,
    RequestConfigResponse,
    Result,
    NodeShutdown,
    LogMessage,
    ScheduleRequest,
    PushConfiguration,
    ResumeExecution,
}

impl PacketKind {
    pub const ALL: [PacketKind; 9] = [
        PacketKind::RequestBlocker,
        PacketKind::RequestConfig,
        PacketKind::RequestConfigResponse,
        PacketKind::Result,
        PacketKind::NodeShutdown,
        PacketKind::LogMessage,
        PacketKind::ScheduleRequest,
        PacketKind::PushConfiguration,
        PacketKind::ResumeExecution,
    ];

    /// 线路上的一字节标签。
    pub const fn as_byte(self) -> u8 {
        match self {
            PacketKind::RequestBlocker => 1,
            PacketKind::RequestConfig => 2,
            PacketKind::RequestConfigResponse => 3,
            PacketKind::Result => 4,
            PacketKind::NodeShutdown => 5,
            PacketKind::LogMessage => 6,
            PacketKind::ScheduleRequest => 7,
            PacketKind::PushConfiguration => 8,
            PacketKind::ResumeExecution => 9,
        }
    }

    /// 从线路字节解析；未知字节按 §6「每端必须以内部错误关闭连接」处理，
    /// 这里返回 `None`，由调用方（`forge-wire`）转换为协议错误。
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(PacketKind::RequestBlocker),
            2 => Some(PacketKind::RequestConfig),
            3 => Some(PacketKind::RequestConfigResponse),
            4 => Some(PacketKind::Result),
            5 => Some(PacketKind::NodeShutdown),
            6 => Some(PacketKind::LogMessage),
            7 => Some(PacketKind::ScheduleRequest),
            8 => Some(PacketKind::PushConfiguration),
            9 => Some(PacketKind::ResumeExecution),
            _ => None,
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketKind::RequestBlocker => "RequestBlocker",
            PacketKind::RequestConfig => "RequestConfig",
            PacketKind::RequestConfigResponse => "RequestConfigResponse",
            PacketKind::Result => "Result",
            PacketKind::NodeShutdown => "NodeShutdown",
            PacketKind::LogMessage => "LogMessage",
            PacketKind::ScheduleRequest => "ScheduleRequest",
            PacketKind::PushConfiguration => "PushConfiguration",
            PacketKind::ResumeExecution => "ResumeExecution",
        };
        f.write_str(name)
    }
}

/// 一帧已解析的线路报文：种类 + 原始载荷字节。载荷的结构化编解码（把
/// `BuildRequest`/`BuildResult` 等类型变成/解析自这些字节）在 `forge-wire`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub payload: bytes::Bytes,
}

impl Packet {
    pub fn new(kind: PacketKind, payload: impl Into<bytes::Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}
