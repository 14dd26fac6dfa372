//! `forge-core`：构建引擎各子系统共享的标识符、数据模型与错误契约。
//!
//! # 定位（Why）
//! - `forge-wire`、`forge-node`、`forge-scheduler`、`forge-tracking`、
//!   `forge-manager` 都需要引用同一套「提交 / 配置 / 请求 / 结果 / 节点 / 报文种类」
//!   词汇表；把它们集中在一个零依赖下游的 crate 里，避免任意两个子系统之间
//!   互相依赖造成的循环。
//! - 本 crate 不包含任何调度、I/O 或文件系统逻辑，只承载「大家都要用到的形状」。
//!
//! # 模块总览（What）
//! - [`ids`]：进程内单调递增、互不重用的标识符新类型。
//! - [`model`]：提交 / 配置 / 请求 / 结果 / 节点 / 报文种类的数据结构。
//!   §7 的错误分类没有在这里集中成一个顶层枚举——每个子系统已经用自己的
//!   `thiserror` 枚举承载各自的错误类别（`forge-wire::WireError` 覆盖
//!   Transport/Handshake/Protocol，`forge-tracking::TrackingError` 覆盖
//!   Tracking-log-corruption，`forge-manager::ManagerError` 覆盖生命周期
//!   与取消，`BuildResult::exception`/`aborted` 覆盖 Project-domain 与
//!   Cancellation 在结果里的落地），一个只复述这些分类却从不被构造的顶层
//!   枚举只会是死代码。
//! - [`env`]：识别的环境变量输入，封装为可在测试中显式构造的 `ForgeEnv`。

pub mod env;
pub mod ids;
pub mod model;

pub use ids::{ConfigId, NodeId, RequestId, SubmissionId};
pub use model::{
    BuildRequest, BuildResult, Configuration, ConfigurationKey, NodeKind, Packet, PacketKind,
    RequestFlags, Submission, SubmissionState, TargetOutcome,
};
