//! `forge-scheduler`：请求到节点的调度决策（§4.5）。
//!
//! # 定位（Why）
//! 调度器只做决策，不做 I/O：`Scheduler` 的每个方法把一个输入事件（阻塞
//! 报告、结果、节点创建、构建中止）转换成一串 [`SchedulerAction`]，由
//! `forge-manager` 的工作队列线程负责真正执行它们（发送报文、拉起新节点、
//! 唤醒提交的完成信号）。这样调度逻辑可以在没有网络、没有子进程的情况下
//! 被单元测试穷尽验证。
//!
//! # 模块总览（What）
//! - [`scheduler`]：`Scheduler`，配置亲和性、节点准入、循环依赖检测的核心状态机。
//! - [`action`]：`SchedulerAction`，§4.5 动作表的具体类型。
//! - [`error`]：`SchedulerError`，调用方违反契约时的内部一致性错误。

pub mod action;
pub mod error;
pub mod scheduler;

pub use action::SchedulerAction;
pub use error::SchedulerError;
pub use scheduler::Scheduler;
