//! 调度器的内部一致性错误——不是正常的调度决策，而是调用方违反了契约
//! （例如对一个从未分配过的请求报告结果）。§9「不应发生的内部错误」落地于此。

use forge_core::{NodeId, RequestId};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("result reported for unknown request {0}")]
    UnknownRequest(RequestId),

    #[error("event reported from unknown node {0}")]
    UnknownNode(NodeId),

    #[error("request {0} was reported blocked by a node that does not own it")]
    NotOwnedByReportingNode(RequestId),
}
