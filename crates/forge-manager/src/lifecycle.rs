//! 构建管理器的生命周期状态机：`Idle -> Building -> WaitingForBuildToComplete
//! -> Idle`（§4.6）。

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Building,
    WaitingForBuildToComplete,
}

impl LifecycleState {
    pub fn name(self) -> &'static str {
        match self {
            LifecycleState::Idle => "Idle",
            LifecycleState::Building => "Building",
            LifecycleState::WaitingForBuildToComplete => "WaitingForBuildToComplete",
        }
    }

    /// 只有 `Idle` 可以跃迁到 `Building`（`begin_build`）。
    pub fn can_begin_build(self) -> bool {
        matches!(self, LifecycleState::Idle)
    }

    /// 只有 `Building` 才接受新的提交（`pend_submission`/`execute_submission`）。
    pub fn can_accept_submissions(self) -> bool {
        matches!(self, LifecycleState::Building)
    }

    /// `end_build`/`cancel_all` 在任何非 `Idle` 状态都可以发起排空。
    pub fn can_begin_drain(self) -> bool {
        !matches!(self, LifecycleState::Idle)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
