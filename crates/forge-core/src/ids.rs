//! 进程内标识符：提交、配置、请求、节点各自拥有独立的单调计数器。
//!
//! § 3 的不变式要求「两个配置相等 <=> 同一 manager 内 id 相同」以及
//! 「节点 id 在进程范围内唯一」。newtype 包装 `u64`，生成器以
//! `AtomicU64` 实现，保证分配是原子且单调的。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! scoped_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// 直接从已知的数值构造一个 id，供反序列化/测试使用。
            pub const fn from_raw(value: u64) -> Self {
                Self(value)
            }

            /// 读取底层数值，用于落盘或线路编码。
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

scoped_id!(SubmissionId, "一次用户可见的“构建这个”调用的标识。");
scoped_id!(ConfigId, "项目路径 + 全局属性 + 工具版本三元组的标识。");
scoped_id!(RequestId, "提交范围内唯一的已调度请求标识。");
scoped_id!(NodeId, "进程范围内唯一的工作节点标识。");

/// 配置 id 分配器。
///
/// # 契约（What）
/// - `next()` 返回的值严格单调递增，在单个 manager 生命周期内不会重复；
/// - 调度器保留的最小可分配 id（见 `forge-scheduler`）由调用方在构造分配器时跳过，
///   本类型本身不关心这层政策，只负责「原子地给出下一个数」。
#[derive(Debug, Default)]
pub struct ConfigIdAllocator {
    next: AtomicU64,
}

impl ConfigIdAllocator {
    /// 从给定起始值开始分配，便于调用方为调度器保留的 id 区间让路。
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// 原子地取出下一个配置 id。
    pub fn next(&self) -> ConfigId {
        ConfigId::from_raw(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// 提交 id 分配器，行为与 [`ConfigIdAllocator`] 相同，独立计数空间。
#[derive(Debug, Default)]
pub struct SubmissionIdAllocator {
    next: AtomicU64,
}

impl SubmissionIdAllocator {
    pub fn next(&self) -> SubmissionId {
        SubmissionId::from_raw(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// 请求 id 分配器；每个提交内部的请求号也互不重复。
#[derive(Debug, Default)]
pub struct RequestIdAllocator {
    next: AtomicU64,
}

impl RequestIdAllocator {
    pub fn next(&self) -> RequestId {
        RequestId::from_raw(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// 节点 id 分配器。
#[derive(Debug, Default)]
pub struct NodeIdAllocator {
    next: AtomicU64,
}

impl NodeIdAllocator {
    pub fn next(&self) -> NodeId {
        NodeId::from_raw(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocators_are_monotonic_and_unique() {
        let alloc = ConfigIdAllocator::default();
        let a = alloc.next();
        let b = alloc.next();
        assert_ne!(a, b);
        assert!(a.as_u64() < b.as_u64());
    }

    #[test]
    fn starting_at_reserves_a_prefix() {
        let alloc = ConfigIdAllocator::starting_at(16);
        assert_eq!(alloc.next().as_u64(), 16);
        assert_eq!(alloc.next().as_u64(), 17);
    }
}
