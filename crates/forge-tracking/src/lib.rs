//! `forge-tracking`：持久化读/写追踪日志的解析、rooting marker 规范化、
//! 依赖表构建与增量重建判定（§4.7）。
//!
//! # 模块总览（What）
//! - [`marker`]：单条路径/复合根的规范化（绝对化、百分号解码、`.tlog`
//!   尾部 id 折叠、大小写折叠、多源排序拼接）。
//! - [`parse`]：把持久化日志文本解析成 [`parse::ParsedLog`]；任何损坏都
//!   讨论式地丢弃整份日志。
//! - [`table`]：把解析结果摊平成 `root -> (路径, mtime)` 的 [`table::RootTable`]，
//!   并提供 shred/keep 两种复合根策略。
//! - [`compute`]：给定主源集合与读/写两张表，判定哪些源需要重新编译。
//! - [`error`]：[`error::TrackingError`]，对应 §7 的追踪日志损坏类别。

//! - [`writer`]：把 [`table::RootTable`] 接到真实文件系统——加载持久化
//!   日志、压缩后写回（`save`）。

pub mod compute;
pub mod error;
pub mod marker;
pub mod parse;
pub mod table;
pub mod writer;

pub use compute::{compute_sources_needing_compilation, ComputeInputs};
pub use error::TrackingError;
pub use marker::{build_rooting_marker, canonicalize_component, marker_components, renormalize_marker};
pub use parse::{parse_tracking_log, ParsedLog};
pub use table::{CompositeMode, FsTimeSource, PathEntry, RootTable, TimeSource};
pub use writer::{save_compacted, TrackingLog};
