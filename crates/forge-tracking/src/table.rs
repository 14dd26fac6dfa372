//! 依赖/输出表：`root -> 有序 (路径, 最后修改时间)` 映射，以及把已解析日志
//! 摊平成该形状所需的 shred/keep 复合根策略（§4.7 「依赖表」与「复合根模式」）。

use std::time::SystemTime;

use crate::error::TrackingError;
use crate::marker::marker_components;
use crate::parse::ParsedLog;

/// composite root 在被摊平进表里时采用的策略（§4.7 Composite-root mode）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeMode {
    /// 编译器一类工具的默认模式：复合根按源拆成单源键，每个源各自拥有
    /// 一份该复合根的依赖/输出副本。
    Shred,
    /// 链接器/归档器一类多对一工具的模式：复合根保留为单一键；对任一
    /// 成员的查询都返回整个复合根的依赖/输出。
    Keep,
}

/// 单条依赖或输出记录；`mtime` 为 `None` 表示该路径在磁盘上不存在
/// （§4.7 步骤 1：「缺失文件按最小时间记录」——在这里用 `None` 表达「缺失」，
/// 由调用方决定缺失时该替换成的哨兵时间）。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathEntry {
    pub path: String,
    pub mtime: Option<SystemTime>,
}

/// 为一条路径取最后修改时间；注入点让测试摆脱真实文件系统时钟
/// （§5「共享资源」：该缓存必须在任何日志文件 mtime 变化时失效——调用方
/// 负责这层失效策略，本 trait 只负责单次查询）。
pub trait TimeSource: Send + Sync {
    fn last_write_time(&self, path: &str) -> Option<SystemTime>;
}

/// 真实文件系统上的时间源；`USESYMLINKTIMESTAMP` 切换是否读取符号链接
/// 自身的 mtime 而不是目标文件的（§6）。
pub struct FsTimeSource {
    pub use_symlink_timestamp: bool,
}

impl TimeSource for FsTimeSource {
    fn last_write_time(&self, path: &str) -> Option<SystemTime> {
        let meta = if self.use_symlink_timestamp {
            std::fs::symlink_metadata(path)
        } else {
            std::fs::metadata(path)
        };
        meta.ok()?.modified().ok()
    }
}

/// 从 `root -> 依赖路径` 摊平得到的表；按 [`CompositeMode`] 决定复合根是
/// 拆散成单源键，还是整体保留为一个键。
#[derive(Clone, Debug, Default)]
pub struct RootTable {
    entries: Vec<(String, Vec<PathEntry>)>,
    mode: CompositeModeStorage,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum CompositeModeStorage {
    #[default]
    Shred,
    Keep,
}

impl RootTable {
    /// 把解析结果摊平成表，对每条路径立即通过 `time_source` 查时间戳。
    pub fn build(parsed: &ParsedLog, mode: CompositeMode, time_source: &dyn TimeSource) -> Self {
        let mut entries = Vec::new();
        for (root, deps) in &parsed.roots {
            let resolved: Vec<PathEntry> = deps
                .iter()
                .map(|path| PathEntry {
                    path: path.clone(),
                    mtime: time_source.last_write_time(path),
                })
                .collect();

            match mode {
                CompositeMode::Keep => entries.push((root.clone(), resolved)),
                CompositeMode::Shred => {
                    for component in marker_components(root) {
                        entries.push((component.to_string(), resolved.clone()));
                    }
                }
            }
        }
        Self {
            entries,
            mode: match mode {
                CompositeMode::Shred => CompositeModeStorage::Shred,
                CompositeMode::Keep => CompositeModeStorage::Keep,
            },
        }
    }

    pub fn mode(&self) -> CompositeMode {
        match self.mode {
            CompositeModeStorage::Shred => CompositeMode::Shred,
            CompositeModeStorage::Keep => CompositeMode::Keep,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 查找覆盖给定源的条目：shred 模式下按单源键直接命中；keep 模式下
    /// 还接受「该源是某复合根的成员之一」这一层命中（§4.7 writer-side 的
    /// `search_subroots` 同一逻辑的读路径版本）。
    pub fn entry_for(&self, source: &str) -> Option<(&str, &[PathEntry])> {
        self.entries
            .iter()
            .find(|(root, _)| match self.mode {
                CompositeModeStorage::Shred => root == source,
                CompositeModeStorage::Keep => root == source || marker_components(root).contains(&source),
            })
            .map(|(root, deps)| (root.as_str(), deps.as_slice()))
    }

    /// 原样返回这张表已知的所有根键，按解析/构建时的顺序。
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(root, _)| root.as_str())
    }

    pub fn entries(&self) -> &[(String, Vec<PathEntry>)] {
        &self.entries
    }

    /// 返回给定源集合对应的输出；若该集合恰好等于某个根的全部成员返回那
    /// 个根的条目；`search_subroots` 时额外返回「所有成员都被源集合包含」
    /// 的根（§4.7 writer-side `outputs_for_source`）。
    pub fn outputs_for_source(&self, sources: &[String], search_subroots: bool) -> Vec<PathEntry> {
        let mut out = Vec::new();
        let wanted: std::collections::HashSet<&str> = sources.iter().map(String::as_str).collect();
        for (root, deps) in &self.entries {
            let components: std::collections::HashSet<&str> = marker_components(root).into_iter().collect();
            let exact_match = components.len() == wanted.len() && components == wanted;
            let subset_match = search_subroots && components.iter().all(|c| wanted.contains(c));
            if exact_match || subset_match {
                out.extend(deps.iter().cloned());
            }
        }
        out
    }

    pub fn remove_entries_for(&mut self, source: &str) {
        self.entries.retain(|(root, _)| match self.mode {
            CompositeModeStorage::Shred => root != source,
            CompositeModeStorage::Keep => root != source && !marker_components(root).contains(&source),
        });
    }

    pub fn remove_dependency_from_entry(&mut self, source: &str, dependency: &str) {
        for (root, deps) in &mut self.entries {
            let matches = match self.mode {
                CompositeModeStorage::Shred => root.as_str() == source,
                CompositeModeStorage::Keep => root.as_str() == source || marker_components(root).contains(&source),
            };
            if matches {
                deps.retain(|entry| entry.path != dependency);
            }
        }
    }

    /// 删除任何「其全部输出都是给定源集合产出的输出子集」的根，防止陈旧
    /// 的输出归属继续留在表里（§4.7 `remove_roots_with_shared_outputs`）。
    pub fn remove_roots_with_shared_outputs(&mut self, produced_by: &[String], their_outputs: &RootTable) {
        let produced: std::collections::HashSet<String> = their_outputs
            .outputs_for_source(produced_by, true)
            .into_iter()
            .map(|e| e.path)
            .collect();
        self.entries.retain(|(_, deps)| {
            !(!deps.is_empty() && deps.iter().all(|d| produced.contains(&d.path)))
        });
    }

    /// 把表重新序列化成可写回磁盘的日志文本；`predicate` 过滤掉调用方
    /// 认为不该再持久化的依赖路径（compaction，§4.7 `save`）。
    pub fn serialize(&self, mut keep: impl FnMut(&str) -> bool) -> String {
        let mut out = String::new();
        for (root, deps) in &self.entries {
            let kept: Vec<&PathEntry> = deps.iter().filter(|d| keep(&d.path)).collect();
            if kept.is_empty() {
                continue;
            }
            out.push('^');
            out.push_str(root);
            out.push('\n');
            for entry in kept {
                out.push_str(&entry.path);
                out.push('\n');
            }
        }
        out
    }
}

/// 便于调用方在两个角色（读/写日志）上复用同一套解析+摊平管线。
pub fn parsed_into_table(
    text: &str,
    cwd: &str,
    mode: CompositeMode,
    time_source: &dyn TimeSource,
) -> Result<RootTable, TrackingError> {
    let parsed = crate::parse::parse_tracking_log(text, cwd)?;
    Ok(RootTable::build(&parsed, mode, time_source))
}
