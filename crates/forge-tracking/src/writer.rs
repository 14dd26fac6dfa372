//! 把 [`RootTable`] 接到真实文件系统：从磁盘加载持久化日志、压缩后写回
//! （§4.7 Writer-side operations 与 `save`）。

use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::error::TrackingError;
use crate::parse::parse_tracking_log;
use crate::table::{CompositeMode, RootTable, TimeSource};

/// 一个任务实现（调用方）持有的一组读/写日志文件路径，与解析它们所需的
/// 工作目录、复合根策略绑定在一起。
pub struct TrackingLog {
    cwd: String,
    mode: CompositeMode,
    read_log_paths: Vec<String>,
    write_log_paths: Vec<String>,
    reads: RootTable,
    writes: RootTable,
}

impl TrackingLog {
    /// 按给定路径集合从磁盘加载并解析读/写日志；任何一份日志损坏都只记
    /// 一条警告，对应那一侧的表被当成空表（§7 类别 5）。不存在的文件与
    /// 空文件同等看待——等价于「从未被追踪过」。
    pub fn load(
        read_log_paths: &[String],
        write_log_paths: &[String],
        cwd: &str,
        mode: CompositeMode,
        time_source: &dyn TimeSource,
    ) -> Self {
        Self {
            cwd: cwd.to_string(),
            mode,
            read_log_paths: read_log_paths.to_vec(),
            write_log_paths: write_log_paths.to_vec(),
            reads: Self::load_table(read_log_paths, cwd, mode, time_source),
            writes: Self::load_table(write_log_paths, cwd, mode, time_source),
        }
    }

    fn load_table(paths: &[String], cwd: &str, mode: CompositeMode, time_source: &dyn TimeSource) -> RootTable {
        let mut combined = String::new();
        for path in paths {
            match std::fs::read_to_string(path) {
                Ok(contents) => {
                    combined.push_str(&contents);
                    if !combined.ends_with('\n') {
                        combined.push('\n');
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(path, error = %err, "failed to read tracking log, treating as empty");
                }
            }
        }

        if combined.trim().is_empty() {
            return RootTable::default();
        }

        match parse_tracking_log(&combined, cwd) {
            Ok(parsed) => RootTable::build(&parsed, mode, time_source),
            Err(err) => {
                tracing::warn!(error = %err, "tracking log corrupt, treating as empty table");
                RootTable::default()
            }
        }
    }

    pub fn reads(&self) -> &RootTable {
        &self.reads
    }

    pub fn writes(&self) -> &RootTable {
        &self.writes
    }

    pub fn reads_mut(&mut self) -> &mut RootTable {
        &mut self.reads
    }

    pub fn writes_mut(&mut self) -> &mut RootTable {
        &mut self.writes
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// 写回压缩后的读日志；`predicate` 决定哪些依赖路径值得保留。
    pub fn save_reads(&self, predicate: impl FnMut(&str) -> bool) -> Result<(), TrackingError> {
        save_compacted(&self.reads, &self.read_log_paths, predicate)
    }

    /// 写回压缩后的写日志。
    pub fn save_writes(&self, predicate: impl FnMut(&str) -> bool) -> Result<(), TrackingError> {
        save_compacted(&self.writes, &self.write_log_paths, predicate)
    }
}

/// 把一张表压缩写回磁盘：读取时命名过的每个日志文件在保存时都必须仍然
/// 存在（空文件可以接受；缺失会被解释成「从未被追踪」并触发一次全新
/// 构建），否则整次保存失败，调用方应保留内存态不变（§4.7 `save`）。
pub fn save_compacted(
    table: &RootTable,
    log_paths: &[String],
    mut predicate: impl FnMut(&str) -> bool,
) -> Result<(), TrackingError> {
    for path in log_paths {
        if !Path::new(path).exists() {
            return Err(TrackingError::Io {
                path: path.clone(),
                source: Arc::new(io::Error::new(
                    io::ErrorKind::NotFound,
                    "tracking log file named at read time no longer exists",
                )),
            });
        }
    }

    let text = table.serialize(&mut predicate);
    if let Some((first, rest)) = log_paths.split_first() {
        std::fs::write(first, text).map_err(|e| io_err(first, e))?;
        for extra in rest {
            std::fs::write(extra, "").map_err(|e| io_err(extra, e))?;
        }
    }
    Ok(())
}

fn io_err(path: &str, source: io::Error) -> TrackingError {
    TrackingError::Io {
        path: path.to_string(),
        source: Arc::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::SystemTime;

    struct FakeClock(HashMap<String, SystemTime>);

    impl TimeSource for FakeClock {
        fn last_write_time(&self, path: &str) -> Option<SystemTime> {
            self.0.get(path).copied()
        }
    }

    #[test]
    fn loading_a_missing_log_file_yields_an_empty_table() {
        let clock = FakeClock(HashMap::new());
        let log = TrackingLog::load(
            &["/nonexistent/read.tlog".to_string()],
            &["/nonexistent/write.tlog".to_string()],
            "/work",
            CompositeMode::Shred,
            &clock,
        );
        assert!(log.reads().is_empty());
        assert!(log.writes().is_empty());
    }

    #[test]
    fn loading_a_corrupt_log_warns_and_yields_an_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("read.tlog");
        std::fs::write(&path, "^/work/one.cpp\n\n/work/two.h\n").unwrap();
        let clock = FakeClock(HashMap::new());
        let log = TrackingLog::load(
            &[path.to_string_lossy().into_owned()],
            &[],
            "/work",
            CompositeMode::Shred,
            &clock,
        );
        assert!(log.reads().is_empty());
    }

    #[test]
    fn save_fails_if_a_read_time_log_file_was_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("read.tlog");
        std::fs::write(&path, "^/work/one.cpp\n/work/one.h\n").unwrap();
        let clock = FakeClock(HashMap::new());
        let log = TrackingLog::load(
            &[path.to_string_lossy().into_owned()],
            &[],
            "/work",
            CompositeMode::Shred,
            &clock,
        );
        std::fs::remove_file(&path).unwrap();
        let err = log.save_reads(|_| true).unwrap_err();
        assert!(matches!(err, TrackingError::Io { .. }));
    }

    #[test]
    fn save_round_trips_a_compacted_table_back_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("read.tlog");
        std::fs::write(&path, "^/work/one.cpp\n/work/one.h\n/work/two.h\n").unwrap();
        let clock = FakeClock(HashMap::new());
        let log = TrackingLog::load(
            &[path.to_string_lossy().into_owned()],
            &[],
            "/work",
            CompositeMode::Shred,
            &clock,
        );
        log.save_reads(|p| !p.ends_with("two.h")).unwrap();

        let reparsed = TrackingLog::load(
            &[path.to_string_lossy().into_owned()],
            &[],
            "/work",
            CompositeMode::Shred,
            &clock,
        );
        let (_, deps) = reparsed.reads().entry_for("/WORK/ONE.CPP").unwrap();
        assert_eq!(deps.len(), 1);
        assert!(deps[0].path.ends_with("one.h"));
    }
}
