//! 增量重建判定（§4.7 步骤 2）：给定主源集合、读日志摊平出的依赖表、写
//! 日志摊平出的输出表，判定哪些源需要重新编译。

use std::collections::HashMap;
use std::time::SystemTime;

use crate::table::RootTable;

/// 一次判定所需的全部输入；`per_source_outputs` 只在 `minimal_rebuild`
/// 打开、且命中复合输出组时才会被查阅（§4.7 步骤 3 的最小重建优化）。
pub struct ComputeInputs<'a> {
    pub primary_sources: &'a [String],
    pub reads: &'a RootTable,
    pub writes: &'a RootTable,
    pub excluded_directories: &'a [String],
    pub minimal_rebuild: bool,
    pub per_source_outputs: &'a HashMap<String, Vec<String>>,
}

/// 判定需要重新编译的源集合，保持 `primary_sources` 给定的顺序。
pub fn compute_sources_needing_compilation(inputs: &ComputeInputs<'_>) -> Vec<String> {
    inputs
        .primary_sources
        .iter()
        .filter(|source| is_source_out_of_date(source, inputs))
        .cloned()
        .collect()
}

fn is_source_out_of_date(source: &str, inputs: &ComputeInputs<'_>) -> bool {
    let Some((_, deps)) = inputs.reads.entry_for(source) else {
        return true;
    };

    let output_paths = outputs_for(source, inputs);
    if output_paths.is_empty() {
        return true;
    }

    let mut t_out: Option<SystemTime> = None;
    for output in &output_paths {
        match output.1 {
            None => return true,
            Some(mtime) => {
                t_out = Some(match t_out {
                    Some(current) if current <= mtime => current,
                    _ => mtime,
                });
            }
        }
    }
    let t_out = t_out.expect("non-empty output_paths with no missing entries yields a minimum");

    for dep in deps {
        if is_excluded(&dep.path, inputs.excluded_directories) {
            continue;
        }
        let dep_mtime = dep.mtime.unwrap_or(SystemTime::UNIX_EPOCH);
        if dep_mtime > t_out {
            return true;
        }
    }

    false
}

/// 给定源实际对应的输出列表：默认整组复合输出共享（Keep 语义下所有
/// 成员一起判定）；当最小重建优化打开且调用方提供了该源的专属输出子集
/// 时，只用那个子集判断——这样复合组里其它成员产物缺失不会牵连这个源。
fn outputs_for(source: &str, inputs: &ComputeInputs<'_>) -> Vec<(String, Option<SystemTime>)> {
    if inputs.minimal_rebuild {
        if let Some(specific) = inputs.per_source_outputs.get(source) {
            return specific
                .iter()
                .map(|path| {
                    let mtime = inputs
                        .writes
                        .entries()
                        .iter()
                        .flat_map(|(_, deps)| deps.iter())
                        .find(|entry| &entry.path == path)
                        .and_then(|entry| entry.mtime);
                    (path.clone(), mtime)
                })
                .collect();
        }
    }

    inputs
        .writes
        .entry_for(source)
        .map(|(_, deps)| deps.iter().map(|d| (d.path.clone(), d.mtime)).collect())
        .unwrap_or_default()
}

fn is_excluded(path: &str, excluded_directories: &[String]) -> bool {
    let upper = path.to_ascii_uppercase();
    excluded_directories
        .iter()
        .any(|dir| upper.starts_with(&dir.to_ascii_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_tracking_log;
    use crate::table::{CompositeMode, TimeSource};

    struct FakeClock(HashMap<String, SystemTime>);

    impl TimeSource for FakeClock {
        fn last_write_time(&self, path: &str) -> Option<SystemTime> {
            self.0.get(path).copied()
        }
    }

    fn epoch_plus(seconds: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(seconds)
    }

    fn build_table(log: &str, cwd: &str, mode: CompositeMode, clock: &FakeClock) -> RootTable {
        let parsed = parse_tracking_log(log, cwd).unwrap();
        RootTable::build(&parsed, mode, clock)
    }

    #[test]
    fn a_source_with_no_recorded_dependencies_is_out_of_date() {
        let clock = FakeClock(HashMap::new());
        let reads = RootTable::default();
        let writes = RootTable::default();
        let inputs = ComputeInputs {
            primary_sources: &["C:\\work\\one.cpp".to_string()],
            reads: &reads,
            writes: &writes,
            excluded_directories: &[],
            minimal_rebuild: false,
            per_source_outputs: &HashMap::new(),
        };
        assert_eq!(
            compute_sources_needing_compilation(&inputs),
            vec!["C:\\work\\one.cpp".to_string()]
        );
        let _ = clock;
    }

    #[test]
    fn a_source_with_no_outputs_at_all_is_out_of_date() {
        let clock = FakeClock(HashMap::from([("C:\\work\\one.h".to_string(), epoch_plus(1))]));
        let reads = build_table(
            "^C:\\work\\one.cpp\nC:\\work\\one.h\n",
            "C:\\work",
            CompositeMode::Shred,
            &clock,
        );
        let writes = RootTable::default();
        let inputs = ComputeInputs {
            primary_sources: &["C:\\work\\one.cpp".to_string()],
            reads: &reads,
            writes: &writes,
            excluded_directories: &[],
            minimal_rebuild: false,
            per_source_outputs: &HashMap::new(),
        };
        assert!(!compute_sources_needing_compilation(&inputs).is_empty());
    }

    #[test]
    fn a_missing_output_forces_out_of_date() {
        let clock = FakeClock(HashMap::from([("C:\\work\\one.h".to_string(), epoch_plus(1))]));
        let reads = build_table(
            "^C:\\work\\one.cpp\nC:\\work\\one.h\n",
            "C:\\work",
            CompositeMode::Shred,
            &clock,
        );
        let writes = build_table(
            "^C:\\work\\one.cpp\nC:\\work\\one.obj\n",
            "C:\\work",
            CompositeMode::Shred,
            &clock, // one.obj not in clock -> missing
        );
        let inputs = ComputeInputs {
            primary_sources: &["C:\\work\\one.cpp".to_string()],
            reads: &reads,
            writes: &writes,
            excluded_directories: &[],
            minimal_rebuild: false,
            per_source_outputs: &HashMap::new(),
        };
        assert!(!compute_sources_needing_compilation(&inputs).is_empty());
    }

    #[test]
    fn a_dependency_newer_than_the_output_forces_recompilation() {
        let clock = FakeClock(HashMap::from([
            ("C:\\work\\one.h".to_string(), epoch_plus(10)),
            ("C:\\work\\one.obj".to_string(), epoch_plus(5)),
        ]));
        let reads = build_table(
            "^C:\\work\\one.cpp\nC:\\work\\one.h\n",
            "C:\\work",
            CompositeMode::Shred,
            &clock,
        );
        let writes = build_table(
            "^C:\\work\\one.cpp\nC:\\work\\one.obj\n",
            "C:\\work",
            CompositeMode::Shred,
            &clock,
        );
        let inputs = ComputeInputs {
            primary_sources: &["C:\\work\\one.cpp".to_string()],
            reads: &reads,
            writes: &writes,
            excluded_directories: &[],
            minimal_rebuild: false,
            per_source_outputs: &HashMap::new(),
        };
        assert!(!compute_sources_needing_compilation(&inputs).is_empty());
    }

    #[test]
    fn an_up_to_date_source_is_not_reported() {
        let clock = FakeClock(HashMap::from([
            ("C:\\work\\one.h".to_string(), epoch_plus(1)),
            ("C:\\work\\one.obj".to_string(), epoch_plus(5)),
        ]));
        let reads = build_table(
            "^C:\\work\\one.cpp\nC:\\work\\one.h\n",
            "C:\\work",
            CompositeMode::Shred,
            &clock,
        );
        let writes = build_table(
            "^C:\\work\\one.cpp\nC:\\work\\one.obj\n",
            "C:\\work",
            CompositeMode::Shred,
            &clock,
        );
        let inputs = ComputeInputs {
            primary_sources: &["C:\\work\\one.cpp".to_string()],
            reads: &reads,
            writes: &writes,
            excluded_directories: &[],
            minimal_rebuild: false,
            per_source_outputs: &HashMap::new(),
        };
        assert!(compute_sources_needing_compilation(&inputs).is_empty());
    }

    #[test]
    fn a_dependency_in_an_excluded_directory_is_ignored() {
        let clock = FakeClock(HashMap::from([
            ("C:\\sdk\\windows.h".to_string(), epoch_plus(999)),
            ("C:\\work\\one.obj".to_string(), epoch_plus(5)),
        ]));
        let reads = build_table(
            "^C:\\work\\one.cpp\nC:\\sdk\\windows.h\n",
            "C:\\work",
            CompositeMode::Shred,
            &clock,
        );
        let writes = build_table(
            "^C:\\work\\one.cpp\nC:\\work\\one.obj\n",
            "C:\\work",
            CompositeMode::Shred,
            &clock,
        );
        let inputs = ComputeInputs {
            primary_sources: &["C:\\work\\one.cpp".to_string()],
            reads: &reads,
            writes: &writes,
            excluded_directories: &["C:\\sdk".to_string()],
            minimal_rebuild: false,
            per_source_outputs: &HashMap::new(),
        };
        assert!(compute_sources_needing_compilation(&inputs).is_empty());
    }

    #[test]
    fn without_minimal_rebuild_the_whole_composite_group_goes_stale_together() {
        let clock = FakeClock(HashMap::from([("C:\\work\\shared.h".to_string(), epoch_plus(1))]));
        let reads = build_table(
            "^C:\\work\\a.obj|C:\\work\\b.obj\nC:\\work\\shared.h\n",
            "C:\\work",
            CompositeMode::Keep,
            &clock,
        );
        // only a.obj's own output is missing from the clock; b.out is present.
        let writes_clock = FakeClock(HashMap::from([("C:\\work\\b.out".to_string(), epoch_plus(5))]));
        let writes = build_table(
            "^C:\\work\\a.obj|C:\\work\\b.obj\nC:\\work\\a.out\nC:\\work\\b.out\n",
            "C:\\work",
            CompositeMode::Keep,
            &writes_clock,
        );
        let inputs = ComputeInputs {
            primary_sources: &["C:\\work\\a.obj".to_string(), "C:\\work\\b.obj".to_string()],
            reads: &reads,
            writes: &writes,
            excluded_directories: &[],
            minimal_rebuild: false,
            per_source_outputs: &HashMap::new(),
        };
        let stale = compute_sources_needing_compilation(&inputs);
        assert_eq!(stale.len(), 2, "both members of the composite group should go stale: {stale:?}");
    }

    #[test]
    fn minimal_rebuild_only_reports_the_source_whose_own_output_is_missing() {
        let clock = FakeClock(HashMap::from([("C:\\work\\shared.h".to_string(), epoch_plus(1))]));
        let reads = build_table(
            "^C:\\work\\a.obj|C:\\work\\b.obj\nC:\\work\\shared.h\n",
            "C:\\work",
            CompositeMode::Keep,
            &clock,
        );
        let writes_clock = FakeClock(HashMap::from([("C:\\work\\b.out".to_string(), epoch_plus(5))]));
        let writes = build_table(
            "^C:\\work\\a.obj|C:\\work\\b.obj\nC:\\work\\a.out\nC:\\work\\b.out\n",
            "C:\\work",
            CompositeMode::Keep,
            &writes_clock,
        );
        let mut per_source_outputs = HashMap::new();
        per_source_outputs.insert("C:\\work\\a.obj".to_string(), vec!["C:\\work\\a.out".to_string()]);
        per_source_outputs.insert("C:\\work\\b.obj".to_string(), vec!["C:\\work\\b.out".to_string()]);
        let inputs = ComputeInputs {
            primary_sources: &["C:\\work\\a.obj".to_string(), "C:\\work\\b.obj".to_string()],
            reads: &reads,
            writes: &writes,
            excluded_directories: &[],
            minimal_rebuild: true,
            per_source_outputs: &per_source_outputs,
        };
        let stale = compute_sources_needing_compilation(&inputs);
        assert_eq!(stale, vec!["C:\\work\\a.obj".to_string()]);
    }
}
