//! 日志文本解析（§4.7 Parsing）：`#` 开头是命令回显注释，`^` 开头开启一个
//! rooting marker 小节，随后非空行都是属于它的依赖路径，直到下一个标记或
//! 文件结束。任何位置的空行都使整份日志被丢弃（依赖表视为空）。

use std::collections::HashMap;

use crate::error::TrackingError;
use crate::marker::{build_rooting_marker, has_reserved_characters};

/// 解析成功后的产物：规范化根 → 按出现顺序去重的依赖路径列表。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedLog {
    pub roots: Vec<(String, Vec<String>)>,
}

impl ParsedLog {
    pub fn get(&self, root: &str) -> Option<&[String]> {
        self.roots
            .iter()
            .find(|(r, _)| r == root)
            .map(|(_, deps)| deps.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// 去掉单个、由文件末尾换行符产生的隐式空行，保留中间的真实空行（它们仍然
/// 是错误）。容忍 UTF-8 BOM。
fn strip_trailing_newline_artifact(text: &str) -> &str {
    let without_bom = text.strip_prefix('\u{FEFF}').unwrap_or(text);
    without_bom
        .strip_suffix("\r\n")
        .or_else(|| without_bom.strip_suffix('\n'))
        .unwrap_or(without_bom)
}

/// 解析一份持久化的读/写日志；任何一种损坏都会讨论式地丢弃整份日志并
/// 返回对应的 [`TrackingError`]，调用方应把结果视为「这份日志等同于空表」
/// （§7 Tracking-log corruption）。
pub fn parse_tracking_log(text: &str, cwd: &str) -> Result<ParsedLog, TrackingError> {
    let body = strip_trailing_newline_artifact(text);

    let mut roots: Vec<(String, Vec<String>)> = Vec::new();
    let mut index_of: HashMap<String, usize> = HashMap::new();
    let mut current: Option<(usize, String)> = None; // (start line, canonical root)

    for (zero_based, raw_line) in body.split('\n').enumerate() {
        let line_no = zero_based + 1;
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

        if line.starts_with('#') {
            continue;
        }

        if line.trim().is_empty() {
            return Err(TrackingError::BlankLine(line_no));
        }

        if let Some(marker_text) = line.strip_prefix('^') {
            if let Some((start_line, root)) = current.take() {
                let deps_len = index_of.get(&root).map(|&i| roots[i].1.len()).unwrap_or(0);
                if deps_len == 0 {
                    return Err(TrackingError::EmptyRoot(start_line));
                }
            }

            let components: Vec<String> = marker_text.split('|').map(str::to_string).collect();
            if let Some(bad) = components.iter().find(|c| has_reserved_characters(c)) {
                return Err(TrackingError::InvalidLogFileName(bad.clone()));
            }
            let canonical = build_rooting_marker(&components, cwd)?;
            if !index_of.contains_key(&canonical) {
                index_of.insert(canonical.clone(), roots.len());
                roots.push((canonical.clone(), Vec::new()));
            }
            current = Some((line_no, canonical));
            continue;
        }

        match &current {
            None => return Err(TrackingError::DependencyBeforeAnyRoot(line_no)),
            Some((_, root)) => {
                if has_reserved_characters(line) {
                    return Err(TrackingError::InvalidLogFileName(line.to_string()));
                }
                let idx = index_of[root];
                let dep = line.to_string();
                if !roots[idx].1.contains(&dep) {
                    roots[idx].1.push(dep);
                }
            }
        }
    }

    if let Some((start_line, root)) = current {
        let deps_len = index_of.get(&root).map(|&i| roots[i].1.len()).unwrap_or(0);
        if deps_len == 0 {
            return Err(TrackingError::EmptyRoot(start_line));
        }
    }

    Ok(ParsedLog { roots })
}
