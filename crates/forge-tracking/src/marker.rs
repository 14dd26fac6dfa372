//! Rooting marker 规范化（§4.7.a）：绝对化、百分号解码、大写折叠、`.tlog`
//! 尾部的进程/线程号替换为 `[ID]`，多根按字典序以 `|` 拼接。
//!
//! # 设计取舍（Trade-offs）
//! 这台构建引擎把追踪日志当作「本地缓存」（§1 Non-goals：不承诺跨主机可
//! 移植），但日志里记录的路径历史上来自 Windows 工具链，经常混用 `\` 与
//! `/`、盘符与 UNC 前缀。为了忠实复现 §8 给出的规范化样例（`\\share\foo...`
//! 这类路径），本模块按字符串操作路径分量，不借道 `std::path::Path`——
//! 后者在 Unix 宿主上无法理解 `C:\` 或 UNC 语义。

use percent_encoding::percent_decode_str;

use crate::error::TrackingError;

/// 两个反斜杠——没有主机名、没有共享名的裸 UNC 前缀——不是一个合法根（§4.7.a）。
const BARE_UNC: &str = "\\\\";

/// Windows 文件名里被保留的字符；不含路径分隔符 `\`/`/` 和盘符冒号，
/// 这两者在本子系统处理的每条路径里都是结构性的，不能一概而论地当成
/// 非法字符。
const RESERVED_FILENAME_CHARACTERS: [char; 6] = ['<', '>', '"', '|', '?', '*'];

/// 一条路径一旦带有 Windows 禁止出现在文件名里的字符，就是 §4.7 所说的
/// 「log set 中的非法文件名」。
pub fn has_reserved_characters(path: &str) -> bool {
    path.chars().any(|c| RESERVED_FILENAME_CHARACTERS.contains(&c) || c.is_control())
}

fn is_path_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

fn is_absolute(path: &str) -> bool {
    path.starts_with(is_path_separator) || (path.len() >= 2 && path.as_bytes()[1] == b':')
}

fn make_absolute(path: &str, cwd: &str) -> String {
    if is_absolute(path) {
        path.to_string()
    } else {
        let trimmed = cwd.trim_end_matches(is_path_separator);
        format!("{trimmed}/{path}")
    }
}

/// 路径字符串的最后一个分量（文件名），不含前导分隔符。
fn filename_component(path: &str) -> &str {
    path.rsplit(is_path_separator).next().unwrap_or(path)
}

/// 文件名之前的目录部分，含末尾分隔符（如果有）。
fn directory_component(path: &str) -> &str {
    let filename = filename_component(path);
    &path[..path.len() - filename.len()]
}

/// 一个以 `.` 分隔的文件名片段是否匹配 `<digits>` 或 `<digits>-<tool>`，
/// 如果匹配则返回替换后的 `[ID]`/`[ID]-<tool>` 片段。
fn id_segment_replacement(segment: &str) -> Option<String> {
    let (digits, tool) = match segment.find('-') {
        Some(idx) => (&segment[..idx], Some(&segment[idx + 1..])),
        None => (segment, None),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match tool {
        None => Some("[ID]".to_string()),
        Some(tool) if !tool.is_empty() && tool.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') => {
            Some(format!("[ID]-{tool}"))
        }
        Some(_) => None,
    }
}

/// 仅当文件名以 `.tlog`（大小写不敏感）收尾时，把其中匹配 pid/tid 模式的
/// 片段替换为 `[ID]`；其余片段原样保留（§4.7.a 的「非紧邻 .tlog 尾部的
/// 目录名不受影响」体现在这里只处理文件名分量，不触碰 `directory_component`）。
fn substitute_tlog_id(filename: &str) -> String {
    if !filename.to_ascii_lowercase().ends_with(".tlog") {
        return filename.to_string();
    }
    let parts: Vec<&str> = filename.split('.').collect();
    if parts.len() < 2 {
        return filename.to_string();
    }
    let last = parts.len() - 1;
    let replaced: Vec<String> = parts
        .into_iter()
        .enumerate()
        .map(|(i, segment)| {
            if i == last {
                segment.to_string()
            } else {
                id_segment_replacement(segment).unwrap_or_else(|| segment.to_string())
            }
        })
        .collect();
    replaced.join(".")
}

/// 规范化单个来源路径：绝对化 → 百分号解码 → `.tlog` 尾部 id 替换 → 整体大写。
pub fn canonicalize_component(raw: &str, cwd: &str) -> Result<String, TrackingError> {
    let decoded = percent_decode_str(raw).decode_utf8_lossy().into_owned();
    if decoded == BARE_UNC {
        return Err(TrackingError::MalformedUnc);
    }

    let absolute = make_absolute(&decoded, cwd);
    let directory = directory_component(&absolute);
    let filename = filename_component(&absolute);
    let normalized_filename = substitute_tlog_id(filename);

    Ok(format!("{directory}{normalized_filename}").to_uppercase())
}

/// 多个来源按字典序拼接成一个稳定的复合根标识（§4.7.a：「按源排列顺序
/// 无关」——排序后再拼接保证了这一点）。
pub fn build_rooting_marker(sources: &[String], cwd: &str) -> Result<String, TrackingError> {
    let mut canonical: Vec<String> = sources
        .iter()
        .map(|s| canonicalize_component(s, cwd))
        .collect::<Result<_, _>>()?;
    canonical.sort();
    Ok(canonical.join("|"))
}

/// 把一个已经写在日志里的复合根字符串拆成各个规范化分量，重新排序拼接。
/// 这让「重新解析一份早先写出的日志」本身也是幂等的（§8 round-trip 不变式）。
pub fn renormalize_marker(marker: &str, cwd: &str) -> Result<String, TrackingError> {
    let parts: Vec<String> = marker.split('|').map(str::to_string).collect();
    build_rooting_marker(&parts, cwd)
}

/// 一个复合根标识拆解出的各个源分量（已规范化、已排序）。
pub fn marker_components(marker: &str) -> Vec<&str> {
    marker.split('|').collect()
}
