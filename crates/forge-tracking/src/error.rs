//! §7「追踪日志损坏」错误类别：任何一种损坏都只产生警告，调用方据此把
//! 整份日志当作空表处理（§4.7 Parsing）。

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackingError {
    /// 输入恰好是裸的 `\\`，不是一个合法的根（§4.7.a）。
    #[error("malformed UNC path: a bare \"\\\\\\\\\" is not a valid rooting marker component")]
    MalformedUnc,

    /// 日志中出现了不允许出现空行的位置——一份日志里任何空行都会导致
    /// 整份日志被丢弃（§4.7 Parsing）。
    #[error("blank line at log line {0}")]
    BlankLine(usize),

    /// 一个 `^` 标记行后面没有跟任何路径就结束，或紧接着下一个标记。
    #[error("rooting marker at line {0} has no dependency paths")]
    EmptyRoot(usize),

    /// 一条依赖路径出现在任何 `^` 标记之前。
    #[error("dependency path at line {0} appears before any rooting marker")]
    DependencyBeforeAnyRoot(usize),

    /// 日志文件名本身包含保留字符，是非法文件名。
    #[error("log file name {0:?} contains reserved characters")]
    InvalidLogFileName(String),

    #[error("io error reading tracking log {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::sync::Arc<std::io::Error>,
    },
}

impl From<std::io::Error> for TrackingError {
    fn from(err: std::io::Error) -> Self {
        TrackingError::Io {
            path: String::new(),
            source: std::sync::Arc::new(err),
        }
    }
}
