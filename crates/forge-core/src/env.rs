//! §6 识别的环境变量输入，封装为可显式构造的 [`ForgeEnv`]。
//!
//! # 设计意图（Why）
//! - 直接在各子系统里散落 `std::env::var` 调用会让测试难以确定性地覆盖
//!   超时、trace 目录等行为；把读取环境的动作收敛到一个地方，测试可以绕开
//!   进程级环境变量，直接构造带期望值的 `ForgeEnv`。

use std::path::PathBuf;
use std::time::Duration;

/// 连接超时默认值：900 秒（§5）。
pub const DEFAULT_NODE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(900);

/// 识别的环境变量名称（§6）。
pub mod names {
    pub const NODE_CONNECTION_TIMEOUT: &str = "NODECONNECTIONTIMEOUT";
    pub const DEBUG_COMM: &str = "DEBUGCOMM";
    pub const DEBUG_PATH: &str = "DEBUGPATH";
    pub const USE_SYMLINK_TIMESTAMP: &str = "USESYMLINKTIMESTAMP";
    pub const CLEAR_XML_CACHE_ON_BUILD_MANAGER: &str = "CLEARXMLCACHEONBUILDMANAGER";
}

/// 一次构建会话读取到的环境配置快照。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForgeEnv {
    node_connection_timeout: Duration,
    debug_comm: bool,
    debug_path: Option<PathBuf>,
    use_symlink_timestamp: bool,
    clear_xml_cache_on_build_manager: bool,
}

impl Default for ForgeEnv {
    fn default() -> Self {
        Self {
            node_connection_timeout: DEFAULT_NODE_CONNECTION_TIMEOUT,
            debug_comm: false,
            debug_path: None,
            use_symlink_timestamp: false,
            clear_xml_cache_on_build_manager: false,
        }
    }
}

impl ForgeEnv {
    /// 从进程环境读取一次快照；解析失败的条目回退到默认值而不是 panic。
    pub fn from_process_environment() -> Self {
        let mut env = Self::default();

        if let Ok(raw) = std::env::var(names::NODE_CONNECTION_TIMEOUT) {
            if let Ok(secs) = raw.trim().parse::<u64>() {
                env.node_connection_timeout = Duration::from_secs(secs);
            } else {
                tracing::warn!(raw, "ignoring unparseable NODECONNECTIONTIMEOUT");
            }
        }
        env.debug_comm = std::env::var(names::DEBUG_COMM).is_ok_and(|v| v == "1");
        env.debug_path = std::env::var(names::DEBUG_PATH).ok().map(PathBuf::from);
        env.use_symlink_timestamp = std::env::var(names::USE_SYMLINK_TIMESTAMP).is_ok_and(|v| v == "1");
        env.clear_xml_cache_on_build_manager =
            std::env::var(names::CLEAR_XML_CACHE_ON_BUILD_MANAGER).is_ok_and(|v| v == "1");
        env
    }

    /// 测试/宿主显式构造，绕开进程环境变量。
    pub fn with_node_connection_timeout(mut self, timeout: Duration) -> Self {
        self.node_connection_timeout = timeout;
        self
    }

    pub fn with_debug_comm(mut self, enabled: bool) -> Self {
        self.debug_comm = enabled;
        self
    }

    pub fn with_debug_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn with_use_symlink_timestamp(mut self, enabled: bool) -> Self {
        self.use_symlink_timestamp = enabled;
        self
    }

    pub fn with_clear_xml_cache_on_build_manager(mut self, enabled: bool) -> Self {
        self.clear_xml_cache_on_build_manager = enabled;
        self
    }

    pub fn node_connection_timeout(&self) -> Duration {
        self.node_connection_timeout
    }

    pub fn debug_comm(&self) -> bool {
        self.debug_comm
    }

    pub fn debug_path(&self) -> PathBuf {
        self.debug_path.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn use_symlink_timestamp(&self) -> bool {
        self.use_symlink_timestamp
    }

    pub fn clear_xml_cache_on_build_manager(&self) -> bool {
        self.clear_xml_cache_on_build_manager
    }
}
