//! 结果缓存：配置 id → 最近一次 [`BuildResult`]（§4.4）。

use dashmap::DashMap;
use forge_core::{BuildResult, ConfigId};

#[derive(Default)]
pub struct ResultsCache {
    entries: DashMap<ConfigId, BuildResult>,
}

impl ResultsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发布一个结果；一旦写入即按 §3「不可变」约定，调用方不应修改它，
    /// 只能整体替换为一次新的结果。
    pub fn add(&self, result: BuildResult) {
        self.entries.insert(result.config_id, result);
    }

    pub fn get(&self, config_id: ConfigId) -> Option<BuildResult> {
        self.entries.get(&config_id).map(|entry| entry.value().clone())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn clear_for(&self, config_id: ConfigId) {
        self.entries.remove(&config_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
