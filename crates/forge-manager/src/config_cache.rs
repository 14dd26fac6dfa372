//! 配置缓存：结构化身份 → 已分配 id 的 [`Configuration`]（§4.4）。

use std::sync::Arc;

use dashmap::DashMap;
use forge_core::ids::ConfigIdAllocator;
use forge_core::{ConfigId, Configuration, ConfigurationKey};

/// 默认阈值：配置缓存超过这么多条目就视为"过大"，`begin_build` 据此决定
/// 是整体重置还是只清理非显式加载的部分（§4.6 `begin_build`）。
pub const DEFAULT_SIZE_THRESHOLD: usize = 4096;

pub struct ConfigCache {
    entries: DashMap<ConfigurationKey, Arc<Configuration>>,
    by_id: DashMap<ConfigId, Arc<Configuration>>,
    allocator: ConfigIdAllocator,
    size_threshold: usize,
}

impl ConfigCache {
    pub fn new(size_threshold: usize) -> Self {
        Self {
            entries: DashMap::new(),
            by_id: DashMap::new(),
            allocator: ConfigIdAllocator::default(),
            size_threshold,
        }
    }

    /// 按结构化键查找已缓存的配置。
    pub fn get_matching(&self, key: &ConfigurationKey) -> Option<Arc<Configuration>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn get_by_id(&self, id: ConfigId) -> Option<Arc<Configuration>> {
        self.by_id.get(&id).map(|entry| entry.value().clone())
    }

    /// 解析一个配置：命中缓存则直接返回；否则分配新 id、构造并插入两张索引
    /// （按键、按 id），供调用方（节点的 `RequestConfig`）同时使用。
    pub fn resolve(&self, key: ConfigurationKey, explicitly_loaded: bool) -> Arc<Configuration> {
        if let Some(existing) = self.get_matching(&key) {
            if explicitly_loaded {
                existing.set_explicitly_loaded(true);
            }
            return existing;
        }

        let id = self.allocator.next();
        let config = Arc::new(Configuration::new(id, key.clone(), explicitly_loaded));
        self.entries.insert(key, config.clone());
        self.by_id.insert(id, config.clone());
        config
    }

    pub fn add(&self, config: Arc<Configuration>) {
        self.entries.insert(config.key().clone(), config.clone());
        self.by_id.insert(config.id(), config);
    }

    /// 清理所有未被标记为显式加载的配置，返回被清理的 id 列表（§4.4）。
    pub fn clear_non_explicit(&self) -> Vec<ConfigId> {
        let cleared: Vec<ConfigId> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_explicitly_loaded())
            .map(|entry| entry.value().id())
            .collect();
        for id in &cleared {
            self.by_id.remove(id);
        }
        self.entries.retain(|_, config| config.is_explicitly_loaded());
        cleared
    }

    /// 丢弃缓存中的一切，无论是否显式加载——`begin_build` 在决定"整体重置"
    /// 时调用。
    pub fn clear_all(&self) {
        self.entries.clear();
        self.by_id.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_size_above_threshold(&self) -> bool {
        self.entries.len() > self.size_threshold
    }
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self::new(DEFAULT_SIZE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> ConfigurationKey {
        ConfigurationKey::new(path, "17.0", vec![])
    }

    #[test]
    fn resolve_assigns_a_fresh_id_once_per_structural_key() {
        let cache = ConfigCache::default();
        let a = cache.resolve(key("a.proj"), false);
        let b = cache.resolve(key("a.proj"), false);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn clear_non_explicit_keeps_explicitly_loaded_configurations() {
        let cache = ConfigCache::default();
        let kept = cache.resolve(key("kept.proj"), true);
        let dropped = cache.resolve(key("dropped.proj"), false);

        let cleared = cache.clear_non_explicit();
        assert_eq!(cleared, vec![dropped.id()]);
        assert!(cache.get_by_id(kept.id()).is_some());
        assert!(cache.get_by_id(dropped.id()).is_none());
    }

    #[test]
    fn is_size_above_threshold_respects_the_configured_limit() {
        let cache = ConfigCache::new(1);
        cache.resolve(key("a.proj"), false);
        assert!(!cache.is_size_above_threshold());
        cache.resolve(key("b.proj"), false);
        assert!(cache.is_size_above_threshold());
    }
}
