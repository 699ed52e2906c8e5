//! 运行期共享缓存
//!
//! 多个 worker 并发读写，只提供 get 和原子的"不存在才插入"。

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

pub struct ScopedCache<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> ScopedCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    /// 不存在才插入，返回缓存中最终的值（先到者胜出）
    pub fn put(&self, key: K, value: V) -> V {
        self.entries.write().entry(key).or_insert(value).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, V: Clone> Default for ScopedCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// 已见键集合（去重）
pub struct SeenSet<K> {
    keys: RwLock<HashSet<K>>,
}

impl<K: Eq + Hash> SeenSet<K> {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashSet::new()),
        }
    }

    /// 首次插入返回 true
    pub fn claim(&self, key: K) -> bool {
        self.keys.write().insert(key)
    }

}

impl<K: Eq + Hash> Default for SeenSet<K> {
    fn default() -> Self {
        Self::new()
    }
}
