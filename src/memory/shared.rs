//! 跨 Agent 共享记忆
//!
//! 带标签与 TTL 的 KV 存储：owner 私有索引 + 标签索引 + 关键词索引，
//! 前置一层 LRU（内容哈希 → 记忆键）用于 check_similar 的 O(1) 命中。
//! 所有读写走同一把粗粒度锁；锁内不做任何 I/O。

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::Serialize;

use crate::config::MemorySection;
use crate::memory::persistence::MemoryPersistence;
use crate::memory::tokenizer::{content_hash, estimate_tokens, keyword_set, memory_key, overlap_ratio};
use crate::memory::{MemoryEntry, MemoryWrite};

/// check_similar 只在这些标签的条目中找相似结果
pub const SIMILARITY_TAGS: [&str; 3] = ["processed_task", "analysis", "research"];

/// 一条检索结果
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub memory_key: String,
    pub key: String,
    pub value: String,
    pub owner: String,
}

impl From<&MemoryEntry> for SearchHit {
    fn from(entry: &MemoryEntry) -> Self {
        Self {
            memory_key: entry.memory_key.clone(),
            key: entry.key.clone(),
            value: entry.value.clone(),
            owner: entry.owner_agent.clone(),
        }
    }
}

/// 只读计数器，供 /stats 与遥测展示
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_entries: usize,
    pub high_value_entries: usize,
    pub stores: u64,
    pub duplicate_stores: u64,
    pub searches: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// 走索引的检索次数（哈希缓存命中不计）
    pub index_scans: u64,
    pub reprocessing_avoided: u64,
    pub tokens_saved: u64,
    pub evictions: u64,
}

struct StoreInner {
    entries: HashMap<String, MemoryEntry>,
    /// owner → 逻辑键 → 记忆键
    owner_index: HashMap<String, HashMap<String, String>>,
    tag_index: HashMap<String, HashSet<String>>,
    keyword_index: HashMap<String, HashSet<String>>,
    /// 内容哈希 → 记忆键
    hash_cache: LruCache<String, String>,
    stats: MemoryStats,
    stores_since_cleanup: usize,
}

fn indexed_keywords(entry: &MemoryEntry) -> HashSet<String> {
    keyword_set(&format!("{} {}", entry.key, entry.value))
}

impl StoreInner {
    fn new(lru_capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            owner_index: HashMap::new(),
            tag_index: HashMap::new(),
            keyword_index: HashMap::new(),
            hash_cache: LruCache::new(NonZeroUsize::new(lru_capacity).unwrap_or(NonZeroUsize::MIN)),
            stats: MemoryStats::default(),
            stores_since_cleanup: 0,
        }
    }

    fn insert(&mut self, entry: MemoryEntry) {
        let mk = entry.memory_key.clone();
        self.owner_index
            .entry(entry.owner_agent.clone())
            .or_default()
            .insert(entry.key.clone(), mk.clone());
        for tag in &entry.tags {
            self.tag_index.entry(tag.clone()).or_default().insert(mk.clone());
        }
        for kw in indexed_keywords(&entry) {
            self.keyword_index.entry(kw).or_default().insert(mk.clone());
        }
        self.entries.insert(mk, entry);
    }

    fn remove(&mut self, mk: &str) -> Option<MemoryEntry> {
        let entry = self.entries.remove(mk)?;
        if let Some(keys) = self.owner_index.get_mut(&entry.owner_agent) {
            if keys.get(&entry.key).is_some_and(|k| k == mk) {
                keys.remove(&entry.key);
            }
            if keys.is_empty() {
                self.owner_index.remove(&entry.owner_agent);
            }
        }
        for tag in &entry.tags {
            unindex(&mut self.tag_index, tag, mk);
        }
        for kw in indexed_keywords(&entry) {
            unindex(&mut self.keyword_index, &kw, mk);
        }
        let stale: Vec<String> = self
            .hash_cache
            .iter()
            .filter(|(_, v)| v.as_str() == mk)
            .map(|(k, _)| k.clone())
            .collect();
        for hash in stale {
            self.hash_cache.pop(&hash);
        }
        Some(entry)
    }

    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.is_expired_at(now) && !e.is_high_value)
            .map(|e| e.memory_key.clone())
            .collect();
        for mk in &expired {
            self.remove(mk);
        }
        self.stats.evictions += expired.len() as u64;
        expired.len()
    }

    /// 过滤可见性与过期，按 (高价值, 访问次数, 新旧) 排序后截断，并更新访问信息
    fn rank_and_touch(
        &mut self,
        requester: &str,
        candidates: HashSet<String>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<SearchHit> {
        let mut ranked: Vec<&MemoryEntry> = candidates
            .iter()
            .filter_map(|mk| self.entries.get(mk))
            .filter(|e| e.is_visible_to(requester) && e.is_searchable_at(now))
            .collect();
        ranked.sort_by(|a, b| {
            b.is_high_value
                .cmp(&a.is_high_value)
                .then(b.access_count.cmp(&a.access_count))
                .then(b.created_at.cmp(&a.created_at))
                .then(a.memory_key.cmp(&b.memory_key))
        });
        ranked.truncate(limit);
        let keys: Vec<String> = ranked.iter().map(|e| e.memory_key.clone()).collect();

        let mut hits = Vec::with_capacity(keys.len());
        for mk in keys {
            if let Some(entry) = self.entries.get_mut(&mk) {
                entry.touch(now);
                hits.push(SearchHit::from(&*entry));
            }
        }
        if !hits.is_empty() {
            self.stats.reprocessing_avoided += 1;
            self.stats.tokens_saved += hits.iter().map(|h| estimate_tokens(&h.value)).sum::<u64>();
        }
        hits
    }
}

fn unindex(index: &mut HashMap<String, HashSet<String>>, term: &str, mk: &str) {
    if let Some(keys) = index.get_mut(term) {
        keys.remove(mk);
        if keys.is_empty() {
            index.remove(term);
        }
    }
}

/// 共享记忆存储（进程内单例，由 OrchestrationContext 持有）
pub struct SharedMemoryStore {
    config: MemorySection,
    persistence: Option<MemoryPersistence>,
    inner: Mutex<StoreInner>,
}

impl SharedMemoryStore {
    /// 纯内存存储，不读写快照
    pub fn new(config: MemorySection) -> Self {
        let inner = Mutex::new(StoreInner::new(config.lru_capacity));
        Self {
            config,
            persistence: None,
            inner,
        }
    }

    /// 若配置了 persistence_file，则加载其中的高价值条目
    pub fn open(config: MemorySection) -> anyhow::Result<Self> {
        let persistence = config.persistence_file.as_ref().map(MemoryPersistence::new);
        let mut store = Self::new(config);
        if let Some(p) = persistence {
            let entries = p.load()?;
            let loaded = entries.len();
            {
                let mut inner = store.lock();
                for entry in entries {
                    inner.insert(entry);
                }
            }
            tracing::info!("Loaded {} high-value memory entries from {}", loaded, p.path().display());
            store.persistence = Some(p);
        }
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 写入并返回记忆键。
    ///
    /// 相同 (owner, key, value) 重复写入返回同一个键，只合并 share_with 与 tags；
    /// 同一 (owner, key) 写入不同内容时替换旧条目。
    pub fn store(&self, write: MemoryWrite) -> String {
        let mk = memory_key(&write.owner, &write.key, &write.value);
        let now = Utc::now();
        let mut inner = self.lock();

        if inner.entries.contains_key(&mk) {
            let new_tags: Vec<String> = match inner.entries.get_mut(&mk) {
                Some(existing) => {
                    existing.shared_with.extend(write.share_with);
                    existing.is_high_value |= write.is_high_value;
                    let added: Vec<String> = write
                        .tags
                        .into_iter()
                        .filter(|t| existing.tags.insert(t.clone()))
                        .collect();
                    added
                }
                None => Vec::new(),
            };
            for tag in new_tags {
                inner.tag_index.entry(tag).or_default().insert(mk.clone());
            }
            inner.stats.duplicate_stores += 1;
            tracing::debug!("Memory {} already stored, merged sharing and tags", mk);
            return mk;
        }

        let previous = inner
            .owner_index
            .get(&write.owner)
            .and_then(|keys| keys.get(&write.key))
            .cloned();
        if let Some(old) = previous {
            inner.remove(&old);
            tracing::debug!("Memory {}/{} replaced ({} -> {})", write.owner, write.key, old, mk);
        }

        let ttl_seconds = write.ttl_seconds.unwrap_or(if write.is_high_value {
            self.config.high_value_ttl_secs
        } else {
            self.config.default_ttl_secs
        });
        inner.insert(MemoryEntry {
            memory_key: mk.clone(),
            key: write.key,
            value: write.value,
            owner_agent: write.owner,
            shared_with: write.share_with,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            ttl_seconds,
            is_high_value: write.is_high_value,
            tags: write.tags,
        });
        inner.stats.stores += 1;

        inner.stores_since_cleanup += 1;
        if self.config.cleanup_interval > 0 && inner.stores_since_cleanup >= self.config.cleanup_interval {
            inner.stores_since_cleanup = 0;
            let removed = inner.sweep(now);
            if removed > 0 {
                tracing::debug!("Memory cleanup removed {} expired entries", removed);
            }
        }
        mk
    }

    /// owner 读取自己写入的值（不检查共享名单）
    pub fn retrieve(&self, owner: &str, key: &str) -> Option<String> {
        let now = Utc::now();
        let mut inner = self.lock();
        let mk = inner.owner_index.get(owner)?.get(key)?.clone();
        let entry = inner.entries.get_mut(&mk)?;
        if !entry.is_searchable_at(now) {
            return None;
        }
        entry.touch(now);
        Some(entry.value.clone())
    }

    /// 标签命中 ∪ 关键词命中，按可见性与过期过滤后排序
    pub fn search(&self, requester: &str, query: &str, tags: &[&str]) -> Vec<SearchHit> {
        let now = Utc::now();
        let query_keywords = keyword_set(query);
        let mut inner = self.lock();
        inner.stats.searches += 1;
        inner.stats.index_scans += 1;

        let mut candidates: HashSet<String> = HashSet::new();
        for tag in tags {
            if let Some(keys) = inner.tag_index.get(&tag.to_lowercase()) {
                candidates.extend(keys.iter().cloned());
            }
        }
        for kw in &query_keywords {
            if let Some(keys) = inner.keyword_index.get(kw) {
                candidates.extend(keys.iter().cloned());
            }
        }
        inner.rank_and_touch(requester, candidates, self.config.max_search_results, now)
    }

    /// 先查内容哈希缓存；未命中时在已处理任务中找关键词足够重叠的条目，命中后写回缓存
    pub fn check_similar(&self, owner: &str, task_description: &str) -> Option<String> {
        let now = Utc::now();
        let hash = content_hash(task_description);
        let mut inner = self.lock();

        if let Some(mk) = inner.hash_cache.get(&hash).cloned() {
            let cached = inner
                .entries
                .get_mut(&mk)
                .filter(|e| e.is_visible_to(owner) && e.is_searchable_at(now))
                .map(|entry| {
                    entry.touch(now);
                    entry.value.clone()
                });
            match cached {
                Some(value) => {
                    inner.stats.cache_hits += 1;
                    inner.stats.reprocessing_avoided += 1;
                    inner.stats.tokens_saved += estimate_tokens(&value);
                    return Some(value);
                }
                None => {
                    inner.hash_cache.pop(&hash);
                }
            }
        }
        inner.stats.cache_misses += 1;
        inner.stats.searches += 1;
        inner.stats.index_scans += 1;

        let query_keywords = keyword_set(task_description);
        let min_overlap = self.config.similarity_min_overlap;
        let candidates: HashSet<String> = SIMILARITY_TAGS
            .iter()
            .filter_map(|tag| inner.tag_index.get(*tag))
            .flatten()
            .filter(|mk| {
                inner.entries.get(*mk).is_some_and(|e| {
                    overlap_ratio(&query_keywords, &keyword_set(&e.key)) >= min_overlap
                })
            })
            .cloned()
            .collect();

        let top = inner
            .rank_and_touch(owner, candidates, self.config.max_search_results, now)
            .into_iter()
            .next()?;
        inner.hash_cache.put(hash, top.memory_key.clone());
        tracing::debug!("Similar memory {} found for task", top.memory_key);
        Some(top.value)
    }

    /// 删除 owner 名下某个逻辑键的条目
    pub fn invalidate(&self, owner: &str, key: &str) -> bool {
        let mut inner = self.lock();
        let Some(mk) = inner.owner_index.get(owner).and_then(|keys| keys.get(key)).cloned() else {
            return false;
        };
        inner.remove(&mk).is_some()
    }

    /// 清理已过期的非高价值条目，返回删除数
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.lock();
        inner.stores_since_cleanup = 0;
        inner.sweep(Utc::now())
    }

    pub fn stats(&self) -> MemoryStats {
        let inner = self.lock();
        MemoryStats {
            total_entries: inner.entries.len(),
            high_value_entries: inner.entries.values().filter(|e| e.is_high_value).count(),
            ..inner.stats.clone()
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 写回快照；未配置持久化时返回 Ok(0)
    pub fn persist(&self) -> anyhow::Result<usize> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };
        let snapshot: Vec<MemoryEntry> = self
            .lock()
            .entries
            .values()
            .filter(|e| e.is_high_value)
            .cloned()
            .collect();
        let saved = persistence.save(&snapshot)?;
        tracing::info!("Persisted {} high-value memory entries to {}", saved, persistence.path().display());
        Ok(saved)
    }
}
