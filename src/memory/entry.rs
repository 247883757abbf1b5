//! 共享记忆条目与写入请求

use std::collections::BTreeSet;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// 共享记忆中的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// 由 (owner, key, value 哈希) 派生的记忆键
    pub memory_key: String,
    /// 调用方给出的逻辑键
    pub key: String,
    pub value: String,
    pub owner_agent: String,
    /// 为空表示对所有 Agent 可见
    pub shared_with: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub ttl_seconds: u64,
    pub is_high_value: bool,
    pub tags: BTreeSet<String>,
}

impl MemoryEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        // 超出 chrono 可表示范围的 TTL 视为永不过期
        i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .map_or(false, |ttl| now - self.created_at > ttl)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// requester == owner，或在共享名单中，或共享名单为空
    pub fn is_visible_to(&self, requester: &str) -> bool {
        self.owner_agent == requester
            || self.shared_with.is_empty()
            || self.shared_with.contains(requester)
    }

    /// 可被检索：未过期，或虽过期但是高价值条目
    pub fn is_searchable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_high_value || !self.is_expired_at(now)
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }
}

/// 一次写入请求（builder 风格）
#[derive(Debug, Clone)]
pub struct MemoryWrite {
    pub owner: String,
    pub key: String,
    pub value: String,
    pub share_with: BTreeSet<String>,
    /// None 时使用配置的默认 TTL（高价值条目用 high_value_ttl）
    pub ttl_seconds: Option<u64>,
    pub is_high_value: bool,
    pub tags: BTreeSet<String>,
}

impl MemoryWrite {
    pub fn new(owner: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            key: key.into(),
            value: value.into(),
            share_with: BTreeSet::new(),
            ttl_seconds: None,
            is_high_value: false,
            tags: BTreeSet::new(),
        }
    }

    pub fn share_with<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.share_with.extend(agents.into_iter().map(Into::into));
        self
    }

    pub fn ttl(mut self, seconds: u64) -> Self {
        self.ttl_seconds = Some(seconds);
        self
    }

    pub fn high_value(mut self) -> Self {
        self.is_high_value = true;
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(|t| t.into().to_lowercase()));
        self
    }
}
