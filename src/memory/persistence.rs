//! 高价值记忆持久化
//!
//! 将高价值条目写入 / 从 JSON 文件加载，用于跨进程保留（启动时加载，关闭时写回）。

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::memory::MemoryEntry;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct MemorySnapshot {
    version: u32,
    entries: Vec<MemoryEntry>,
}

/// 单文件 JSON 快照
#[derive(Debug, Clone)]
pub struct MemoryPersistence {
    path: PathBuf,
}

impl MemoryPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载快照；文件不存在时返回空 Vec
    pub fn load(&self) -> anyhow::Result<Vec<MemoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let snapshot: MemorySnapshot = serde_json::from_str(&data)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            anyhow::bail!(
                "unsupported memory snapshot version {} (expected {})",
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }
        Ok(snapshot.entries)
    }

    /// 只写高价值条目；父目录不存在时自动创建。先写临时文件再 rename
    pub fn save<'a>(&self, entries: impl IntoIterator<Item = &'a MemoryEntry>) -> anyhow::Result<usize> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entries: Vec<MemoryEntry> = entries
            .into_iter()
            .filter(|e| e.is_high_value)
            .cloned()
            .collect();
        let count = entries.len();
        let snapshot = MemorySnapshot {
            version: SNAPSHOT_VERSION,
            entries,
        };
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&snapshot)?)?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn entry(key: &str, high_value: bool) -> MemoryEntry {
        let now = Utc::now();
        MemoryEntry {
            memory_key: format!("mem_{key}"),
            key: key.into(),
            value: "v".into(),
            owner_agent: "carlos".into(),
            shared_with: BTreeSet::new(),
            created_at: now,
            last_accessed_at: now,
            access_count: 3,
            ttl_seconds: 60,
            is_high_value: high_value,
            tags: ["research".to_string()].into_iter().collect(),
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let p = MemoryPersistence::new(dir.path().join("none.json"));
        assert!(p.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_keeps_only_high_value() {
        let dir = tempfile::tempdir().unwrap();
        let p = MemoryPersistence::new(dir.path().join("nested/memory.json"));
        let entries = vec![entry("a", true), entry("b", false)];
        assert_eq!(p.save(&entries).unwrap(), 1);
        let loaded = p.load().unwrap();
        assert_eq!(loaded, vec![entries[0].clone()]);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        std::fs::write(&path, r#"{"version": 99, "entries": []}"#).unwrap();
        assert!(MemoryPersistence::new(&path).load().is_err());
    }
}
