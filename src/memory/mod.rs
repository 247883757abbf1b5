//! 记忆层：跨 Agent 共享记忆（标签 / TTL / 关键词索引 / 哈希缓存）与高价值条目持久化

pub mod entry;
pub mod persistence;
pub mod shared;
pub mod tokenizer;

pub use entry::{MemoryEntry, MemoryWrite};
pub use persistence::MemoryPersistence;
pub use shared::{MemoryStats, SearchHit, SharedMemoryStore, SIMILARITY_TAGS};
