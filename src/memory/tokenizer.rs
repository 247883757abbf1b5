//! 分词与内容哈希
//!
//! 关键词：按非字母数字切分、小写、过滤停用词与短词（< 4 字符）。
//! 分类器抽取关键词与共享记忆的关键词索引共用同一套规则，保证检索口径一致。

use std::collections::HashSet;

use sha2::{Digest, Sha256};

/// 关键词最小长度（按字符计）
pub const MIN_KEYWORD_CHARS: usize = 4;

/// 葡语 + 英语常见停用词（仅列出 ≥ 4 字符的，短词已被长度过滤）
const STOPWORDS: &[&str] = &[
    "para", "como", "mais", "isso", "isto", "esse", "essa", "este", "esta", "pelo", "pela",
    "pelos", "pelas", "sobre", "quando", "onde", "qual", "quais", "porque", "então", "entao",
    "também", "tambem", "muito", "muita", "muitos", "muitas", "seus", "suas", "meus", "minhas",
    "você", "voce", "vocês", "voces", "nossa", "nosso", "fazer", "pode", "podem", "seria",
    "será", "sera", "está", "esta", "estão", "estao", "foram", "tenho", "temos", "entre",
    "depois", "antes", "ainda", "apenas", "cada", "todo", "toda", "todos", "todas", "aqui",
    "algo", "alguma", "algum", "mesmo", "mesma", "outro", "outra", "outros", "outras", "quem",
    "the", "that", "this", "with", "from", "what", "have", "will", "would", "about", "there",
    "their", "which", "your", "into", "they", "them", "been", "were", "when", "where", "could",
    "should", "some", "than", "then", "also", "just", "like", "please",
];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// 切词：小写、按非字母数字字符分割（保留重音字母）
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// 抽取最多 limit 个关键词，按首次出现顺序去重
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .filter(|w| w.chars().count() >= MIN_KEYWORD_CHARS && !is_stopword(w))
        .filter(|w| seen.insert(w.clone()))
        .take(limit)
        .collect()
}

/// 全部关键词集合（用于索引与重叠度计算）
pub fn keyword_set(text: &str) -> HashSet<String> {
    extract_keywords(text, usize::MAX).into_iter().collect()
}

/// query 关键词在 doc 关键词中出现的比例（query 为空时为 0）
pub fn overlap_ratio(query: &HashSet<String>, doc: &HashSet<String>) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    query.intersection(doc).count() as f32 / query.len() as f32
}

/// 归一化：小写 + 折叠空白
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 归一化文本的 SHA-256（hex），用于 O(1) 精确命中缓存
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(normalize(text).as_bytes()))
}

/// 由 (owner, key, value 哈希) 确定性派生记忆键：同内容重复写入得到同一个键
pub fn memory_key(owner: &str, key: &str, value: &str) -> String {
    let value_hash = Sha256::digest(value.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(owner.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    hasher.update([0u8]);
    hasher.update(value_hash);
    let digest = hex::encode(hasher.finalize());
    format!("mem_{}", &digest[..16])
}

/// 粗略 token 估算：约 4 字符 1 token
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4).max(1)
}
