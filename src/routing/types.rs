//! 分类结果类型

use std::fmt;

use serde::{Deserialize, Serialize};

/// 复杂度等级，按严重程度有序（TRIVIAL 最低）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
    Critical,
}

impl Complexity {
    /// 升一级，CRITICAL 封顶
    pub fn escalate(self) -> Self {
        match self {
            Complexity::Trivial => Complexity::Simple,
            Complexity::Simple => Complexity::Moderate,
            Complexity::Moderate => Complexity::Complex,
            Complexity::Complex | Complexity::Critical => Complexity::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Trivial => "trivial",
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
            Complexity::Critical => "critical",
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务类型（决定激活计划）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    SystemCommand,
    Greeting,
    EmotionalSupport,
    FactualQuery,
    Research,
    ContentCreation,
    Strategy,
    DecisionMaking,
    Optimization,
    CreativeExploration,
}

impl TaskType {
    pub const ALL: [TaskType; 10] = [
        TaskType::SystemCommand,
        TaskType::Greeting,
        TaskType::EmotionalSupport,
        TaskType::FactualQuery,
        TaskType::Research,
        TaskType::ContentCreation,
        TaskType::Strategy,
        TaskType::DecisionMaking,
        TaskType::Optimization,
        TaskType::CreativeExploration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::SystemCommand => "system_command",
            TaskType::Greeting => "greeting",
            TaskType::EmotionalSupport => "emotional_support",
            TaskType::FactualQuery => "factual_query",
            TaskType::Research => "research",
            TaskType::ContentCreation => "content_creation",
            TaskType::Strategy => "strategy",
            TaskType::DecisionMaking => "decision_making",
            TaskType::Optimization => "optimization",
            TaskType::CreativeExploration => "creative_exploration",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单条消息的分类结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageAnalysis {
    pub complexity: Complexity,
    pub task_type: TaskType,
    /// 无需任何 Agent / LLM 调用，本地固定回复即可
    pub bypass: bool,
    pub confidence: f32,
    /// 最多 10 个非停用词关键词
    pub keywords: Vec<String>,
    /// 命中的情绪标记
    pub emotional_signals: Vec<String>,
    /// 命中的最高关键词层级（未命中为 None）
    pub matched_tier: Option<Complexity>,
    pub word_count: usize,
    /// 问句 / 编号 / 列表标记总数
    pub instruction_markers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalate_caps_at_critical() {
        assert_eq!(Complexity::Moderate.escalate(), Complexity::Complex);
        assert_eq!(Complexity::Critical.escalate(), Complexity::Critical);
        assert!(Complexity::Complex > Complexity::Moderate);
    }

    #[test]
    fn test_task_type_names_match_serde() {
        for task_type in TaskType::ALL {
            let json = serde_json::to_string(&task_type).unwrap();
            assert_eq!(json, format!("\"{}\"", task_type.as_str()));
        }
    }
}
