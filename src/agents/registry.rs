//! Agent 注册表
//!
//! 所有 Agent 实现 Agent trait（name / execute / cost_units），由 AgentRegistry 按名注册与查找；
//! 调度器在调用时加超时、熔断与限流。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::AgentError;

/// 传给 Agent 的上下文（有序，便于拼接提示词）
pub type AgentContext = BTreeMap<String, String>;

/// Agent 能力：可能阻塞到超时，可能失败
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// 一句话职责描述
    fn description(&self) -> &str {
        ""
    }

    /// 单次执行的成本估算（cost unit）
    fn cost_units(&self) -> f64 {
        1.0
    }

    async fn execute(&self, input: &str, context: &AgentContext) -> Result<String, AgentError>;
}

/// Agent 注册表：按名称存储 Arc<dyn Agent>
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册；同名覆盖并返回旧实例
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Option<Arc<dyn Agent>> {
        let name = agent.name().to_string();
        let previous = self.agents.insert(name.clone(), agent);
        if previous.is_some() {
            tracing::warn!("Agent {} re-registered, previous instance replaced", name);
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// 已注册的 Agent 名（排序后返回）
    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
