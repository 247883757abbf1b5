//! 编排上下文：进程内唯一的 Agent 注册表、每个 Agent 的熔断器 / 限流器、共享记忆与配置
//!
//! 启动时构造一次，以 Arc 传给调度器与编排器；不使用全局单例。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::agents::{Agent, AgentRegistry};
use crate::config::AppConfig;
use crate::core::circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitSnapshot};
use crate::core::rate_limiter::{LimiterConfig, RateLimiter};
use crate::memory::SharedMemoryStore;

pub struct OrchestrationContext {
    config: AppConfig,
    registry: AgentRegistry,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    limiters: HashMap<String, Arc<RateLimiter>>,
    memory: SharedMemoryStore,
}

impl OrchestrationContext {
    pub fn new(config: AppConfig, memory: SharedMemoryStore) -> Self {
        Self {
            config,
            registry: AgentRegistry::new(),
            breakers: HashMap::new(),
            limiters: HashMap::new(),
            memory,
        }
    }

    /// 注册 Agent，并为其创建熔断器与限流器（重复注册时保留已有状态）
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        let name = agent.name().to_string();
        let breaker_config = BreakerConfig::from(&self.config.resilience);
        let limiter_config = LimiterConfig::from(&self.config.resilience.rate_limit);
        self.breakers
            .entry(name.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name.clone(), breaker_config)));
        self.limiters
            .entry(name.clone())
            .or_insert_with(|| Arc::new(RateLimiter::new(name.clone(), limiter_config)));
        self.registry.register(agent);
        tracing::debug!("Registered agent {}", name);
    }

    pub fn with_agents<I>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Agent>>,
    {
        for agent in agents {
            self.register(agent);
        }
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.registry.get(name)
    }

    pub fn breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }

    pub fn limiter(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(name).cloned()
    }

    pub fn memory(&self) -> &SharedMemoryStore {
        &self.memory
    }

    /// 每个 Agent 的熔断器快照（按名排序）
    pub fn circuit_snapshots(&self) -> BTreeMap<String, CircuitSnapshot> {
        self.breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.snapshot()))
            .collect()
    }
}
