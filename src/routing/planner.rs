//! 激活计划：任务类型 → 主 / 次 / 校验 Agent 列表、超时、成本预算、是否绕过远程调用
//!
//! 内置计划为静态参考数据；[planner.plans.<task_type>] 可整体覆盖某个类型的计划。
//! 未知类型回落到 FACTUAL_QUERY 的计划。

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agents::{AUTO_MASTER, DEEP_AGENT, PSY_MIND, REFLEXOR, SUPERVISOR_AI, TASK_BREAKER};
use crate::routing::TaskType;

/// 单个任务类型的激活计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationPlan {
    /// 无依赖，最先并行执行
    pub primary_agents: Vec<String>,
    /// 依赖全部主 Agent
    pub secondary_agents: Vec<String>,
    /// 依赖主 + 次 Agent
    pub validation_agents: Vec<String>,
    pub max_timeout_secs: u64,
    pub expected_cost_budget: f64,
    /// 为 true 时不唤醒任何 Agent，由编排器本地回复
    pub bypass_remote_call: bool,
}

impl Default for ActivationPlan {
    fn default() -> Self {
        Self {
            primary_agents: Vec::new(),
            secondary_agents: Vec::new(),
            validation_agents: Vec::new(),
            max_timeout_secs: 30,
            expected_cost_budget: 0.0,
            bypass_remote_call: false,
        }
    }
}

impl ActivationPlan {
    fn agents(primary: &[&str], secondary: &[&str], validation: &[&str]) -> Self {
        let owned = |names: &[&str]| names.iter().map(|n| n.to_string()).collect();
        Self {
            primary_agents: owned(primary),
            secondary_agents: owned(secondary),
            validation_agents: owned(validation),
            ..Self::default()
        }
    }

    fn bypass() -> Self {
        Self {
            max_timeout_secs: 5,
            bypass_remote_call: true,
            ..Self::default()
        }
    }

    fn with_timeout(mut self, secs: u64) -> Self {
        self.max_timeout_secs = secs;
        self
    }

    fn with_budget(mut self, budget: f64) -> Self {
        self.expected_cost_budget = budget;
        self
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs)
    }

    /// 按执行顺序（主 → 次 → 校验）列出全部 Agent
    pub fn execution_order(&self) -> impl Iterator<Item = &String> {
        self.primary_agents
            .iter()
            .chain(&self.secondary_agents)
            .chain(&self.validation_agents)
    }

    pub fn agent_count(&self) -> usize {
        self.primary_agents.len() + self.secondary_agents.len() + self.validation_agents.len()
    }
}

/// 内置计划表
fn builtin_plan(task_type: TaskType) -> ActivationPlan {
    match task_type {
        TaskType::SystemCommand | TaskType::Greeting => ActivationPlan::bypass(),
        TaskType::EmotionalSupport => ActivationPlan::agents(&[PSY_MIND], &[], &[])
            .with_timeout(30)
            .with_budget(1.0),
        TaskType::FactualQuery => ActivationPlan::agents(&[DEEP_AGENT], &[], &[])
            .with_timeout(30)
            .with_budget(1.0),
        TaskType::Research => ActivationPlan::agents(&[DEEP_AGENT], &[REFLEXOR], &[SUPERVISOR_AI])
            .with_timeout(60)
            .with_budget(3.0),
        TaskType::ContentCreation => ActivationPlan::agents(&[AUTO_MASTER], &[REFLEXOR], &[])
            .with_timeout(60)
            .with_budget(2.0),
        TaskType::Strategy => {
            ActivationPlan::agents(&[AUTO_MASTER, DEEP_AGENT], &[TASK_BREAKER], &[SUPERVISOR_AI])
                .with_timeout(90)
                .with_budget(4.0)
        }
        TaskType::DecisionMaking => {
            ActivationPlan::agents(&[DEEP_AGENT, AUTO_MASTER], &[REFLEXOR], &[SUPERVISOR_AI])
                .with_timeout(90)
                .with_budget(4.0)
        }
        TaskType::Optimization => ActivationPlan::agents(&[TASK_BREAKER], &[AUTO_MASTER], &[])
            .with_timeout(60)
            .with_budget(2.0),
        TaskType::CreativeExploration => ActivationPlan::agents(&[REFLEXOR, AUTO_MASTER], &[], &[])
            .with_timeout(60)
            .with_budget(2.0),
    }
}

/// 激活计划表：纯查表
#[derive(Debug, Clone)]
pub struct ActivationPlanner {
    plans: HashMap<TaskType, ActivationPlan>,
}

impl ActivationPlanner {
    /// 内置计划 + 配置覆盖
    pub fn new(overrides: &HashMap<TaskType, ActivationPlan>) -> Self {
        let mut plans: HashMap<TaskType, ActivationPlan> = TaskType::ALL
            .into_iter()
            .map(|t| (t, builtin_plan(t)))
            .collect();
        for (task_type, plan) in overrides {
            tracing::info!("Activation plan for {} overridden by config", task_type);
            plans.insert(*task_type, plan.clone());
        }
        Self { plans }
    }

    pub fn lookup(&self, task_type: TaskType) -> &ActivationPlan {
        self.plans
            .get(&task_type)
            .or_else(|| self.plans.get(&TaskType::FactualQuery))
            .unwrap_or(&FALLBACK_PLAN)
    }
}

/// 计划表被覆盖得连 FACTUAL_QUERY 都没有时的兜底
static FALLBACK_PLAN: ActivationPlan = ActivationPlan {
    primary_agents: Vec::new(),
    secondary_agents: Vec::new(),
    validation_agents: Vec::new(),
    max_timeout_secs: 30,
    expected_cost_budget: 0.0,
    bypass_remote_call: false,
};

impl Default for ActivationPlanner {
    fn default() -> Self {
        Self::new(&HashMap::new())
    }
}
