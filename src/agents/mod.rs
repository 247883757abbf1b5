//! 专职 Agent：统一的 execute(input, context) 能力、注册表与基于 LLM 的内置角色

pub mod llm_agent;
pub mod registry;
pub mod roster;

pub use llm_agent::LlmAgent;
pub use registry::{Agent, AgentContext, AgentRegistry};
pub use roster::builtin_roster;

/// 研究 / 事实检索
pub const DEEP_AGENT: &str = "deep_agent";
/// 策略与执行方案
pub const AUTO_MASTER: &str = "auto_master";
/// 心理支持
pub const PSY_MIND: &str = "psy_mind";
/// 反思与批判
pub const REFLEXOR: &str = "reflexor";
/// 任务拆解
pub const TASK_BREAKER: &str = "task_breaker";
/// 结果校验
pub const SUPERVISOR_AI: &str = "supervisor_ai";

/// 全部专职 Agent（用于计算"未唤醒即节省"）
pub const UNIVERSAL_AGENTS: [&str; 6] = [
    DEEP_AGENT,
    AUTO_MASTER,
    PSY_MIND,
    REFLEXOR,
    TASK_BREAKER,
    SUPERVISOR_AI,
];
