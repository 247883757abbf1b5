//! 核心编排层：错误类型、熔断与限流、编排上下文、唤醒调度、主控编排

pub mod circuit_breaker;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod rate_limiter;
pub mod task_scheduler;

pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitSnapshot, CircuitState};
pub use context::OrchestrationContext;
pub use error::AgentError;
pub use orchestrator::{
    create_orchestrator, LlmTokens, OrchestratedResponse, Orchestrator, OrchestratorStats, Telemetry,
    FALLBACK_RESPONSE,
};
pub use rate_limiter::{LimiterConfig, RateLimiter};
pub use task_scheduler::{
    topological_order, AgentExecutionResult, AgentTask, AgentWakeScheduler, ScheduledTask,
    TaskStatus,
};
