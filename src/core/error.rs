//! Agent 错误类型
//!
//! 调度器据此决定任务的终态，以及是否计入熔断器失败次数。

use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;

/// 单个 Agent 任务可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 任务 / 计划本身不合法（编排器会回落到默认计划，从不致命）
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Agent execution failed: {0}")]
    Execution(String),

    #[error("Agent {agent} timed out after {after:?}")]
    Timeout { agent: String, after: Duration },

    /// 执行前被熔断器拒绝
    #[error("Circuit open for agent {0}")]
    CircuitOpen(String),

    /// 限流等待后仍被拒绝（本地准入决策，不是 Agent 故障）
    #[error("Rate limit exceeded for agent {0}")]
    RateLimited(String),

    #[error("Dependencies of {agent} not completed within {after:?}")]
    DependencyTimeout { agent: String, after: Duration },

    #[error("Dependency {dependency} of {agent} did not complete")]
    DependencyFailed { agent: String, dependency: String },

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

impl AgentError {
    /// 是否计入熔断器：只有真正执行过且失败（异常 / 超时 / 远程错误）才算
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            AgentError::Execution(_) | AgentError::Timeout { .. } | AgentError::Llm(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        assert!(AgentError::Execution("boom".into()).counts_as_failure());
        assert!(AgentError::Timeout {
            agent: "a".into(),
            after: Duration::from_secs(1)
        }
        .counts_as_failure());
        assert!(AgentError::Llm(LlmError::EmptyResponse).counts_as_failure());

        assert!(!AgentError::CircuitOpen("a".into()).counts_as_failure());
        assert!(!AgentError::RateLimited("a".into()).counts_as_failure());
        assert!(!AgentError::UnknownAgent("a".into()).counts_as_failure());
        assert!(!AgentError::Validation("bad".into()).counts_as_failure());
    }

    #[test]
    fn test_llm_error_converts() {
        let err: AgentError = LlmError::ApiError("503".into()).into();
        assert_eq!(err.to_string(), "LLM error: API error: 503");
    }
}
