//! 基于 LLM 的 Agent：角色提示词 + 用户输入 + 上下文，一次 complete 调用

use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::{Agent, AgentContext};
use crate::core::AgentError;
use crate::llm::{LlmClient, Message};

pub struct LlmAgent {
    name: String,
    description: String,
    system_prompt: String,
    llm: Arc<dyn LlmClient>,
    cost: f64,
}

impl LlmAgent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
            llm,
            cost: 1.0,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// 用户消息：原始输入，后接上下文（含上游 Agent 输出）
    fn build_messages(&self, input: &str, context: &AgentContext) -> Vec<Message> {
        let mut user = input.to_string();
        if !context.is_empty() {
            user.push_str("\n\nContexto:");
            for (key, value) in context {
                user.push_str(&format!("\n- {key}: {value}"));
            }
        }
        vec![Message::system(self.system_prompt.clone()), Message::user(user)]
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn cost_units(&self) -> f64 {
        self.cost
    }

    async fn execute(&self, input: &str, context: &AgentContext) -> Result<String, AgentError> {
        let messages = self.build_messages(input, context);
        let output = self.llm.complete(&messages).await?;
        tracing::debug!(agent = %self.name, chars = output.len(), "llm agent completed");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient};

    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
            Err(LlmError::RateLimited { retry_after_ms: 500 })
        }
    }

    #[test]
    fn test_context_is_appended_to_user_message() {
        let agent = LlmAgent::new("a", "d", "Sistema", Arc::new(MockLlmClient));
        let mut ctx = AgentContext::new();
        ctx.insert("upstream.deep_agent".into(), "fatos".into());
        let messages = agent.build_messages("pergunta", &ctx);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.starts_with("pergunta"));
        assert!(messages[1].content.contains("- upstream.deep_agent: fatos"));
    }

    #[tokio::test]
    async fn test_execute_uses_llm() {
        let agent = LlmAgent::new("a", "d", "Pesquisador", Arc::new(MockLlmClient)).with_cost(2.5);
        let out = agent.execute("olá", &AgentContext::new()).await.unwrap();
        assert_eq!(out, "[mock · Pesquisador] olá");
        assert_eq!(agent.cost_units(), 2.5);
    }

    #[tokio::test]
    async fn test_llm_error_maps_to_agent_error() {
        let agent = LlmAgent::new("a", "d", "s", Arc::new(FailingLlm));
        let err = agent.execute("x", &AgentContext::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(LlmError::RateLimited { .. })));
        assert!(err.counts_as_failure());
    }
}
