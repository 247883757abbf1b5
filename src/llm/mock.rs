//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 取 System 提示的首行作为"角色"，回显最后一条 User 消息。

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let role = messages
            .iter()
            .find(|m| m.role == Role::System)
            .and_then(|m| m.content.lines().next())
            .unwrap_or("assistant");
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .ok_or(LlmError::InvalidRequest("no user message".to_string()))?;

        let first_line = last_user.lines().next().unwrap_or_default();
        Ok(format!("[mock · {role}] {first_line}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let out = MockLlmClient
            .complete(&[Message::system("Pesquisador"), Message::user("olá mundo")])
            .await
            .unwrap();
        assert_eq!(out, "[mock · Pesquisador] olá mundo");
    }

    #[tokio::test]
    async fn test_mock_requires_user_message() {
        let err = MockLlmClient
            .complete(&[Message::system("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }
}
