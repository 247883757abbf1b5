//! DeepSeek 端点（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat（常规对话，适合大部分专职 Agent）、deepseek-reasoner（思考模式）

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// 模型解析顺序：显式参数 > `DEEPSEEK_MODEL` 环境变量 > deepseek-chat
fn resolve_model(model: Option<&str>, env_model: Option<String>) -> String {
    model
        .map(String::from)
        .or(env_model)
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string())
}

/// 创建 DeepSeek 客户端；Key 优先取 `DEEPSEEK_API_KEY`，其次 `OPENAI_API_KEY`
pub fn create_deepseek_client(model: Option<&str>, base_url: Option<&str>) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());
    let model = resolve_model(model, std::env::var("DEEPSEEK_MODEL").ok());

    OpenAiClient::new(
        Some(base_url.unwrap_or(DEEPSEEK_BASE_URL)),
        &model,
        api_key.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_precedence() {
        assert_eq!(
            resolve_model(Some(DEEPSEEK_REASONER), Some("x".into())),
            DEEPSEEK_REASONER
        );
        assert_eq!(resolve_model(None, Some("custom".into())), "custom");
        assert_eq!(resolve_model(None, None), DEEPSEEK_CHAT);
    }
}
