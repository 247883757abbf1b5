//! GPT Mestre Autônomo - 专职 Agent 唤醒与编排
//!
//! 模块划分：
//! - **agents**: Agent trait、注册表、基于 LLM 的内置专职 Agent
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 熔断器、限流器、编排上下文、唤醒调度器、主控编排
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 跨 Agent 共享记忆与持久化
//! - **routing**: 复杂度分类与激活计划

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod routing;

pub use crate::core::{create_orchestrator, OrchestratedResponse, Orchestrator};
