//! 主控编排
//!
//! 每条输入：分类 → (本地直答 | 共享记忆命中 | 按激活计划唤醒 Agent) → 汇总输出与成本遥测。
//! process 从不返回错误；所有 Agent 都失败时返回兜底文案。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::agents::{builtin_roster, Agent, AgentContext, UNIVERSAL_AGENTS};
use crate::config::{load_config, AppConfig};
use crate::core::circuit_breaker::CircuitSnapshot;
use crate::core::context::OrchestrationContext;
use crate::core::task_scheduler::{AgentExecutionResult, AgentTask, AgentWakeScheduler, TaskStatus};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{MemoryStats, MemoryWrite, SharedMemoryStore};
use crate::routing::{ActivationPlan, ActivationPlanner, Complexity, ComplexityClassifier, MessageAnalysis, TaskType};

/// 编排器在共享记忆中的身份
pub const MEMORY_OWNER: &str = "carlos";
/// 本地直答时 agents_used 中的标记
pub const BYPASS_MARKER: &str = "local_bypass";
/// 共享记忆命中时 agents_used 中的标记
pub const MEMORY_MARKER: &str = "shared_memory";
pub const PROCESSED_TASK_TAG: &str = "processed_task";
pub const FALLBACK_RESPONSE: &str =
    "Desculpe, não consegui processar sua solicitação agora. Tente novamente em instantes.";

const SNAPSHOT_FILE: &str = "shared_memory.json";

/// 一次 process 的汇总结果
#[derive(Debug, Clone)]
pub struct OrchestratedResponse {
    pub content: String,
    pub agents_used: Vec<String>,
    pub execution_time: Duration,
    pub cost_used: f64,
    pub cost_saved: f64,
    pub plan_optimizations_applied: Vec<String>,
    pub task_type: TaskType,
    pub complexity: Complexity,
    /// 按计划顺序的各 Agent 终态
    pub agent_statuses: Vec<(String, TaskStatus)>,
}

/// 编排器累计计数
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrchestratorStats {
    pub total_requests: u64,
    pub bypassed_requests: u64,
    pub memory_hits: u64,
    pub agent_cycles: u64,
    pub agents_woken: u64,
    pub failed_agents: u64,
    pub fallback_responses: u64,
    pub total_cost_used: f64,
    pub total_cost_saved: f64,
}

/// /stats 展示用的只读快照
#[derive(Debug, Clone, Serialize)]
pub struct Telemetry {
    pub orchestrator: OrchestratorStats,
    pub memory: MemoryStats,
    pub circuits: BTreeMap<String, CircuitSnapshot>,
    pub agents: Vec<String>,
    /// 共享 LLM 客户端的累计 token；测试中直接注入 Agent 时为 None
    pub llm_tokens: Option<LlmTokens>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LlmTokens {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

pub struct Orchestrator {
    ctx: Arc<OrchestrationContext>,
    classifier: ComplexityClassifier,
    planner: ActivationPlanner,
    scheduler: AgentWakeScheduler,
    stats: Mutex<OrchestratorStats>,
    llm: Option<Arc<dyn LlmClient>>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<OrchestrationContext>) -> Self {
        let classifier = ComplexityClassifier::new(ctx.config().classifier.clone());
        let planner = ActivationPlanner::new(&ctx.config().planner.plans);
        Self::with_scheduler(ctx.clone(), classifier, planner, AgentWakeScheduler::new(ctx))
    }

    pub fn with_scheduler(
        ctx: Arc<OrchestrationContext>,
        classifier: ComplexityClassifier,
        planner: ActivationPlanner,
        scheduler: AgentWakeScheduler,
    ) -> Self {
        Self {
            ctx,
            classifier,
            planner,
            scheduler,
            stats: Mutex::new(OrchestratorStats::default()),
            llm: None,
        }
    }

    /// 挂上 Agent 共用的 LLM 客户端，用于遥测 token 用量
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    fn lock_stats(&self) -> MutexGuard<'_, OrchestratorStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn process(&self, message: &str, context: &AgentContext) -> OrchestratedResponse {
        let started = Instant::now();
        let analysis = self.classifier.analyze(message, context);
        let plan = self.plan_for(&analysis);
        tracing::debug!(
            "Classified as {} / {} (confidence {:.2})",
            analysis.task_type,
            analysis.complexity,
            analysis.confidence
        );

        let mut response = if analysis.bypass || plan.bypass_remote_call {
            self.local_reply(message, &analysis)
        } else if let Some(cached) = self.ctx.memory().check_similar(MEMORY_OWNER, message) {
            self.memory_reply(cached, &analysis, &plan)
        } else {
            self.wake_agents(message, context, &analysis, &plan).await
        };
        response.execution_time = started.elapsed();

        self.record(&response);
        let audit = serde_json::json!({
            "event": "orchestration_audit",
            "cycle": uuid::Uuid::new_v4().to_string(),
            "task_type": response.task_type.as_str(),
            "complexity": response.complexity.as_str(),
            "agents": response.agents_used,
            "optimizations": response.plan_optimizations_applied,
            "cost_used": response.cost_used,
            "cost_saved": response.cost_saved,
            "duration_ms": response.execution_time.as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "orchestration");
        response
    }

    /// 情绪支持直达分类器指定的单个 Agent，其余按计划表
    fn plan_for(&self, analysis: &MessageAnalysis) -> ActivationPlan {
        let mut plan = self.planner.lookup(analysis.task_type).clone();
        if analysis.task_type == TaskType::EmotionalSupport {
            plan.primary_agents = vec![self.classifier.emotional_agent().to_string()];
            plan.secondary_agents.clear();
            plan.validation_agents.clear();
        }
        plan
    }

    fn universe_savings(&self, scheduled: &BTreeSet<&str>) -> f64 {
        let skipped = UNIVERSAL_AGENTS
            .iter()
            .filter(|name| !scheduled.contains(*name))
            .count();
        self.ctx.config().cost.bypassed_agent_cost * skipped as f64
    }

    fn local_reply(&self, message: &str, analysis: &MessageAnalysis) -> OrchestratedResponse {
        let content = match analysis.task_type {
            TaskType::SystemCommand => self.system_command_reply(message),
            _ => "Olá! Sou o Mestre. Como posso ajudar você hoje?".to_string(),
        };
        OrchestratedResponse {
            content,
            agents_used: vec![BYPASS_MARKER.to_string()],
            execution_time: Duration::ZERO,
            cost_used: 0.0,
            cost_saved: self.universe_savings(&BTreeSet::new()),
            plan_optimizations_applied: vec!["bypass_remote_call".to_string()],
            task_type: analysis.task_type,
            complexity: analysis.complexity,
            agent_statuses: Vec::new(),
        }
    }

    fn system_command_reply(&self, message: &str) -> String {
        let command = message.split_whitespace().next().unwrap_or_default().to_lowercase();
        match command.trim_start_matches('/') {
            "status" | "stats" => {
                let stats = self.lock_stats().clone();
                let memory = self.ctx.memory().stats();
                format!(
                    "Sistema ativo: {} agentes registrados, {} requisições, {} entradas em memória, custo economizado {:.1}.",
                    self.ctx.registry().len(),
                    stats.total_requests,
                    memory.total_entries,
                    stats.total_cost_saved
                )
            }
            "help" | "ajuda" => {
                "Comandos: /status, /stats, /help, /quit. Qualquer outra mensagem é enviada aos agentes.".to_string()
            }
            _ => format!("Comando {} reconhecido.", command),
        }
    }

    fn memory_reply(&self, cached: String, analysis: &MessageAnalysis, plan: &ActivationPlan) -> OrchestratedResponse {
        tracing::info!("Shared memory hit, no agent woken");
        OrchestratedResponse {
            content: cached,
            agents_used: vec![MEMORY_MARKER.to_string()],
            execution_time: Duration::ZERO,
            cost_used: 0.0,
            cost_saved: plan.expected_cost_budget + self.universe_savings(&BTreeSet::new()),
            plan_optimizations_applied: vec!["shared_memory_hit".to_string()],
            task_type: analysis.task_type,
            complexity: analysis.complexity,
            agent_statuses: Vec::new(),
        }
    }

    /// 主 Agent 无依赖；次 Agent 依赖全部主 Agent；校验 Agent 依赖主 + 次
    fn build_tasks(&self, message: &str, context: &AgentContext, plan: &ActivationPlan) -> Vec<AgentTask> {
        let timeout = plan.max_timeout();
        let retries = self.ctx.config().scheduler.max_retries;
        let task = |name: &String, priority: u32, deps: &[String]| {
            AgentTask::new(name.clone(), message)
                .priority(priority)
                .depends_on(deps.iter().cloned())
                .timeout(timeout)
                .retries(retries)
                .context(context.clone())
        };

        let upstream_of_validation: Vec<String> = plan
            .primary_agents
            .iter()
            .chain(&plan.secondary_agents)
            .cloned()
            .collect();
        let mut tasks = Vec::with_capacity(plan.agent_count());
        for (i, name) in plan.primary_agents.iter().enumerate() {
            tasks.push(task(name, i as u32, &[]));
        }
        for (i, name) in plan.secondary_agents.iter().enumerate() {
            tasks.push(task(name, 10 + i as u32, &plan.primary_agents));
        }
        for (i, name) in plan.validation_agents.iter().enumerate() {
            tasks.push(task(name, 20 + i as u32, &upstream_of_validation));
        }
        tasks
    }

    async fn wake_agents(
        &self,
        message: &str,
        context: &AgentContext,
        analysis: &MessageAnalysis,
        plan: &ActivationPlan,
    ) -> OrchestratedResponse {
        let config = self.ctx.config();
        let tasks = self.build_tasks(message, context, plan);
        let global_timeout = Duration::from_secs(config.scheduler.global_timeout_secs);
        let mut results: HashMap<String, AgentExecutionResult> = self.scheduler.run(tasks, global_timeout).await;

        let mut seen = BTreeSet::new();
        let ordered: Vec<AgentExecutionResult> = plan
            .execution_order()
            .filter(|name| seen.insert(name.as_str()))
            .filter_map(|name| results.remove(name))
            .collect();

        let outputs: Vec<&str> = ordered
            .iter()
            .filter(|r| r.status.is_success())
            .filter_map(|r| r.output.as_deref())
            .collect();
        let succeeded = !outputs.is_empty();
        let content = if succeeded {
            outputs.join("\n\n")
        } else {
            tracing::warn!("No agent completed for {}, returning fallback", analysis.task_type);
            FALLBACK_RESPONSE.to_string()
        };

        let cost_used: f64 = ordered.iter().map(|r| r.cost_units_used).sum();
        let scheduled: BTreeSet<&str> = plan.execution_order().map(String::as_str).collect();
        // 重试可能超出预算：负值如实计入，不截断
        let budget_delta = plan.expected_cost_budget - cost_used;
        if budget_delta < 0.0 {
            tracing::warn!(
                "Cycle for {} overspent its budget by {:.2} units",
                analysis.task_type,
                -budget_delta
            );
        }
        let cost_saved = budget_delta + self.universe_savings(&scheduled);

        let mut optimizations = Vec::new();
        let skipped_universal = UNIVERSAL_AGENTS.iter().filter(|n| !scheduled.contains(*n)).count();
        if skipped_universal > 0 {
            optimizations.push(format!(
                "selective_activation: {}/{} agents",
                UNIVERSAL_AGENTS.len() - skipped_universal,
                UNIVERSAL_AGENTS.len()
            ));
        }
        if analysis.complexity >= Complexity::Complex && succeeded {
            let key = self.ctx.memory().store(
                MemoryWrite::new(MEMORY_OWNER, message, content.clone())
                    .high_value()
                    .ttl(config.memory.high_value_ttl_secs)
                    .tags([analysis.task_type.as_str(), PROCESSED_TASK_TAG]),
            );
            tracing::debug!("Stored high-value result as {}", key);
            optimizations.push("stored_high_value".to_string());
        }

        OrchestratedResponse {
            content,
            agents_used: ordered
                .iter()
                .filter(|r| r.attempts > 0)
                .map(|r| r.agent_name.clone())
                .collect(),
            execution_time: Duration::ZERO,
            cost_used,
            cost_saved,
            plan_optimizations_applied: optimizations,
            task_type: analysis.task_type,
            complexity: analysis.complexity,
            agent_statuses: ordered.iter().map(|r| (r.agent_name.clone(), r.status)).collect(),
        }
    }

    fn record(&self, response: &OrchestratedResponse) {
        let mut stats = self.lock_stats();
        stats.total_requests += 1;
        stats.total_cost_used += response.cost_used;
        stats.total_cost_saved += response.cost_saved;
        match response.agents_used.first().map(String::as_str) {
            Some(BYPASS_MARKER) => stats.bypassed_requests += 1,
            Some(MEMORY_MARKER) => stats.memory_hits += 1,
            _ => {
                stats.agent_cycles += 1;
                stats.agents_woken += response.agents_used.len() as u64;
                stats.failed_agents += response
                    .agent_statuses
                    .iter()
                    .filter(|(_, status)| !status.is_success())
                    .count() as u64;
                if response.content == FALLBACK_RESPONSE {
                    stats.fallback_responses += 1;
                }
            }
        }
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.lock_stats().clone()
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            orchestrator: self.stats(),
            memory: self.ctx.memory().stats(),
            circuits: self.ctx.circuit_snapshots(),
            agents: self.ctx.registry().agent_names(),
            llm_tokens: self.llm.as_ref().map(|llm| {
                let (prompt, completion, total) = llm.token_usage();
                LlmTokens {
                    prompt,
                    completion,
                    total,
                }
            }),
        }
    }

    /// 停止当前唤醒周期的后续提交
    pub fn cancel(&self) {
        self.scheduler.cancel();
    }

    /// 持久化高价值记忆
    pub fn shutdown(&self) -> anyhow::Result<usize> {
        self.ctx.memory().persist()
    }
}

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub(crate) fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    // 有 DeepSeek Key 或（配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点）
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(create_deepseek_client(Some(&model), None))
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient)
    }
}

/// 加载配置、打开共享记忆、注册内置 Agent 阵容并创建编排器
pub fn create_orchestrator(config_path: Option<PathBuf>) -> anyhow::Result<Orchestrator> {
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let mut memory_cfg = cfg.memory.clone();
    if memory_cfg.persistence_file.is_none() {
        memory_cfg.persistence_file = Some(cfg.app.data_dir.join(SNAPSHOT_FILE));
    }
    let memory = SharedMemoryStore::open(memory_cfg)?;

    let llm = create_llm_from_config(&cfg);
    let agents = builtin_roster(llm.clone(), cfg.cost.agent_call_cost);
    let ctx = OrchestrationContext::new(cfg, memory)
        .with_agents(agents.into_iter().map(|a| Arc::new(a) as Arc<dyn Agent>));
    tracing::info!("Orchestrator ready with {} agents", ctx.registry().len());
    Ok(Orchestrator::new(Arc::new(ctx)).with_llm(llm))
}
