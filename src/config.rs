//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MESTRE__*` 覆盖（双下划线表示嵌套，如 `MESTRE__SCHEDULER__MAX_CONCURRENT_AGENTS=8`）。
//! 所有段都有默认值，空配置即可运行。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::routing::{ActivationPlan, TaskType};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub scheduler: SchedulerSection,
    pub resilience: ResilienceSection,
    pub memory: MemorySection,
    pub cost: CostSection,
    pub classifier: ClassifierSection,
    pub planner: PlannerSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 本地数据目录（共享记忆快照默认放这里）
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "GPT Mestre Autônomo".to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub deepseek: LlmProviderSection,
    pub openai: LlmProviderSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            deepseek: LlmProviderSection::default(),
            openai: LlmProviderSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmProviderSection {
    pub model: Option<String>,
}

/// [scheduler] 段：唤醒调度器的并发、超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// 同时执行的 Agent 上限（工作池宽度）
    pub max_concurrent_agents: usize,
    /// Agent 未单独配置时的执行超时（秒）
    pub default_agent_timeout_secs: u64,
    /// 单次 run 的全局超时（秒），到期后不再提交新任务
    pub global_timeout_secs: u64,
    /// 等待依赖完成的上限（秒）
    pub dependency_wait_secs: u64,
    /// 编排器生成任务时的默认重试次数
    pub max_retries: u32,
    /// 按 Agent 名配置的执行超时（秒）
    pub agent_timeouts: HashMap<String, u64>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 5,
            default_agent_timeout_secs: 30,
            global_timeout_secs: 120,
            dependency_wait_secs: 60,
            max_retries: 0,
            agent_timeouts: HashMap::new(),
        }
    }
}

impl SchedulerSection {
    /// 某个 Agent 的类型默认超时
    pub fn agent_timeout(&self, agent_name: &str) -> Duration {
        let secs = self
            .agent_timeouts
            .get(agent_name)
            .copied()
            .unwrap_or(self.default_agent_timeout_secs);
        Duration::from_secs(secs)
    }
}

/// [resilience] 段：熔断器与限流器参数（每个 Agent 一份状态，参数共享）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResilienceSection {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub half_open_trial_limit: u32,
    pub rate_limit: RateLimitSection,
}

impl Default for ResilienceSection {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_secs: 60,
            half_open_trial_limit: 2,
            rate_limit: RateLimitSection::default(),
        }
    }
}

/// [resilience.rate_limit] 段：滑动窗口 + 突发额度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub max_requests: usize,
    pub window_secs: u64,
    pub burst_allowance: u32,
    /// 被拒绝后最多等待多久再重试一次（秒）
    pub max_wait_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window_secs: 60,
            burst_allowance: 5,
            max_wait_secs: 10,
        }
    }
}

/// [memory] 段：共享记忆的 TTL、清理节奏、LRU 容量与持久化
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub default_ttl_secs: u64,
    pub high_value_ttl_secs: u64,
    /// 每写入 N 次做一次过期清理
    pub cleanup_interval: usize,
    pub lru_capacity: usize,
    pub max_search_results: usize,
    /// check_similar 判定相似所需的关键词重叠比例（相对查询关键词数）
    pub similarity_min_overlap: f32,
    /// 高价值条目的 JSON 快照路径；未设置时不持久化
    pub persistence_file: Option<PathBuf>,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            high_value_ttl_secs: 86_400,
            cleanup_interval: 50,
            lru_capacity: 256,
            max_search_results: 10,
            similarity_min_overlap: 0.5,
            persistence_file: None,
        }
    }
}

/// [cost] 段：成本估算（单位为抽象的 cost unit）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CostSection {
    /// 每次 Agent 执行消耗
    pub agent_call_cost: f64,
    /// 每个未被唤醒的 Agent 计入的节省
    pub bypassed_agent_cost: f64,
}

impl Default for CostSection {
    fn default() -> Self {
        Self {
            agent_call_cost: 1.0,
            bypassed_agent_cost: 1.0,
        }
    }
}

/// [classifier] 段：复杂度分类器的全部词表与模式，可在不改代码的情况下调优
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierSection {
    /// 系统命令正则（命中即 TRIVIAL + bypass）
    pub system_command_patterns: Vec<String>,
    /// 问候正则（命中即 TRIVIAL + bypass）
    pub greeting_patterns: Vec<String>,
    /// 情绪标记短语（命中即 EMOTIONAL_SUPPORT，直达单个 Agent）
    pub emotional_markers: Vec<String>,
    /// 处理情绪支持的唯一 Agent
    pub emotional_agent: String,
    pub tiers: KeywordTiers,
    pub task_keywords: TaskKeywords,
    /// 词数 ≤ simple_max_words 默认 SIMPLE
    pub simple_max_words: usize,
    /// 词数 ≤ moderate_max_words 默认 MODERATE，否则 COMPLEX
    pub moderate_max_words: usize,
    /// 超过此词数视为长消息（置信度 0.9）
    pub long_message_words: usize,
}

/// 四级关键词：CRITICAL > COMPLEX > MODERATE > SIMPLE
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeywordTiers {
    pub critical: Vec<String>,
    pub complex: Vec<String>,
    pub moderate: Vec<String>,
    pub simple: Vec<String>,
}

/// 任务类型关键词表（按字段顺序匹配，先中先得）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskKeywords {
    pub research: Vec<String>,
    pub content_creation: Vec<String>,
    pub strategy: Vec<String>,
    pub decision_making: Vec<String>,
    pub optimization: Vec<String>,
    pub creative_exploration: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            system_command_patterns: strings(&[
                r"^/[a-z_]+(\s.*)?$",
                r"^(status|ajuda|help|sair|exit|limpar|stats)$",
            ]),
            greeting_patterns: strings(&[
                r"^(oi|olá|ola|opa|hello|hi|hey|salve|e aí|e ai|eae|bom dia|boa tarde|boa noite)([\s,]+carlos)?[\s!.?]*$",
                r"^(tudo bem|tudo bom|como vai|beleza)[\s,]*(carlos)?[\s!.?]*$",
            ]),
            emotional_markers: strings(&[
                "estou triste",
                "me sinto",
                "ansioso",
                "ansiosa",
                "ansiedade",
                "deprimido",
                "deprimida",
                "desanimado",
                "desanimada",
                "estressado",
                "estressada",
                "sozinho",
                "sozinha",
                "com medo",
                "não aguento",
                "nao aguento",
                "i feel sad",
                "anxious",
            ]),
            emotional_agent: "psy_mind".to_string(),
            tiers: KeywordTiers::default(),
            task_keywords: TaskKeywords::default(),
            simple_max_words: 5,
            moderate_max_words: 25,
            long_message_words: 50,
        }
    }
}

impl Default for KeywordTiers {
    fn default() -> Self {
        Self {
            critical: strings(&[
                "urgente",
                "crítico",
                "critico",
                "emergência",
                "emergencia",
                "imediatamente",
                "urgent",
                "critical",
            ]),
            complex: strings(&[
                "analise",
                "análise",
                "analisar",
                "estratégi",
                "estrategi",
                "viabilidade",
                "cenário",
                "cenario",
                "comparar",
                "compare",
                "avalie",
                "avaliar",
                "planejamento",
                "arquitetura",
                "investimento",
                "analyze",
                "strategy",
            ]),
            moderate: strings(&[
                "explique",
                "explicar",
                "como funciona",
                "resuma",
                "resumo",
                "liste",
                "descreva",
                "explain",
                "summarize",
            ]),
            simple: strings(&[
                "o que é",
                "quem é",
                "quando",
                "onde fica",
                "defina",
                "what is",
                "who is",
            ]),
        }
    }
}

impl Default for TaskKeywords {
    fn default() -> Self {
        Self {
            research: strings(&[
                "pesquis", "analise", "análise", "analisar", "investig", "estude", "dados",
                "research", "analyze",
            ]),
            content_creation: strings(&[
                "escreva", "redija", "artigo", "roteiro", "legenda", "crie um texto", "write",
            ]),
            strategy: strings(&[
                "estratégi", "estrategi", "plano de", "planejamento", "roadmap", "strategy",
            ]),
            decision_making: strings(&[
                "decidir", "decisão", "decisao", "escolher", "vale a pena", "viabilidade",
                "should i",
            ]),
            optimization: strings(&[
                "otimiz", "melhorar", "eficiên", "eficien", "reduzir custo", "optimiz",
            ]),
            creative_exploration: strings(&[
                "ideias", "brainstorm", "imagine", "criativ", "inovador", "ideas",
            ]),
        }
    }
}

/// [planner] 段：按任务类型覆盖内置激活计划
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PlannerSection {
    pub plans: HashMap<TaskType, ActivationPlan>,
}

/// 从 config 目录加载配置，环境变量 MESTRE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MESTRE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MESTRE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_complete() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.scheduler.max_concurrent_agents, 5);
        assert_eq!(cfg.memory.max_search_results, 10);
        assert_eq!(cfg.resilience.rate_limit.max_wait_secs, 10);
        assert!(!cfg.classifier.greeting_patterns.is_empty());
        assert!(cfg.planner.plans.is_empty());
    }

    #[test]
    fn test_agent_timeout_falls_back_to_default() {
        let mut section = SchedulerSection::default();
        section.agent_timeouts.insert("deep_agent".into(), 90);
        assert_eq!(section.agent_timeout("deep_agent"), Duration::from_secs(90));
        assert_eq!(section.agent_timeout("reflexor"), Duration::from_secs(30));
    }

    #[test]
    fn test_load_config_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[scheduler]
max_concurrent_agents = 2

[memory]
cleanup_interval = 7

[planner.plans.research]
primary_agents = ["deep_agent"]
max_timeout_secs = 15
expected_cost_budget = 1.5
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.scheduler.max_concurrent_agents, 2);
        assert_eq!(cfg.scheduler.global_timeout_secs, 120);
        assert_eq!(cfg.memory.cleanup_interval, 7);
        let plan = cfg.planner.plans.get(&TaskType::Research).unwrap();
        assert_eq!(plan.primary_agents, vec!["deep_agent".to_string()]);
        assert!(!plan.bypass_remote_call);
    }
}
