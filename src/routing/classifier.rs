//! 复杂度分类器
//!
//! 纯函数：消息 + 上下文 → MessageAnalysis，不做任何外部调用，永不失败。
//! 判定顺序（先中先得）：
//! 1. 系统命令 → TRIVIAL + bypass
//! 2. 问候 → TRIVIAL + bypass
//! 3. 情绪标记 → EMOTIONAL_SUPPORT / MODERATE，直达单个 Agent
//! 4. 词数分桶 + 四级关键词（最高命中层级覆盖词数默认值）
//! 5. 多个问句 / 编号 / 列表标记 → 升一级（CRITICAL 封顶）
//! 6. 任务类型关键词表，默认 FACTUAL_QUERY
//!
//! 词表与模式全部来自 [classifier] 配置段。

use regex::Regex;

use crate::agents::AgentContext;
use crate::config::ClassifierSection;
use crate::memory::tokenizer::extract_keywords;
use crate::routing::{Complexity, MessageAnalysis, TaskType};

/// 上下文中由上游（如前端情绪识别）显式标记情绪场景的键
pub const EMOTIONAL_CONTEXT_KEY: &str = "emotional_context";

const MAX_KEYWORDS: usize = 10;

/// 编号列表 / 项目符号行：出现多个时视为多步指令
const STRUCTURE_MARKER_PATTERNS: [&str; 2] = [r"(?m)^\s*\d+[.)]\s", r"(?m)^\s*[-*•]\s"];

/// 复杂度分类器：构造时编译正则，之后 analyze 只读
pub struct ComplexityClassifier {
    system_commands: Vec<Regex>,
    greetings: Vec<Regex>,
    structure_markers: Vec<Regex>,
    config: ClassifierSection,
}

/// 编译一组模式；非法模式记日志后跳过
fn compile_patterns(kind: &str, patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("Skipping invalid {} pattern {:?}: {}", kind, p, e);
                None
            }
        })
        .collect()
}

fn first_match<'a>(text: &str, needles: &'a [String]) -> Option<&'a str> {
    needles
        .iter()
        .map(String::as_str)
        .find(|n| !n.is_empty() && text.contains(&n.to_lowercase()))
}

impl ComplexityClassifier {
    pub fn new(config: ClassifierSection) -> Self {
        Self {
            system_commands: compile_patterns("system command", &config.system_command_patterns),
            greetings: compile_patterns("greeting", &config.greeting_patterns),
            structure_markers: compile_patterns(
                "structure marker",
                &STRUCTURE_MARKER_PATTERNS.map(String::from),
            ),
            config,
        }
    }

    /// 处理情绪支持的 Agent 名
    pub fn emotional_agent(&self) -> &str {
        &self.config.emotional_agent
    }

    pub fn analyze(&self, message: &str, context: &AgentContext) -> MessageAnalysis {
        let trimmed = message.trim();
        let lowered = trimmed.to_lowercase();
        let word_count = trimmed.split_whitespace().count();
        let keywords = extract_keywords(trimmed, MAX_KEYWORDS);

        let base = MessageAnalysis {
            complexity: Complexity::Trivial,
            task_type: TaskType::FactualQuery,
            bypass: false,
            confidence: 0.65,
            keywords,
            emotional_signals: Vec::new(),
            matched_tier: None,
            word_count,
            instruction_markers: 0,
        };

        if self.system_commands.iter().any(|re| re.is_match(&lowered)) {
            return MessageAnalysis {
                task_type: TaskType::SystemCommand,
                bypass: true,
                confidence: 1.0,
                ..base
            };
        }

        if self.greetings.iter().any(|re| re.is_match(&lowered)) {
            return MessageAnalysis {
                task_type: TaskType::Greeting,
                bypass: true,
                confidence: 0.95,
                ..base
            };
        }

        let mut emotional_signals: Vec<String> = self
            .config
            .emotional_markers
            .iter()
            .filter(|m| !m.is_empty() && lowered.contains(&m.to_lowercase()))
            .cloned()
            .collect();
        if context
            .get(EMOTIONAL_CONTEXT_KEY)
            .is_some_and(|v| v == "true")
        {
            emotional_signals.push(EMOTIONAL_CONTEXT_KEY.to_string());
        }
        if !emotional_signals.is_empty() {
            return MessageAnalysis {
                complexity: Complexity::Moderate,
                task_type: TaskType::EmotionalSupport,
                confidence: 0.8,
                emotional_signals,
                ..base
            };
        }

        let by_words = if word_count <= self.config.simple_max_words {
            Complexity::Simple
        } else if word_count <= self.config.moderate_max_words {
            Complexity::Moderate
        } else {
            Complexity::Complex
        };
        let matched_tier = self.matched_tier(&lowered);
        let mut complexity = matched_tier.unwrap_or(by_words);

        let instruction_markers = lowered.matches('?').count()
            + self
                .structure_markers
                .iter()
                .map(|re| re.find_iter(trimmed).count())
                .sum::<usize>();
        if instruction_markers > 1 {
            complexity = complexity.escalate();
        }

        let confidence = if word_count > self.config.long_message_words {
            0.9
        } else if matched_tier.is_some() {
            0.8
        } else {
            0.65
        };

        MessageAnalysis {
            complexity,
            task_type: self.task_type(&lowered),
            confidence,
            matched_tier,
            instruction_markers,
            ..base
        }
    }

    /// 最高命中层级：CRITICAL > COMPLEX > MODERATE > SIMPLE
    fn matched_tier(&self, lowered: &str) -> Option<Complexity> {
        let tiers = &self.config.tiers;
        [
            (Complexity::Critical, &tiers.critical),
            (Complexity::Complex, &tiers.complex),
            (Complexity::Moderate, &tiers.moderate),
            (Complexity::Simple, &tiers.simple),
        ]
        .into_iter()
        .find(|(_, words)| first_match(lowered, words).is_some())
        .map(|(tier, _)| tier)
    }

    fn task_type(&self, lowered: &str) -> TaskType {
        let table = &self.config.task_keywords;
        [
            (TaskType::Research, &table.research),
            (TaskType::ContentCreation, &table.content_creation),
            (TaskType::Strategy, &table.strategy),
            (TaskType::DecisionMaking, &table.decision_making),
            (TaskType::Optimization, &table.optimization),
            (TaskType::CreativeExploration, &table.creative_exploration),
        ]
        .into_iter()
        .find(|(_, words)| first_match(lowered, words).is_some())
        .map(|(task_type, _)| task_type)
        .unwrap_or(TaskType::FactualQuery)
    }
}

impl Default for ComplexityClassifier {
    fn default() -> Self {
        Self::new(ClassifierSection::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(msg: &str) -> MessageAnalysis {
        ComplexityClassifier::default().analyze(msg, &AgentContext::new())
    }

    #[test]
    fn test_structure_marker_patterns_compile() {
        let classifier = ComplexityClassifier::default();
        assert_eq!(classifier.structure_markers.len(), STRUCTURE_MARKER_PATTERNS.len());
        let text = "1. abrir\n2) revisar\n- enviar";
        let found: usize = classifier
            .structure_markers
            .iter()
            .map(|re| re.find_iter(text).count())
            .sum();
        assert_eq!(found, 3);
    }

    #[test]
    fn test_greeting_is_trivial_bypass() {
        for msg in ["Oi", "olá!", "Bom dia, Carlos", "tudo bem?"] {
            let a = analyze(msg);
            assert_eq!(a.complexity, Complexity::Trivial, "{msg}");
            assert_eq!(a.task_type, TaskType::Greeting, "{msg}");
            assert!(a.bypass);
            assert!(a.confidence >= 0.95);
        }
    }

    #[test]
    fn test_greeting_prefix_does_not_bypass_real_question() {
        let a = analyze("Oi, analise os riscos do meu plano de negócios");
        assert!(!a.bypass);
        assert_eq!(a.complexity, Complexity::Complex);
    }

    #[test]
    fn test_system_command_wins_over_greeting() {
        let a = analyze("/status");
        assert_eq!(a.task_type, TaskType::SystemCommand);
        assert_eq!(a.complexity, Complexity::Trivial);
        assert!(a.bypass);
        assert_eq!(a.confidence, 1.0);
    }

    #[test]
    fn test_emotional_marker_routes_to_support() {
        let a = analyze("Estou triste e não sei o que fazer com a minha carreira");
        assert_eq!(a.task_type, TaskType::EmotionalSupport);
        assert_eq!(a.complexity, Complexity::Moderate);
        assert!(a.emotional_signals.contains(&"estou triste".to_string()));
        assert!(!a.bypass);
    }

    #[test]
    fn test_emotional_context_flag() {
        let mut ctx = AgentContext::new();
        ctx.insert(EMOTIONAL_CONTEXT_KEY.into(), "true".into());
        let a = ComplexityClassifier::default().analyze("preciso conversar", &ctx);
        assert_eq!(a.task_type, TaskType::EmotionalSupport);
    }

    #[test]
    fn test_strategic_analysis_is_complex_research() {
        let a = analyze(
            "Analise a viabilidade estratégica de lançar um produto considerando concorrência, riscos e cenários de mercado",
        );
        assert!(a.complexity >= Complexity::Complex);
        assert!(matches!(a.task_type, TaskType::Research | TaskType::DecisionMaking));
        assert_eq!(a.matched_tier, Some(Complexity::Complex));
        assert!(a.keywords.len() <= 10);
        assert!(a.keywords.contains(&"viabilidade".to_string()));
    }

    #[test]
    fn test_critical_tier_beats_word_count() {
        let a = analyze("urgente: servidor caiu");
        assert_eq!(a.complexity, Complexity::Critical);
    }

    #[test]
    fn test_word_count_buckets() {
        assert_eq!(analyze("capital da frança").complexity, Complexity::Simple);
        let medium = "me conta um pouco sobre a história da cidade de lisboa e seus bairros antigos";
        assert_eq!(analyze(medium).complexity, Complexity::Moderate);
        let long = ["palavra"; 30].join(" ");
        assert_eq!(analyze(&long).complexity, Complexity::Complex);
    }

    #[test]
    fn test_multiple_questions_escalate_one_tier() {
        let single = analyze("capital da frança?");
        let multi = analyze("capital da frança? e itália?");
        assert_eq!(single.complexity, Complexity::Simple);
        assert_eq!(multi.complexity, Complexity::Moderate);
        assert_eq!(multi.instruction_markers, 2);
    }

    #[test]
    fn test_numbered_list_escalates() {
        let a = analyze("faça o seguinte:\n1. liste os concorrentes\n2. compare preços");
        assert_eq!(a.instruction_markers, 2);
        assert_eq!(a.complexity, Complexity::Critical);
    }

    #[test]
    fn test_task_type_table_and_default() {
        assert_eq!(analyze("escreva um artigo sobre café").task_type, TaskType::ContentCreation);
        assert_eq!(analyze("como otimizar meu tempo").task_type, TaskType::Optimization);
        assert_eq!(analyze("me dê ideias de presente").task_type, TaskType::CreativeExploration);
        assert_eq!(analyze("capital da frança").task_type, TaskType::FactualQuery);
    }

    #[test]
    fn test_confidence_ranges() {
        assert_eq!(analyze("capital da frança").confidence, 0.65);
        assert_eq!(analyze("explique fotossíntese").confidence, 0.8);
        let long = ["palavra"; 60].join(" ");
        assert_eq!(analyze(&long).confidence, 0.9);
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let mut cfg = ClassifierSection::default();
        cfg.greeting_patterns.push("(unclosed".to_string());
        let classifier = ComplexityClassifier::new(cfg);
        let a = classifier.analyze("oi", &AgentContext::new());
        assert_eq!(a.task_type, TaskType::Greeting);
    }

    #[test]
    fn test_analyze_is_deterministic() {
        let classifier = ComplexityClassifier::default();
        let ctx = AgentContext::new();
        let msg = "Compare duas estratégias de preço? E os riscos?";
        assert_eq!(classifier.analyze(msg, &ctx), classifier.analyze(msg, &ctx));
    }
}
