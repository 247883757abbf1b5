//! 内置专职 Agent 阵容

use std::sync::Arc;

use crate::agents::{
    LlmAgent, AUTO_MASTER, DEEP_AGENT, PSY_MIND, REFLEXOR, SUPERVISOR_AI, TASK_BREAKER,
};
use crate::llm::LlmClient;

/// (名称, 职责, 系统提示词)
const ROSTER: [(&str, &str, &str); 6] = [
    (
        DEEP_AGENT,
        "Pesquisa e levantamento de fatos",
        "DeepAgent, pesquisador.\nLevante fatos, dados e fontes relevantes para a pergunta. Seja objetivo e cite incertezas.",
    ),
    (
        AUTO_MASTER,
        "Estratégia e planos de execução",
        "AutoMaster, estrategista.\nTransforme o pedido em uma estratégia prática com passos, prioridades e riscos.",
    ),
    (
        PSY_MIND,
        "Apoio emocional",
        "PsyMind, apoio emocional.\nAcolha a pessoa com empatia, valide sentimentos e sugira próximos passos gentis. Não faça diagnósticos.",
    ),
    (
        REFLEXOR,
        "Reflexão crítica sobre as respostas",
        "Reflexor, crítico.\nRevise o contexto recebido, aponte lacunas, vieses e melhorias.",
    ),
    (
        TASK_BREAKER,
        "Decomposição de tarefas",
        "TaskBreaker, decompositor.\nQuebre o objetivo em subtarefas pequenas, ordenadas e verificáveis.",
    ),
    (
        SUPERVISOR_AI,
        "Validação final",
        "SupervisorAI, validador.\nVerifique consistência entre as respostas anteriores e produza um parecer final curto.",
    ),
];

/// 在同一个 LLM 客户端上创建全部内置 Agent
pub fn builtin_roster(llm: Arc<dyn LlmClient>, cost_per_call: f64) -> Vec<LlmAgent> {
    ROSTER
        .iter()
        .map(|(name, description, prompt)| {
            LlmAgent::new(*name, *description, *prompt, llm.clone()).with_cost(cost_per_call)
        })
        .collect()
}
