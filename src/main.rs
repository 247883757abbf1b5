//! GPT Mestre Autônomo - 终端入口
//!
//! 初始化日志、创建编排器，逐行读取 stdin 并打印回复。
//! `/stats` 输出遥测 JSON，`/quit` 持久化共享记忆后退出；处理中按 Ctrl+C 取消当前唤醒周期。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use mestre::agents::AgentContext;
use mestre::core::{create_orchestrator, OrchestratedResponse};
use mestre::observability;
use tokio::io::{AsyncBufReadExt, BufReader};

fn print_response(response: &OrchestratedResponse) {
    println!("\n{}\n", response.content);
    println!(
        "  [{} · {}] agentes: {} | custo: {:.1} | economia: {:.1} | {:?}",
        response.task_type,
        response.complexity,
        response.agents_used.join(", "),
        response.cost_used,
        response.cost_saved,
        response.execution_time
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let orchestrator = create_orchestrator(config_path).context("Failed to create orchestrator")?;
    let context = AgentContext::new();

    println!("GPT Mestre Autônomo: digite sua mensagem (/stats, /quit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/sair" | "/exit" => break,
            "/stats" => {
                let telemetry = serde_json::to_string_pretty(&orchestrator.telemetry())?;
                println!("{telemetry}");
                continue;
            }
            _ => {}
        }

        let process = orchestrator.process(input, &context);
        tokio::pin!(process);
        let response = loop {
            tokio::select! {
                response = &mut process => break response,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Interrupted, no new agents will be woken in this cycle");
                    orchestrator.cancel();
                }
            }
        };
        print_response(&response);
    }

    let saved = orchestrator
        .shutdown()
        .context("Failed to persist shared memory")?;
    tracing::info!("Shutdown complete, {} memory entries persisted", saved);
    Ok(())
}
