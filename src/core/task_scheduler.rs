//! Agent 唤醒调度
//!
//! 一次 run 的流程：
//! 1. 按依赖拓扑排序，同层按 priority 升序；出现环或无法满足的依赖时强制调度一个任务保证前进
//! 2. 依次提交：提交前等待依赖全部 completed（事件驱动，有上限）
//! 3. 受 Semaphore 限制的工作池并行执行；每个任务自带超时
//! 4. 执行前过熔断器与限流器，执行结果回写熔断器
//! 5. 全局超时 / 取消只阻止新的提交，已在执行的任务跑完或自行超时

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::agents::AgentContext;
use crate::core::context::OrchestrationContext;
use crate::core::AgentError;

/// 依赖输出注入下游上下文时使用的键前缀
pub const UPSTREAM_CONTEXT_PREFIX: &str = "upstream.";

/// 一次 Agent 唤醒请求
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub agent_name: String,
    /// 越小越先
    pub priority: u32,
    pub dependencies: BTreeSet<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub input: String,
    pub context: AgentContext,
}

impl AgentTask {
    pub fn new(agent_name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            priority: 0,
            dependencies: BTreeSet::new(),
            timeout: Duration::from_secs(30),
            max_retries: 0,
            input: input.into(),
            context: AgentContext::new(),
        }
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn context(mut self, context: AgentContext) -> Self {
        self.context = context;
        self
    }
}

/// 任务终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Error,
    Timeout,
    CircuitOpen,
    RateLimited,
    /// 依赖在等待上限内没有完成
    DependencyTimeout,
    /// 某个依赖以非 completed 状态结束
    DependencyFailed,
    /// 全局超时或取消后未提交
    DeadlineExceeded,
}

impl TaskStatus {
    pub fn is_success(self) -> bool {
        self == TaskStatus::Completed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Timeout => "timeout",
            TaskStatus::CircuitOpen => "circuit_open",
            TaskStatus::RateLimited => "rate_limited",
            TaskStatus::DependencyTimeout => "dependency_timeout",
            TaskStatus::DependencyFailed => "dependency_failed",
            TaskStatus::DeadlineExceeded => "deadline_exceeded",
        }
    }

    fn from_error(err: &AgentError) -> Self {
        match err {
            AgentError::Timeout { .. } => TaskStatus::Timeout,
            AgentError::CircuitOpen(_) => TaskStatus::CircuitOpen,
            AgentError::RateLimited(_) => TaskStatus::RateLimited,
            AgentError::DependencyTimeout { .. } => TaskStatus::DependencyTimeout,
            AgentError::DependencyFailed { .. } => TaskStatus::DependencyFailed,
            _ => TaskStatus::Error,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个任务的执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct AgentExecutionResult {
    pub agent_name: String,
    pub status: TaskStatus,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub execution_time: Duration,
    pub cost_units_used: f64,
    /// 实际调用 execute 的次数
    pub attempts: u32,
}

impl AgentExecutionResult {
    fn completed(agent_name: &str, output: String, execution_time: Duration, cost: f64, attempts: u32) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            status: TaskStatus::Completed,
            output: Some(output),
            error_message: None,
            execution_time,
            cost_units_used: cost,
            attempts,
        }
    }

    fn failed(agent_name: &str, err: &AgentError, execution_time: Duration, cost: f64, attempts: u32) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            status: TaskStatus::from_error(err),
            output: None,
            error_message: Some(err.to_string()),
            execution_time,
            cost_units_used: cost,
            attempts,
        }
    }

    fn skipped(agent_name: &str, status: TaskStatus, message: String) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            status,
            output: None,
            error_message: Some(message),
            execution_time: Duration::ZERO,
            cost_units_used: 0.0,
            attempts: 0,
        }
    }
}

/// 排序后的任务；forced 表示为打破环 / 未满足依赖而被强制调度
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub task: AgentTask,
    pub forced: bool,
}

/// Kahn 拓扑排序，入度为 0 的任务按 (priority, 原始顺序) 出队。
///
/// 同名任务只保留第一个。卡住时（环或依赖不在本批次中）取剩余里 priority 最小的任务，
/// 去掉它尚未排到的依赖后强制调度。
pub fn topological_order(tasks: Vec<AgentTask>) -> Vec<ScheduledTask> {
    let mut seen = HashSet::new();
    let tasks: Vec<AgentTask> = tasks
        .into_iter()
        .filter(|t| {
            let fresh = seen.insert(t.agent_name.clone());
            if !fresh {
                tracing::warn!("Duplicate task for agent {} ignored", t.agent_name);
            }
            fresh
        })
        .collect();

    let mut in_degree: Vec<usize> = tasks.iter().map(|t| t.dependencies.len()).collect();
    let mut dependents: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, task) in tasks.iter().enumerate() {
        for dep in &task.dependencies {
            dependents.entry(dep.as_str()).or_default().push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<(u32, usize)>> = tasks
        .iter()
        .enumerate()
        .filter(|(i, _)| in_degree[*i] == 0)
        .map(|(i, t)| Reverse((t.priority, i)))
        .collect();
    let mut scheduled = vec![false; tasks.len()];
    let mut order: Vec<(usize, bool)> = Vec::with_capacity(tasks.len());

    while order.len() < tasks.len() {
        let (next, forced) = match ready.pop() {
            Some(Reverse((_, i))) => (i, false),
            None => {
                let Some(i) = (0..tasks.len())
                    .filter(|i| !scheduled[*i])
                    .min_by_key(|i| (tasks[*i].priority, *i))
                else {
                    break;
                };
                tracing::warn!(
                    "Dependency cycle or unresolved dependencies detected, force-scheduling {}",
                    tasks[i].agent_name
                );
                (i, true)
            }
        };
        scheduled[next] = true;
        order.push((next, forced));

        if let Some(children) = dependents.get(tasks[next].agent_name.as_str()) {
            for &child in children {
                in_degree[child] = in_degree[child].saturating_sub(1);
                if in_degree[child] == 0 && !scheduled[child] {
                    ready.push(Reverse((tasks[child].priority, child)));
                }
            }
        }
    }

    // 被强制调度的任务只保留已排在它前面的依赖
    let positions: HashMap<String, usize> = order
        .iter()
        .enumerate()
        .map(|(pos, (i, _))| (tasks[*i].agent_name.clone(), pos))
        .collect();
    let mut slots: Vec<Option<AgentTask>> = tasks.into_iter().map(Some).collect();
    order
        .into_iter()
        .enumerate()
        .filter_map(|(pos, (i, forced))| {
            let mut task = slots[i].take()?;
            if forced {
                task.dependencies
                    .retain(|dep| positions.get(dep).is_some_and(|&p| p < pos));
            }
            Some(ScheduledTask { task, forced })
        })
        .collect()
}

enum DependencyCheck {
    Ready(AgentContext),
    Pending,
    Failed(String),
}

enum DependencyOutcome {
    Ready(AgentContext),
    Failed(String),
    TimedOut,
    Stopped,
}

/// 单次 run 的结果表；每次写入都推进 watch 版本号，唤醒等待依赖的提交循环
struct ResultBoard {
    results: Mutex<HashMap<String, AgentExecutionResult>>,
    version: watch::Sender<u64>,
}

impl ResultBoard {
    fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            results: Mutex::new(HashMap::new()),
            version,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AgentExecutionResult>> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, result: AgentExecutionResult) {
        tracing::debug!(
            "Agent {} finished: {} in {:?}",
            result.agent_name,
            result.status,
            result.execution_time
        );
        self.lock().insert(result.agent_name.clone(), result);
        self.version.send_modify(|v| *v += 1);
    }

    fn contains(&self, agent_name: &str) -> bool {
        self.lock().contains_key(agent_name)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn check(&self, dependencies: &BTreeSet<String>) -> DependencyCheck {
        let results = self.lock();
        let mut upstream = AgentContext::new();
        let mut pending = false;
        for dep in dependencies {
            match results.get(dep) {
                None => pending = true,
                Some(r) if r.status.is_success() => {
                    upstream.insert(
                        format!("{UPSTREAM_CONTEXT_PREFIX}{dep}"),
                        r.output.clone().unwrap_or_default(),
                    );
                }
                Some(_) => return DependencyCheck::Failed(dep.clone()),
            }
        }
        if pending {
            DependencyCheck::Pending
        } else {
            DependencyCheck::Ready(upstream)
        }
    }

    fn take(&self) -> HashMap<String, AgentExecutionResult> {
        std::mem::take(&mut *self.lock())
    }
}

/// Agent 唤醒调度器
pub struct AgentWakeScheduler {
    ctx: Arc<OrchestrationContext>,
    pool: Arc<Semaphore>,
    dependency_wait: Duration,
    cancel: Mutex<CancellationToken>,
}

impl AgentWakeScheduler {
    pub fn new(ctx: Arc<OrchestrationContext>) -> Self {
        let scheduler = &ctx.config().scheduler;
        let pool = Arc::new(Semaphore::new(scheduler.max_concurrent_agents.max(1)));
        let dependency_wait = Duration::from_secs(scheduler.dependency_wait_secs);
        Self {
            ctx,
            pool,
            dependency_wait,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// 覆盖等待依赖完成的上限
    pub fn with_dependency_wait(mut self, wait: Duration) -> Self {
        self.dependency_wait = wait;
        self
    }

    /// 停止当前 run 的后续提交（已在执行的任务不受影响）
    pub fn cancel(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// 取本次 run 的取消令牌；上一次 run 被取消过则换新令牌
    fn run_token(&self) -> CancellationToken {
        let mut guard = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_cancelled() {
            *guard = CancellationToken::new();
        }
        guard.clone()
    }

    pub async fn run(
        &self,
        tasks: Vec<AgentTask>,
        global_timeout: Duration,
    ) -> HashMap<String, AgentExecutionResult> {
        let started = Instant::now();
        let deadline = started + global_timeout;
        let token = self.run_token();
        let order = topological_order(tasks);
        let board = Arc::new(ResultBoard::new());
        tracing::info!("Waking {} agents (global timeout {:?})", order.len(), global_timeout);

        let mut handles = Vec::with_capacity(order.len());
        for ScheduledTask { mut task, .. } in order {
            let name = task.agent_name.clone();
            if token.is_cancelled() || Instant::now() >= deadline {
                board.record(AgentExecutionResult::skipped(
                    &name,
                    TaskStatus::DeadlineExceeded,
                    "not submitted: global timeout elapsed or run cancelled".to_string(),
                ));
                continue;
            }

            if !task.dependencies.is_empty() {
                match self.wait_for_dependencies(&board, &task, deadline, &token).await {
                    DependencyOutcome::Ready(upstream) => task.context.extend(upstream),
                    DependencyOutcome::Failed(dependency) => {
                        let err = AgentError::DependencyFailed {
                            agent: name.clone(),
                            dependency,
                        };
                        board.record(AgentExecutionResult::failed(&name, &err, Duration::ZERO, 0.0, 0));
                        continue;
                    }
                    DependencyOutcome::TimedOut => {
                        tracing::warn!("Dependencies of {} not completed in {:?}, skipping", name, self.dependency_wait);
                        let err = AgentError::DependencyTimeout {
                            agent: name.clone(),
                            after: self.dependency_wait,
                        };
                        board.record(AgentExecutionResult::failed(&name, &err, Duration::ZERO, 0.0, 0));
                        continue;
                    }
                    DependencyOutcome::Stopped => {
                        board.record(AgentExecutionResult::skipped(
                            &name,
                            TaskStatus::DeadlineExceeded,
                            "not submitted: stopped while waiting for dependencies".to_string(),
                        ));
                        continue;
                    }
                }
            }

            let permit = tokio::select! {
                permit = self.pool.clone().acquire_owned() => permit.ok(),
                _ = tokio::time::sleep_until(deadline) => None,
                _ = token.cancelled() => None,
            };
            let Some(permit) = permit else {
                board.record(AgentExecutionResult::skipped(
                    &name,
                    TaskStatus::DeadlineExceeded,
                    "not submitted: no worker available before deadline".to_string(),
                ));
                continue;
            };

            let ctx = self.ctx.clone();
            let task_board = board.clone();
            let handle = tokio::spawn(async move {
                let result = execute_task(&ctx, &task).await;
                drop(permit);
                task_board.record(result);
            });
            handles.push((name, handle));
        }

        let joined = join_all(
            handles
                .into_iter()
                .map(|(name, handle)| async move { (name, handle.await) }),
        )
        .await;
        for (name, outcome) in joined {
            if let Err(e) = outcome {
                if !board.contains(&name) {
                    tracing::warn!("Agent task {} aborted: {}", name, e);
                    let err = AgentError::Execution(format!("task aborted: {e}"));
                    board.record(AgentExecutionResult::failed(&name, &err, Duration::ZERO, 0.0, 0));
                }
            }
        }

        let results = board.take();
        tracing::info!(
            "Wake cycle finished: {}/{} completed in {:?}",
            results.values().filter(|r| r.status.is_success()).count(),
            results.len(),
            started.elapsed()
        );
        results
    }

    /// 等待依赖全部 completed；上限为 min(dependency_wait, 全局截止时间)
    async fn wait_for_dependencies(
        &self,
        board: &ResultBoard,
        task: &AgentTask,
        deadline: Instant,
        token: &CancellationToken,
    ) -> DependencyOutcome {
        let wait_deadline = (Instant::now() + self.dependency_wait).min(deadline);
        let mut changes = board.subscribe();
        loop {
            match board.check(&task.dependencies) {
                DependencyCheck::Ready(upstream) => return DependencyOutcome::Ready(upstream),
                DependencyCheck::Failed(dep) => return DependencyOutcome::Failed(dep),
                DependencyCheck::Pending => {}
            }
            tokio::select! {
                changed = timeout_at(wait_deadline, changes.changed()) => {
                    if !matches!(changed, Ok(Ok(()))) {
                        return if Instant::now() >= deadline {
                            DependencyOutcome::Stopped
                        } else {
                            DependencyOutcome::TimedOut
                        };
                    }
                }
                _ = token.cancelled() => return DependencyOutcome::Stopped,
            }
        }
    }
}

/// 单个任务：熔断检查 → 限流准入 → 带超时执行 → 回写熔断器，按 max_retries 重试
async fn execute_task(ctx: &OrchestrationContext, task: &AgentTask) -> AgentExecutionResult {
    let started = Instant::now();
    let name = task.agent_name.as_str();
    let (Some(agent), Some(breaker), Some(limiter)) = (ctx.agent(name), ctx.breaker(name), ctx.limiter(name)) else {
        return AgentExecutionResult::failed(name, &AgentError::UnknownAgent(name.to_string()), Duration::ZERO, 0.0, 0);
    };

    let config = ctx.config();
    let limit = task.timeout.min(config.scheduler.agent_timeout(name));
    let max_wait = Duration::from_secs(config.resilience.rate_limit.max_wait_secs);
    let mut attempts = 0u32;
    let mut cost = 0.0;
    let mut last_failure: Option<AgentError> = None;

    let final_error = loop {
        if !breaker.can_execute() {
            // 重试途中熔断：终态沿用上一次执行的失败
            match last_failure.take() {
                Some(previous) => break previous,
                None => {
                    tracing::debug!("Circuit open for {}, not executing", name);
                    let err = AgentError::CircuitOpen(name.to_string());
                    return AgentExecutionResult::failed(name, &err, started.elapsed(), cost, attempts);
                }
            }
        }
        if !limiter.admit(max_wait).await {
            breaker.release_trial();
            break AgentError::RateLimited(name.to_string());
        }

        attempts += 1;
        cost += agent.cost_units();
        let outcome = match timeout(limit, agent.execute(&task.input, &task.context)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout {
                agent: name.to_string(),
                after: limit,
            }),
        };

        match outcome {
            Ok(output) => {
                breaker.record_success();
                return AgentExecutionResult::completed(name, output, started.elapsed(), cost, attempts);
            }
            Err(err) => {
                if err.counts_as_failure() {
                    breaker.record_failure();
                } else {
                    breaker.release_trial();
                }
                tracing::debug!("Agent {} attempt {} failed: {}", name, attempts, err);
                if attempts > task.max_retries {
                    break err;
                }
                last_failure = Some(err);
            }
        }
    };

    AgentExecutionResult::failed(name, &final_error, started.elapsed(), cost, attempts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Agent;
    use crate::config::AppConfig;
    use crate::core::circuit_breaker::CircuitState;
    use crate::memory::SharedMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 睡 delay 后回显，记录在途并发峰值与调用次数；前 fail_first 次调用失败
    struct ScriptedAgent {
        name: &'static str,
        delay: Duration,
        fail_first: usize,
        calls: AtomicUsize,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl ScriptedAgent {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                delay: Duration::ZERO,
                fail_first: 0,
                calls: AtomicUsize::new(0),
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn delay(mut self, ms: u64) -> Self {
            self.delay = Duration::from_millis(ms);
            self
        }

        fn failing(mut self, times: usize) -> Self {
            self.fail_first = times;
            self
        }

        fn tracked(mut self, in_flight: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Self {
            self.in_flight = in_flight.clone();
            self.peak = peak.clone();
            self
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, input: &str, context: &AgentContext) -> Result<String, AgentError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(AgentError::Execution(format!("{} scripted failure", self.name)));
            }
            let upstream: Vec<String> = context
                .iter()
                .filter(|(k, _)| k.starts_with(UPSTREAM_CONTEXT_PREFIX))
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            Ok(format!("{}:{}[{}]", self.name, input, upstream.join(",")))
        }
    }

    fn scheduler_with(config: AppConfig, agents: Vec<ScriptedAgent>) -> (Arc<OrchestrationContext>, AgentWakeScheduler) {
        let memory = SharedMemoryStore::new(config.memory.clone());
        let ctx = Arc::new(
            OrchestrationContext::new(config, memory)
                .with_agents(agents.into_iter().map(|a| Arc::new(a) as Arc<dyn Agent>)),
        );
        let scheduler = AgentWakeScheduler::new(ctx.clone());
        (ctx, scheduler)
    }

    fn names(order: &[ScheduledTask]) -> Vec<&str> {
        order.iter().map(|s| s.task.agent_name.as_str()).collect()
    }

    #[test]
    fn test_topological_order_respects_dependencies_then_priority() {
        let order = topological_order(vec![
            AgentTask::new("validator", "x").priority(20).depends_on(["a", "b"]),
            AgentTask::new("b", "x").priority(1),
            AgentTask::new("secondary", "x").priority(10).depends_on(["a", "b"]),
            AgentTask::new("a", "x").priority(0),
        ]);
        assert_eq!(names(&order), vec!["a", "b", "secondary", "validator"]);
        assert!(order.iter().all(|s| !s.forced));
    }

    #[test]
    fn test_topological_order_breaks_cycles() {
        let order = topological_order(vec![
            AgentTask::new("a", "x").priority(5).depends_on(["b"]),
            AgentTask::new("b", "x").priority(1).depends_on(["a"]),
        ]);
        assert_eq!(names(&order), vec!["b", "a"]);
        assert!(order[0].forced);
        assert!(order[0].task.dependencies.is_empty());
        assert!(!order[1].forced);
        assert!(order[1].task.dependencies.contains("b"));
    }

    #[test]
    fn test_unknown_dependency_is_forced_and_stripped() {
        let order = topological_order(vec![
            AgentTask::new("a", "x"),
            AgentTask::new("b", "x").priority(1).depends_on(["a", "ghost"]),
        ]);
        assert_eq!(names(&order), vec!["a", "b"]);
        assert!(order[1].forced);
        assert_eq!(order[1].task.dependencies, BTreeSet::from(["a".to_string()]));
    }

    #[test]
    fn test_duplicate_agent_keeps_first() {
        let order = topological_order(vec![
            AgentTask::new("a", "first"),
            AgentTask::new("a", "second"),
        ]);
        assert_eq!(order.len(), 1);
        assert_eq!(order[0].task.input, "first");
    }

    #[tokio::test]
    async fn test_dependency_output_reaches_dependent() {
        let (_, scheduler) = scheduler_with(
            AppConfig::default(),
            vec![ScriptedAgent::new("a").delay(30), ScriptedAgent::new("b")],
        );
        let results = scheduler
            .run(
                vec![AgentTask::new("b", "in").depends_on(["a"]), AgentTask::new("a", "in")],
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(results["a"].status, TaskStatus::Completed);
        assert_eq!(results["b"].status, TaskStatus::Completed);
        assert_eq!(
            results["b"].output.as_deref(),
            Some("b:in[upstream.a=a:in[]]")
        );
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut config = AppConfig::default();
        config.scheduler.max_concurrent_agents = 2;
        let agents = ["a", "b", "c", "d"]
            .into_iter()
            .map(|n| ScriptedAgent::new(n).delay(40).tracked(&in_flight, &peak))
            .collect();
        let (_, scheduler) = scheduler_with(config, agents);
        let tasks = ["a", "b", "c", "d"].into_iter().map(|n| AgentTask::new(n, "x")).collect();
        let results = scheduler.run(tasks, Duration::from_secs(5)).await;
        assert_eq!(results.len(), 4);
        assert!(results.values().all(|r| r.status == TaskStatus::Completed));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_breaker_failure() {
        let (ctx, scheduler) = scheduler_with(AppConfig::default(), vec![ScriptedAgent::new("slow").delay(500)]);
        let results = scheduler
            .run(vec![AgentTask::new("slow", "x").timeout(Duration::from_millis(30))], Duration::from_secs(5))
            .await;
        let r = &results["slow"];
        assert_eq!(r.status, TaskStatus::Timeout);
        assert_eq!(r.attempts, 1);
        assert!(r.output.is_none());
        assert_eq!(ctx.breaker("slow").unwrap().snapshot().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_without_new_failure() {
        let (ctx, scheduler) = scheduler_with(AppConfig::default(), vec![ScriptedAgent::new("a")]);
        let breaker = ctx.breaker("a").unwrap();
        for _ in 0..3 {
            breaker.record_failure();
        }
        let results = scheduler.run(vec![AgentTask::new("a", "x")], Duration::from_secs(5)).await;
        assert_eq!(results["a"].status, TaskStatus::CircuitOpen);
        assert_eq!(results["a"].attempts, 0);
        assert_eq!(results["a"].cost_units_used, 0.0);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().consecutive_failures, 3);
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_dependent() {
        let (_, scheduler) = scheduler_with(
            AppConfig::default(),
            vec![ScriptedAgent::new("a").failing(1), ScriptedAgent::new("b")],
        );
        let results = scheduler
            .run(vec![AgentTask::new("a", "x"), AgentTask::new("b", "x").depends_on(["a"])], Duration::from_secs(5))
            .await;
        assert_eq!(results["a"].status, TaskStatus::Error);
        assert_eq!(results["b"].status, TaskStatus::DependencyFailed);
        assert_eq!(results["b"].attempts, 0);
    }

    #[tokio::test]
    async fn test_dependency_wait_bound() {
        let (_, scheduler) = scheduler_with(
            AppConfig::default(),
            vec![ScriptedAgent::new("a").delay(300), ScriptedAgent::new("b")],
        );
        let scheduler = scheduler.with_dependency_wait(Duration::from_millis(30));
        let results = scheduler
            .run(vec![AgentTask::new("a", "x"), AgentTask::new("b", "x").depends_on(["a"])], Duration::from_secs(5))
            .await;
        assert_eq!(results["a"].status, TaskStatus::Completed);
        assert_eq!(results["b"].status, TaskStatus::DependencyTimeout);
    }

    #[tokio::test]
    async fn test_global_timeout_stops_new_submissions_only() {
        let (_, scheduler) = scheduler_with(
            AppConfig::default(),
            vec![ScriptedAgent::new("a").delay(150), ScriptedAgent::new("b")],
        );
        let results = scheduler
            .run(
                vec![AgentTask::new("a", "x"), AgentTask::new("b", "x").depends_on(["a"])],
                Duration::from_millis(40),
            )
            .await;
        assert_eq!(results["a"].status, TaskStatus::Completed, "in-flight work finishes");
        assert_eq!(results["b"].status, TaskStatus::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let (ctx, scheduler) = scheduler_with(AppConfig::default(), vec![ScriptedAgent::new("flaky").failing(1)]);
        let results = scheduler
            .run(vec![AgentTask::new("flaky", "x").retries(1)], Duration::from_secs(5))
            .await;
        let r = &results["flaky"];
        assert_eq!(r.status, TaskStatus::Completed);
        assert_eq!(r.attempts, 2);
        assert_eq!(r.cost_units_used, 2.0);
        assert_eq!(ctx.breaker("flaky").unwrap().snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_rate_limited_is_not_a_breaker_failure() {
        let mut config = AppConfig::default();
        config.resilience.rate_limit.max_requests = 1;
        config.resilience.rate_limit.burst_allowance = 0;
        config.resilience.rate_limit.max_wait_secs = 0;
        let (ctx, scheduler) = scheduler_with(config, vec![ScriptedAgent::new("a")]);
        let first = scheduler.run(vec![AgentTask::new("a", "x")], Duration::from_secs(5)).await;
        assert_eq!(first["a"].status, TaskStatus::Completed);
        let second = scheduler.run(vec![AgentTask::new("a", "x")], Duration::from_secs(5)).await;
        assert_eq!(second["a"].status, TaskStatus::RateLimited);
        assert_eq!(second["a"].attempts, 0);
        assert_eq!(ctx.breaker("a").unwrap().snapshot().consecutive_failures, 0);
    }

    fn recovering_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.resilience.failure_threshold = 1;
        config.resilience.recovery_timeout_secs = 0;
        config.resilience.half_open_trial_limit = 1;
        config
    }

    #[tokio::test]
    async fn test_breaker_recovers_through_half_open() {
        let (ctx, scheduler) = scheduler_with(recovering_config(), vec![ScriptedAgent::new("a").failing(1)]);
        let breaker = ctx.breaker("a").unwrap();

        let first = scheduler.run(vec![AgentTask::new("a", "x")], Duration::from_secs(5)).await;
        assert_eq!(first["a"].status, TaskStatus::Error);
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = scheduler.run(vec![AgentTask::new("a", "x")], Duration::from_secs(5)).await;
        assert_eq!(second["a"].status, TaskStatus::Completed);
        assert_eq!(second["a"].attempts, 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_rate_limited_trial_does_not_strand_half_open() {
        let mut config = recovering_config();
        config.resilience.rate_limit.max_requests = 1;
        config.resilience.rate_limit.burst_allowance = 0;
        config.resilience.rate_limit.window_secs = 1;
        config.resilience.rate_limit.max_wait_secs = 0;
        let (ctx, scheduler) = scheduler_with(config, vec![ScriptedAgent::new("a").failing(1)]);
        let breaker = ctx.breaker("a").unwrap();

        let first = scheduler.run(vec![AgentTask::new("a", "x")], Duration::from_secs(5)).await;
        assert_eq!(first["a"].status, TaskStatus::Error);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = scheduler.run(vec![AgentTask::new("a", "x")], Duration::from_secs(5)).await;
        assert_eq!(second["a"].status, TaskStatus::RateLimited);
        assert_eq!(second["a"].attempts, 0);
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::HalfOpen);
        assert_eq!(snapshot.half_open_trials, 0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let third = scheduler.run(vec![AgentTask::new("a", "x")], Duration::from_secs(5)).await;
        assert_eq!(third["a"].status, TaskStatus::Completed);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_unknown_agent_is_error() {
        let (_, scheduler) = scheduler_with(AppConfig::default(), vec![]);
        let results = scheduler.run(vec![AgentTask::new("ghost", "x")], Duration::from_secs(1)).await;
        assert_eq!(results["ghost"].status, TaskStatus::Error);
        assert!(results["ghost"].error_message.as_deref().unwrap_or_default().contains("ghost"));
    }

    #[tokio::test]
    async fn test_cancel_before_run_is_reset() {
        let (_, scheduler) = scheduler_with(AppConfig::default(), vec![ScriptedAgent::new("a")]);
        scheduler.cancel();
        let results = scheduler.run(vec![AgentTask::new("a", "x")], Duration::from_secs(1)).await;
        assert_eq!(results["a"].status, TaskStatus::Completed);
    }
}
