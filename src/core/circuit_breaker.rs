//! 熔断器（每个 Agent 一个）
//!
//! closed →(连续失败达到阈值)→ open →(距上次失败超过 recovery_timeout)→ half_open
//! half_open →(连续 trial_limit 次成功)→ closed；half_open 中任一失败 → open。
//! closed 状态下成功只把失败计数减一（不清零），偶发失败不会很快触发熔断。
//! 锁只在状态检查 / 更新期间持有，Agent 执行期间不持锁。

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ResilienceSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// 熔断参数
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_trial_limit: u32,
}

impl From<&ResilienceSection> for BreakerConfig {
    fn from(section: &ResilienceSection) -> Self {
        Self {
            failure_threshold: section.failure_threshold.max(1),
            recovery_timeout: Duration::from_secs(section.recovery_timeout_secs),
            half_open_trial_limit: section.half_open_trial_limit.max(1),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::from(&ResilienceSection::default())
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    /// half_open 中已放行的试探次数
    half_open_trials: u32,
    /// half_open 中连续成功次数
    half_open_successes: u32,
}

/// 对外只读快照（遥测用）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_trials: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    agent: String,
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(agent: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            agent: agent.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                half_open_trials: 0,
                half_open_successes: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 是否放行本次调用；open 且已过恢复期时顺带切到 half_open 并消耗一次试探额度
    pub fn can_execute(&self) -> bool {
        let mut s = self.lock();
        match s.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let recovered = s
                    .last_failure
                    .map_or(true, |t| t.elapsed() > self.config.recovery_timeout);
                if !recovered {
                    return false;
                }
                tracing::info!("Circuit for {} half-open, allowing trial calls", self.agent);
                s.state = CircuitState::HalfOpen;
                s.half_open_trials = 1;
                s.half_open_successes = 0;
                true
            }
            CircuitState::HalfOpen => {
                if s.half_open_trials < self.config.half_open_trial_limit {
                    s.half_open_trials += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// 归还一次未真正执行的试探额度（限流拒绝、不计入熔断的错误）
    pub fn release_trial(&self) {
        let mut s = self.lock();
        if s.state == CircuitState::HalfOpen {
            s.half_open_trials = s.half_open_trials.saturating_sub(1);
        }
    }

    pub fn record_success(&self) {
        let mut s = self.lock();
        match s.state {
            CircuitState::HalfOpen => {
                s.half_open_successes += 1;
                if s.half_open_successes >= self.config.half_open_trial_limit {
                    tracing::info!("Circuit for {} closed after successful trials", self.agent);
                    s.state = CircuitState::Closed;
                    s.consecutive_failures = 0;
                    s.half_open_trials = 0;
                    s.half_open_successes = 0;
                }
            }
            CircuitState::Closed | CircuitState::Open => {
                s.consecutive_failures = s.consecutive_failures.saturating_sub(1);
            }
        }
    }

    pub fn record_failure(&self) {
        let mut s = self.lock();
        s.consecutive_failures += 1;
        s.last_failure = Some(Instant::now());
        match s.state {
            CircuitState::Closed if s.consecutive_failures >= self.config.failure_threshold => {
                tracing::warn!(
                    "Circuit for {} opened after {} consecutive failures",
                    self.agent,
                    s.consecutive_failures
                );
                s.state = CircuitState::Open;
            }
            CircuitState::HalfOpen => {
                tracing::warn!("Circuit for {} re-opened: trial call failed", self.agent);
                s.state = CircuitState::Open;
                s.half_open_trials = 0;
                s.half_open_successes = 0;
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let s = self.lock();
        CircuitSnapshot {
            state: s.state,
            consecutive_failures: s.consecutive_failures,
            half_open_trials: s.half_open_trials,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery_ms: u64, trials: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "deep_agent",
            BreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_millis(recovery_ms),
                half_open_trial_limit: trials,
            },
        )
    }

    #[test]
    fn test_trips_after_threshold_failures() {
        let cb = breaker(3, 60_000, 1);
        cb.record_failure();
        cb.record_failure();
        assert!(cb.can_execute());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_success_decrements_instead_of_reset() {
        let cb = breaker(3, 60_000, 1);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.snapshot().consecutive_failures, 1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_success_floors_at_zero() {
        let cb = breaker(3, 60_000, 1);
        cb.record_success();
        cb.record_success();
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_recovery_moves_to_half_open() {
        let cb = breaker(2, 30, 2);
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.can_execute());
        std::thread::sleep(Duration::from_millis(50));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_trial_budget_and_close() {
        let cb = breaker(1, 10, 2);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.can_execute());
        assert!(cb.can_execute());
        assert!(!cb.can_execute(), "trial budget exhausted");
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
        assert!(cb.can_execute());
    }

    #[test]
    fn test_released_trial_can_be_reused() {
        let cb = breaker(1, 10, 1);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.can_execute());
        assert!(!cb.can_execute());
        cb.release_trial();
        assert_eq!(cb.snapshot().half_open_trials, 0);
        assert!(cb.can_execute());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_release_outside_half_open_is_noop() {
        let cb = breaker(3, 60_000, 1);
        cb.release_trial();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().half_open_trials, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(1, 10, 2);
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.can_execute());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }
}
