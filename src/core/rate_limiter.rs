//! 限流器（每个 Agent 一个）
//!
//! 滑动窗口：记录窗口内每次放行的时间戳，惰性剪掉超过 window 的旧记录。
//! 窗口满时可动用突发额度；突发额度在窗口清空（下一次重置机会）时归还。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::RateLimitSection;

#[derive(Debug, Clone, Copy)]
pub struct LimiterConfig {
    pub max_requests: usize,
    pub window: Duration,
    pub burst_allowance: u32,
}

impl From<&RateLimitSection> for LimiterConfig {
    fn from(section: &RateLimitSection) -> Self {
        Self {
            max_requests: section.max_requests,
            window: Duration::from_secs(section.window_secs),
            burst_allowance: section.burst_allowance,
        }
    }
}

#[derive(Debug, Default)]
struct WindowState {
    admitted: VecDeque<Instant>,
    burst_used: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    agent: String,
    config: LimiterConfig,
    inner: Mutex<WindowState>,
}

impl RateLimiter {
    pub fn new(agent: impl Into<String>, config: LimiterConfig) -> Self {
        Self {
            agent: agent.into(),
            config,
            inner: Mutex::new(WindowState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn prune(&self, state: &mut WindowState, now: Instant) {
        while let Some(&oldest) = state.admitted.front() {
            if now.duration_since(oldest) >= self.config.window {
                state.admitted.pop_front();
            } else {
                break;
            }
        }
        if state.admitted.is_empty() {
            state.burst_used = 0;
        }
    }

    /// 准入检查；放行时记录时间戳
    pub fn can_proceed(&self) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        self.prune(&mut state, now);

        if state.admitted.len() < self.config.max_requests {
            state.admitted.push_back(now);
            return true;
        }
        if state.burst_used < self.config.burst_allowance {
            state.burst_used += 1;
            state.admitted.push_back(now);
            tracing::info!(
                "Rate limiter for {} using burst allowance ({}/{})",
                self.agent,
                state.burst_used,
                self.config.burst_allowance
            );
            return true;
        }
        tracing::debug!("Rate limiter for {} rejected request", self.agent);
        false
    }

    /// 距最早一条窗口记录过期还有多久；窗口为空返回 0
    pub fn wait_time(&self) -> Duration {
        let now = Instant::now();
        let mut state = self.lock();
        self.prune(&mut state, now);
        state
            .admitted
            .front()
            .map(|&oldest| self.config.window.saturating_sub(now.duration_since(oldest)))
            .unwrap_or(Duration::ZERO)
    }

    /// 被拒后最多等待 max_wait 再试一次；仍被拒即为硬失败
    pub async fn admit(&self, max_wait: Duration) -> bool {
        if self.can_proceed() {
            return true;
        }
        let wait = self.wait_time().min(max_wait);
        tracing::debug!("Rate limited {}, retrying in {:?}", self.agent, wait);
        tokio::time::sleep(wait).await;
        self.can_proceed()
    }
}
