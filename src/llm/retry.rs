//! 重试执行器
//!
//! 包裹后端调用：仅 429/500/503 或报文中出现过载/限流字样时重试，
//! 固定延时表（默认 1s/3s/5s，不指数、不加抖动，保证交互延迟上界可预期）；
//! 重试耗尽后原样抛出最后一次错误，调用方仍能区分错误类别。

use std::future::Future;
use std::time::Duration;

use crate::core::AgentError;

/// 重试策略：总尝试次数与失败后延时表（第 i 次失败后睡 delays[i]）
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5),
            ],
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay_secs: &[u64]) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delays: delay_secs.iter().map(|s| Duration::from_secs(*s)).collect(),
        }
    }

    /// 只有传输类错误才可能重试：429/500/503，或报文提示过载/限流
    pub fn is_retryable(err: &AgentError) -> bool {
        match err {
            AgentError::Transport { status, message } => {
                if matches!(status, Some(429) | Some(500) | Some(503)) {
                    return true;
                }
                let m = message.to_lowercase();
                m.contains("overload")
                    || m.contains("rate limit")
                    || m.contains("rate-limit")
                    || m.contains("too many requests")
            }
            _ => false,
        }
    }

    /// 执行 op，按策略重试；不可重试错误立即返回，耗尽后返回最后一次错误
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, AgentError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !Self::is_retryable(&e) {
                        return Err(e);
                    }
                    let delay = self
                        .delays
                        .get(attempt - 1)
                        .copied()
                        .unwrap_or_else(|| *self.delays.last().unwrap_or(&Duration::from_secs(1)));
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "retryable backend error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
