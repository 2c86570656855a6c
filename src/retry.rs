//! Retry policies for the supervised reconnecting session (C9).
//!
//! Only fixed, exponential, and linear backoff are supported — arbitrary
//! user-supplied backoff functions were an open question in the original
//! design and are decided against here; see DESIGN.md.

use std::time::Duration;

/// A backoff schedule.
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    Fixed { delay: Duration },
    ExponentialBackoff { base: Duration, max: Duration },
    LinearBackoff { step: Duration, max: Duration },
}

impl RetryStrategy {
    fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed { delay } => *delay,
            RetryStrategy::ExponentialBackoff { base, max } => {
                let factor = 2u32.saturating_pow(attempt.min(16));
                (*base * factor).min(*max)
            }
            RetryStrategy::LinearBackoff { step, max } => (*step * (attempt + 1)).min(*max),
        }
    }
}

/// How many attempts a [`RetryExecutor`] should make before giving up.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub strategy: RetryStrategy,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        RetryPolicy {
            strategy: RetryStrategy::Fixed { delay },
            max_attempts,
        }
    }

    pub fn exponential(base: Duration, max: Duration, max_attempts: u32) -> Self {
        RetryPolicy {
            strategy: RetryStrategy::ExponentialBackoff { base, max },
            max_attempts,
        }
    }

    pub fn linear(step: Duration, max: Duration, max_attempts: u32) -> Self {
        RetryPolicy {
            strategy: RetryStrategy::LinearBackoff { step, max },
            max_attempts,
        }
    }

    /// A policy that never retries; used as the default so reconnection is
    /// opt-in.
    pub fn none() -> Self {
        RetryPolicy {
            strategy: RetryStrategy::Fixed {
                delay: Duration::ZERO,
            },
            max_attempts: 1,
        }
    }
}

/// Drives an async operation through a [`RetryPolicy`], sleeping the
/// strategy's backoff between attempts.
pub struct RetryExecutor<'a> {
    policy: &'a RetryPolicy,
}

impl<'a> RetryExecutor<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        RetryExecutor { policy }
    }

    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        return Err(e);
                    }
                    tokio::time::sleep(self.policy.strategy.delay_for(attempt - 1)).await;
                }
            }
        }
    }
}
