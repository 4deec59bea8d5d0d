use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, SubtransError};

/// `base * 2^retry`
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    pub fn delay(&self, retry: u32) -> Duration {
        self.base.saturating_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX))
    }
}

/// Uniform random delay in `[min_ms, max_ms]`
pub fn jitter(min_ms: u64, max_ms: u64) -> Duration {
    if min_ms >= max_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

/// Run `op` up to `max_attempts` times.
///
/// After a failure `delay_for(error, attempt)` decides: `None` gives up at
/// once, `Some(delay)` sleeps and tries again. No sleep follows the final
/// attempt. The last error is returned on exhaustion.
pub async fn retry_with<T, Op, Fut, Delay>(max_attempts: u32, mut op: Op, mut delay_for: Delay) -> Result<T>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    Delay: FnMut(&SubtransError, u32) -> Option<Duration>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt + 1 >= max_attempts {
            return Err(err);
        }

        match delay_for(&err, attempt) {
            Some(delay) => {
                debug!("Attempt {} failed ({}), retrying in {:?}", attempt + 1, err, delay);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            None => return Err(err),
        }
    }
}
