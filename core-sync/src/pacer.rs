//! Rate limiting between drained items.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// How fast the drain loop may hand items to providers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PacingPolicy {
    /// No delay between items.
    Unlimited,
    /// At least this long between the start of consecutive items.
    FixedInterval(Duration),
    /// Bursts of up to `capacity` items, refilled at `refill_per_sec`.
    TokenBucket { capacity: u32, refill_per_sec: f64 },
}

impl Default for PacingPolicy {
    fn default() -> Self {
        PacingPolicy::FixedInterval(Duration::from_millis(100))
    }
}

impl PacingPolicy {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            PacingPolicy::TokenBucket { capacity, .. } if *capacity == 0 => {
                Err("Token bucket capacity must be greater than 0".to_string())
            }
            PacingPolicy::TokenBucket { refill_per_sec, .. }
                if !(refill_per_sec.is_finite() && *refill_per_sec > 0.0) =>
            {
                Err("Token bucket refill rate must be a positive number".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
struct PacerState {
    tokens: f64,
    last: Option<Instant>,
}

/// Applies a [`PacingPolicy`]; call [`acquire`](Pacer::acquire) before each item.
#[derive(Debug)]
pub struct Pacer {
    policy: PacingPolicy,
    state: Mutex<PacerState>,
}

impl Pacer {
    pub fn new(policy: PacingPolicy) -> Self {
        let tokens = match policy {
            PacingPolicy::TokenBucket { capacity, .. } => f64::from(capacity),
            _ => 0.0,
        };
        Self {
            policy,
            state: Mutex::new(PacerState { tokens, last: None }),
        }
    }

    pub fn policy(&self) -> PacingPolicy {
        self.policy
    }

    /// Wait until the next item may start.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        match self.policy {
            PacingPolicy::Unlimited => {}
            PacingPolicy::FixedInterval(interval) => {
                if let Some(last) = state.last {
                    sleep_until(last + interval).await;
                }
                state.last = Some(Instant::now());
            }
            PacingPolicy::TokenBucket {
                capacity,
                refill_per_sec,
            } => {
                let now = Instant::now();
                if let Some(last) = state.last {
                    let refill = now.duration_since(last).as_secs_f64() * refill_per_sec;
                    state.tokens = (state.tokens + refill).min(f64::from(capacity));
                }
                state.last = Some(now);

                if state.tokens < 1.0 {
                    let wait = Duration::from_secs_f64((1.0 - state.tokens) / refill_per_sec);
                    sleep_until(now + wait).await;
                    state.tokens = 1.0;
                    state.last = Some(now + wait);
                }
                state.tokens -= 1.0;
            }
        }
    }
}
