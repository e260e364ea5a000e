//! Rate-limit-aware outbound dispatch.
//!
//! Every outbound operation goes through [`RateLimitedDispatcher`]. A rate-limited attempt waits
//! the policy interval (or the server's retry hint when longer, up to `max_delay`) and retries; after
//! `max_attempts` rate-limited attempts it gives up with [`DispatchError::RateLimitExhausted`].
//! Any other failure is returned immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use relay_core::{OutboundMessage, SendResponse, Transport, TransportError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Upper bound on a single wait, whatever the server asks for.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
            max_delay: Self::DEFAULT_MAX_DELAY.max(interval),
        }
    }

    /// Caps each wait at `max_delay` (never below the interval).
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.max(self.interval);
        self
    }

    /// Wait before the next attempt: the fixed interval, or the server hint if longer, capped at
    /// `max_delay`.
    pub fn delay_for(&self, retry_after: Option<Duration>) -> Duration {
        retry_after
            .map_or(self.interval, |hint| hint.max(self.interval))
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL, Self::DEFAULT_MAX_ATTEMPTS)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Still rate limited after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },
}

pub struct RateLimitedDispatcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RateLimitedDispatcher {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn send(&self, message: &OutboundMessage) -> Result<SendResponse, DispatchError> {
        self.with_ratelimit("send_message", || self.transport.send_message(message))
            .await
    }

    pub async fn send_reaction(
        &self,
        room_id: &str,
        event_id: &str,
        key: &str,
    ) -> Result<SendResponse, DispatchError> {
        self.with_ratelimit("send_reaction", || {
            self.transport.send_reaction(room_id, event_id, key)
        })
        .await
    }

    pub async fn join_room(&self, room_id_or_alias: &str) -> Result<String, DispatchError> {
        self.with_ratelimit("join_room", || self.transport.join_room(room_id_or_alias))
            .await
    }

    pub async fn resolve_room_alias(&self, alias: &str) -> Result<String, DispatchError> {
        self.with_ratelimit("resolve_room_alias", || {
            self.transport.resolve_room_alias(alias)
        })
        .await
    }

    pub async fn create_direct_room(&self, user_id: &str) -> Result<String, DispatchError> {
        self.with_ratelimit("create_direct_room", || {
            self.transport.create_direct_room(user_id)
        })
        .await
    }

    async fn with_ratelimit<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Err(TransportError::RateLimited { retry_after }) => {
                    if attempt >= self.policy.max_attempts {
                        warn!(operation, attempts = attempt, "Giving up after repeated rate limiting");
                        return Err(DispatchError::RateLimitExhausted { attempts: attempt });
                    }
                    let delay = self.policy.delay_for(retry_after);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    debug!(operation, attempt, error = %e, "Transport call failed");
                    return Err(DispatchError::Transport(e));
                }
                Ok(value) => return Ok(value),
            }
        }
    }
}
