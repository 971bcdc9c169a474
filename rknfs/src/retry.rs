use std::time::Duration;

use common::{NfsRequest, NfsResponse};
use log::warn;
use tokio::time::{self, Instant};

use crate::error::{ClientError, TransportError};
use crate::transport::Transport;

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// How long one attempt may take and when to stop retrying.
///
/// With neither `max_attempts` nor `deadline` set a call retries forever.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub rpc_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_attempts: Option<u32>,
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_attempts: None,
            deadline: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn out_of_attempts(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Wraps a [`Transport`] with a per-attempt timeout and doubling backoff.
///
/// Only transport failures are retried, and of those not a request that
/// cannot be encoded. A reply from the server, including a failure status,
/// ends the call.
pub struct RetryingCaller<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryingCaller<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn call(&self, req: &NfsRequest) -> Result<NfsResponse, ClientError> {
        let procedure = req.procedure();
        let started = Instant::now();
        let give_up_at = self.policy.deadline.map(|d| started + d);
        let mut backoff = self.policy.initial_backoff;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let mut budget = self.policy.rpc_timeout;
            if let Some(end) = give_up_at {
                budget = budget.min(end.saturating_duration_since(Instant::now()));
            }

            let err = match time::timeout(budget, self.transport.call(req)).await {
                Ok(Ok(resp)) => return Ok(resp),
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout(budget),
            };
            if !err.is_retryable() {
                warn!("{procedure}: not retrying: {err}");
                return Err(ClientError::NotRetryable {
                    procedure,
                    source: err,
                });
            }

            let past_deadline = give_up_at.is_some_and(|end| Instant::now() + backoff >= end);
            if self.policy.out_of_attempts(attempts) || past_deadline {
                warn!("{procedure}: giving up after {attempts} attempts: {err}");
                return Err(ClientError::RetriesExhausted {
                    procedure,
                    attempts,
                    last: err,
                });
            }

            warn!("{procedure}: attempt {attempts} failed ({err}), retrying in {backoff:?}");
            time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }
    }
}
