use tokio::time::sleep;

use crate::{
    decode::{decode, Payload},
    request::RequestDescriptor,
    transport::Transport,
    ApiError, Result, RetryPolicy,
};

/// Runs a request through a [`Transport`] with bounded, sequential attempts.
pub struct RetryCoordinator<'a> {
    transport: &'a dyn Transport,
}

impl<'a> RetryCoordinator<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }

    /// Executes `request` and decodes the first successful response.
    ///
    /// Server and network failures are retried while attempts remain, waiting
    /// `base_delay_ms × attempt` in between. Client errors, timeouts and
    /// decode errors end the call at once. A timeout is terminal on purpose:
    /// the per-attempt deadline already bounds how long a caller waits.
    pub async fn execute(
        &self,
        request: &RequestDescriptor,
        policy: RetryPolicy,
    ) -> Result<Payload> {
        let max_attempts = if request.idempotent {
            policy.max_attempts
        } else {
            policy.max_attempts.min(1)
        };

        let mut last_error = None;
        for attempt in 1..=max_attempts {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                method = %request.method,
                url = %request.url,
                attempt,
                max_attempts,
                "sending request"
            );

            match self.transport.attempt(request).await {
                Ok(raw) => return decode(raw),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    if attempt < max_attempts {
                        let delay = policy.delay_after(attempt);
                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "retrying request"
                        );
                        sleep(delay).await;
                    } else {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            error = %err,
                            attempts = attempt,
                            "request failed after final attempt"
                        );
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or(ApiError::RequestFailed))
    }
}
