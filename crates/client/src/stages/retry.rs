use tracing::{debug, warn};

use geos3_protocol::Request;

use crate::ClientError;
use crate::pipeline::{Directives, Next, Stage, StageFuture};
use crate::retry::{AttemptBudget, RetryDecision, RetryPolicy};

/// Re-runs the downstream chain while the policy allows it.
///
/// Each attempt starts from the stage's input directives, so routing and
/// signing are redone with fresh health and a fresh timestamp.
#[derive(Debug, Clone)]
pub struct RetryStage {
    policy: RetryPolicy,
}

impl RetryStage {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl Stage for RetryStage {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn retries(&self) -> bool {
        true
    }

    fn handle<'a>(
        &'a self,
        request: &'a Request,
        directives: Directives,
        next: Next<'a>,
    ) -> StageFuture<'a> {
        Box::pin(async move {
            let mut budget = AttemptBudget::new();
            loop {
                budget.record_attempt();
                let attempt = Directives {
                    attempt: budget.attempts(),
                    ..directives.clone()
                };
                let error = match next.run(request, attempt).await {
                    Ok(response) => return Ok(response),
                    Err(e) => e,
                };
                if matches!(error, ClientError::ChecksumMismatch { .. }) {
                    budget.record_mismatch();
                }

                match self.policy.decide(&error, request.retry_safe(), &budget) {
                    RetryDecision::Fail => {
                        debug!(
                            method = %request.method(),
                            path = %request.path(),
                            attempts = budget.attempts(),
                            error = %error,
                            "request failed"
                        );
                        return Err(error);
                    }
                    RetryDecision::RetryNow => {
                        warn!(
                            method = %request.method(),
                            path = %request.path(),
                            attempt = budget.attempts(),
                            error = %error,
                            "retrying request"
                        );
                    }
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            method = %request.method(),
                            path = %request.path(),
                            attempt = budget.attempts(),
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "retrying request after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        })
    }
}
