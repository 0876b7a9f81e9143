use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::coordination::ShutdownListener;
use crate::domain::{SignalAssessment, Status};
use crate::error::ClassificationError;

use super::backoff::RetryPolicy;
use super::traits::ClassificationProvider;

/// Result of classifying one status, retries included
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationOutcome {
    Assessed(SignalAssessment),
    /// Non-retryable provider failure; the status is a no-action skip
    Rejected(ClassificationError),
    /// Retryable failures used up the attempt count or the retry budget
    Exhausted { attempts: u32, last_error: ClassificationError },
    /// Shutdown arrived while waiting to retry
    Abandoned,
}

/// Wraps the classification provider with per-call timeouts and bounded retries
pub struct ClassificationAdapter {
    provider: Arc<dyn ClassificationProvider>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl ClassificationAdapter {
    pub fn new(
        provider: Arc<dyn ClassificationProvider>,
        policy: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            policy,
            call_timeout,
        }
    }

    pub async fn classify(
        &self,
        status: &Status,
        shutdown: &mut ShutdownListener,
    ) -> ClassificationOutcome {
        let mut attempts = 0u32;
        let mut waited = Duration::ZERO;

        loop {
            attempts += 1;
            let result = timeout(self.call_timeout, self.provider.classify_text(&status.content))
                .await
                .unwrap_or_else(|_| {
                    Err(ClassificationError::retryable(format!(
                        "classification timed out after {:?}",
                        self.call_timeout
                    )))
                });

            let error = match result {
                Ok(assessment) => {
                    debug!(
                        status_id = %status.id,
                        attempts,
                        impact = %assessment.impact(),
                        direction = %assessment.direction(),
                        confidence = %assessment.confidence(),
                        "status classified"
                    );
                    return ClassificationOutcome::Assessed(assessment);
                }
                Err(e) if !e.retryable => return ClassificationOutcome::Rejected(e),
                Err(e) => e,
            };

            let delay = self.policy.jittered_delay(attempts);
            if !self.policy.allows_retry(attempts, waited, delay) {
                return ClassificationOutcome::Exhausted {
                    attempts,
                    last_error: error,
                };
            }

            warn!(
                status_id = %status.id,
                attempt = attempts,
                "classification failed: {}. Retrying in {:?}",
                error.message,
                delay
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.cancelled() => return ClassificationOutcome::Abandoned,
            }
            waited += delay;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{ShutdownHandle, ShutdownSignal};
    use crate::domain::{Confidence, Direction, Impact, StatusId};
    use crate::strategy::traits::MockClassificationProvider;
    use mockall::Sequence;

    fn status() -> Status {
        Status {
            id: StatusId::new("100").unwrap(),
            created_at: None,
            content: "Bitcoin reserve announced".to_string(),
            account: None,
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
            budget: Duration::from_secs(1),
        }
    }

    fn assessment() -> SignalAssessment {
        SignalAssessment::new(["market"], Impact::High, Direction::Up, Confidence::ZERO)
    }

    #[tokio::test]
    async fn test_retries_rate_limits_then_succeeds() {
        let mut provider = MockClassificationProvider::new();
        let mut seq = Sequence::new();
        provider
            .expect_classify_text()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(ClassificationError::retryable("429")));
        provider
            .expect_classify_text()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(assessment()));

        let adapter = ClassificationAdapter::new(Arc::new(provider), policy(4), Duration::from_secs(1));
        let mut listener = ShutdownHandle::new().listener();

        assert_eq!(
            adapter.classify(&status(), &mut listener).await,
            ClassificationOutcome::Assessed(assessment())
        );
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let mut provider = MockClassificationProvider::new();
        provider
            .expect_classify_text()
            .times(1)
            .returning(|_| Err(ClassificationError::permanent("invalid json")));

        let adapter = ClassificationAdapter::new(Arc::new(provider), policy(4), Duration::from_secs(1));
        let mut listener = ShutdownHandle::new().listener();

        assert!(matches!(
            adapter.classify(&status(), &mut listener).await,
            ClassificationOutcome::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let mut provider = MockClassificationProvider::new();
        provider
            .expect_classify_text()
            .times(3)
            .returning(|_| Err(ClassificationError::retryable("503")));

        let adapter = ClassificationAdapter::new(Arc::new(provider), policy(3), Duration::from_secs(1));
        let mut listener = ShutdownHandle::new().listener();

        match adapter.classify(&status(), &mut listener).await {
            ClassificationOutcome::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_abandons_pending_retry() {
        let mut provider = MockClassificationProvider::new();
        provider
            .expect_classify_text()
            .times(1)
            .returning(|_| Err(ClassificationError::retryable("timeout")));

        let mut slow = policy(5);
        slow.base_delay = Duration::from_secs(30);
        slow.max_delay = Duration::from_secs(30);
        slow.budget = Duration::from_secs(300);

        let handle = ShutdownHandle::new();
        handle.trigger(ShutdownSignal::Requested);
        let mut listener = handle.listener();

        let adapter = ClassificationAdapter::new(Arc::new(provider), slow, Duration::from_secs(1));
        assert_eq!(
            adapter.classify(&status(), &mut listener).await,
            ClassificationOutcome::Abandoned
        );
    }
}
