//! Exactly-once order execution per status
//!
//! The guard owns every `ExecutionRecord`, drives the retry state machine
//! and enforces single-flight: at most one submission for a status id is in
//! progress at any time, and a terminal record is never resubmitted.

use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::coordination::ShutdownListener;
use crate::domain::{ExecutionRecord, ExecutionState, OrderIntent, StatusId};
use crate::error::{ExecutionError, PostSignalError, Result};
use crate::exchange::{OrderAck, OrderExecutor, PlaceOrderRequest};

use super::backoff::RetryPolicy;
use super::traits::Notifier;

/// Idempotency key for one status of one account, stable across retries and restarts
pub fn idempotency_key(account: &str, status_id: &StatusId) -> String {
    format!("{}:{}", account, status_id)
}

/// Outcome text sent to the notifier
pub fn outcome_message(
    prefix: &str,
    intent: &OrderIntent,
    symbol: &str,
    record: &ExecutionRecord,
) -> String {
    let status = if record.state == ExecutionState::Confirmed {
        "Succeeded"
    } else {
        "Failed"
    };
    format!(
        "{}: {} for {}. Amt: {}, Lev: {}. Status: {}",
        prefix,
        intent.describe(),
        symbol,
        intent.amount(),
        intent.leverage(),
        status
    )
}

/// Removes the in-flight marker when the attempt ends, however it ends
struct InFlight {
    set: Arc<DashSet<StatusId>>,
    id: StatusId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

#[derive(Debug, Clone)]
pub struct GuardSettings {
    pub policy: RetryPolicy,
    /// Timeout for each exchange call
    pub call_timeout: Duration,
    /// Timeout for the outcome notification
    pub notify_timeout: Duration,
    pub notify_prefix: String,
}

pub struct ExecutionGuard {
    executor: Arc<dyn OrderExecutor>,
    notifier: Arc<dyn Notifier>,
    settings: GuardSettings,
    records: DashMap<StatusId, ExecutionRecord>,
    in_flight: Arc<DashSet<StatusId>>,
}

impl ExecutionGuard {
    pub fn new(
        executor: Arc<dyn OrderExecutor>,
        notifier: Arc<dyn Notifier>,
        settings: GuardSettings,
    ) -> Self {
        Self {
            executor,
            notifier,
            settings,
            records: DashMap::new(),
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub fn record(&self, status_id: &StatusId) -> Option<ExecutionRecord> {
        self.records.get(status_id).map(|r| r.value().clone())
    }

    pub fn symbol(&self) -> &str {
        self.executor.symbol()
    }

    /// Drive the order for `status_id` to a terminal state.
    ///
    /// Returns the record as it stands when the guard stops. A record still in
    /// `FailedRetryable` means shutdown interrupted the backoff and the status
    /// must not be treated as finished.
    pub async fn execute(
        &self,
        account: &str,
        status_id: &StatusId,
        intent: &OrderIntent,
        shutdown: &mut ShutdownListener,
    ) -> Result<ExecutionRecord> {
        if let Some(existing) = self.record(status_id) {
            if existing.is_terminal() {
                debug!(status_id = %status_id, state = %existing.state, "already terminal, not resubmitting");
                return Ok(existing);
            }
        }

        if !self.in_flight.insert(status_id.clone()) {
            return Err(PostSignalError::AlreadyInFlight(status_id.to_string()));
        }
        let _in_flight = InFlight {
            set: Arc::clone(&self.in_flight),
            id: status_id.clone(),
        };

        let mut record = self
            .record(status_id)
            .unwrap_or_else(|| ExecutionRecord::new(status_id.clone()));

        let request = PlaceOrderRequest {
            side: intent.side(),
            amount: intent.amount(),
            leverage: intent.leverage(),
            limit_offset: intent.limit_price_offset(),
            idempotency_key: idempotency_key(account, status_id),
        };

        let policy = &self.settings.policy;
        let mut waited = Duration::ZERO;

        loop {
            // Pending: the order may have been sent before a restart.
            // FailedRetryable: an earlier attempt may have landed before failing locally.
            if matches!(record.state, ExecutionState::Pending | ExecutionState::FailedRetryable) {
                if let Some(ack) = self.lookup(&request.idempotency_key).await {
                    info!(
                        status_id = %status_id,
                        order_id = %ack.order_id,
                        attempts = record.attempt_count,
                        "order already at exchange, not resubmitting"
                    );
                    record.confirm(ack.order_id)?;
                    break;
                }
            }

            let attempt = record.begin_attempt(policy.max_attempts)?;
            self.records.insert(status_id.clone(), record.clone());
            info!(
                status_id = %status_id,
                attempt,
                side = %request.side,
                amount = %request.amount,
                leverage = request.leverage,
                "submitting order"
            );

            let result = timeout(self.settings.call_timeout, self.executor.place_order(&request))
                .await
                .unwrap_or_else(|_| {
                    Err(ExecutionError::retryable(format!(
                        "order call timed out after {:?}",
                        self.settings.call_timeout
                    )))
                });

            let error = match result {
                Ok(ack) => {
                    info!(status_id = %status_id, order_id = %ack.order_id, attempt, "order confirmed");
                    record.confirm(ack.order_id)?;
                    break;
                }
                Err(e) if !e.retryable => {
                    error!(status_id = %status_id, attempt, "order rejected: {}", e.message);
                    record.fail_permanent(e.message)?;
                    break;
                }
                Err(e) => e,
            };

            record.fail_retryable(error.message.clone())?;
            self.records.insert(status_id.clone(), record.clone());

            let delay = policy.jittered_delay(attempt);
            if !policy.allows_retry(record.attempt_count, waited, delay) {
                if let Some(ack) = self.lookup(&request.idempotency_key).await {
                    record.confirm(ack.order_id)?;
                } else {
                    error!(status_id = %status_id, attempts = record.attempt_count, "retries exhausted");
                    record.fail_permanent(format!(
                        "retries exhausted after {} attempts: {}",
                        record.attempt_count, error.message
                    ))?;
                }
                break;
            }

            warn!(
                status_id = %status_id,
                attempt,
                "order attempt failed: {}. Retrying in {:?}",
                error.message,
                delay
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.cancelled() => {
                    warn!(status_id = %status_id, "shutdown during backoff, leaving order retryable");
                    return Ok(record);
                }
            }
            waited += delay;
        }

        self.records.insert(status_id.clone(), record.clone());
        self.notify(intent, &record).await;
        Ok(record)
    }

    /// Idempotency lookup. Lookup failures count as not found.
    async fn lookup(&self, key: &str) -> Option<OrderAck> {
        match timeout(self.settings.call_timeout, self.executor.find_order(key)).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!(key, "order lookup failed: {}", e.message);
                None
            }
            Err(_) => {
                warn!(key, "order lookup timed out");
                None
            }
        }
    }

    async fn notify(&self, intent: &OrderIntent, record: &ExecutionRecord) {
        let message = outcome_message(&self.settings.notify_prefix, intent, self.symbol(), record);
        match timeout(self.settings.notify_timeout, self.notifier.send(&message)).await {
            Ok(Ok(())) => debug!(status_id = %record.status_id, "outcome notification sent"),
            Ok(Err(e)) => warn!(status_id = %record.status_id, "{}", e),
            Err(_) => warn!(status_id = %record.status_id, "outcome notification timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{ShutdownHandle, ShutdownSignal};
    use crate::domain::{OrderSide, Tier};
    use crate::error::NotificationError;
    use crate::exchange::ExecutorKind;
    use crate::strategy::traits::MockNotifier;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Executor that replays scripted results
    #[derive(Default)]
    struct ScriptedExecutor {
        script: Mutex<VecDeque<std::result::Result<OrderAck, ExecutionError>>>,
        placed: AtomicU32,
        landed: Mutex<Option<OrderAck>>,
        /// Record an order as landed even when the call reports failure
        land_on_place: bool,
        delay: Duration,
    }

    impl ScriptedExecutor {
        fn new(script: Vec<std::result::Result<OrderAck, ExecutionError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl OrderExecutor for ScriptedExecutor {
        fn kind(&self) -> ExecutorKind {
            ExecutorKind::Paper
        }

        fn symbol(&self) -> &str {
            "tBTCF0:USTF0"
        }

        async fn place_order(
            &self,
            _request: &PlaceOrderRequest,
        ) -> std::result::Result<OrderAck, ExecutionError> {
            self.placed.fetch_add(1, Ordering::SeqCst);
            if self.land_on_place {
                *self.landed.lock().unwrap() = Some(ack("landed-1"));
            }
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(ExecutionError::permanent("script exhausted")))
        }

        async fn find_order(
            &self,
            _key: &str,
        ) -> std::result::Result<Option<OrderAck>, ExecutionError> {
            Ok(self.landed.lock().unwrap().clone())
        }
    }

    fn ack(id: &str) -> OrderAck {
        OrderAck {
            order_id: id.to_string(),
            limit_price: None,
        }
    }

    fn intent() -> OrderIntent {
        OrderIntent::from_tier(OrderSide::Buy, dec!(0.001), 10, dec!(0.005), Tier::High, "default")
    }

    fn settings(max_attempts: u32) -> GuardSettings {
        GuardSettings {
            policy: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: 0.0,
                budget: Duration::from_secs(5),
            },
            call_timeout: Duration::from_secs(1),
            notify_timeout: Duration::from_millis(100),
            notify_prefix: "postsignal".to_string(),
        }
    }

    fn quiet_notifier() -> Arc<MockNotifier> {
        let mut notifier = MockNotifier::new();
        notifier.expect_send().returning(|_| Ok(()));
        Arc::new(notifier)
    }

    fn id(raw: &str) -> StatusId {
        StatusId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_retryable_twice_then_confirmed() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Err(ExecutionError::retryable("timeout")),
            Err(ExecutionError::retryable("timeout")),
            Ok(ack("order-3")),
        ]));
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .times(1)
            .withf(|message| message.ends_with("Status: Succeeded"))
            .returning(|_| Ok(()));

        let guard = ExecutionGuard::new(executor.clone(), Arc::new(notifier), settings(5));
        let mut listener = ShutdownHandle::new().listener();

        let record = guard.execute("acct", &id("100"), &intent(), &mut listener).await.unwrap();
        assert_eq!(record.state, ExecutionState::Confirmed);
        assert_eq!(record.attempt_count, 3);
        assert_eq!(record.order_id.as_deref(), Some("order-3"));
        assert_eq!(executor.placed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_rejection_single_attempt() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Err(ExecutionError::permanent(
            "insufficient balance",
        ))]));
        let guard = ExecutionGuard::new(executor.clone(), quiet_notifier(), settings(5));
        let mut listener = ShutdownHandle::new().listener();

        let record = guard.execute("acct", &id("100"), &intent(), &mut listener).await.unwrap();
        assert_eq!(record.state, ExecutionState::FailedPermanent);
        assert_eq!(record.attempt_count, 1);
        assert_eq!(executor.placed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_permanently() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Err(ExecutionError::retryable("busy")),
            Err(ExecutionError::retryable("busy")),
            Err(ExecutionError::retryable("busy")),
        ]));
        let guard = ExecutionGuard::new(executor.clone(), quiet_notifier(), settings(3));
        let mut listener = ShutdownHandle::new().listener();

        let record = guard.execute("acct", &id("100"), &intent(), &mut listener).await.unwrap();
        assert_eq!(record.state, ExecutionState::FailedPermanent);
        assert_eq!(record.attempt_count, 3);
        assert!(record.last_error.unwrap().contains("retries exhausted"));
    }

    #[tokio::test]
    async fn test_terminal_record_is_never_resubmitted() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(ack("order-1")), Ok(ack("order-2"))]));
        let guard = ExecutionGuard::new(executor.clone(), quiet_notifier(), settings(5));
        let mut listener = ShutdownHandle::new().listener();

        guard.execute("acct", &id("100"), &intent(), &mut listener).await.unwrap();
        let again = guard.execute("acct", &id("100"), &intent(), &mut listener).await.unwrap();

        assert_eq!(again.order_id.as_deref(), Some("order-1"));
        assert_eq!(executor.placed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_execution_is_single_flight() {
        let executor = Arc::new(ScriptedExecutor {
            script: Mutex::new(vec![Ok(ack("order-1")), Ok(ack("order-2"))].into()),
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let guard = ExecutionGuard::new(executor.clone(), quiet_notifier(), settings(5));
        let handle = ShutdownHandle::new();
        let (mut l1, mut l2) = (handle.listener(), handle.listener());
        let status_id = id("100");
        let order = intent();

        let (first, second) = tokio::join!(
            guard.execute("acct", &status_id, &order, &mut l1),
            guard.execute("acct", &status_id, &order, &mut l2),
        );

        assert!(first.is_ok());
        assert!(matches!(second, Err(PostSignalError::AlreadyInFlight(_))));
        assert_eq!(executor.placed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lookup_confirms_order_that_landed() {
        let executor = Arc::new(ScriptedExecutor {
            script: Mutex::new(vec![Err(ExecutionError::retryable("timeout"))].into()),
            land_on_place: true,
            ..Default::default()
        });
        let guard = ExecutionGuard::new(executor.clone(), quiet_notifier(), settings(5));
        let mut listener = ShutdownHandle::new().listener();

        let record = guard.execute("acct", &id("100"), &intent(), &mut listener).await.unwrap();
        assert_eq!(record.state, ExecutionState::Confirmed);
        assert_eq!(record.order_id.as_deref(), Some("landed-1"));
        assert_eq!(record.attempt_count, 1);
        assert_eq!(executor.placed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_order_placed_before_restart_is_not_resent() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(ack("duplicate"))]));
        *executor.landed.lock().unwrap() = Some(ack("before-crash"));
        let guard = ExecutionGuard::new(executor.clone(), quiet_notifier(), settings(5));
        let mut listener = ShutdownHandle::new().listener();

        let record = guard.execute("acct", &id("100"), &intent(), &mut listener).await.unwrap();
        assert_eq!(record.state, ExecutionState::Confirmed);
        assert_eq!(record.order_id.as_deref(), Some("before-crash"));
        assert_eq!(record.attempt_count, 0);
        assert_eq!(executor.placed.load(Ordering::SeqCst), 0);
        assert_eq!(guard.record(&id("100")), Some(record));
    }

    #[tokio::test]
    async fn test_shutdown_leaves_record_retryable() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Err(ExecutionError::retryable("busy"))]));
        let mut notifier = MockNotifier::new();
        notifier.expect_send().times(0);

        let mut slow = settings(5);
        slow.policy.base_delay = Duration::from_secs(30);
        slow.policy.max_delay = Duration::from_secs(30);
        slow.policy.budget = Duration::from_secs(300);

        let guard = ExecutionGuard::new(executor, Arc::new(notifier), slow);
        let handle = ShutdownHandle::new();
        handle.trigger(ShutdownSignal::Requested);
        let mut listener = handle.listener();

        let record = guard.execute("acct", &id("100"), &intent(), &mut listener).await.unwrap();
        assert_eq!(record.state, ExecutionState::FailedRetryable);
        assert!(!record.is_terminal());
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_reopen_state() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(ack("order-1"))]));
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .times(1)
            .returning(|_| Err(NotificationError("sms gateway down".to_string())));

        let guard = ExecutionGuard::new(executor, Arc::new(notifier), settings(5));
        let mut listener = ShutdownHandle::new().listener();

        let record = guard.execute("acct", &id("100"), &intent(), &mut listener).await.unwrap();
        assert_eq!(record.state, ExecutionState::Confirmed);
        assert_eq!(guard.record(&id("100")).unwrap().state, ExecutionState::Confirmed);
    }

    #[test]
    fn test_outcome_message_format() {
        let mut record = ExecutionRecord::new(id("100"));
        record.begin_attempt(1).unwrap();
        record.fail_permanent("rejected").unwrap();

        assert_eq!(
            outcome_message("postsignal", &intent(), "tBTCF0:USTF0", &record),
            "postsignal: BUY (high confidence UP) for tBTCF0:USTF0. Amt: 0.001, Lev: 10. Status: Failed"
        );
    }
}
