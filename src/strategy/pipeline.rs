//! Poll loop tying fetch, classification, decision and execution together
//!
//! Posts are processed one at a time in ascending id order. The cursor moves
//! past a post only after that post is terminal and the new cursor has been
//! durably stored.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::AppConfig;
use crate::coordination::{ShutdownHandle, ShutdownListener};
use crate::domain::{Cursor, ExecutionState, Status, StatusId};
use crate::error::{FetchError, PersistenceError, PostSignalError, Result};
use crate::exchange::OrderExecutor;
use crate::persistence::CursorStore;

use super::backoff::RetryPolicy;
use super::classification::{ClassificationAdapter, ClassificationOutcome};
use super::decision::{Decision, DecisionEngine};
use super::execution_guard::{ExecutionGuard, GuardSettings};
use super::normalizer::normalize;
use super::traits::{ClassificationProvider, Notifier, StatusSource};

/// What happened to one post in a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PostOutcome {
    Executed {
        status_id: StatusId,
        order_id: String,
        attempts: u32,
    },
    Skipped {
        status_id: StatusId,
        reason: String,
    },
    Failed {
        status_id: StatusId,
        reason: String,
        attempts: u32,
    },
    /// Shutdown interrupted a retry; the post will be processed again
    Abandoned { status_id: StatusId },
}

impl PostOutcome {
    pub fn status_id(&self) -> &StatusId {
        match self {
            PostOutcome::Executed { status_id, .. }
            | PostOutcome::Skipped { status_id, .. }
            | PostOutcome::Failed { status_id, .. }
            | PostOutcome::Abandoned { status_id } => status_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PostOutcome::Abandoned { .. })
    }
}

impl std::fmt::Display for PostOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostOutcome::Executed { status_id, order_id, attempts } => {
                write!(f, "{}: executed as {} after {} attempt(s)", status_id, order_id, attempts)
            }
            PostOutcome::Skipped { status_id, reason } => write!(f, "{}: skipped ({})", status_id, reason),
            PostOutcome::Failed { status_id, reason, attempts } => {
                write!(f, "{}: failed after {} attempt(s) ({})", status_id, attempts, reason)
            }
            PostOutcome::Abandoned { status_id } => write!(f, "{}: abandoned at shutdown", status_id),
        }
    }
}

/// Per-cycle result for operational visibility
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Cursor after the cycle; equal to the input when nothing finished
    pub cursor: Cursor,
    /// Raw records returned by the source
    pub fetched: usize,
    pub parse_failures: usize,
    pub outcomes: Vec<PostOutcome>,
    /// Retryable fetch failure that ended the cycle early
    pub fetch_error: Option<String>,
}

impl CycleReport {
    fn empty(cursor: Cursor) -> Self {
        Self {
            cursor,
            fetched: 0,
            parse_failures: 0,
            outcomes: Vec::new(),
            fetch_error: None,
        }
    }

    pub fn executed(&self) -> usize {
        self.count(|o| matches!(o, PostOutcome::Executed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, PostOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, PostOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&PostOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }

    /// One-line summary for the cycle log
    pub fn summary(&self) -> String {
        format!(
            "cursor={} fetched={} parse_failures={} executed={} skipped={} failed={}{}",
            self.cursor,
            self.fetched,
            self.parse_failures,
            self.executed(),
            self.skipped(),
            self.failed(),
            self.fetch_error
                .as_deref()
                .map(|e| format!(" fetch_error=\"{}\"", e))
                .unwrap_or_default()
        )
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub account: String,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub cursor_write_timeout: Duration,
    pub cursor_retry_backoff: Duration,
    pub cursor_max_write_attempts: u32,
    pub initial_since_id: Option<StatusId>,
    pub start_from_latest: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            account: config.source.account.clone(),
            poll_interval: config.source.poll_interval(),
            // the source walks several pages per fetch
            fetch_timeout: config.source.request_timeout() * (config.source.max_pages.max(1) + 1),
            cursor_write_timeout: Duration::from_millis(config.cursor.write_timeout_ms),
            cursor_retry_backoff: Duration::from_millis(config.cursor.retry_backoff_ms),
            cursor_max_write_attempts: config.cursor.max_write_attempts.max(1),
            initial_since_id: config
                .source
                .initial_since_id
                .as_deref()
                .and_then(StatusId::new),
            start_from_latest: config.source.start_from_latest,
        }
    }
}

/// External collaborators the pipeline is assembled from
pub struct Collaborators {
    pub source: Arc<dyn StatusSource>,
    pub classifier: Arc<dyn ClassificationProvider>,
    pub executor: Arc<dyn OrderExecutor>,
    pub notifier: Arc<dyn Notifier>,
    pub cursor_store: Arc<dyn CursorStore>,
}

pub struct Pipeline {
    settings: PipelineSettings,
    source: Arc<dyn StatusSource>,
    classifier: ClassificationAdapter,
    engine: DecisionEngine,
    guard: ExecutionGuard,
    cursor_store: Arc<dyn CursorStore>,
    shutdown: ShutdownHandle,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        source: Arc<dyn StatusSource>,
        classifier: ClassificationAdapter,
        engine: DecisionEngine,
        guard: ExecutionGuard,
        cursor_store: Arc<dyn CursorStore>,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            settings,
            source,
            classifier,
            engine,
            guard,
            cursor_store,
            shutdown,
        }
    }

    /// Assemble a pipeline from configuration and its collaborators
    pub fn from_config(config: &AppConfig, parts: Collaborators, shutdown: ShutdownHandle) -> Self {
        let classifier = ClassificationAdapter::new(
            parts.classifier,
            RetryPolicy::for_classifier(&config.classifier),
            config.classifier.request_timeout(),
        );
        let guard = ExecutionGuard::new(
            parts.executor,
            parts.notifier,
            GuardSettings {
                policy: RetryPolicy::for_execution(&config.execution),
                call_timeout: config.execution.order_timeout(),
                notify_timeout: config.notify.timeout(),
                notify_prefix: config.notify.prefix.clone(),
            },
        );

        Self::new(
            PipelineSettings::from_config(config),
            parts.source,
            classifier,
            DecisionEngine::new(config.decision.clone()),
            guard,
            parts.cursor_store,
            shutdown,
        )
    }

    pub fn account(&self) -> &str {
        &self.settings.account
    }

    pub fn guard(&self) -> &ExecutionGuard {
        &self.guard
    }

    /// Resume point for this process.
    ///
    /// A stored cursor always wins. Otherwise the configured initial id is
    /// used, or, when starting from latest, the newest existing post so that
    /// only posts made after startup are traded.
    pub async fn bootstrap_cursor(&self) -> Result<Cursor> {
        let account = self.account();

        let stored = timeout(self.settings.cursor_write_timeout, self.cursor_store.load(account))
            .await
            .map_err(|_| PersistenceError::new(account, "cursor load timed out"))??;
        if let Some(id) = stored {
            info!(account, last_processed_id = %id, "resuming from stored cursor");
            return Ok(Cursor::new(account, Some(id)));
        }

        let start = Cursor::new(account, None);
        let initial = if let Some(id) = &self.settings.initial_since_id {
            id.clone()
        } else if self.settings.start_from_latest {
            let latest = timeout(self.settings.fetch_timeout, self.source.fetch_latest_id(account))
                .await
                .map_err(|_| FetchError::Transport("latest post lookup timed out".to_string()))??;
            latest.ok_or_else(|| {
                PostSignalError::InvalidConfig(format!(
                    "account {} has no posts to start from; set source.initial_since_id",
                    account
                ))
            })?
        } else {
            info!(account, "no stored cursor, processing from the most recent page");
            return Ok(start);
        };

        info!(account, last_processed_id = %initial, "initializing cursor");
        self.persist(&start, &initial).await
    }

    /// One poll cycle: fetch, then process every new post in order.
    pub async fn run_cycle(&self, cursor: &Cursor) -> Result<CycleReport> {
        let mut listener = self.shutdown.listener();
        let account = self.account();
        let mut report = CycleReport::empty(cursor.clone());

        let fetched = timeout(
            self.settings.fetch_timeout,
            self.source.fetch_since(account, cursor.last_processed_id.as_ref()),
        )
        .await
        .unwrap_or_else(|_| Err(FetchError::Transport("fetch timed out".to_string())));

        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) if e.is_retryable() => {
                warn!(account, "fetch failed, cursor unchanged: {}", e);
                report.fetch_error = Some(e.to_string());
                return Ok(report);
            }
            Err(e) => return Err(e.into()),
        };
        report.fetched = raw.len();

        let mut statuses: Vec<Status> = Vec::with_capacity(raw.len());
        for record in &raw {
            match normalize(record) {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    report.parse_failures += 1;
                    warn!(account, "skipping malformed post: {}", e);
                }
            }
        }

        statuses.retain(|s| cursor.is_ahead(&s.id));
        statuses.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.created_at.cmp(&b.created_at)));
        statuses.dedup_by(|a, b| a.id == b.id);
        debug!(account, new = statuses.len(), "posts to process");

        for status in &statuses {
            if listener.is_triggered() {
                info!(account, "shutdown requested, stopping before {}", status.id);
                break;
            }

            let outcome = self
                .process(status, &mut listener)
                .instrument(info_span!("post", status_id = %status.id))
                .await?;
            info!(account, "{}", outcome);

            if !outcome.is_terminal() {
                report.outcomes.push(outcome);
                break;
            }

            report.cursor = self.persist(&report.cursor, &status.id).await?;
            report.outcomes.push(outcome);
        }

        Ok(report)
    }

    /// Poll until shutdown. Returns an error only for faults that must stop
    /// the process (authentication, cursor persistence).
    pub async fn run(&self) -> Result<()> {
        let mut cursor = self.bootstrap_cursor().await?;
        let mut listener = self.shutdown.listener();
        let mut cycle_id: u64 = 0;

        info!(
            account = self.account(),
            symbol = self.guard.symbol(),
            poll_interval = ?self.settings.poll_interval,
            "pipeline started at {}",
            cursor
        );

        loop {
            cycle_id += 1;
            let span = info_span!("cycle", cycle_id, account = %self.settings.account);
            let report = self.run_cycle(&cursor).instrument(span).await?;
            info!(cycle_id, "{}", report.summary());
            cursor = report.cursor;

            if listener.is_triggered() {
                break;
            }
            tokio::select! {
                _ = sleep(self.settings.poll_interval) => {}
                _ = listener.cancelled() => break,
            }
        }

        info!(account = self.account(), "pipeline stopped at {}", cursor);
        Ok(())
    }

    async fn process(&self, status: &Status, listener: &mut ShutdownListener) -> Result<PostOutcome> {
        let status_id = status.id.clone();

        if !status.has_text() {
            return Ok(PostOutcome::Skipped {
                status_id,
                reason: "empty content".to_string(),
            });
        }
        debug!("classifying \"{}\"", status.preview(80));

        let assessment = match self.classifier.classify(status, listener).await {
            ClassificationOutcome::Assessed(assessment) => assessment,
            ClassificationOutcome::Rejected(e) => {
                return Ok(PostOutcome::Skipped {
                    status_id,
                    reason: format!("classification rejected: {}", e.message),
                })
            }
            ClassificationOutcome::Exhausted { attempts, last_error } => {
                return Ok(PostOutcome::Failed {
                    status_id,
                    reason: format!("classification retries exhausted: {}", last_error.message),
                    attempts,
                })
            }
            ClassificationOutcome::Abandoned => return Ok(PostOutcome::Abandoned { status_id }),
        };

        let intent = match self.engine.decide(&assessment) {
            Decision::NoAction(reason) => {
                return Ok(PostOutcome::Skipped {
                    status_id,
                    reason: reason.to_string(),
                })
            }
            Decision::Trade(intent) => intent,
        };
        info!(
            tier = %intent.tier(),
            profile = intent.profile(),
            confidence = %assessment.confidence(),
            "trade signal: {}",
            intent.describe()
        );

        let record = self
            .guard
            .execute(self.account(), &status_id, &intent, listener)
            .await?;

        Ok(match record.state {
            ExecutionState::Confirmed => PostOutcome::Executed {
                order_id: record.order_id.unwrap_or_default(),
                attempts: record.attempt_count,
                status_id,
            },
            ExecutionState::FailedPermanent => PostOutcome::Failed {
                reason: record.last_error.unwrap_or_else(|| "order failed".to_string()),
                attempts: record.attempt_count,
                status_id,
            },
            ExecutionState::Pending | ExecutionState::Submitting | ExecutionState::FailedRetryable => {
                PostOutcome::Abandoned { status_id }
            }
        })
    }

    /// Durably move the cursor to `id`, retrying failed writes before giving up
    async fn persist(&self, current: &Cursor, id: &StatusId) -> Result<Cursor> {
        let Some(next) = current.advanced_to(id) else {
            return Ok(current.clone());
        };
        let account = self.account();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = timeout(self.settings.cursor_write_timeout, self.cursor_store.store(account, id))
                .await
                .unwrap_or_else(|_| Err(PersistenceError::new(account, "cursor write timed out")));

            match result {
                Ok(()) => {
                    debug!(account, cursor = %next, "cursor stored");
                    return Ok(next);
                }
                Err(e) if attempt >= self.settings.cursor_max_write_attempts => {
                    error!(account, attempt, "giving up on cursor write: {}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!(account, attempt, "cursor write failed, retrying: {}", e);
                    sleep(self.settings.cursor_retry_backoff).await;
                }
            }
        }
    }
}
