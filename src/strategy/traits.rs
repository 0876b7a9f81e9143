//! Seams between the pipeline and the outside world
//!
//! Each collaborator is an async trait so the pipeline can run against the
//! live adapters, the paper executor, or test doubles.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{SignalAssessment, StatusId};
use crate::error::{ClassificationError, FetchError, NotificationError};

/// Source of raw status payloads for one account
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Raw statuses newer than `since`, in any order. `None` returns the
    /// most recent page.
    ///
    /// A source that caps how much it fetches per call must return the
    /// statuses immediately after `since`, never a later window: the cursor
    /// advances past everything returned.
    async fn fetch_since(
        &self,
        account: &str,
        since: Option<&StatusId>,
    ) -> Result<Vec<Value>, FetchError>;

    /// Id of the newest status, if the account has posted anything
    async fn fetch_latest_id(&self, account: &str) -> Result<Option<StatusId>, FetchError>;
}

/// Maps post text to a structured assessment
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClassificationProvider: Send + Sync {
    async fn classify_text(&self, text: &str) -> Result<SignalAssessment, ClassificationError>;
}

/// Best-effort outbound message channel
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), NotificationError>;
}
