use serde::{Deserialize, Serialize};

use super::StatusId;

/// Per-account resume marker.
///
/// Single writer (the pipeline); only ever moves forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub account: String,
    pub last_processed_id: Option<StatusId>,
}

impl Cursor {
    pub fn new(account: impl Into<String>, last_processed_id: Option<StatusId>) -> Self {
        Self {
            account: account.into(),
            last_processed_id,
        }
    }

    /// Whether `id` is strictly newer than the marker
    pub fn is_ahead(&self, id: &StatusId) -> bool {
        match &self.last_processed_id {
            Some(last) => id > last,
            None => true,
        }
    }

    /// Cursor moved to `id`, or `None` when that would regress it
    pub fn advanced_to(&self, id: &StatusId) -> Option<Cursor> {
        if self.is_ahead(id) {
            Some(Cursor::new(self.account.clone(), Some(id.clone())))
        } else {
            None
        }
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.last_processed_id {
            Some(id) => write!(f, "{}@{}", self.account, id),
            None => write!(f, "{}@<start>", self.account),
        }
    }
}
