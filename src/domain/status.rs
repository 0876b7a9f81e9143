use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Source-platform post identifier.
///
/// Ids are snowflake-like digit strings in practice, so two all-digit ids are
/// compared numerically (length first, then digits) without any width limit.
/// Anything else falls back to plain string ordering, and sorts after every
/// numeric id so the ordering stays total.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusId(String);

impl StatusId {
    /// Build an id from raw text. Blank input is not an id.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == raw.len() {
            Some(Self(raw))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_numeric(&self) -> bool {
        self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl Ord for StatusId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_numeric(), other.is_numeric()) {
            (true, true) => self
                .0
                .len()
                .cmp(&other.0.len())
                .then_with(|| self.0.cmp(&other.0)),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for StatusId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for StatusId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One normalized social-media post. Read-only after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub id: StatusId,
    /// Source-reported creation time, absent when the payload had none or it was malformed
    pub created_at: Option<DateTime<Utc>>,
    /// Plain text with markup stripped
    pub content: String,
    /// Username of the posting account
    pub account: Option<String>,
}

impl Status {
    /// Single-line preview for log output
    pub fn preview(&self, max_chars: usize) -> String {
        let flat: String = self
            .content
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .take(max_chars)
            .collect();
        if self.content.chars().count() > max_chars {
            format!("{flat}...")
        } else {
            flat
        }
    }

    pub fn has_text(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> StatusId {
        StatusId::new(raw).expect("valid id")
    }

    #[test]
    fn numeric_ids_compare_by_value() {
        assert!(id("9") < id("10"));
        assert!(id("114520015165633741") < id("114520307594338802"));
        // wider than u64
        assert!(id("99999999999999999999") < id("100000000000000000000"));
    }

    #[test]
    fn non_numeric_ids_sort_after_numeric_ones() {
        assert!(id("999") < id("1a"));
        assert!(id("abc") < id("abd"));
    }

    #[test]
    fn blank_ids_are_rejected_and_padding_trimmed() {
        assert!(StatusId::new("   ").is_none());
        assert_eq!(id(" 42 ").as_str(), "42");
    }

    #[test]
    fn preview_flattens_and_truncates() {
        let status = Status {
            id: id("1"),
            created_at: None,
            content: "line one\nline two".to_string(),
            account: None,
        };
        assert_eq!(status.preview(8), "line one...");
        assert_eq!(status.preview(100), "line one line two");
    }
}
