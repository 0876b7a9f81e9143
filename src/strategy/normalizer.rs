//! Raw status payload to `Status`

use chrono::{DateTime, TimeZone, Utc};
use scraper::Html;
use serde_json::Value;

use crate::domain::{Status, StatusId};
use crate::error::ParseError;

/// Normalize one raw status object.
///
/// Only the id is mandatory. A missing or malformed timestamp leaves
/// `created_at` empty, and missing content becomes an empty string.
pub fn normalize(raw: &Value) -> Result<Status, ParseError> {
    let obj = raw.as_object().ok_or(ParseError::NotAnObject)?;

    let id = match obj.get("id") {
        None | Some(Value::Null) => return Err(ParseError::MissingField("id")),
        Some(Value::String(s)) => StatusId::new(s.as_str()).ok_or(ParseError::InvalidField {
            field: "id",
            reason: "blank".to_string(),
        })?,
        Some(Value::Number(n)) if n.is_u64() || n.is_i64() => StatusId::new(n.to_string())
            .ok_or(ParseError::MissingField("id"))?,
        Some(other) => {
            return Err(ParseError::InvalidField {
                field: "id",
                reason: format!("unsupported type: {}", type_name(other)),
            })
        }
    };

    let created_at = obj.get("created_at").and_then(parse_timestamp);

    let content = match obj.get("content") {
        Some(Value::String(html)) => strip_html(html),
        _ => String::new(),
    };

    let account = obj
        .get("account")
        .and_then(|a| a.get("username").or_else(|| a.get("acct")))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Status {
        id,
        created_at,
        content,
        account,
    })
}

/// Plain text of an HTML fragment. Malformed markup is handled leniently.
pub fn strip_html(html: &str) -> String {
    if !html.contains('<') && !html.contains('&') {
        return html.trim().to_string();
    }

    let fragment = Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        // epoch milliseconds
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalizes_mastodon_status() {
        let raw = json!({
            "id": "114520307594338802",
            "created_at": "2025-05-14T12:30:00.000Z",
            "content": "<p>Tariffs on China are <b>HUGE</b> &amp; beautiful!</p>",
            "account": {"username": "realDonaldTrump"}
        });

        let status = normalize(&raw).unwrap();
        assert_eq!(status.id.as_str(), "114520307594338802");
        assert_eq!(status.content, "Tariffs on China are HUGE & beautiful!");
        assert_eq!(status.account.as_deref(), Some("realDonaldTrump"));
        assert!(status.created_at.is_some());
    }

    #[test]
    fn test_missing_id_is_an_error() {
        let raw = json!({"content": "hello"});
        assert_eq!(normalize(&raw), Err(ParseError::MissingField("id")));
        assert_eq!(normalize(&json!([1, 2])), Err(ParseError::NotAnObject));
    }

    #[test]
    fn test_integer_ids_and_bad_timestamps() {
        let raw = json!({"id": 42, "created_at": "yesterday", "content": null});
        let status = normalize(&raw).unwrap();
        assert_eq!(status.id.as_str(), "42");
        assert_eq!(status.created_at, None);
        assert_eq!(status.content, "");
    }

    #[test]
    fn test_markup_only_content_is_empty() {
        let raw = json!({"id": "7", "content": "<p><br></p>"});
        let status = normalize(&raw).unwrap();
        assert!(!status.has_text());
    }

    #[test]
    fn test_unclosed_tags_are_tolerated() {
        assert_eq!(strip_html("<p>Bitcoin <a href=\"x\">to the moon"), "Bitcoin to the moon");
    }
}
