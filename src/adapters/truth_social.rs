//! Truth Social status source
//!
//! Truth Social exposes the Mastodon REST API. Pages walk forward from the
//! cursor with `min_id`, which returns the statuses right after it (still
//! sorted newest first). When the page limit cuts a cycle short, only the
//! newest statuses are left behind and the next cycle starts where this one
//! stopped.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::domain::StatusId;
use crate::error::{FetchError, PostSignalError, Result};
use crate::strategy::StatusSource;

#[derive(Debug, Deserialize)]
struct AccountLookup {
    id: String,
}

pub struct TruthSocialSource {
    http: Client,
    base_url: String,
    access_token: Option<String>,
    page_size: u32,
    max_pages: u32,
    /// username -> numeric account id
    account_ids: DashMap<String, String>,
}

impl TruthSocialSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| PostSignalError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
            page_size: config.page_size.max(1),
            max_pages: config.max_pages.max(1),
            account_ids: DashMap::new(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<T, FetchError> {
        let response = self.authorized(self.http.get(url).query(query)).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Transport(format!("invalid response body from {}: {}", url, e)))
    }

    async fn account_id(&self, account: &str) -> std::result::Result<String, FetchError> {
        if let Some(id) = self.account_ids.get(account) {
            return Ok(id.value().clone());
        }

        let url = format!("{}/api/v1/accounts/lookup", self.base_url);
        let found: AccountLookup = self.get_json(&url, &[("acct", account.to_string())]).await?;

        info!(account, account_id = %found.id, "resolved account");
        self.account_ids.insert(account.to_string(), found.id.clone());
        Ok(found.id)
    }

    async fn statuses_page(
        &self,
        account_id: &str,
        limit: u32,
        min_id: Option<&StatusId>,
    ) -> std::result::Result<Vec<Value>, FetchError> {
        let url = format!("{}/api/v1/accounts/{}/statuses", self.base_url, account_id);
        let mut query = vec![
            ("exclude_replies", "true".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(min_id) = min_id {
            query.push(("min_id", min_id.to_string()));
        }

        self.get_json(&url, &query).await
    }
}

#[async_trait]
impl StatusSource for TruthSocialSource {
    async fn fetch_since(
        &self,
        account: &str,
        since: Option<&StatusId>,
    ) -> std::result::Result<Vec<Value>, FetchError> {
        let account_id = self.account_id(account).await?;

        let Some(since) = since else {
            return self.statuses_page(&account_id, self.page_size, None).await;
        };

        let mut collected = Vec::new();
        let mut min_id = since.clone();

        for page in 1..=self.max_pages {
            let batch = self
                .statuses_page(&account_id, self.page_size, Some(&min_id))
                .await?;
            let received = batch.len();
            let newest = newest_id(&batch);
            collected.extend(batch);

            debug!(account, page, received, %min_id, "fetched status page");

            // A short page means the head of the timeline was reached
            if received < self.page_size as usize {
                break;
            }
            match newest {
                Some(newest) if newest > min_id => min_id = newest,
                _ => break,
            }
            if page == self.max_pages {
                warn!(
                    account,
                    pages = self.max_pages,
                    "page limit reached, newer statuses left for the next cycle"
                );
            }
        }

        Ok(collected)
    }

    async fn fetch_latest_id(&self, account: &str) -> std::result::Result<Option<StatusId>, FetchError> {
        let account_id = self.account_id(account).await?;
        let batch = self.statuses_page(&account_id, 1, None).await?;
        Ok(newest_id(&batch))
    }
}

/// Id of a raw status, accepting string or numeric encodings
fn raw_status_id(raw: &Value) -> Option<StatusId> {
    match raw.get("id")? {
        Value::String(s) => StatusId::new(s.as_str()),
        Value::Number(n) => StatusId::new(n.to_string()),
        _ => None,
    }
}

fn newest_id(batch: &[Value]) -> Option<StatusId> {
    batch.iter().filter_map(raw_status_id).max()
}

/// Authentication and missing-account failures will not fix themselves;
/// everything else is worth another cycle.
fn classify_status(status: StatusCode, body: &str) -> FetchError {
    let detail = format!("HTTP {}: {}", status, truncate(body, 200));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => FetchError::Auth(detail),
        _ => FetchError::Transport(detail),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    const ACCOUNT: &str = "realDonaldTrump";

    /// Account timeline served the way Mastodon pages it
    struct Timeline {
        /// Ascending status ids
        ids: Vec<u64>,
    }

    impl Respond for Timeline {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let param = |name: &str| {
                request
                    .url
                    .query_pairs()
                    .find(|(key, _)| key == name)
                    .and_then(|(_, value)| value.parse::<u64>().ok())
            };
            let limit = param("limit").unwrap_or(20) as usize;
            let max_id = param("max_id").unwrap_or(u64::MAX);
            let visible = self.ids.iter().copied().filter(|id| *id < max_id);

            let mut page: Vec<u64> = match (param("min_id"), param("since_id")) {
                // Oldest statuses after min_id
                (Some(min_id), _) => visible.filter(|id| *id > min_id).take(limit).collect(),
                // Newest statuses, stopping at since_id
                (None, since_id) => visible
                    .rev()
                    .filter(|id| since_id.map_or(true, |s| *id > s))
                    .take(limit)
                    .collect(),
            };
            page.sort_unstable_by(|a, b| b.cmp(a));

            let body: Vec<Value> = page
                .iter()
                .map(|id| json!({"id": id.to_string(), "content": format!("<p>post {}</p>", id)}))
                .collect();
            ResponseTemplate::new(200).set_body_json(body)
        }
    }

    async fn timeline_server(ids: impl IntoIterator<Item = u64>) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/accounts/lookup"))
            .and(query_param("acct", ACCOUNT))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "7"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/accounts/7/statuses"))
            .respond_with(Timeline { ids: ids.into_iter().collect() })
            .mount(&server)
            .await;
        server
    }

    fn source_for(server: &MockServer, page_size: u32, max_pages: u32) -> TruthSocialSource {
        let config = SourceConfig {
            base_url: server.uri(),
            page_size,
            max_pages,
            ..SourceConfig::default()
        };
        TruthSocialSource::new(&config).unwrap()
    }

    fn ids_of(batch: &[Value]) -> Vec<u64> {
        let mut ids: Vec<u64> = batch
            .iter()
            .filter_map(raw_status_id)
            .filter_map(|id| id.as_str().parse().ok())
            .collect();
        ids.sort_unstable();
        ids
    }

    #[tokio::test]
    async fn test_capped_cycles_never_skip_statuses() {
        let server = timeline_server(101..=105).await;
        let source = source_for(&server, 2, 1);

        let mut cursor = StatusId::new("100").unwrap();
        let mut cycles = Vec::new();
        for _ in 0..4 {
            let batch = source.fetch_since(ACCOUNT, Some(&cursor)).await.unwrap();
            if let Some(newest) = newest_id(&batch) {
                cursor = newest;
            }
            cycles.push(ids_of(&batch));
        }

        assert_eq!(cycles, vec![vec![101, 102], vec![103, 104], vec![105], vec![]]);
    }

    #[tokio::test]
    async fn test_pages_forward_until_short_page() {
        let server = timeline_server(101..=105).await;
        let source = source_for(&server, 2, 5);

        let since = StatusId::new("100").unwrap();
        let batch = source.fetch_since(ACCOUNT, Some(&since)).await.unwrap();
        assert_eq!(ids_of(&batch), vec![101, 102, 103, 104, 105]);

        // 2 + 2 + 1: the short third page ends the walk
        let status_calls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path().ends_with("/statuses"))
            .count();
        assert_eq!(status_calls, 3);
    }

    #[tokio::test]
    async fn test_no_cursor_returns_newest_page() {
        let server = timeline_server(101..=105).await;
        let source = source_for(&server, 2, 5);

        let batch = source.fetch_since(ACCOUNT, None).await.unwrap();
        assert_eq!(ids_of(&batch), vec![104, 105]);
        assert_eq!(
            source.fetch_latest_id(ACCOUNT).await.unwrap(),
            StatusId::new("105")
        );
    }

    #[tokio::test]
    async fn test_account_lookup_is_cached() {
        let server = timeline_server(101..=102).await;
        let source = source_for(&server, 20, 1);

        let since = StatusId::new("100").unwrap();
        source.fetch_since(ACCOUNT, Some(&since)).await.unwrap();
        source.fetch_since(ACCOUNT, Some(&since)).await.unwrap();

        let lookups = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path().ends_with("/lookup"))
            .count();
        assert_eq!(lookups, 1);
    }

    #[tokio::test]
    async fn test_rejected_token_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/accounts/lookup"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .mount(&server)
            .await;
        let source = source_for(&server, 20, 1);

        let err = source.fetch_since(ACCOUNT, None).await.unwrap_err();
        assert!(matches!(err, FetchError::Auth(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_raw_status_id_accepts_both_encodings() {
        assert_eq!(raw_status_id(&json!({"id": "42"})), StatusId::new("42"));
        assert_eq!(raw_status_id(&json!({"id": 42})), StatusId::new("42"));
        assert_eq!(raw_status_id(&json!({"id": null})), None);
        assert_eq!(raw_status_id(&json!({"content": "x"})), None);
    }

    #[test]
    fn test_newest_id_compares_numerically() {
        let batch = vec![json!({"id": "999"}), json!({"id": "1000"}), json!({"broken": true})];
        assert_eq!(newest_id(&batch), StatusId::new("1000"));
        assert_eq!(newest_id(&[]), None);
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "denied"),
            FetchError::Auth(_)
        ));
        assert!(matches!(classify_status(StatusCode::NOT_FOUND, ""), FetchError::Auth(_)));

        let throttled = classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(throttled.is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }

    #[test]
    fn test_new_normalizes_settings() {
        let config = SourceConfig {
            base_url: "https://example.social/".to_string(),
            access_token: Some(String::new()),
            page_size: 0,
            ..SourceConfig::default()
        };
        let source = TruthSocialSource::new(&config).unwrap();
        assert_eq!(source.base_url, "https://example.social");
        assert!(source.access_token.is_none());
        assert_eq!(source.page_size, 1);
    }
}
