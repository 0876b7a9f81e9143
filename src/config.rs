use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::domain::Impact;
use crate::exchange::ExecutorKind;

/// Main configuration structure. Immutable for the process lifetime.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub cursor: CursorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Mastodon-compatible API host
    pub base_url: String,
    /// Monitored account username
    pub account: String,
    /// Optional bearer token
    pub access_token: Option<String>,
    /// Seconds between poll cycles
    pub poll_interval_secs: u64,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Statuses per page
    pub page_size: u32,
    /// Maximum pages walked backwards per fetch
    pub max_pages: u32,
    /// Resume point used when no cursor has been persisted yet
    pub initial_since_id: Option<String>,
    /// With no persisted cursor and no initial id, start after the newest existing post
    pub start_from_latest: bool,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://truthsocial.com".to_string(),
            account: "realDonaldTrump".to_string(),
            access_token: None,
            poll_interval_secs: 60,
            request_timeout_ms: 10_000,
            page_size: 40,
            max_pages: 5,
            initial_since_id: None,
            start_from_latest: true,
            user_agent: concat!("postsignal/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl SourceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// OpenAI-compatible API base URL
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Per-call timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Attempts per status before giving up
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Total backoff time allowed per status
    pub retry_budget_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key: String::new(),
            model: "llama-3.3-70b-versatile".to_string(),
            request_timeout_ms: 30_000,
            max_attempts: 4,
            base_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            retry_budget_secs: 120,
        }
    }
}

impl ClassifierConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Order parameters for one side of one tier
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TierParams {
    /// Unsigned order size
    pub amount: Decimal,
    pub leverage: u32,
    /// Limit offset from the reference price (0.005 = 0.5%)
    pub limit_offset: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TierTable {
    pub buy: TierParams,
    pub short: TierParams,
}

/// Thresholds and tier tables used for one group of topics
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicProfile {
    pub high_threshold: Decimal,
    pub medium_threshold: Decimal,
    pub high: TierTable,
    pub medium: TierTable,
}

impl TopicProfile {
    fn validate(&self, name: &str, errors: &mut Vec<String>) {
        for (label, value) in [
            ("high_threshold", self.high_threshold),
            ("medium_threshold", self.medium_threshold),
        ] {
            if value < Decimal::ZERO || value > Decimal::ONE {
                errors.push(format!("decision.{name}.{label} must be within [0, 1]"));
            }
        }
        if self.high_threshold < self.medium_threshold {
            errors.push(format!(
                "decision.{name}.high_threshold must be >= medium_threshold"
            ));
        }
        for (tier, table) in [("high", &self.high), ("medium", &self.medium)] {
            for (side, params) in [("buy", &table.buy), ("short", &table.short)] {
                if params.amount <= Decimal::ZERO {
                    errors.push(format!("decision.{name}.{tier}.{side}.amount must be positive"));
                }
                if params.leverage == 0 {
                    errors.push(format!("decision.{name}.{tier}.{side}.leverage must be >= 1"));
                }
                if params.limit_offset < Decimal::ZERO || params.limit_offset >= Decimal::ONE {
                    errors.push(format!(
                        "decision.{name}.{tier}.{side}.limit_offset must be within [0, 1)"
                    ));
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Topic tags that count as market-relevant
    pub relevant_topics: Vec<String>,
    /// Assessments below this impact never trade
    pub min_impact: Impact,
    /// Profile for relevant topics without an override
    pub default: TopicProfile,
    /// Per-topic overrides
    pub topics: BTreeMap<String, TopicProfile>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        let generic = TopicProfile {
            high_threshold: dec!(0.95),
            medium_threshold: dec!(0.90),
            high: TierTable {
                buy: TierParams { amount: dec!(0.001), leverage: 10, limit_offset: dec!(0.005) },
                short: TierParams { amount: dec!(0.001), leverage: 10, limit_offset: dec!(0.005) },
            },
            medium: TierTable {
                buy: TierParams { amount: dec!(0.0005), leverage: 5, limit_offset: dec!(0.005) },
                short: TierParams { amount: dec!(0.0005), leverage: 5, limit_offset: dec!(0.005) },
            },
        };
        let bitcoin = TopicProfile {
            high_threshold: dec!(0.93),
            medium_threshold: dec!(0.88),
            high: TierTable {
                buy: TierParams { amount: dec!(0.0015), leverage: 15, limit_offset: dec!(0.005) },
                short: TierParams { amount: dec!(0.0015), leverage: 15, limit_offset: dec!(0.005) },
            },
            medium: TierTable {
                buy: TierParams { amount: dec!(0.00075), leverage: 7, limit_offset: dec!(0.005) },
                short: TierParams { amount: dec!(0.00075), leverage: 7, limit_offset: dec!(0.005) },
            },
        };

        Self {
            relevant_topics: vec!["market".into(), "bitcoin".into(), "tariffs".into()],
            min_impact: Impact::None,
            default: generic,
            topics: BTreeMap::from([("bitcoin".to_string(), bitcoin)]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BitfinexConfig {
    /// Authenticated REST host
    pub rest_url: String,
    /// Public REST host (reference prices)
    pub public_url: String,
    pub api_key: String,
    pub api_secret: String,
}

impl Default for BitfinexConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://api.bitfinex.com".to_string(),
            public_url: "https://api-pub.bitfinex.com".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// `paper` logs orders, `bitfinex` places them
    pub mode: ExecutorKind,
    /// Traded instrument
    pub symbol: String,
    /// Order submission attempts per status
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Jitter as a fraction of the backoff delay (0.25 = +/-25%)
    pub jitter: f64,
    /// Total backoff time allowed per status
    pub retry_budget_secs: u64,
    /// Per-call timeout in milliseconds
    pub order_timeout_ms: u64,
    pub bitfinex: BitfinexConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutorKind::Paper,
            symbol: "tBTCF0:USTF0".to_string(),
            max_attempts: 5,
            base_backoff_ms: 500,
            max_backoff_ms: 10_000,
            jitter: 0.25,
            retry_budget_secs: 120,
            order_timeout_ms: 10_000,
            bitfinex: BitfinexConfig::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn order_timeout(&self) -> Duration {
        Duration::from_millis(self.order_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TwilioConfig {
    pub base_url: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub to_number: String,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twilio.com".to_string(),
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            to_number: String::new(),
        }
    }
}

impl TwilioConfig {
    pub fn is_configured(&self) -> bool {
        !self.account_sid.is_empty()
            && !self.auth_token.is_empty()
            && !self.from_number.is_empty()
            && !self.to_number.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Send SMS; otherwise outcomes only go to the log
    pub sms_enabled: bool,
    pub timeout_ms: u64,
    /// Message prefix
    pub prefix: String,
    pub twilio: TwilioConfig,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            sms_enabled: false,
            timeout_ms: 5_000,
            prefix: "postsignal".to_string(),
            twilio: TwilioConfig::default(),
        }
    }
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorBackend {
    File,
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    pub backend: CursorBackend,
    /// JSON file for the `file` backend
    pub path: String,
    /// Connection URL for the `postgres` backend
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Per-write timeout in milliseconds
    pub write_timeout_ms: u64,
    /// Delay between failed write attempts
    pub retry_backoff_ms: u64,
    /// Failed writes tolerated before the cycle halts with an error
    pub max_write_attempts: u32,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            backend: CursorBackend::File,
            path: "state/cursor.json".to_string(),
            database_url: None,
            max_connections: 2,
            write_timeout_ms: 5_000,
            retry_backoff_ms: 1_000,
            max_write_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Directory for the rolling log file
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("POSTSIGNAL_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (POSTSIGNAL_SOURCE__ACCOUNT, etc.)
            .add_source(
                Environment::with_prefix("POSTSIGNAL")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.source.account.trim().is_empty() {
            errors.push("source.account must be set".to_string());
        }
        if self.source.poll_interval_secs == 0 {
            errors.push("source.poll_interval_secs must be > 0".to_string());
        }
        if self.source.page_size == 0 || self.source.max_pages == 0 {
            errors.push("source.page_size and source.max_pages must be > 0".to_string());
        }

        for (name, value) in [
            ("source.base_url", &self.source.base_url),
            ("classifier.base_url", &self.classifier.base_url),
            ("execution.bitfinex.rest_url", &self.execution.bitfinex.rest_url),
            ("execution.bitfinex.public_url", &self.execution.bitfinex.public_url),
            ("notify.twilio.base_url", &self.notify.twilio.base_url),
        ] {
            if let Err(e) = Url::parse(value) {
                errors.push(format!("{name} is not a valid URL ({e}): {value}"));
            }
        }

        if self.classifier.api_key.trim().is_empty() {
            errors.push("classifier.api_key must be set".to_string());
        }
        if self.classifier.max_attempts == 0 {
            errors.push("classifier.max_attempts must be >= 1".to_string());
        }

        if self.decision.relevant_topics.is_empty() {
            errors.push("decision.relevant_topics must not be empty".to_string());
        }
        self.decision.default.validate("default", &mut errors);
        for (topic, profile) in &self.decision.topics {
            profile.validate(&format!("topics.{topic}"), &mut errors);
        }

        if self.execution.max_attempts == 0 {
            errors.push("execution.max_attempts must be >= 1".to_string());
        }
        if !(0.0..1.0).contains(&self.execution.jitter) {
            errors.push("execution.jitter must be within [0, 1)".to_string());
        }
        if self.execution.symbol.trim().is_empty() {
            errors.push("execution.symbol must be set".to_string());
        }
        if self.execution.mode == ExecutorKind::Bitfinex
            && (self.execution.bitfinex.api_key.is_empty()
                || self.execution.bitfinex.api_secret.is_empty())
        {
            errors.push("execution.bitfinex credentials are required in bitfinex mode".to_string());
        }

        if self.notify.sms_enabled && !self.notify.twilio.is_configured() {
            errors.push("notify.twilio must be fully configured when sms is enabled".to_string());
        }

        if self.cursor.max_write_attempts == 0 {
            errors.push("cursor.max_write_attempts must be >= 1".to_string());
        }
        match self.cursor.backend {
            CursorBackend::File if self.cursor.path.trim().is_empty() => {
                errors.push("cursor.path must be set for the file backend".to_string());
            }
            CursorBackend::Postgres if self.cursor.database_url.is_none() => {
                errors.push("cursor.database_url must be set for the postgres backend".to_string());
            }
            _ => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.classifier.api_key = "test-key".to_string();
        cfg
    }

    #[test]
    fn test_default_config_is_valid_with_key() {
        assert_eq!(valid_config().validate(), Ok(()));
    }

    #[test]
    fn test_default_profiles() {
        let cfg = DecisionConfig::default();
        assert_eq!(cfg.default.high_threshold, dec!(0.95));
        assert_eq!(cfg.topics["bitcoin"].medium.buy.leverage, 7);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut cfg = valid_config();
        cfg.decision.default.high_threshold = dec!(0.5);
        cfg.decision.default.medium_threshold = dec!(0.6);

        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("high_threshold must be >= medium")));
    }

    #[test]
    fn test_live_mode_requires_credentials() {
        let mut cfg = valid_config();
        cfg.execution.mode = ExecutorKind::Bitfinex;

        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("bitfinex credentials")));
    }

    #[test]
    fn test_rejects_malformed_urls() {
        let mut cfg = valid_config();
        cfg.source.base_url = "truthsocial.com".to_string();

        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].starts_with("source.base_url"));
    }

    #[test]
    fn test_collects_every_violation() {
        let mut cfg = AppConfig::default();
        cfg.execution.max_attempts = 0;
        cfg.notify.sms_enabled = true;

        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 3, "{errors:?}");
    }

    #[test]
    fn test_shipped_defaults_match_code_defaults() {
        let cfg = AppConfig::load_from(concat!(env!("CARGO_MANIFEST_DIR"), "/config")).unwrap();
        let expected = DecisionConfig::default();

        assert_eq!(cfg.decision.default, expected.default);
        assert_eq!(cfg.decision.topics["bitcoin"], expected.topics["bitcoin"]);
        assert_eq!(cfg.decision.min_impact, Impact::None);
        assert_eq!(cfg.execution.symbol, "tBTCF0:USTF0");
        assert_eq!(cfg.cursor.backend, CursorBackend::File);
    }
}
