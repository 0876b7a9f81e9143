//! Bitfinex derivatives order executor
//!
//! Limit orders are priced off the derivative mark price and tagged with a
//! client order id derived from the idempotency key, so an order that reached
//! the exchange can be found again after a timeout or a restart.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BitfinexConfig;
use crate::error::{ExecutionError, PostSignalError, Result};
use crate::exchange::{ExecutorKind, OrderAck, OrderExecutor, PlaceOrderRequest};
use crate::signing::{ApiCredentials, HmacAuth};

const SUBMIT_PATH: &str = "v2/auth/w/order/submit";
const ACTIVE_ORDERS_PATH: &str = "v2/auth/r/orders";

/// Index of MARK_PRICE in a `/v2/status/deriv` row
const MARK_PRICE_IDX: usize = 15;
/// Index of DERIV_PRICE, used when no mark price is published
const DERIV_PRICE_IDX: usize = 3;
/// Index of CID in an order array
const ORDER_CID_IDX: usize = 2;
const ORDER_PRICE_IDX: usize = 16;

/// Error codes that indicate a transient condition on the exchange side
const RETRYABLE_CODES: &[i64] = &[
    10114, // nonce too small
    11010, // rate limit
    20051, // maintenance
    20060, // maintenance
];

pub struct BitfinexClient {
    http: Client,
    rest_url: String,
    public_url: String,
    auth: HmacAuth,
    symbol: String,
}

impl BitfinexClient {
    pub fn new(config: &BitfinexConfig, symbol: &str, timeout: Duration) -> Result<Self> {
        if config.api_key.is_empty() || config.api_secret.is_empty() {
            return Err(PostSignalError::InvalidConfig(
                "Bitfinex API key and secret are required for live execution".to_string(),
            ));
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PostSignalError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        info!(symbol, "Bitfinex executor ready (live orders)");
        Ok(Self {
            http,
            rest_url: config.rest_url.trim_end_matches('/').to_string(),
            public_url: config.public_url.trim_end_matches('/').to_string(),
            auth: HmacAuth::new(ApiCredentials::new(&config.api_key, &config.api_secret)),
            symbol: symbol.to_string(),
        })
    }

    /// Current mark price of the configured derivative
    pub async fn reference_price(&self) -> std::result::Result<Decimal, ExecutionError> {
        let url = format!("{}/v2/status/deriv", self.public_url);
        let response = self
            .http
            .get(&url)
            .query(&[("keys", self.symbol.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }

        let rows: Value = serde_json::from_str(&body)
            .map_err(|e| ExecutionError::retryable(format!("bad deriv status payload: {}", e)))?;
        parse_reference_price(&rows)
            .ok_or_else(|| ExecutionError::retryable(format!("no price for {} in deriv status", self.symbol)))
    }

    async fn post_auth(&self, path: &str, body: &Value) -> std::result::Result<Value, ExecutionError> {
        let payload = body.to_string();
        let headers = self
            .auth
            .build_headers(path, &payload)
            .map_err(|e| ExecutionError::permanent(e.to_string()))?;

        let response = self
            .http
            .post(format!("{}/{}", self.rest_url, path))
            .headers(headers)
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(classify_failure(status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| ExecutionError::retryable(format!("bad response from {}: {}", path, e)))
    }

    async fn find_by_cid(&self, path: &str, body: Value, cid: u64) -> std::result::Result<Option<OrderAck>, ExecutionError> {
        let orders = self.post_auth(path, &body).await?;
        Ok(orders
            .as_array()
            .into_iter()
            .flatten()
            .find(|order| order.get(ORDER_CID_IDX).and_then(Value::as_u64) == Some(cid))
            .and_then(order_ack))
    }
}

#[async_trait]
impl OrderExecutor for BitfinexClient {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Bitfinex
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn place_order(&self, request: &PlaceOrderRequest) -> std::result::Result<OrderAck, ExecutionError> {
        let reference = self.reference_price().await?;
        let price = round_price(request.limit_price(reference));
        let amount = request.side.signed(request.amount);
        let cid = client_order_id(&request.idempotency_key);

        let body = json!({
            "type": "LIMIT",
            "symbol": self.symbol,
            "amount": amount.to_string(),
            "price": price.to_string(),
            "lev": request.leverage,
            "cid": cid,
        });
        debug!(%reference, %price, %amount, cid, "submitting Bitfinex order");

        let response = self.post_auth(SUBMIT_PATH, &body).await?;
        parse_submit_response(&response)
    }

    async fn find_order(&self, idempotency_key: &str) -> std::result::Result<Option<OrderAck>, ExecutionError> {
        let cid = client_order_id(idempotency_key);

        if let Some(ack) = self.find_by_cid(ACTIVE_ORDERS_PATH, json!({}), cid).await? {
            return Ok(Some(ack));
        }

        let history = format!("v2/auth/r/orders/{}/hist", self.symbol);
        self.find_by_cid(&history, json!({ "limit": 100 }), cid).await
    }
}

/// Deterministic 45-bit client order id for an idempotency key
pub fn client_order_id(idempotency_key: &str) -> u64 {
    let digest = Sha256::digest(idempotency_key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) & ((1 << 45) - 1)).max(1)
}

/// Bitfinex accepts five significant digits
pub fn round_price(price: Decimal) -> Decimal {
    if price <= Decimal::ZERO {
        return price;
    }
    let integer_digits = price.trunc().to_string().trim_start_matches('-').len() as i64;
    let integer_digits = if price < Decimal::ONE { 0 } else { integer_digits };
    let shift = 5 - integer_digits;

    if shift >= 0 {
        price
            .round_dp_with_strategy(shift as u32, RoundingStrategy::MidpointAwayFromZero)
            .normalize()
    } else {
        // Decimal holds at most 29 integer digits, so the factor always fits
        let factor = (0..-shift).fold(Decimal::ONE, |f, _| f * Decimal::TEN);
        (price / factor)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .checked_mul(factor)
            .map_or(price, |rounded| rounded.normalize())
    }
}

fn parse_reference_price(rows: &Value) -> Option<Decimal> {
    let row = rows.as_array()?.first()?.as_array()?;
    [MARK_PRICE_IDX, DERIV_PRICE_IDX]
        .iter()
        .filter_map(|&idx| row.get(idx).and_then(value_to_decimal))
        .find(|price| *price > Decimal::ZERO)
}

fn value_to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(|f| Decimal::from_str(&f.to_string()).ok().or_else(|| Decimal::from_f64(f))),
        Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

fn order_ack(order: &Value) -> Option<OrderAck> {
    let order_id = order.get(0)?.as_u64()?.to_string();
    Some(OrderAck {
        order_id,
        limit_price: order.get(ORDER_PRICE_IDX).and_then(value_to_decimal),
    })
}

/// `[MTS, TYPE, MSG_ID, null, [ORDER...], CODE, STATUS, TEXT]`
fn parse_submit_response(response: &Value) -> std::result::Result<OrderAck, ExecutionError> {
    let status = response.get(6).and_then(Value::as_str).unwrap_or_default();
    let text = response.get(7).and_then(Value::as_str).unwrap_or_default();

    if status != "SUCCESS" {
        let message = format!("order submit {}: {}", status, text);
        return Err(if is_transient_text(text) {
            ExecutionError::retryable(message)
        } else {
            ExecutionError::permanent(message)
        });
    }

    response
        .get(4)
        .and_then(Value::as_array)
        .and_then(|orders| orders.first())
        .and_then(order_ack)
        .ok_or_else(|| ExecutionError::retryable(format!("submit succeeded without order data: {}", response)))
}

/// Map a non-2xx reply to an execution error. Bitfinex errors look like
/// `["error", CODE, "message"]`.
fn classify_failure(status: StatusCode, body: &str) -> ExecutionError {
    let parsed: Option<(i64, String)> = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        let code = v.get(1)?.as_i64()?;
        let text = v.get(2).and_then(Value::as_str).unwrap_or_default().to_string();
        Some((code, text))
    });

    let message = match &parsed {
        Some((code, text)) => format!("HTTP {} error {}: {}", status, code, text),
        None => format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()),
    };

    if status == StatusCode::TOO_MANY_REQUESTS {
        return ExecutionError::retryable(message);
    }

    match parsed {
        Some((code, text)) if RETRYABLE_CODES.contains(&code) || is_transient_text(&text) => {
            ExecutionError::retryable(message)
        }
        Some(_) => {
            warn!("Bitfinex rejected request: {}", message);
            ExecutionError::permanent(message)
        }
        None if status.is_server_error() => ExecutionError::retryable(message),
        None => ExecutionError::permanent(message),
    }
}

fn is_transient_text(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["ratelimit", "rate limit", "nonce", "maintenance", "temporarily", "busy"]
        .iter()
        .any(|needle| lower.contains(needle))
}
