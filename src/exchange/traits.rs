use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::OrderSide;
use crate::error::{ExecutionError, PostSignalError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Orders are logged and acknowledged locally
    #[serde(alias = "dry_run")]
    Paper,
    /// Orders are placed on Bitfinex derivatives
    #[serde(alias = "live", alias = "prod")]
    Bitfinex,
}

impl Default for ExecutorKind {
    fn default() -> Self {
        Self::Paper
    }
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Bitfinex => "bitfinex",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Bitfinex)
    }
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExecutorKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paper" | "dry_run" | "dry-run" => Ok(Self::Paper),
            "bitfinex" | "live" | "prod" => Ok(Self::Bitfinex),
            _ => Err("invalid execution mode; expected paper|bitfinex"),
        }
    }
}

pub fn parse_executor_kind(raw: &str) -> Result<ExecutorKind> {
    ExecutorKind::from_str(raw).map_err(|e| PostSignalError::InvalidConfig(e.to_string()))
}

/// One limit order, priced by the executor from its reference price
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaceOrderRequest {
    pub side: OrderSide,
    /// Unsigned size; the executor applies the side's sign
    pub amount: Decimal,
    pub leverage: u32,
    /// Fractional offset from the reference price
    pub limit_offset: Decimal,
    /// Stable across retries of the same status
    pub idempotency_key: String,
}

impl PlaceOrderRequest {
    /// Limit price for a reference price: above it for longs, below it otherwise
    pub fn limit_price(&self, reference: Decimal) -> Decimal {
        if self.side.is_long() {
            reference * (Decimal::ONE + self.limit_offset)
        } else {
            reference * (Decimal::ONE - self.limit_offset)
        }
    }
}

/// Exchange acknowledgement of an accepted order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderAck {
    pub order_id: String,
    pub limit_price: Option<Decimal>,
}

#[async_trait]
pub trait OrderExecutor: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    /// Instrument orders are placed on
    fn symbol(&self) -> &str;

    async fn place_order(
        &self,
        request: &PlaceOrderRequest,
    ) -> std::result::Result<OrderAck, ExecutionError>;

    /// Look up an order previously submitted under `idempotency_key`.
    /// Executors without a lookup report nothing found.
    async fn find_order(
        &self,
        _idempotency_key: &str,
    ) -> std::result::Result<Option<OrderAck>, ExecutionError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parse_executor_kind_accepts_aliases() {
        assert_eq!(parse_executor_kind("paper").unwrap(), ExecutorKind::Paper);
        assert_eq!(parse_executor_kind("LIVE").unwrap(), ExecutorKind::Bitfinex);
        assert!(parse_executor_kind("kraken").is_err());
    }

    #[test]
    fn limit_price_moves_with_side() {
        let mut request = PlaceOrderRequest {
            side: OrderSide::Buy,
            amount: dec!(0.001),
            leverage: 10,
            limit_offset: dec!(0.005),
            idempotency_key: "acct:1".to_string(),
        };
        assert_eq!(request.limit_price(dec!(100000)), dec!(100500));

        request.side = OrderSide::Short;
        assert_eq!(request.limit_price(dec!(100000)), dec!(99500));
    }
}
