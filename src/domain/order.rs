use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
    Short,
}

impl OrderSide {
    /// Signed-amount convention of derivatives venues: positive opens or adds
    /// long exposure, negative reduces it or opens a short
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            OrderSide::Buy => amount.abs(),
            OrderSide::Sell | OrderSide::Short => -amount.abs(),
        }
    }

    pub fn is_long(&self) -> bool {
        matches!(self, OrderSide::Buy)
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
            OrderSide::Short => write!(f, "SHORT"),
        }
    }
}

/// Confidence bracket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    High,
    Medium,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::High => write!(f, "high"),
            Tier::Medium => write!(f, "medium"),
        }
    }
}

/// What the decision engine wants executed.
///
/// Only the decision engine can build one, and only from a configured tier
/// table, so amounts and leverage are never ad hoc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderIntent {
    side: OrderSide,
    amount: Decimal,
    leverage: u32,
    limit_price_offset: Decimal,
    tier: Tier,
    profile: String,
}

impl OrderIntent {
    pub(crate) fn from_tier(
        side: OrderSide,
        amount: Decimal,
        leverage: u32,
        limit_price_offset: Decimal,
        tier: Tier,
        profile: &str,
    ) -> Self {
        Self {
            side,
            amount: amount.abs(),
            leverage,
            limit_price_offset,
            tier,
            profile: profile.to_string(),
        }
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    /// Unsigned order size
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn leverage(&self) -> u32 {
        self.leverage
    }

    /// Fractional offset from the reference price (0.005 = 0.5%)
    pub fn limit_price_offset(&self) -> Decimal {
        self.limit_price_offset
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Tier table the intent came from (`default` or a topic name)
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// e.g. `BUY (high confidence UP)`
    pub fn describe(&self) -> String {
        let direction = if self.side.is_long() { "UP" } else { "DOWN" };
        format!("{} ({} confidence {})", self.side, self.tier, direction)
    }
}
