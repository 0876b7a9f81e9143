use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::error::ExecutionError;
use crate::exchange::{ExecutorKind, OrderAck, OrderExecutor, PlaceOrderRequest};

/// Logs intended orders instead of sending them; the default mode
pub struct PaperExecutor {
    symbol: String,
    orders: DashMap<String, OrderAck>,
}

impl PaperExecutor {
    pub fn new(symbol: &str) -> Self {
        info!(symbol, "paper executor ready (no orders are sent)");
        Self {
            symbol: symbol.to_string(),
            orders: DashMap::new(),
        }
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

#[async_trait]
impl OrderExecutor for PaperExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Paper
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<OrderAck, ExecutionError> {
        let ack = self
            .orders
            .entry(request.idempotency_key.clone())
            .or_insert_with(|| {
                let ack = OrderAck {
                    order_id: format!("paper-{}", Uuid::new_v4()),
                    limit_price: None,
                };
                info!(
                    order_id = %ack.order_id,
                    symbol = %self.symbol,
                    side = %request.side,
                    amount = %request.side.signed(request.amount),
                    leverage = request.leverage,
                    limit_offset = %request.limit_offset,
                    "[PAPER] order would be placed"
                );
                ack
            })
            .clone();
        Ok(ack)
    }

    async fn find_order(&self, idempotency_key: &str) -> Result<Option<OrderAck>, ExecutionError> {
        Ok(self.orders.get(idempotency_key).map(|ack| ack.value().clone()))
    }
}
