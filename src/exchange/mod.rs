pub mod factory;
mod traits;

pub use factory::build_executor;
pub use traits::{
    parse_executor_kind, ExecutorKind, OrderAck, OrderExecutor, PlaceOrderRequest,
};
