use std::sync::Arc;

use tracing::warn;

use crate::adapters::{BitfinexClient, PaperExecutor};
use crate::config::AppConfig;
use crate::error::Result;

use super::{ExecutorKind, OrderExecutor};

/// Create the runtime order executor from `AppConfig`.
///
/// `dry_run` forces paper execution whatever the configured mode.
pub fn build_executor(app_config: &AppConfig, dry_run: bool) -> Result<Arc<dyn OrderExecutor>> {
    let execution = &app_config.execution;

    let kind = if dry_run {
        if execution.mode.is_live() {
            warn!("dry run requested, placing {} orders on paper", execution.mode);
        }
        ExecutorKind::Paper
    } else {
        execution.mode
    };

    match kind {
        ExecutorKind::Paper => Ok(Arc::new(PaperExecutor::new(&execution.symbol))),
        ExecutorKind::Bitfinex => {
            let client = BitfinexClient::new(&execution.bitfinex, &execution.symbol, execution.order_timeout())?;
            Ok(Arc::new(client))
        }
    }
}
