//! Persistence layer for the pipeline's resume point

pub mod cursor;

pub use cursor::{CursorStore, FileCursorStore, MemoryCursorStore};

use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::PostgresCursorStore;
use crate::config::{CursorBackend, CursorConfig};
use crate::error::{PostSignalError, Result};

/// Open the cursor store selected by `cursor.backend`
pub async fn build_cursor_store(config: &CursorConfig) -> Result<Arc<dyn CursorStore>> {
    match config.backend {
        CursorBackend::File => {
            info!(path = %config.path, "cursor store: file");
            Ok(Arc::new(FileCursorStore::new(&config.path)))
        }
        CursorBackend::Postgres => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                PostSignalError::InvalidConfig("cursor.database_url must be set for the postgres backend".to_string())
            })?;
            let store = PostgresCursorStore::new(url, config.max_connections.max(1)).await?;
            info!("cursor store: postgres");
            Ok(Arc::new(store))
        }
        CursorBackend::Memory => {
            warn!("cursor store: memory, progress is lost on restart");
            Ok(Arc::new(MemoryCursorStore::new()))
        }
    }
}
