use postsignal::adapters::{build_notifier, LlmClassifier, TruthSocialSource};
use postsignal::config::{AppConfig, LoggingConfig};
use postsignal::coordination::ShutdownHandle;
use postsignal::error::Result;
use postsignal::exchange::build_executor;
use postsignal::persistence::build_cursor_store;
use postsignal::strategy::{Collaborators, Pipeline};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Wire the live collaborators into a pipeline
pub async fn build_pipeline(config: &AppConfig, dry_run: bool, shutdown: ShutdownHandle) -> Result<Pipeline> {
    let parts = Collaborators {
        source: Arc::new(TruthSocialSource::new(&config.source)?),
        classifier: Arc::new(LlmClassifier::new(&config.classifier)?),
        executor: build_executor(config, dry_run)?,
        notifier: build_notifier(&config.notify),
        cursor_store: build_cursor_store(&config.cursor).await?,
    };

    Ok(Pipeline::from_config(config, parts, shutdown))
}

pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,postsignal={},sqlx=warn", config.level)));

    // POSTSIGNAL_LOG_DIR wins over logging.dir; with neither, log to the console only
    let log_dir = std::env::var("POSTSIGNAL_LOG_DIR").ok().or_else(|| config.dir.clone());

    // `tracing_appender::rolling::daily` panics if it can't create the initial
    // log file, so writability is checked first.
    let file_layer = log_dir.as_deref().and_then(|log_dir| {
        if std::fs::create_dir_all(log_dir).is_err() {
            eprintln!(
                "Warning: Could not create log directory {}, file logging disabled",
                log_dir
            );
            return None;
        }

        let test_path = std::path::Path::new(log_dir).join(".postsignal_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(log_dir, "postsignal.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // Lives for the rest of the process
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    });

    let console_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });
    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
    });

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        eprintln!("Logging to: {}/postsignal.log", dir);
    }
}

pub fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
