//! Process-wide shutdown coordination
//!
//! The handle is triggered once; listeners observe it between attempts so an
//! in-flight exchange call is never cut off halfway.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Why shutdown was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Requested by the application itself
    Requested,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "interrupt"),
            ShutdownSignal::Terminate => write!(f, "terminate"),
            ShutdownSignal::Requested => write!(f, "requested"),
        }
    }
}

/// Owner side of the shutdown flag
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<Option<ShutdownSignal>>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown. Later requests keep the first signal.
    pub fn trigger(&self, signal: ShutdownSignal) {
        let first = self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(signal);
                true
            } else {
                false
            }
        });
        if first {
            info!(%signal, "shutdown requested");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observer side of the shutdown flag
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownListener {
    pub fn is_triggered(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Resolves once shutdown is requested. Never resolves if the handle is
    /// dropped without triggering.
    pub async fn cancelled(&mut self) {
        loop {
            if self.rx.borrow_and_update().is_some() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Spawn tasks that turn OS signals into a shutdown request
pub fn install_signal_handlers(handle: ShutdownHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let on_term = handle.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    on_term.trigger(ShutdownSignal::Terminate);
                }
                Err(e) => error!("failed to install SIGTERM handler: {}", e),
            }
        });
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => handle.trigger(ShutdownSignal::Interrupt),
            Err(e) => warn!("failed to install Ctrl+C handler: {}", e),
        }
    });
}
