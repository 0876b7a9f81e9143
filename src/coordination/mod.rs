//! Coordination infrastructure for the long-running poll loop

pub mod shutdown;

pub use shutdown::{install_signal_handlers, ShutdownHandle, ShutdownListener, ShutdownSignal};
