pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod signing;
pub mod strategy;

pub use config::AppConfig;
pub use coordination::{ShutdownHandle, ShutdownSignal};
pub use domain::{Cursor, ExecutionRecord, ExecutionState, OrderIntent, SignalAssessment, Status, StatusId};
pub use error::{PostSignalError, Result};
pub use exchange::{ExecutorKind, OrderExecutor};
pub use persistence::CursorStore;
pub use strategy::{Collaborators, CycleReport, Pipeline, PostOutcome};
