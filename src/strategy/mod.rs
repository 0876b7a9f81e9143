//! Signal-to-trade pipeline
//!
//! ## Flow
//!
//! ```text
//! fetch -> normalize -> classify -> decide -> execute -> notify -> advance cursor
//! ```
//!
//! - `normalizer` - raw payload to `Status`
//! - `classification` - provider calls with timeout and bounded retry
//! - `decision` - pure assessment to order intent mapping
//! - `execution_guard` - single-flight, retrying, idempotent order execution
//! - `pipeline` - the poll loop and cursor discipline

// =============================================================================
// Collaborator seams
// =============================================================================

pub mod traits;

pub use traits::{ClassificationProvider, Notifier, StatusSource};

// =============================================================================
// Pipeline stages
// =============================================================================

pub mod backoff;
pub mod classification;
pub mod decision;
pub mod execution_guard;
pub mod normalizer;
pub mod pipeline;

pub use backoff::RetryPolicy;
pub use classification::{ClassificationAdapter, ClassificationOutcome};
pub use decision::{decide, Decision, DecisionEngine, NoActionReason};
pub use execution_guard::{idempotency_key, outcome_message, ExecutionGuard, GuardSettings};
pub use normalizer::{normalize, strip_html};
pub use pipeline::{Collaborators, CycleReport, Pipeline, PipelineSettings, PostOutcome};
